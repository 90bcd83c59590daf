use chrono::{Datelike, Days, NaiveDate};

use crate::limits::{MAX_BREAKS_PER_DAY, MINUTES_PER_DAY};
use crate::model::*;

use super::EngineError;

/// Which layer produced a resolved day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSource {
    CollaboratorOverride,
    BusinessOverride,
    CollaboratorWeekly,
    BusinessWeekly,
}

impl ScheduleSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleSource::CollaboratorOverride => "collaborator_override",
            ScheduleSource::BusinessOverride => "business_override",
            ScheduleSource::CollaboratorWeekly => "collaborator_weekly",
            ScheduleSource::BusinessWeekly => "business_weekly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDay {
    pub day: DaySchedule,
    pub source: ScheduleSource,
}

/// Effective hours for `date`. First match wins, breaks are never merged:
/// collaborator override, business override, collaborator week, business week.
pub fn resolve(business: &Business, collaborator: Option<&Collaborator>, date: NaiveDate) -> ResolvedDay {
    let found = |day: &DaySchedule, source| ResolvedDay {
        day: day.clone(),
        source,
    };
    if let Some(day) = collaborator.and_then(|c| c.overrides.get(&date)) {
        return found(day, ScheduleSource::CollaboratorOverride);
    }
    if let Some(day) = business.overrides.get(&date) {
        return found(day, ScheduleSource::BusinessOverride);
    }
    if let Some(week) = collaborator.and_then(|c| c.schedule.as_ref()) {
        return found(week.day(date.weekday()), ScheduleSource::CollaboratorWeekly);
    }
    found(business.schedule.day(date.weekday()), ScheduleSource::BusinessWeekly)
}

/// Dates covered by a bulk override anchored at `anchor`.
/// Week is Monday through Sunday; month is the whole calendar month.
pub fn expand_scope(anchor: NaiveDate, scope: OverrideScope) -> Vec<NaiveDate> {
    match scope {
        OverrideScope::Day => vec![anchor],
        OverrideScope::Week => {
            let monday = anchor - Days::new(u64::from(anchor.weekday().num_days_from_monday()));
            monday.iter_days().take(7).collect()
        }
        OverrideScope::Month => {
            let first = anchor.with_day(1).unwrap_or(anchor);
            first
                .iter_days()
                .take_while(|d| d.month() == anchor.month())
                .collect()
        }
    }
}

/// Reject days that would break the generator's assumptions.
pub fn validate_day(day: &DaySchedule) -> Result<(), EngineError> {
    let malformed = |msg: String| Err(EngineError::MalformedSchedule(msg));
    if !(0..=MINUTES_PER_DAY).contains(&day.start) || !(0..=MINUTES_PER_DAY).contains(&day.end) {
        return malformed(format!("hours {} outside the day", day.hours()));
    }
    if day.breaks.len() > MAX_BREAKS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many breaks in one day"));
    }
    if !day.active {
        return Ok(());
    }
    if day.start >= day.end {
        return malformed(format!(
            "start {} is not before end {}",
            format_hhmm(day.start),
            format_hhmm(day.end)
        ));
    }
    let mut previous_end = day.start;
    for brk in &day.breaks {
        if brk.start >= brk.end {
            return malformed(format!("empty break {brk}"));
        }
        if !day.hours().contains_span(brk) {
            return malformed(format!("break {brk} outside working hours {}", day.hours()));
        }
        if brk.start < previous_end {
            return malformed(format!("break {brk} overlaps or is out of order"));
        }
        previous_end = brk.end;
    }
    Ok(())
}

pub fn validate_week(week: &WeeklySchedule) -> Result<(), EngineError> {
    week.days.iter().try_for_each(validate_day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use ulid::Ulid;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn business() -> Business {
        Business {
            id: Ulid::new(),
            slug: "barbearia".into(),
            name: "Barbearia".into(),
            schedule: WeeklySchedule::default(),
            overrides: BTreeMap::new(),
            policy: BookingPolicy::default(),
            active: true,
        }
    }

    fn collaborator(business_id: Ulid) -> Collaborator {
        Collaborator {
            id: Ulid::new(),
            business_id,
            name: "Carlos".into(),
            active: true,
            schedule: None,
            overrides: BTreeMap::new(),
        }
    }

    // 2024-01-15 is a Monday.

    #[test]
    fn falls_back_to_business_week() {
        let b = business();
        let c = collaborator(b.id);
        let r = resolve(&b, Some(&c), date("2024-01-15"));
        assert_eq!(r.source, ScheduleSource::BusinessWeekly);
        assert_eq!(r.day, DaySchedule::open(540, 1080));

        let sunday = resolve(&b, Some(&c), date("2024-01-21"));
        assert!(!sunday.day.active);
    }

    #[test]
    fn precedence_order() {
        let mut b = business();
        let mut c = collaborator(b.id);
        let d = date("2024-01-15");

        c.schedule = Some(WeeklySchedule::uniform(DaySchedule::open(600, 900)));
        assert_eq!(resolve(&b, Some(&c), d).source, ScheduleSource::CollaboratorWeekly);

        b.overrides.insert(d, DaySchedule::open(480, 720));
        let r = resolve(&b, Some(&c), d);
        assert_eq!(r.source, ScheduleSource::BusinessOverride);
        assert_eq!(r.day.start, 480);

        c.overrides.insert(d, DaySchedule::closed());
        let r = resolve(&b, Some(&c), d);
        assert_eq!(r.source, ScheduleSource::CollaboratorOverride);
        assert!(!r.day.active);

        // Without a collaborator only business layers apply.
        assert_eq!(resolve(&b, None, d).source, ScheduleSource::BusinessOverride);
    }

    #[test]
    fn override_breaks_are_not_merged() {
        let mut b = business();
        b.schedule = WeeklySchedule::uniform(DaySchedule::open(540, 1080).with_break(720, 780));
        let d = date("2024-01-16");
        b.overrides.insert(d, DaySchedule::open(540, 1080));
        assert!(resolve(&b, None, d).day.breaks.is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let mut b = business();
        let d = date("2024-01-17");
        b.overrides.insert(d, DaySchedule::open(480, 600));
        let first = resolve(&b, None, d);
        b.overrides.insert(d, DaySchedule::open(480, 600));
        assert_eq!(resolve(&b, None, d), first);
    }

    #[test]
    fn week_scope_is_monday_to_sunday() {
        let dates = expand_scope(date("2024-01-18"), OverrideScope::Week);
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], date("2024-01-15"));
        assert_eq!(dates[6], date("2024-01-21"));

        // Anchor on a Sunday stays in the same week.
        let dates = expand_scope(date("2024-01-21"), OverrideScope::Week);
        assert_eq!(dates[0], date("2024-01-15"));
    }

    #[test]
    fn month_scope_covers_calendar_month() {
        let feb = expand_scope(date("2024-02-10"), OverrideScope::Month);
        assert_eq!(feb.len(), 29);
        assert_eq!(feb[0], date("2024-02-01"));
        assert_eq!(feb[28], date("2024-02-29"));
        assert_eq!(expand_scope(date("2023-04-30"), OverrideScope::Month).len(), 30);
        assert_eq!(expand_scope(date("2024-04-30"), OverrideScope::Day), vec![date("2024-04-30")]);
    }

    #[test]
    fn validate_rejects_malformed_days() {
        assert!(validate_day(&DaySchedule::open(540, 1080).with_break(720, 780)).is_ok());
        assert!(validate_day(&DaySchedule::closed()).is_ok());

        let bad = [
            DaySchedule::open(1080, 540),
            DaySchedule::open(540, 540),
            DaySchedule::open(540, 1500),
            DaySchedule::open(540, 1080).with_break(500, 600),
            DaySchedule::open(540, 1080).with_break(1000, 1100),
            DaySchedule::open(540, 1080).with_break(720, 780).with_break(760, 800),
            DaySchedule::open(540, 1080).with_break(900, 915).with_break(720, 780),
        ];
        for day in &bad {
            assert!(
                matches!(validate_day(day), Err(EngineError::MalformedSchedule(_))),
                "expected malformed: {day:?}"
            );
        }

        let mut empty_break = DaySchedule::open(540, 1080);
        empty_break.breaks.push(Span { start: 700, end: 700 });
        assert!(validate_day(&empty_break).is_err());
    }

    #[test]
    fn break_touching_closing_time_is_allowed() {
        assert!(validate_day(&DaySchedule::open(540, 1080).with_break(1020, 1080)).is_ok());
        assert!(validate_day(&DaySchedule::open(540, 1080).with_break(540, 600)).is_ok());
    }
}
