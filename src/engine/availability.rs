use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub fn slot_datetime(date: NaiveDate, start: Minutes) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(start))
}

/// Booking-window check shared by the filter and admission.
pub fn window_check(
    date: NaiveDate,
    start: Minutes,
    now: NaiveDateTime,
    policy: &BookingPolicy,
) -> Result<(), EngineError> {
    let earliest = now + Duration::hours(i64::from(policy.min_advance_hours));
    if slot_datetime(date, start) < earliest {
        return Err(EngineError::OutsideAdvanceWindow);
    }
    let horizon = now.date() + Duration::days(i64::from(policy.max_future_days));
    if date > horizon {
        return Err(EngineError::PastMaxFutureWindow(date));
    }
    Ok(())
}

/// True when no blocking appointment collides with `span`. Both sides are
/// extended by the trailing buffer before the half-open overlap test.
pub fn is_free(span: &Span, existing: &[Appointment], buffer: Minutes) -> bool {
    let wanted = span.with_trailing(buffer);
    !existing
        .iter()
        .filter(|a| a.blocks())
        .any(|a| a.span.with_trailing(buffer).overlaps(&wanted))
}

/// Drop candidates that conflict with `existing` or fall outside the booking window.
pub fn filter_available(
    candidates: impl IntoIterator<Item = Span>,
    date: NaiveDate,
    existing: &[Appointment],
    now: NaiveDateTime,
    policy: &BookingPolicy,
) -> Vec<Span> {
    candidates
        .into_iter()
        .filter(|span| is_free(span, existing, policy.buffer_minutes))
        .filter(|span| window_check(date, span.start, now, policy).is_ok())
        .collect()
}

/// Union of per-collaborator free slots, listing who is free at each one.
/// Input order of collaborators is preserved inside each slot.
pub fn merge_any(per_collaborator: Vec<(Ulid, Vec<Span>)>) -> Vec<BookableSlot> {
    let mut merged: BTreeMap<Span, Vec<Ulid>> = BTreeMap::new();
    for (collaborator, spans) in per_collaborator {
        for span in spans {
            merged.entry(span).or_default().push(collaborator);
        }
    }
    merged
        .into_iter()
        .map(|(span, collaborators)| BookableSlot { span, collaborators })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::slots::generate_slots;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn at(d: &str, hhmm: &str) -> NaiveDateTime {
        slot_datetime(date(d), parse_hhmm(hhmm).unwrap())
    }

    fn appt(day: &str, start: Minutes, end: Minutes, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: Ulid::new(),
            business_id: Ulid::nil(),
            service_id: Ulid::nil(),
            collaborator_id: Ulid::nil(),
            client: ClientRef::Guest {
                name: "Ana".into(),
                contact: None,
            },
            date: date(day),
            span: Span::new(start, end),
            status,
            price_cents: 4500,
            notes: None,
        }
    }

    fn no_window() -> BookingPolicy {
        BookingPolicy {
            buffer_minutes: 0,
            min_advance_hours: 0,
            max_future_days: 365,
        }
    }

    #[test]
    fn existing_appointment_removes_overlapping_slots() {
        let day = DaySchedule::open(540, 720);
        let existing = [appt("2024-01-15", 600, 630, AppointmentStatus::Scheduled)];
        let free = filter_available(
            generate_slots(&day, 30, 0),
            date("2024-01-15"),
            &existing,
            at("2024-01-01", "08:00"),
            &no_window(),
        );
        assert!(!free.iter().any(|s| s.start == 600));
        assert!(free.iter().any(|s| s.start == 570));
        assert!(free.iter().any(|s| s.start == 630));
        assert_eq!(free.len(), 5);
    }

    #[test]
    fn buffer_blocks_adjacent_slots() {
        let policy = BookingPolicy {
            buffer_minutes: 15,
            ..no_window()
        };
        let existing = [appt("2024-01-15", 600, 630, AppointmentStatus::Confirmed)];
        // Existing [10:00, 10:45) with buffer; candidate 10:30 collides.
        assert!(!is_free(&Span::new(630, 660), &existing, policy.buffer_minutes));
        // Candidate 09:30 + buffer reaches 10:15 and collides with 10:00.
        assert!(!is_free(&Span::new(570, 600), &existing, policy.buffer_minutes));
        assert!(is_free(&Span::new(645, 675), &existing, policy.buffer_minutes));
        assert!(is_free(&Span::new(525, 555), &existing, policy.buffer_minutes));
    }

    #[test]
    fn non_blocking_statuses_free_the_slot() {
        for status in [
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
            AppointmentStatus::Rescheduled,
        ] {
            let existing = [appt("2024-01-15", 540, 570, status)];
            assert!(is_free(&Span::new(540, 570), &existing, 0), "{status} should not block");
        }
        let attended = [appt("2024-01-15", 540, 570, AppointmentStatus::Attended)];
        assert!(!is_free(&Span::new(540, 570), &attended, 0));
    }

    #[test]
    fn min_advance_cuts_same_day_slots() {
        let day = DaySchedule::open(540, 1080);
        let policy = BookingPolicy {
            min_advance_hours: 2,
            ..no_window()
        };
        let now = at("2024-01-15", "14:00");
        let today = filter_available(generate_slots(&day, 30, 0), date("2024-01-15"), &[], now, &policy);
        assert_eq!(today.first().map(|s| s.start), Some(960));
        assert_eq!(today.len(), 4);

        let tomorrow = filter_available(generate_slots(&day, 30, 0), date("2024-01-16"), &[], now, &policy);
        assert_eq!(tomorrow.len(), 18);
    }

    #[test]
    fn horizon_drops_whole_day() {
        let policy = BookingPolicy {
            max_future_days: 60,
            ..no_window()
        };
        let now = at("2024-01-01", "09:00");
        assert!(window_check(date("2024-03-01"), 540, now, &policy).is_ok());
        assert_eq!(
            window_check(date("2024-03-02"), 540, now, &policy),
            Err(EngineError::PastMaxFutureWindow(date("2024-03-02")))
        );
        let day = DaySchedule::open(540, 1080);
        assert!(filter_available(generate_slots(&day, 30, 0), date("2024-03-02"), &[], now, &policy).is_empty());
    }

    #[test]
    fn past_slots_are_outside_window() {
        let now = at("2024-01-15", "10:00");
        assert_eq!(
            window_check(date("2024-01-15"), 540, now, &no_window()),
            Err(EngineError::OutsideAdvanceWindow)
        );
        assert!(window_check(date("2024-01-15"), 600, now, &no_window()).is_ok());
    }

    #[test]
    fn merge_lists_free_collaborators_per_slot() {
        let a = Ulid::from_parts(1, 1);
        let b = Ulid::from_parts(1, 2);
        let merged = merge_any(vec![
            (a, vec![Span::new(540, 570), Span::new(600, 630)]),
            (b, vec![Span::new(540, 570), Span::new(570, 600)]),
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].span, Span::new(540, 570));
        assert_eq!(merged[0].collaborators, vec![a, b]);
        assert_eq!(merged[1].collaborators, vec![b]);
        assert_eq!(merged[2].collaborators, vec![a]);
    }
}
