use crate::model::{DaySchedule, Minutes, Span};

/// Candidate slots of one resolved day, in ascending order.
///
/// Pure and restartable: clone it to iterate again. A candidate `[t, t + d)`
/// collides with a break `[bs, be)` when `t < be && bs <= t + d`, so an
/// appointment has to finish strictly before a break begins; generation then
/// resumes at the break's end. Closing time is inclusive.
#[derive(Debug, Clone)]
pub struct Slots<'a> {
    day: &'a DaySchedule,
    duration: Minutes,
    buffer: Minutes,
    next: Minutes,
}

pub fn generate_slots(day: &DaySchedule, duration: Minutes, buffer: Minutes) -> Slots<'_> {
    Slots {
        day,
        duration,
        buffer: buffer.max(0),
        next: day.start,
    }
}

impl Slots<'_> {
    fn break_hit(&self, t: Minutes) -> Option<Minutes> {
        self.day
            .breaks
            .iter()
            .find(|brk| t < brk.end && brk.start <= t + self.duration)
            .map(|brk| brk.end)
    }
}

impl Iterator for Slots<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if !self.day.active || self.duration <= 0 {
            return None;
        }
        loop {
            let t = self.next;
            if t + self.duration > self.day.end {
                return None;
            }
            if let Some(resume) = self.break_hit(t) {
                self.next = resume;
                continue;
            }
            self.next = t + self.duration + self.buffer;
            return Some(Span::new(t, t + self.duration));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::format_hhmm;
    use proptest::prelude::*;

    fn starts(slots: Slots<'_>) -> Vec<String> {
        slots.map(|s| format_hhmm(s.start)).collect()
    }

    #[test]
    fn full_day_thirty_minute_slots() {
        let day = DaySchedule::open(540, 1080);
        let slots: Vec<Span> = generate_slots(&day, 30, 0).collect();
        assert_eq!(slots.len(), 18);
        assert_eq!(slots[0], Span::new(540, 570));
        assert_eq!(slots[17], Span::new(1050, 1080));
    }

    #[test]
    fn lunch_break_skips_slots_touching_it() {
        let day = DaySchedule::open(540, 1080).with_break(720, 780);
        let got = starts(generate_slots(&day, 30, 0));
        assert_eq!(got.len(), 15);
        assert!(got.contains(&"11:00".to_string()));
        assert!(!got.contains(&"11:30".to_string()));
        assert!(!got.contains(&"12:00".to_string()));
        assert!(!got.contains(&"12:30".to_string()));
        assert_eq!(got[5], "13:00");
    }

    #[test]
    fn buffer_spaces_candidates() {
        let day = DaySchedule::open(540, 720);
        let got = starts(generate_slots(&day, 30, 15));
        assert_eq!(got, ["09:00", "09:45", "10:30", "11:15"]);
    }

    #[test]
    fn slot_may_end_at_closing_time() {
        let day = DaySchedule::open(540, 600);
        let got: Vec<Span> = generate_slots(&day, 60, 0).collect();
        assert_eq!(got, vec![Span::new(540, 600)]);
        assert_eq!(generate_slots(&day, 61, 0).count(), 0);
    }

    #[test]
    fn closed_day_or_bad_duration_yields_nothing() {
        assert_eq!(generate_slots(&DaySchedule::closed(), 30, 0).count(), 0);
        let day = DaySchedule::open(540, 1080);
        assert_eq!(generate_slots(&day, 0, 0).count(), 0);
        assert_eq!(generate_slots(&day, -30, 0).count(), 0);
    }

    #[test]
    fn restartable() {
        let day = DaySchedule::open(540, 1080).with_break(720, 780);
        let slots = generate_slots(&day, 45, 10);
        let first: Vec<Span> = slots.clone().collect();
        let second: Vec<Span> = slots.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn break_at_opening_shifts_first_slot() {
        let day = DaySchedule::open(540, 720).with_break(540, 600);
        assert_eq!(starts(generate_slots(&day, 30, 0))[0], "10:00");
    }

    fn arb_day() -> impl Strategy<Value = DaySchedule> {
        (0..1200i32, 30..600i32, proptest::collection::vec((0..600i32, 5..120i32), 0..4)).prop_map(
            |(start, len, raw_breaks)| {
                let end = (start + len).min(1440);
                let mut day = DaySchedule::open(start, end);
                let mut cursor = start;
                let mut offsets = raw_breaks;
                offsets.sort();
                for (gap, width) in offsets {
                    let bs = cursor + gap % 120;
                    let be = bs + width;
                    if be > end {
                        break;
                    }
                    day.breaks.push(Span::new(bs, be));
                    cursor = be;
                }
                day
            },
        )
    }

    proptest! {
        #[test]
        fn slots_stay_inside_hours_and_clear_of_breaks(
            day in arb_day(),
            duration in 5..180i32,
            buffer in 0..60i32,
        ) {
            let slots: Vec<Span> = generate_slots(&day, duration, buffer).collect();
            for s in &slots {
                prop_assert!(s.start >= day.start && s.end <= day.end);
                prop_assert_eq!(s.duration(), duration);
                for brk in &day.breaks {
                    prop_assert!(!s.overlaps(brk), "slot {} overlaps break {}", s, brk);
                }
            }
            for pair in slots.windows(2) {
                prop_assert!(pair[1].start >= pair[0].end + buffer);
            }
        }
    }
}
