use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes past midnight — the only time-of-day type.
pub type Minutes = i32;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The span extended by a trailing buffer (idle time after it ends).
    pub fn with_trailing(&self, buffer: Minutes) -> Span {
        Span {
            start: self.start,
            end: self.end + buffer.max(0),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

// ── Boundary parsing ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("bad time {0:?} (expected HH:MM)")]
    Time(String),
    #[error("bad interval {0:?} (expected HH:MM-HH:MM)")]
    Interval(String),
    #[error("bad weekday {0:?}")]
    Weekday(String),
    #[error("bad appointment status {0:?}")]
    Status(String),
    #[error("bad override scope {0:?} (expected day, week or month)")]
    Scope(String),
}

/// Parse `"HH:MM"` into minutes past midnight. `"24:00"` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Result<Minutes, ParseError> {
    let bad = || ParseError::Time(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
    let h: Minutes = h.parse().map_err(|_| bad())?;
    let m: Minutes = m.parse().map_err(|_| bad())?;
    if !(0..60).contains(&m) || !(0..=24).contains(&h) || (h == 24 && m != 0) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

pub fn format_hhmm(t: Minutes) -> String {
    format!("{:02}:{:02}", t / 60, t % 60)
}

/// Parse a comma separated break list: `"12:00-13:00,15:00-15:15"`. Empty input is no breaks.
pub fn parse_breaks(s: &str) -> Result<Vec<Span>, ParseError> {
    let mut breaks = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (a, b) = part
            .split_once('-')
            .ok_or_else(|| ParseError::Interval(part.to_string()))?;
        let (start, end) = (parse_hhmm(a)?, parse_hhmm(b)?);
        if start >= end {
            return Err(ParseError::Interval(part.to_string()));
        }
        breaks.push(Span::new(start, end));
    }
    Ok(breaks)
}

/// Weekday names as used by the dashboard (English or Portuguese abbreviations).
pub fn parse_weekday(s: &str) -> Result<Weekday, ParseError> {
    let lower = s.trim().to_lowercase();
    let pt = match lower.as_str() {
        "seg" | "segunda" => Some(Weekday::Mon),
        "ter" | "terca" | "terça" => Some(Weekday::Tue),
        "qua" | "quarta" => Some(Weekday::Wed),
        "qui" | "quinta" => Some(Weekday::Thu),
        "sex" | "sexta" => Some(Weekday::Fri),
        "sab" | "sáb" | "sabado" | "sábado" => Some(Weekday::Sat),
        "dom" | "domingo" => Some(Weekday::Sun),
        _ => None,
    };
    match pt {
        Some(day) => Ok(day),
        None => lower
            .parse::<Weekday>()
            .map_err(|_| ParseError::Weekday(s.to_string())),
    }
}

// ── Schedules ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub active: bool,
    pub start: Minutes,
    pub end: Minutes,
    /// Sorted by start, pairwise disjoint, inside `[start, end]`.
    pub breaks: Vec<Span>,
}

impl DaySchedule {
    pub fn open(start: Minutes, end: Minutes) -> Self {
        Self {
            active: true,
            start,
            end,
            breaks: Vec::new(),
        }
    }

    pub fn closed() -> Self {
        Self {
            active: false,
            start: 9 * 60,
            end: 18 * 60,
            breaks: Vec::new(),
        }
    }

    pub fn with_break(mut self, start: Minutes, end: Minutes) -> Self {
        self.breaks.push(Span::new(start, end));
        self
    }

    pub fn hours(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
    }
}

/// One `DaySchedule` per weekday, indexed from Monday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub days: [DaySchedule; 7],
}

impl WeeklySchedule {
    pub fn uniform(day: DaySchedule) -> Self {
        Self {
            days: std::array::from_fn(|_| day.clone()),
        }
    }

    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn set_day(&mut self, weekday: Weekday, day: DaySchedule) {
        self.days[weekday.num_days_from_monday() as usize] = day;
    }
}

impl Default for WeeklySchedule {
    /// Monday to Saturday 09:00–18:00, Sunday closed.
    fn default() -> Self {
        let mut week = Self::uniform(DaySchedule::open(9 * 60, 18 * 60));
        week.set_day(Weekday::Sun, DaySchedule::closed());
        week
    }
}

/// Date-keyed schedule overrides. Last write wins per date.
pub type OverrideMap = BTreeMap<NaiveDate, DaySchedule>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideScope {
    Day,
    Week,
    Month,
}

impl FromStr for OverrideScope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" | "dia" => Ok(OverrideScope::Day),
            "week" | "semana" => Ok(OverrideScope::Week),
            "month" | "mes" | "mês" => Ok(OverrideScope::Month),
            _ => Err(ParseError::Scope(s.to_string())),
        }
    }
}

/// Who a schedule or override belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleOwner {
    Business(Ulid),
    Collaborator(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Idle time enforced after each appointment.
    pub buffer_minutes: Minutes,
    pub min_advance_hours: u32,
    pub max_future_days: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            buffer_minutes: 15,
            min_advance_hours: 2,
            max_future_days: 60,
        }
    }
}

// ── Tenant entities ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Business {
    pub id: Ulid,
    pub slug: String,
    pub name: String,
    pub schedule: WeeklySchedule,
    pub overrides: OverrideMap,
    pub policy: BookingPolicy,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub duration_minutes: Minutes,
    pub price_cents: i64,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collaborator {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub active: bool,
    /// Replaces the business week when present.
    pub schedule: Option<WeeklySchedule>,
    pub overrides: OverrideMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub total_appointments: u32,
    pub total_spent_cents: i64,
    pub last_appointment: Option<NaiveDate>,
    pub no_shows: u32,
}

impl ClientStats {
    /// Full rebuild from a client's appointments.
    pub fn recompute<'a>(appointments: impl IntoIterator<Item = &'a Appointment>) -> Self {
        let mut stats = Self::default();
        for appt in appointments {
            stats.record_admission(appt);
        }
        stats
    }

    pub fn record_admission(&mut self, appt: &Appointment) {
        self.last_appointment = self.last_appointment.max(Some(appt.date));
        self.count(appt.status, appt.price_cents, true);
    }

    pub fn record_transition(&mut self, price_cents: i64, from: AppointmentStatus, to: AppointmentStatus) {
        self.count(from, price_cents, false);
        self.count(to, price_cents, true);
    }

    fn count(&mut self, status: AppointmentStatus, price_cents: i64, add: bool) {
        match (status, add) {
            (AppointmentStatus::Attended, true) => {
                self.total_appointments += 1;
                self.total_spent_cents += price_cents;
            }
            (AppointmentStatus::Attended, false) => {
                self.total_appointments = self.total_appointments.saturating_sub(1);
                self.total_spent_cents -= price_cents;
            }
            (AppointmentStatus::NoShow, true) => self.no_shows += 1,
            (AppointmentStatus::NoShow, false) => self.no_shows = self.no_shows.saturating_sub(1),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub stats: ClientStats,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Attended,
    NoShow,
    Cancelled,
    Rescheduled,
}

impl AppointmentStatus {
    /// Statuses that occupy the collaborator's time.
    pub fn blocks(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::Attended
        )
    }

    pub fn can_transition_to(self, to: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match self {
            Scheduled => matches!(to, Confirmed | Attended | NoShow | Cancelled | Rescheduled),
            Confirmed => matches!(to, Attended | NoShow | Cancelled | Rescheduled),
            Attended => to == NoShow,
            NoShow => to == Attended,
            Cancelled | Rescheduled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Attended => "attended",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" | "agendado" => Ok(AppointmentStatus::Scheduled),
            "confirmed" | "confirmado" => Ok(AppointmentStatus::Confirmed),
            "attended" | "compareceu" => Ok(AppointmentStatus::Attended),
            "no_show" | "no-show" | "noshow" | "faltou" => Ok(AppointmentStatus::NoShow),
            "cancelled" | "canceled" | "cancelado" => Ok(AppointmentStatus::Cancelled),
            "rescheduled" | "remarcado" => Ok(AppointmentStatus::Rescheduled),
            _ => Err(ParseError::Status(s.to_string())),
        }
    }
}

/// Registered client or a guest snapshot taken at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRef {
    Registered(Ulid),
    Guest { name: String, contact: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub collaborator_id: Ulid,
    pub client: ClientRef,
    pub date: NaiveDate,
    /// `end = start + service duration`, frozen at admission.
    pub span: Span,
    pub status: AppointmentStatus,
    /// Service price copied at admission.
    pub price_cents: i64,
    pub notes: Option<String>,
}

impl Appointment {
    pub fn blocks(&self) -> bool {
        self.status.blocks()
    }

    pub fn client_id(&self) -> Option<Ulid> {
        match self.client {
            ClientRef::Registered(id) => Some(id),
            ClientRef::Guest { .. } => None,
        }
    }
}

/// Which professional the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorChoice {
    Specific(Ulid),
    Any,
}

impl fmt::Display for CollaboratorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorChoice::Specific(id) => write!(f, "{id}"),
            CollaboratorChoice::Any => f.write_str("any"),
        }
    }
}

/// Everything the public booking page submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub business_id: Ulid,
    pub service_id: Ulid,
    pub collaborator: CollaboratorChoice,
    pub date: NaiveDate,
    pub start: Minutes,
    pub client: ClientRef,
    pub notes: Option<String>,
}

// ── Journal records ──────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessCreated {
        id: Ulid,
        slug: String,
        name: String,
        schedule: WeeklySchedule,
        policy: BookingPolicy,
    },
    BusinessScheduleSet {
        id: Ulid,
        schedule: WeeklySchedule,
    },
    BookingPolicySet {
        id: Ulid,
        policy: BookingPolicy,
    },
    BusinessDisabled {
        id: Ulid,
    },
    ServiceCreated {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
    },
    ServiceUpdated {
        id: Ulid,
        business_id: Ulid,
        name: String,
        duration_minutes: Minutes,
        price_cents: i64,
        active: bool,
    },
    CollaboratorCreated {
        id: Ulid,
        business_id: Ulid,
        name: String,
    },
    CollaboratorActiveSet {
        id: Ulid,
        business_id: Ulid,
        active: bool,
    },
    CollaboratorScheduleSet {
        id: Ulid,
        business_id: Ulid,
        schedule: Option<WeeklySchedule>,
    },
    EligibilityGranted {
        business_id: Ulid,
        collaborator_id: Ulid,
        service_id: Ulid,
    },
    EligibilityRevoked {
        business_id: Ulid,
        collaborator_id: Ulid,
        service_id: Ulid,
    },
    OverridesApplied {
        business_id: Ulid,
        owner: ScheduleOwner,
        dates: Vec<NaiveDate>,
        day: DaySchedule,
    },
    OverrideCleared {
        business_id: Ulid,
        owner: ScheduleOwner,
        date: NaiveDate,
    },
    ClientCreated {
        id: Ulid,
        business_id: Ulid,
        name: String,
        phone: Option<String>,
        email: Option<String>,
    },
    AppointmentAdmitted {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: Ulid,
        business_id: Ulid,
        collaborator_id: Ulid,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

impl Event {
    /// The business an event belongs to; used to route notifications.
    pub fn business_id(&self) -> Ulid {
        match self {
            Event::BusinessCreated { id, .. }
            | Event::BusinessScheduleSet { id, .. }
            | Event::BookingPolicySet { id, .. }
            | Event::BusinessDisabled { id } => *id,
            Event::ServiceCreated { business_id, .. }
            | Event::ServiceUpdated { business_id, .. }
            | Event::CollaboratorCreated { business_id, .. }
            | Event::CollaboratorActiveSet { business_id, .. }
            | Event::CollaboratorScheduleSet { business_id, .. }
            | Event::EligibilityGranted { business_id, .. }
            | Event::EligibilityRevoked { business_id, .. }
            | Event::OverridesApplied { business_id, .. }
            | Event::OverrideCleared { business_id, .. }
            | Event::ClientCreated { business_id, .. }
            | Event::AppointmentStatusChanged { business_id, .. } => *business_id,
            Event::AppointmentAdmitted { appointment } => appointment.business_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A slot a client can pick, with the collaborators free at that time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookableSlot {
    pub span: Span,
    pub collaborators: Vec<Ulid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(540, 570);
        let b = Span::new(560, 600);
        let c = Span::new(570, 600);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert_eq!(a.duration(), 30);
    }

    #[test]
    fn span_trailing_buffer() {
        let a = Span::new(540, 570);
        assert_eq!(a.with_trailing(15), Span::new(540, 585));
        assert_eq!(a.with_trailing(0), a);
        assert!(a.with_trailing(15).overlaps(&Span::new(580, 610)));
    }

    #[test]
    fn span_contains_span() {
        let day = Span::new(540, 1080);
        assert!(day.contains_span(&Span::new(720, 780)));
        assert!(day.contains_span(&day));
        assert!(!day.contains_span(&Span::new(500, 600)));
    }

    #[test]
    fn hhmm_roundtrip_and_bounds() {
        assert_eq!(parse_hhmm("09:00").unwrap(), 540);
        assert_eq!(parse_hhmm("17:30").unwrap(), 1050);
        assert_eq!(parse_hhmm("24:00").unwrap(), 1440);
        assert_eq!(format_hhmm(1050), "17:30");
        assert_eq!(format_hhmm(5), "00:05");
        assert!(parse_hhmm("24:30").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("noon").is_err());
    }

    #[test]
    fn breaks_parse() {
        let breaks = parse_breaks("12:00-13:00, 15:00-15:15").unwrap();
        assert_eq!(breaks, vec![Span::new(720, 780), Span::new(900, 915)]);
        assert!(parse_breaks("").unwrap().is_empty());
        assert!(parse_breaks("13:00-12:00").is_err());
        assert!(parse_breaks("12:00").is_err());
    }

    #[test]
    fn weekday_names() {
        assert_eq!(parse_weekday("seg").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("Sábado").unwrap(), Weekday::Sat);
        assert_eq!(parse_weekday("sunday").unwrap(), Weekday::Sun);
        assert_eq!(parse_weekday("fri").unwrap(), Weekday::Fri);
        assert!(parse_weekday("someday").is_err());
    }

    #[test]
    fn default_week_closes_sunday() {
        let week = WeeklySchedule::default();
        assert!(week.day(Weekday::Mon).active);
        assert!(week.day(Weekday::Sat).active);
        assert!(!week.day(Weekday::Sun).active);
        assert_eq!(week.day(Weekday::Wed).hours(), Span::new(540, 1080));
    }

    #[test]
    fn status_aliases() {
        assert_eq!("faltou".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::NoShow);
        assert_eq!("compareceu".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::Attended);
        assert_eq!("CANCELLED".parse::<AppointmentStatus>().unwrap(), AppointmentStatus::Cancelled);
        assert!("done".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn blocking_statuses() {
        assert!(AppointmentStatus::Scheduled.blocks());
        assert!(AppointmentStatus::Confirmed.blocks());
        assert!(AppointmentStatus::Attended.blocks());
        assert!(!AppointmentStatus::NoShow.blocks());
        assert!(!AppointmentStatus::Cancelled.blocks());
        assert!(!AppointmentStatus::Rescheduled.blocks());
    }

    #[test]
    fn terminal_statuses_cannot_move() {
        use AppointmentStatus::*;
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Attended));
        assert!(NoShow.can_transition_to(Attended));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert!(!Rescheduled.can_transition_to(Confirmed));
        assert!(!Attended.can_transition_to(Scheduled));
        assert!(!Scheduled.can_transition_to(Scheduled));
    }

    fn appt(date: &str, status: AppointmentStatus, price: i64) -> Appointment {
        Appointment {
            id: Ulid::new(),
            business_id: Ulid::new(),
            service_id: Ulid::new(),
            collaborator_id: Ulid::new(),
            client: ClientRef::Registered(Ulid::new()),
            date: date.parse().unwrap(),
            span: Span::new(540, 570),
            status,
            price_cents: price,
            notes: None,
        }
    }

    #[test]
    fn client_stats_incremental_matches_recompute() {
        let mut a = appt("2024-01-24", AppointmentStatus::Scheduled, 8000);
        let b = appt("2024-01-20", AppointmentStatus::Attended, 4500);
        let c = appt("2024-01-22", AppointmentStatus::Scheduled, 4000);

        let mut stats = ClientStats::default();
        stats.record_admission(&a);
        stats.record_admission(&b);
        stats.record_admission(&c);
        stats.record_transition(a.price_cents, a.status, AppointmentStatus::Attended);
        a.status = AppointmentStatus::Attended;
        stats.record_transition(c.price_cents, AppointmentStatus::Scheduled, AppointmentStatus::NoShow);
        let c = Appointment { status: AppointmentStatus::NoShow, ..c };

        assert_eq!(stats, ClientStats::recompute([&a, &b, &c]));
        assert_eq!(stats.total_appointments, 2);
        assert_eq!(stats.total_spent_cents, 12500);
        assert_eq!(stats.no_shows, 1);
        assert_eq!(stats.last_appointment, Some("2024-01-24".parse().unwrap()));
    }

    #[test]
    fn client_stats_correction_reverses() {
        let mut stats = ClientStats::default();
        stats.record_transition(4500, AppointmentStatus::Scheduled, AppointmentStatus::Attended);
        stats.record_transition(4500, AppointmentStatus::Attended, AppointmentStatus::NoShow);
        assert_eq!(stats.total_appointments, 0);
        assert_eq!(stats.total_spent_cents, 0);
        assert_eq!(stats.no_shows, 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::OverridesApplied {
            business_id: Ulid::new(),
            owner: ScheduleOwner::Collaborator(Ulid::new()),
            dates: vec!["2024-02-29".parse().unwrap()],
            day: DaySchedule::open(480, 720).with_break(600, 615),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
