use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AppointmentStatus, Minutes, format_hhmm};

fn hhmm(t: &Minutes) -> String {
    format_hhmm(*t)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("slug already taken: {0}")]
    SlugTaken(String),
    #[error("business {0} is disabled")]
    BusinessDisabled(Ulid),
    #[error("service {0} is unknown, inactive or belongs to another business")]
    InvalidService(Ulid),
    #[error("no eligible collaborator for service {service}")]
    CollaboratorNotEligible { service: Ulid },
    #[error("slot starts before the minimum advance window")]
    OutsideAdvanceWindow,
    #[error("date {0} is past the maximum booking horizon")]
    PastMaxFutureWindow(NaiveDate),
    #[error("closed on {0}")]
    DayClosed(NaiveDate),
    #[error("{} is not an offered start time on {date}", hhmm(.start))]
    OffSchedule { date: NaiveDate, start: Minutes },
    #[error("slot no longer available")]
    SlotConflict,
    #[error("malformed schedule: {0}")]
    MalformedSchedule(String),
    #[error("invalid duration: {0} minutes")]
    InvalidDuration(Minutes),
    #[error("invalid booking policy: {0}")]
    InvalidPolicy(&'static str),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("{0} and {1} belong to different businesses")]
    CrossTenant(Ulid, Ulid),
    #[error("timed out waiting for the collaborator's book")]
    Timeout,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Label used for the admissions outcome metric.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::SlugTaken(_) => "slug_taken",
            EngineError::BusinessDisabled(_) => "business_disabled",
            EngineError::InvalidService(_) => "invalid_service",
            EngineError::CollaboratorNotEligible { .. } => "not_eligible",
            EngineError::OutsideAdvanceWindow => "outside_advance_window",
            EngineError::PastMaxFutureWindow(_) => "past_max_future_window",
            EngineError::DayClosed(_) => "day_closed",
            EngineError::OffSchedule { .. } => "off_schedule",
            EngineError::SlotConflict => "slot_conflict",
            EngineError::MalformedSchedule(_) => "malformed_schedule",
            EngineError::InvalidDuration(_) => "invalid_duration",
            EngineError::InvalidPolicy(_) => "invalid_policy",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::CrossTenant(..) => "cross_tenant",
            EngineError::Timeout => "timeout",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::WalError(e.to_string())
    }
}
