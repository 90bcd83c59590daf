//! Hard limits enforced by the engine and the tenant manager.

use crate::model::Minutes;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_BUSINESSES_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 500;
pub const MAX_COLLABORATORS_PER_BUSINESS: usize = 500;
pub const MAX_CLIENTS_PER_TENANT: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_CONTACT_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2000;

pub const MAX_BREAKS_PER_DAY: usize = 16;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 500;

/// Scheduling granularity: service durations and buffers are multiples of this.
pub const SLOT_GRANULARITY_MINUTES: Minutes = 5;
pub const MINUTES_PER_DAY: Minutes = 24 * 60;

pub const MAX_BUFFER_MINUTES: Minutes = 240;
pub const MAX_MIN_ADVANCE_HOURS: u32 = 720;
pub const MAX_FUTURE_DAYS: u32 = 730;

pub const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 500;
