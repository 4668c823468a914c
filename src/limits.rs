//! Hard input limits. Every externally supplied value is bounded before it
//! reaches the engine or the WAL.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_DEPARTMENT_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_ROLE_LABEL_LEN: usize = 128;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 512;

pub const MAX_SKILLS: usize = 64;
pub const MAX_SKILL_LEN: usize = 64;

pub const MAX_USERS: usize = 100_000;
pub const MAX_PROJECTS: usize = 100_000;
pub const MAX_ASSIGNMENTS_PER_ENGINEER: usize = 1024;

/// Widest accepted assignment or project window, in days (~10 years).
pub const MAX_RANGE_DAYS: i64 = 3_650;

pub const MAX_TEAM_SIZE: u32 = 10_000;
pub const MAX_CAPACITY_PERCENT: u32 = 1_000;

// HTTP transport bounds.
pub const MAX_REQUEST_LINE_BYTES: usize = 8 * 1024;
pub const MAX_HEADER_COUNT: usize = 64;
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Default bearer-token lifetime: 7 days.
pub const DEFAULT_SESSION_TTL_MS: i64 = 7 * 24 * 3_600_000;
