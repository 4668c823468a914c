use std::sync::LazyLock;

use regex::Regex;

use crate::limits::*;
use crate::model::DateRange;

use super::EngineError;

// Deliberately permissive: one `@`, non-empty local part, dotted domain.
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(EngineError::Validation("invalid email format"));
    }
    Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<(), EngineError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(EngineError::Validation("password too short"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(EngineError::LimitExceeded("password too long"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_department(department: &str) -> Result<(), EngineError> {
    if department.len() > MAX_DEPARTMENT_LEN {
        return Err(EngineError::LimitExceeded("department too long"));
    }
    Ok(())
}

pub(crate) fn validate_description(description: &str) -> Result<(), EngineError> {
    if description.trim().is_empty() {
        return Err(EngineError::Validation("description must not be empty"));
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

pub(crate) fn validate_skills(skills: &[String]) -> Result<(), EngineError> {
    if skills.len() > MAX_SKILLS {
        return Err(EngineError::LimitExceeded("too many skills"));
    }
    if skills.iter().any(|s| s.is_empty() || s.len() > MAX_SKILL_LEN) {
        return Err(EngineError::Validation("skill entries must be 1–64 bytes"));
    }
    Ok(())
}

pub(crate) fn validate_max_capacity(max_capacity: u32) -> Result<(), EngineError> {
    if max_capacity > MAX_CAPACITY_PERCENT {
        return Err(EngineError::LimitExceeded("max capacity out of range"));
    }
    Ok(())
}

pub(crate) fn validate_team_size(team_size: u32) -> Result<(), EngineError> {
    if team_size < 1 {
        return Err(EngineError::Validation("team size must be at least 1"));
    }
    if team_size > MAX_TEAM_SIZE {
        return Err(EngineError::LimitExceeded("team size out of range"));
    }
    Ok(())
}

/// Allocation percentage bounds, enforced on create and update alike.
pub(crate) fn validate_allocation(allocation: u32) -> Result<(), EngineError> {
    if allocation < 1 || allocation > 100 {
        return Err(EngineError::Validation("allocation must be 1–100"));
    }
    Ok(())
}

pub(crate) fn validate_role_label(role: &str) -> Result<(), EngineError> {
    if role.len() > MAX_ROLE_LABEL_LEN {
        return Err(EngineError::LimitExceeded("role label too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &DateRange) -> Result<(), EngineError> {
    if window.end < window.start {
        return Err(EngineError::Validation("end date before start date"));
    }
    if window.duration_days() > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}
