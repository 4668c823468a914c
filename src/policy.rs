use ulid::Ulid;

use crate::model::Role;

/// Authenticated caller identity, resolved from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Ulid,
    pub role: Role,
}

/// Project and assignment writes are manager-only.
pub fn can_write_projects(caller: &Caller) -> bool {
    caller.role == Role::Manager
}

pub fn can_write_assignments(caller: &Caller) -> bool {
    caller.role == Role::Manager
}

/// The suitable-engineers query is manager-only.
pub fn can_query_suitable_engineers(caller: &Caller) -> bool {
    caller.role == Role::Manager
}

/// An engineer may edit their own mutable profile fields; a manager may
/// edit anyone's.
pub fn can_update_engineer(caller: &Caller, target: Ulid) -> bool {
    caller.role == Role::Manager || caller.user_id == target
}

/// Engineer callers only ever see their own assignments: the listing is
/// force-scoped to their id regardless of any requested filter. Managers
/// keep whatever filter they asked for.
pub fn assignment_scope(caller: &Caller, requested: Option<Ulid>) -> Option<Ulid> {
    match caller.role {
        Role::Engineer => Some(caller.user_id),
        Role::Manager => requested,
    }
}
