use ulid::Ulid;

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    /// The referenced user exists but is not an engineer.
    NotAnEngineer(Ulid),
    EmailTaken(String),
    InvalidCredentials,
    Validation(&'static str),
    /// Admission rejected: committing the assignment would push the
    /// engineer past max capacity. Carries the spare capacity on the
    /// candidate's window (may be negative after a capacity lowering).
    CapacityExceeded {
        available: i64,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::NotAnEngineer(id) => write!(f, "user {id} is not an engineer"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::InvalidCredentials => write!(f, "invalid credentials"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::CapacityExceeded { available } => {
                write!(f, "assignment would exceed engineer capacity ({available}% available)")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
