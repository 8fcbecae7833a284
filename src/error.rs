use crate::core::ReferenceRole;

/// Every failure the ledger reports to its caller.
#[derive(Debug)]
pub enum LedgerError {
    /// Caller-correctable input problem; nothing was written.
    Validation(String),
    /// A referenced profile id did not resolve.
    MissingProfile { role: ReferenceRole, id: String },
    /// The SQLite gateway failed.
    Gateway(rusqlite::Error),
    /// A stored or supplied JSON payload could not be (de)serialized.
    Payload(serde_json::Error),
    Io(std::io::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Validation(msg) => write!(f, "{msg}"),
            LedgerError::MissingProfile { role, id } => {
                write!(f, "{} profile not found: {id}", role.label())
            }
            LedgerError::Gateway(e) => write!(f, "Gateway error: {e}"),
            LedgerError::Payload(e) => write!(f, "Payload error: {e}"),
            LedgerError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Gateway(e) => Some(e),
            LedgerError::Payload(e) => Some(e),
            LedgerError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Gateway(e)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Payload(e)
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Io(e)
    }
}
