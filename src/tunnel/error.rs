use std::fmt;

/// Why a command could not be read from a freshly handshaked connection.
/// Each variant maps to a different wire response (or to none at all).
#[derive(Debug)]
pub enum CommandError {
    /// Short read or client disconnect. The connection is closed silently.
    Io(std::io::Error),
    /// Ticket with a bad character. Rejected before any control plane call.
    InvalidTicket,
    /// Stats password with a bad character.
    InvalidSecret,
    /// Token is not one of OPEN/TEST/STAT/INFO.
    UnknownCommand([u8; super::consts::COMMAND_LENGTH]),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Io(e) => write!(f, "command read error: {}", e),
            CommandError::InvalidTicket => write!(f, "invalid ticket"),
            CommandError::InvalidSecret => write!(f, "invalid secret"),
            CommandError::UnknownCommand(cmd) => {
                write!(f, "unknown command: {}", String::from_utf8_lossy(cmd))
            }
        }
    }
}

impl std::error::Error for CommandError {}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        CommandError::Io(e)
    }
}

/// Control plane request outcome. `Timeout` is kept apart because the
/// broker answers it with TIMEOUT instead of ERROR_TICKET.
#[derive(Debug)]
pub enum ApiError {
    Timeout,
    /// The control plane answered, but rejected the request or returned
    /// an unusable body.
    Rejected(String),
    /// Could not talk to the control plane at all.
    Network(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Timeout => write!(f, "control plane request timed out"),
            ApiError::Rejected(msg) => write!(f, "control plane rejected request: {}", msg),
            ApiError::Network(msg) => write!(f, "control plane unreachable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
