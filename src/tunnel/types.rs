use tokio::io::{AsyncRead, AsyncReadExt};

use super::consts;
use super::error::CommandError;

/// A parsed client command. STAT and INFO share a variant since both
/// carry a password and answer with the same snapshot.
#[derive(Debug, PartialEq)]
pub enum Command {
    Open(String),
    Test,
    Stats(String),
}

impl Command {
    /// Reads one command from the stream: a 4 byte token followed by the
    /// payload the token requires (48 byte ticket, 64 byte password, or
    /// nothing). Reads are exact, so a short payload never advances the
    /// parser; the caller bounds the whole thing with a timeout.
    pub async fn read_from<S>(stream: &mut S) -> Result<Command, CommandError>
    where
        S: AsyncRead + Unpin,
    {
        let mut cmd = [0u8; consts::COMMAND_LENGTH];
        stream.read_exact(&mut cmd).await?;

        match std::str::from_utf8(&cmd) {
            Ok(consts::COMMAND_OPEN) => {
                let mut ticket = [0u8; consts::TICKET_LENGTH];
                stream.read_exact(&mut ticket).await?;
                if !ticket.iter().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(CommandError::InvalidTicket);
                }
                // Charset already checked, so utf8 cannot fail
                Ok(Command::Open(
                    String::from_utf8_lossy(&ticket).into_owned(),
                ))
            }
            Ok(consts::COMMAND_TEST) => Ok(Command::Test),
            Ok(consts::COMMAND_STAT) | Ok(consts::COMMAND_INFO) => {
                let mut secret = [0u8; consts::SECRET_LENGTH];
                stream.read_exact(&mut secret).await?;
                if !secret.iter().all(|b| b.is_ascii_alphanumeric()) {
                    return Err(CommandError::InvalidSecret);
                }
                Ok(Command::Stats(
                    String::from_utf8_lossy(&secret).into_owned(),
                ))
            }
            _ => Err(CommandError::UnknownCommand(cmd)),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Open(ticket) => write!(f, "OPEN {}", ticket),
            Command::Test => write!(f, "TEST"),
            Command::Stats(_) => write!(f, "STAT"),
        }
    }
}

pub enum Response {
    Ok,
    TicketError,
    CommandError,
    TimeoutError,
    ForbiddenError,
}

impl Response {
    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Ok => consts::RESPONSE_OK,
            Response::TicketError => consts::RESPONSE_ERROR_TICKET,
            Response::CommandError => consts::RESPONSE_ERROR_COMMAND,
            Response::TimeoutError => consts::RESPONSE_ERROR_TIMEOUT,
            Response::ForbiddenError => consts::RESPONSE_FORBIDDEN,
        }
    }

    pub fn to_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl From<Response> for String {
    fn from(response: Response) -> Self {
        response.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_command(wire: &[u8]) -> Result<Command, CommandError> {
        let mut stream = tokio_test::io::Builder::new().read(wire).build();
        Command::read_from(&mut stream).await
    }

    #[tokio::test]
    async fn test_open_command() {
        let ticket = "a".repeat(consts::TICKET_LENGTH);
        let wire = format!("OPEN{}", ticket);
        assert_eq!(
            read_command(wire.as_bytes()).await.unwrap(),
            Command::Open(ticket)
        );
    }

    #[tokio::test]
    async fn test_open_rejects_bad_charset() {
        // 48 chars, but one of them is outside [A-Za-z0-9]
        let ticket = format!("{}!", "a".repeat(consts::TICKET_LENGTH - 1));
        let wire = format!("OPEN{}", ticket);
        assert!(matches!(
            read_command(wire.as_bytes()).await,
            Err(CommandError::InvalidTicket)
        ));
    }

    #[tokio::test]
    async fn test_open_short_ticket_does_not_parse() {
        // 47 bytes and eof, read_exact must fail instead of guessing
        let wire = format!("OPEN{}", "a".repeat(consts::TICKET_LENGTH - 1));
        assert!(matches!(
            read_command(wire.as_bytes()).await,
            Err(CommandError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_test_command() {
        assert_eq!(read_command(b"TEST").await.unwrap(), Command::Test);
    }

    #[tokio::test]
    async fn test_stat_and_info_commands() {
        let secret = "0".repeat(consts::SECRET_LENGTH);
        for cmd in [consts::COMMAND_STAT, consts::COMMAND_INFO] {
            let wire = format!("{}{}", cmd, secret);
            assert_eq!(
                read_command(wire.as_bytes()).await.unwrap(),
                Command::Stats(secret.clone())
            );
        }
    }

    #[tokio::test]
    async fn test_stat_short_secret_does_not_parse() {
        let wire = format!("STAT{}", "0".repeat(consts::SECRET_LENGTH - 1));
        assert!(matches!(
            read_command(wire.as_bytes()).await,
            Err(CommandError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        match read_command(b"NOPE").await {
            Err(CommandError::UnknownCommand(cmd)) => assert_eq!(&cmd, b"NOPE"),
            other => panic!("expected unknown command, got {:?}", other),
        }
    }

    #[test]
    fn test_response_tokens() {
        assert_eq!(Response::Ok.as_str(), "OK");
        assert_eq!(Response::TicketError.as_str(), "ERROR_TICKET");
        assert_eq!(Response::CommandError.as_str(), "ERROR_COMMAND");
        assert_eq!(Response::TimeoutError.as_str(), "TIMEOUT");
        assert_eq!(Response::ForbiddenError.as_str(), "FORBIDDEN");

        let response: String = Response::TicketError.into();
        assert_eq!(response, "ERROR_TICKET");
    }
}
