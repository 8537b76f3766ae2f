//! Wire protocol: frame parsing, command/message shapes, and the typed
//! error taxonomy reported back to clients.

use std::fmt;
use thiserror::Error;

/// Nicknames are 1-10 characters of `[A-Za-z0-9_]`.
pub fn is_valid_nickname(nickname: &str) -> bool {
    let len = nickname.len();
    (1..=10).contains(&len) && nickname.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Lobby is full.")]
    LobbyFull,
    #[error("Invalid nickname.")]
    InvalidNickname,
    #[error("Nickname already exists.")]
    DuplicateNickname,
    #[error("You have already registered.")]
    AlreadyRegistered,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrongStateError {
    #[error("Cannot register. Game has already started.")]
    CannotRegister,
    #[error("Cannot ready up. Game has already started.")]
    CannotReady,
    #[error("Cannot unready. Game has already started.")]
    CannotUnready,
    #[error("Not in answering phase.")]
    NotAnswering,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Invalid arguments.")]
    InvalidArguments,
}

/// Everything a command handler can fail with. The connection handler turns
/// any of these into a `<COMMAND>_FAILURE;<reason>` reply; none of them ever
/// tear down the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    WrongState(#[from] WrongStateError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

/// A parsed client-to-server frame, split on the first `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Register { nickname: String },
    Ready,
    Unready,
    Answer { value: i64 },
    /// A recognised command word with the wrong number of arguments.
    Malformed { command: String },
    /// A command word outside the known set; silently ignored.
    Unknown,
}

/// Splits a line on the first `;`, uppercases the command word, and
/// interprets the arguments for each known command.
pub fn parse_line(line: &str) -> ClientCommand {
    let mut parts = line.splitn(2, ';');
    let command = parts.next().unwrap_or("").trim().to_uppercase();
    let rest = parts.next().unwrap_or("");
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(';').collect()
    };

    match command.as_str() {
        "REGISTER" => {
            if args.len() == 1 {
                ClientCommand::Register {
                    nickname: args[0].trim().to_string(),
                }
            } else {
                ClientCommand::Malformed { command }
            }
        }
        "READY" => {
            if args.is_empty() {
                ClientCommand::Ready
            } else {
                ClientCommand::Malformed { command }
            }
        }
        "UNREADY" => {
            if args.is_empty() {
                ClientCommand::Unready
            } else {
                ClientCommand::Malformed { command }
            }
        }
        "ANSWER" => {
            if args.len() == 1 {
                match args[0].trim().parse::<i64>() {
                    Ok(value) => ClientCommand::Answer { value },
                    Err(_) => ClientCommand::Malformed { command },
                }
            } else {
                ClientCommand::Malformed { command }
            }
        }
        "" => ClientCommand::Unknown,
        _ => ClientCommand::Unknown,
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Register { .. } => write!(f, "REGISTER"),
            ClientCommand::Ready => write!(f, "READY"),
            ClientCommand::Unready => write!(f, "UNREADY"),
            ClientCommand::Answer { .. } => write!(f, "ANSWER"),
            ClientCommand::Malformed { command } => write!(f, "{command}"),
            ClientCommand::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
