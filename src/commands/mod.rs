pub mod echo;
pub mod executable;
pub mod get;
pub mod ping;
pub mod set;

use bytes::Bytes;
use std::{str, vec};
use thiserror::Error as ThisError;

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use echo::Echo;
use get::Get;
use ping::Ping;
use set::Set;

#[derive(Debug, PartialEq)]
pub enum Command {
    Get(Get),
    Set(Set),

    Echo(Echo),
    Ping(Ping),
}

impl Executable for Command {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        match self {
            Command::Echo(cmd) => cmd.exec(store),
            Command::Get(cmd) => cmd.exec(store),
            Command::Ping(cmd) => cmd.exec(store),
            Command::Set(cmd) => cmd.exec(store),
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = CommandParserError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        // Clients send commands to the Redis server as RESP arrays.
        let frames = match frame {
            Frame::Array(array) => array,
            frame => {
                return Err(CommandParserError::InvalidFrame {
                    expected: "array".to_string(),
                    actual: frame,
                })
            }
        };

        let parser = &mut CommandParser {
            parts: frames.into_iter(),
        };

        let command_name = parser.parse_command_name()?;

        // Every argument is validated here, before anything touches the store.
        match &command_name[..] {
            "echo" => Echo::try_from(&mut *parser)
                .map(Command::Echo)
                .map_err(|e| e.with_usage(&command_name, Echo::USAGE)),
            "get" => Get::try_from(&mut *parser)
                .map(Command::Get)
                .map_err(|e| e.with_usage(&command_name, Get::USAGE)),
            "ping" => Ping::try_from(&mut *parser)
                .map(Command::Ping)
                .map_err(|e| e.with_usage(&command_name, Ping::USAGE)),
            "set" => Set::try_from(&mut *parser)
                .map(Command::Set)
                .map_err(|e| e.with_usage(&command_name, Set::USAGE)),
            _ => Err(CommandParserError::UnknownCommand {
                command: command_name,
            }),
        }
    }
}

pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self
            .parts
            .next()
            .ok_or(CommandParserError::EmptyCommand)?;

        // Command names are case-insensitive.
        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_string(&mut self) -> Result<String, CommandParserError> {
        let bytes = self.next_bytes()?;

        str::from_utf8(&bytes[..])
            .map(|s| s.to_string())
            .map_err(CommandParserError::InvalidUTF8String)
    }

    fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => string
                .parse::<i64>()
                .map_err(|_| CommandParserError::NotAnInteger),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(CommandParserError::NotAnInteger),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.parts.next().ok_or(CommandParserError::EndOfStream)?;

        match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    fn has_remaining(&self) -> bool {
        self.parts.len() > 0
    }

    /// Fails if arguments are left over once a command has read everything it accepts.
    fn finish(&self) -> Result<(), CommandParserError> {
        if self.has_remaining() {
            return Err(CommandParserError::TrailingArguments);
        }
        Ok(())
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("Protocol error: invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("empty command")]
    EmptyCommand,
    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },
    #[error("wrong number of arguments for '{command}' command (expected: {usage})")]
    WrongArity { command: String, usage: &'static str },
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("invalid expire time in '{command}' command")]
    InvalidExpireTime { command: String },
    #[error("syntax error")]
    Syntax,
    #[error("Protocol error: invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("attempting to extract a value failed due to the frame being fully consumed")]
    EndOfStream,
    #[error("the frame has unconsumed arguments")]
    TrailingArguments,
}

impl CommandParserError {
    /// Turns a missing or unexpected argument into an arity error for `command`.
    fn with_usage(self, command: &str, usage: &'static str) -> CommandParserError {
        match self {
            CommandParserError::EndOfStream | CommandParserError::TrailingArguments => {
                CommandParserError::WrongArity {
                    command: command.to_string(),
                    usage,
                }
            }
            err => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_array(parts: &[&str]) -> Frame {
        Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::copy_from_slice(part.as_bytes())))
                .collect(),
        )
    }

    #[test]
    fn parse_get_command_with_simple_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Simple(String::from("foo")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: Bytes::from("foo")
            })
        );
    }

    #[test]
    fn parse_get_command_with_bulk_string() {
        let get_frame = Frame::Array(vec![
            Frame::Simple(String::from("GET")),
            Frame::Bulk(Bytes::from("foo-from-bytes")),
        ]);

        let get_command = Command::try_from(get_frame).unwrap();

        assert_eq!(
            get_command,
            Command::Get(Get {
                key: Bytes::from("foo-from-bytes")
            })
        );
    }

    #[test]
    fn command_name_is_case_insensitive() {
        for name in ["ping", "PING", "PiNg"] {
            assert_eq!(
                Command::try_from(bulk_array(&[name])),
                Ok(Command::Ping(Ping))
            );
        }
    }

    #[test]
    fn unknown_command() {
        let err = Command::try_from(bulk_array(&["FLUSHALL"])).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::UnknownCommand {
                command: "flushall".to_string()
            }
        );
        assert_eq!(err.to_string(), "unknown command 'flushall'");
    }

    #[test]
    fn empty_command() {
        assert_eq!(
            Command::try_from(Frame::Array(vec![])),
            Err(CommandParserError::EmptyCommand)
        );
    }

    #[test]
    fn non_array_frame() {
        assert!(matches!(
            Command::try_from(Frame::Simple("PING".to_string())),
            Err(CommandParserError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn missing_argument_is_an_arity_error() {
        let err = Command::try_from(bulk_array(&["GET"])).unwrap_err();

        assert_eq!(
            err.to_string(),
            "wrong number of arguments for 'get' command (expected: GET key)"
        );
    }

    #[test]
    fn extra_argument_is_an_arity_error() {
        let err = Command::try_from(bulk_array(&["ECHO", "a", "b"])).unwrap_err();

        assert_eq!(
            err,
            CommandParserError::WrongArity {
                command: "echo".to_string(),
                usage: Echo::USAGE
            }
        );
    }
}
