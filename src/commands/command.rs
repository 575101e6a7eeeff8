//! Command Parsing
//!
//! Turns a decoded [`Request`] into a validated [`Command`]. Every arity and
//! argument check happens here, before the store is touched, so a rejected
//! request can never leave a partial write behind.

use crate::protocol::{Reply, Request};
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors reported back to the client as `-ERR <message>`.
///
/// These never close the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command")]
    UnknownCommand,

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("invalid expire time in 'set' command")]
    InvalidExpireTime,

    #[error("syntax error")]
    Syntax,
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::error(err.to_string())
    }
}

/// A validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `PING [message]`
    Ping(Option<Bytes>),

    /// `ECHO message`
    Echo(Bytes),

    /// `SET key value [PX milliseconds | EX seconds]`
    Set {
        key: Bytes,
        value: Bytes,
        expiry: Option<Duration>,
    },

    /// `GET key`
    Get { key: Bytes },
}

impl Command {
    /// Parses a request. The command name is matched case-insensitively.
    pub fn from_request(request: Request) -> Result<Self, CommandError> {
        let mut parts = request.into_parts().into_iter();
        let name = parts.next().ok_or(CommandError::UnknownCommand)?;
        let args: Vec<Bytes> = parts.collect();

        match name.to_ascii_uppercase().as_slice() {
            b"PING" => parse_ping(args),
            b"ECHO" => parse_echo(args),
            b"SET" => parse_set(args),
            b"GET" => parse_get(args),
            _ => Err(CommandError::UnknownCommand),
        }
    }

    /// Lowercase command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "ping",
            Command::Echo(_) => "echo",
            Command::Set { .. } => "set",
            Command::Get { .. } => "get",
        }
    }
}

fn parse_ping(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (message, None) => Ok(Command::Ping(message)),
        _ => Err(CommandError::WrongArity("ping")),
    }
}

fn parse_echo(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let [message]: [Bytes; 1] = args
        .try_into()
        .map_err(|_| CommandError::WrongArity("echo"))?;
    Ok(Command::Echo(message))
}

fn parse_get(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let [key]: [Bytes; 1] = args
        .try_into()
        .map_err(|_| CommandError::WrongArity("get"))?;
    Ok(Command::Get { key })
}

fn parse_set(args: Vec<Bytes>) -> Result<Command, CommandError> {
    let mut args = args.into_iter();
    let (Some(key), Some(value)) = (args.next(), args.next()) else {
        return Err(CommandError::WrongArity("set"));
    };

    let mut expiry = None;
    while let Some(option) = args.next() {
        let unit_ms = match option.to_ascii_uppercase().as_slice() {
            b"PX" => 1,
            b"EX" => 1000,
            _ => return Err(CommandError::Syntax),
        };
        if expiry.is_some() {
            return Err(CommandError::Syntax);
        }
        let amount = args.next().ok_or(CommandError::Syntax)?;
        expiry = Some(parse_expire(&amount, unit_ms)?);
    }

    Ok(Command::Set { key, value, expiry })
}

/// Parses a non-negative expire amount expressed in units of `unit_ms`.
fn parse_expire(raw: &[u8], unit_ms: u64) -> Result<Duration, CommandError> {
    let amount = parse_unsigned(raw).ok_or(CommandError::InvalidExpireTime)?;
    let millis = amount
        .checked_mul(unit_ms)
        .ok_or(CommandError::InvalidExpireTime)?;

    let ttl = Duration::from_millis(millis);
    // The deadline has to be representable.
    if Instant::now().checked_add(ttl).is_none() {
        return Err(CommandError::InvalidExpireTime);
    }

    Ok(ttl)
}

/// Plain ASCII digits only: no sign, no whitespace.
fn parse_unsigned(raw: &[u8]) -> Option<u64> {
    if !raw.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, CommandError> {
        Command::from_request(args.iter().map(|s| Bytes::from(s.to_string())).collect())
    }

    #[test]
    fn test_parse_ping() {
        assert_eq!(parse(&["PING"]), Ok(Command::Ping(None)));
        assert_eq!(
            parse(&["ping", "hi"]),
            Ok(Command::Ping(Some(Bytes::from("hi"))))
        );
        assert_eq!(
            parse(&["PING", "a", "b"]),
            Err(CommandError::WrongArity("ping"))
        );
    }

    #[test]
    fn test_parse_echo_arity() {
        assert_eq!(
            parse(&["ECHO", "hello"]),
            Ok(Command::Echo(Bytes::from("hello")))
        );
        assert_eq!(parse(&["ECHO"]), Err(CommandError::WrongArity("echo")));
        assert_eq!(
            parse(&["ECHO", "a", "b"]),
            Err(CommandError::WrongArity("echo"))
        );
    }

    #[test]
    fn test_parse_get_arity() {
        assert_eq!(
            parse(&["GET", "k"]),
            Ok(Command::Get {
                key: Bytes::from("k")
            })
        );
        assert_eq!(parse(&["GET"]), Err(CommandError::WrongArity("get")));
        assert_eq!(
            parse(&["GET", "a", "b"]),
            Err(CommandError::WrongArity("get"))
        );
    }

    #[test]
    fn test_parse_set_variants() {
        assert_eq!(
            parse(&["SET", "k", "v"]),
            Ok(Command::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                expiry: None,
            })
        );
        assert_eq!(
            parse(&["set", "k", "v", "px", "100"]),
            Ok(Command::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                expiry: Some(Duration::from_millis(100)),
            })
        );
        assert_eq!(
            parse(&["SET", "k", "v", "EX", "2"]),
            Ok(Command::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                expiry: Some(Duration::from_secs(2)),
            })
        );
        assert_eq!(
            parse(&["SET", "k", "v", "PX", "0"]),
            Ok(Command::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v"),
                expiry: Some(Duration::ZERO),
            })
        );
    }

    #[test]
    fn test_parse_set_bad_expire() {
        for bad in ["abc", "-1", "+5", " 5", "1.5", "", "99999999999999999999"] {
            assert_eq!(
                parse(&["SET", "k", "v", "PX", bad]),
                Err(CommandError::InvalidExpireTime),
                "PX {:?}",
                bad
            );
        }
        assert_eq!(
            parse(&["SET", "k", "v", "EX", "18446744073709551615"]),
            Err(CommandError::InvalidExpireTime)
        );
    }

    #[test]
    fn test_parse_set_syntax_errors() {
        assert_eq!(parse(&["SET", "k"]), Err(CommandError::WrongArity("set")));
        assert_eq!(
            parse(&["SET", "k", "v", "PX"]),
            Err(CommandError::Syntax)
        );
        assert_eq!(
            parse(&["SET", "k", "v", "NX"]),
            Err(CommandError::Syntax)
        );
        assert_eq!(
            parse(&["SET", "k", "v", "PX", "10", "EX", "1"]),
            Err(CommandError::Syntax)
        );
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse(&["FLUSHALL"]), Err(CommandError::UnknownCommand));
        assert_eq!(parse(&[]), Err(CommandError::UnknownCommand));
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(
            Reply::from(CommandError::InvalidExpireTime).encode(),
            b"-ERR invalid expire time in 'set' command\r\n"
        );
        assert_eq!(
            Reply::from(CommandError::WrongArity("echo")).encode(),
            b"-ERR wrong number of arguments for 'echo' command\r\n"
        );
        assert_eq!(
            Reply::from(CommandError::UnknownCommand).encode(),
            b"-ERR unknown command\r\n"
        );
    }
}
