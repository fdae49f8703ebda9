//! The wire protocol: one request line in, one (or, for `KEYS`, several)
//! response lines out.
//!
//! Parsing and rendering are pure string work with no I/O, so the whole
//! protocol is testable without a socket.

use std::{fmt, time::Duration};

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `SET <key> <value>` — store `value` under `key`, waking any blocked
    /// readers of that key.
    Set {
        /// The key to write.
        key: String,
        /// The value to store; the remainder of the line, spaces included.
        value: String,
    },
    /// `GET <key>` — read `key` without blocking.
    Get {
        /// The key to read.
        key: String,
    },
    /// `BGET <key> <timeoutMs>` — read `key`, blocking up to `timeout` for
    /// a value to be set if the key is currently absent.
    BGet {
        /// The key to read.
        key: String,
        /// How long to wait for a value before giving up.
        timeout: Duration,
    },
    /// `KEYS` — list every key currently in the store.
    Keys,
    /// `SHUTDOWN` — stop accepting connections and drain in-flight work.
    Shutdown,
}

/// An error describing why a request line could not be parsed.
///
/// Rendered to the client as a single `(error) ...` line; the connection
/// stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The line was empty or all whitespace.
    #[error("empty command line")]
    Empty,
    /// The first word was not one of the known commands.
    #[error("unknown command {0:?}")]
    Unknown(String),
    /// A known command was given the wrong number of arguments.
    #[error("{command} takes {expected}")]
    Arity {
        /// The command that was malformed.
        command: &'static str,
        /// A human-readable description of the expected arguments.
        expected: &'static str,
    },
    /// The `BGET` timeout argument was not a number of milliseconds.
    #[error("timeout must be a whole number of milliseconds")]
    BadTimeout,
}

impl Command {
    /// Parses one request line (without its trailing newline).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None if line.is_empty() => return Err(ProtocolError::Empty),
            None => (line, ""),
        };
        match word {
            "SET" => match rest.split_once(char::is_whitespace) {
                // the value is the rest of the line, spaces and all
                Some((key, value)) if !value.trim().is_empty() => Ok(Self::Set {
                    key: key.to_string(),
                    value: value.trim_start().to_string(),
                }),
                _ => Err(ProtocolError::Arity {
                    command: "SET",
                    expected: "a key and a value",
                }),
            },
            "GET" => match rest.split_whitespace().collect::<Vec<_>>()[..] {
                [key] => Ok(Self::Get {
                    key: key.to_string(),
                }),
                _ => Err(ProtocolError::Arity {
                    command: "GET",
                    expected: "exactly one key",
                }),
            },
            "BGET" => match rest.split_whitespace().collect::<Vec<_>>()[..] {
                [key, timeout] => {
                    let millis: u64 = timeout
                        .parse()
                        .map_err(|_| ProtocolError::BadTimeout)?;
                    Ok(Self::BGet {
                        key: key.to_string(),
                        timeout: Duration::from_millis(millis),
                    })
                }
                _ => Err(ProtocolError::Arity {
                    command: "BGET",
                    expected: "a key and a timeout in milliseconds",
                }),
            },
            "KEYS" if rest.is_empty() => Ok(Self::Keys),
            "KEYS" => Err(ProtocolError::Arity {
                command: "KEYS",
                expected: "no arguments",
            }),
            "SHUTDOWN" if rest.is_empty() => Ok(Self::Shutdown),
            "SHUTDOWN" => Err(ProtocolError::Arity {
                command: "SHUTDOWN",
                expected: "no arguments",
            }),
            other => Err(ProtocolError::Unknown(other.to_string())),
        }
    }
}

/// A response to be written back to the client.
///
/// The [`Display`](fmt::Display) impl renders the full response including
/// line terminators, so the server can write `{response}` verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK` — the command succeeded with nothing to return.
    Ok,
    /// `"<value>"` — a value read from the store.
    Value(String),
    /// `(nil)` — the key was absent (or a blocking read gave up).
    Nil,
    /// A numbered key listing, terminated by a blank line.
    Keys(Vec<String>),
    /// `(error) ...` — the request could not be served.
    Error(String),
}

impl From<ProtocolError> for Response {
    fn from(error: ProtocolError) -> Self {
        Self::Error(error.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => writeln!(f, "OK"),
            Self::Value(value) => writeln!(f, "\"{value}\""),
            Self::Nil => writeln!(f, "(nil)"),
            Self::Keys(keys) => {
                for (i, key) in keys.iter().enumerate() {
                    writeln!(f, "{}) \"{key}\"", i + 1)?;
                }
                // blank line terminates the listing
                writeln!(f)
            }
            Self::Error(message) => writeln!(f, "(error) {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command() {
        assert_eq!(
            Command::parse("SET k v"),
            Ok(Command::Set {
                key: "k".to_string(),
                value: "v".to_string()
            })
        );
        assert_eq!(
            Command::parse("GET k"),
            Ok(Command::Get {
                key: "k".to_string()
            })
        );
        assert_eq!(
            Command::parse("BGET k 1500"),
            Ok(Command::BGet {
                key: "k".to_string(),
                timeout: Duration::from_millis(1500),
            })
        );
        assert_eq!(Command::parse("KEYS"), Ok(Command::Keys));
        assert_eq!(Command::parse("SHUTDOWN"), Ok(Command::Shutdown));
    }

    #[test]
    fn set_value_keeps_embedded_spaces() {
        assert_eq!(
            Command::parse("SET greeting hello there world"),
            Ok(Command::Set {
                key: "greeting".to_string(),
                value: "hello there world".to_string()
            })
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            Command::parse("  GET  k  "),
            Ok(Command::Get {
                key: "k".to_string()
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(Command::parse(""), Err(ProtocolError::Empty));
        assert_eq!(Command::parse("   "), Err(ProtocolError::Empty));
        assert_eq!(
            Command::parse("FROB k"),
            Err(ProtocolError::Unknown("FROB".to_string()))
        );
        assert!(matches!(
            Command::parse("SET k"),
            Err(ProtocolError::Arity { command: "SET", .. })
        ));
        assert!(matches!(
            Command::parse("GET"),
            Err(ProtocolError::Arity { command: "GET", .. })
        ));
        assert!(matches!(
            Command::parse("GET a b"),
            Err(ProtocolError::Arity { command: "GET", .. })
        ));
        assert_eq!(Command::parse("BGET k soon"), Err(ProtocolError::BadTimeout));
        assert!(matches!(
            Command::parse("KEYS please"),
            Err(ProtocolError::Arity { command: "KEYS", .. })
        ));
    }

    #[test]
    fn renders_responses() {
        assert_eq!(Response::Ok.to_string(), "OK\n");
        assert_eq!(Response::Value("v".to_string()).to_string(), "\"v\"\n");
        assert_eq!(Response::Nil.to_string(), "(nil)\n");
        assert_eq!(
            Response::Keys(vec!["a".to_string(), "b".to_string()]).to_string(),
            "1) \"a\"\n2) \"b\"\n\n"
        );
        assert_eq!(Response::Keys(vec![]).to_string(), "\n");
        assert_eq!(
            Response::from(ProtocolError::Empty).to_string(),
            "(error) empty command line\n"
        );
    }
}
