//! Console commands
//!
//! Parses one input line into a [`Command`].

use std::str::FromStr;

use crate::cache::MAX_KEY_LENGTH;
use crate::error::CacheError;

/// A parsed console command.
///
/// # Syntax
/// - `SET key value [ttl_secs]`
/// - `GET key`
/// - `DEL key`
/// - `PIN key value` - store an entry no reduction may evict
/// - `KEYS`, `STATS`, `TIDY`, `CLEAR`, `HELP`, `QUIT`
///
/// Command names are case-insensitive; keys and values are single tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set {
        key: String,
        value: String,
        ttl: Option<u64>,
    },
    Get {
        key: String,
    },
    Del {
        key: String,
    },
    Pin {
        key: String,
        value: String,
    },
    Keys,
    Stats,
    Tidy,
    Clear,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CacheError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((name, args)) = tokens.split_first() else {
            return Err(CacheError::InvalidRequest("Empty command".to_string()));
        };

        let command = match (name.to_ascii_uppercase().as_str(), args) {
            ("SET", [key, value]) => Command::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl: None,
            },
            ("SET", [key, value, ttl]) => Command::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl: Some(parse_ttl(ttl)?),
            },
            ("GET", [key]) => Command::Get {
                key: key.to_string(),
            },
            ("DEL", [key]) => Command::Del {
                key: key.to_string(),
            },
            ("PIN", [key, value]) => Command::Pin {
                key: key.to_string(),
                value: value.to_string(),
            },
            ("KEYS", []) => Command::Keys,
            ("STATS", []) => Command::Stats,
            ("TIDY", []) => Command::Tidy,
            ("CLEAR", []) => Command::Clear,
            ("HELP", []) => Command::Help,
            ("QUIT" | "EXIT", []) => Command::Quit,
            (other, _) => {
                return Err(CacheError::InvalidRequest(format!(
                    "Unknown command or wrong arguments: {other}"
                )))
            }
        };

        if let Some(key) = command.key() {
            validate_key(key)?;
        }
        Ok(command)
    }
}

impl Command {
    /// The key the command targets, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Set { key, .. }
            | Command::Get { key }
            | Command::Del { key }
            | Command::Pin { key, .. } => Some(key),
            _ => None,
        }
    }
}

fn parse_ttl(raw: &str) -> Result<u64, CacheError> {
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(CacheError::InvalidRequest(format!(
            "TTL must be a positive number of seconds, got '{raw}'"
        ))),
        Ok(ttl) => Ok(ttl),
    }
}

/// Validates a key
///
/// Returns an error if the key exceeds [`MAX_KEY_LENGTH`] bytes.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {MAX_KEY_LENGTH} bytes"
        )));
    }
    Ok(())
}
