//! Command-line argument handling: a single positional `<port>`, matching
//! the source's exact contract (and its typo) rather than reaching for a
//! derive-based parser for a one-argument CLI.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum StartupError {
    /// Zero or more-than-one arguments were given.
    WrongArgumentCount,
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Preserves the source's exact wording for byte-parity.
            StartupError::WrongArgumentCount => write!(f, "Too few arguements"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Parses `args` (excluding argv[0]) into a listen port.
///
/// Exactly one argument is required. An argument that fails to parse as a
/// base-10 `u16` yields port `0`, matching the source's `atoi` fallback
/// (which later fails to bind, producing the same observable exit-1
/// behavior through a different path).
pub fn parse_port(args: &[String]) -> Result<u16, StartupError> {
    match args {
        [only] => Ok(only.parse::<u16>().unwrap_or(0)),
        _ => Err(StartupError::WrongArgumentCount),
    }
}
