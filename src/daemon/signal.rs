//! Shutdown signals understood by the daemon manager.
//!
//! Signals are named the way they are configured (`SIGINT`, `SIGKILL`,
//! `SIGQUIT`, `SIGTERM`) and mapped to platform signal numbers only when
//! they are delivered.
//!
//! On platforms without POSIX signals every variant is delivered as a
//! forceful process kill, since there is no graceful equivalent to fall
//! back to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Signal sent to a daemon to request shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ShutdownSignal {
    /// `SIGINT`, the default graceful signal.
    #[default]
    Interrupt,
    /// `SIGKILL`, cannot be caught by the daemon.
    Kill,
    /// `SIGQUIT`.
    Quit,
    /// `SIGTERM`.
    Terminate,
}

impl ShutdownSignal {
    /// All supported signals, in configuration order.
    pub const ALL: [Self; 4] = [Self::Interrupt, Self::Kill, Self::Quit, Self::Terminate];

    /// Configuration name of the signal.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Kill => "SIGKILL",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Platform signal used to deliver this shutdown request.
    #[cfg(unix)]
    #[must_use]
    pub const fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;

        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Kill => Signal::SIGKILL,
            Self::Quit => Signal::SIGQUIT,
            Self::Terminate => Signal::SIGTERM,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a signal name is not one of the supported set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown shutdown signal '{0}', expected one of SIGINT, SIGKILL, SIGQUIT, SIGTERM")]
pub struct UnknownSignal(pub String);

impl FromStr for ShutdownSignal {
    type Err = UnknownSignal;

    /// Accepts `SIGTERM`, `TERM` and lowercase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "INT" => Ok(Self::Interrupt),
            "KILL" => Ok(Self::Kill),
            "QUIT" => Ok(Self::Quit),
            "TERM" => Ok(Self::Terminate),
            _ => Err(UnknownSignal(s.to_string())),
        }
    }
}

impl TryFrom<String> for ShutdownSignal {
    type Error = UnknownSignal;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ShutdownSignal> for String {
    fn from(signal: ShutdownSignal) -> Self {
        signal.name().to_string()
    }
}
