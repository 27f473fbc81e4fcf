//! Enable/disable commands applied once before scanning.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::scanner::ScannerInfo;

/// One enable/disable command. Commands apply in order; later commands win.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerCommand {
    Enable(String),
    Disable(String),
    /// Enables every scanner not flagged `no_all`.
    EnableAll,
    /// Disables every scanner not flagged `no_all`.
    DisableAll,
}

impl ScannerCommand {
    pub fn enable(name: impl Into<String>) -> Self {
        Self::Enable(name.into())
    }

    pub fn disable(name: impl Into<String>) -> Self {
        Self::Disable(name.into())
    }
}

impl fmt::Display for ScannerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerCommand::Enable(n) => write!(f, "+{n}"),
            ScannerCommand::Disable(n) => write!(f, "-{n}"),
            ScannerCommand::EnableAll => f.write_str("+all"),
            ScannerCommand::DisableAll => f.write_str("-all"),
        }
    }
}

/// Parses `+name`, `-name`, `+all`, `-all`.
impl FromStr for ScannerCommand {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (enable, name) = match s.as_bytes().first() {
            Some(b'+') => (true, &s[1..]),
            Some(b'-') => (false, &s[1..]),
            _ => return Err(RegistrationError::UnknownScanner(s.to_string())),
        };
        if name.is_empty() {
            return Err(RegistrationError::UnknownScanner(s.to_string()));
        }
        Ok(match (enable, name) {
            (true, "all") => ScannerCommand::EnableAll,
            (false, "all") => ScannerCommand::DisableAll,
            (true, n) => ScannerCommand::Enable(n.to_string()),
            (false, n) => ScannerCommand::Disable(n.to_string()),
        })
    }
}

/// Resolves the final enabled set, one flag per scanner in registration
/// order. Unknown names fail the whole policy.
pub(crate) fn resolve<I: Borrow<ScannerInfo>>(
    infos: &[I],
    commands: &[ScannerCommand],
) -> Result<Vec<bool>, RegistrationError> {
    let mut enabled: Vec<bool> = infos
        .iter()
        .map(|i| i.borrow().flags.default_enabled)
        .collect();
    let index_of = |name: &str| {
        infos
            .iter()
            .position(|i| i.borrow().name == name)
            .ok_or_else(|| RegistrationError::UnknownScanner(name.to_string()))
    };
    for cmd in commands {
        match cmd {
            ScannerCommand::Enable(name) => enabled[index_of(name)?] = true,
            ScannerCommand::Disable(name) => enabled[index_of(name)?] = false,
            ScannerCommand::EnableAll | ScannerCommand::DisableAll => {
                let on = matches!(cmd, ScannerCommand::EnableAll);
                for (slot, info) in enabled.iter_mut().zip(infos) {
                    if !info.borrow().flags.no_all {
                        *slot = on;
                    }
                }
            }
        }
    }
    Ok(enabled)
}
