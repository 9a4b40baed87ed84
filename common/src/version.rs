// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appliance template versions
//!
//! Appliances report free-form version strings such as
//! `"Cloud Router Release 4.2.1 Fri Oct 11 2024"`.  Only the dotted numeric
//! release matters when deciding whether an appliance is new enough to
//! accept commands.

use serde::Deserialize;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A dotted numeric release, compared component-wise with missing trailing
/// components treated as zero (`4.2 == 4.2.0`).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplianceVersion {
    components: Vec<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid appliance version {0:?}: expected dotted numbers like \"4.2.0\"")]
pub struct VersionParseError(String);

impl ApplianceVersion {
    /// Extracts the release from a reported version string: the first
    /// whitespace-separated token made only of dotted numbers.
    pub fn from_reported(reported: &str) -> Option<ApplianceVersion> {
        reported
            .split_whitespace()
            .find_map(|token| token.parse::<ApplianceVersion>().ok())
    }

    /// Returns whether `reported` names a release at least `self`.  A missing
    /// or unparseable version never does.
    pub fn is_satisfied_by(&self, reported: Option<&str>) -> bool {
        reported
            .and_then(ApplianceVersion::from_reported)
            .map_or(false, |found| found >= *self)
    }

    fn component(&self, i: usize) -> u64 {
        self.components.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for ApplianceVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let components = s
            .split('.')
            .map(|c| {
                if c.is_empty() || !c.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionParseError(s.to_owned()));
                }
                c.parse::<u64>().map_err(|_| VersionParseError(s.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ApplianceVersion { components })
    }
}

impl TryFrom<String> for ApplianceVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ApplianceVersion> for String {
    fn from(value: ApplianceVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ApplianceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for c in &self.components {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl Ord for ApplianceVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for ApplianceVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ApplianceVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ApplianceVersion {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        let v: ApplianceVersion = "4.2.1".parse().unwrap();
        assert_eq!(v.to_string(), "4.2.1");
        assert!("4.2.x".parse::<ApplianceVersion>().is_err());
        assert!("".parse::<ApplianceVersion>().is_err());
        assert!("4..2".parse::<ApplianceVersion>().is_err());
    }

    #[test]
    fn test_ordering_pads_with_zero() {
        let a: ApplianceVersion = "4.2".parse().unwrap();
        let b: ApplianceVersion = "4.2.0".parse().unwrap();
        let c: ApplianceVersion = "4.10".parse().unwrap();
        assert_eq!(a, b);
        assert!(c > a);
    }

    #[test]
    fn test_reported_versions() {
        let minimum: ApplianceVersion = "4.2.0".parse().unwrap();
        assert!(minimum.is_satisfied_by(Some("4.2.0")));
        assert!(minimum.is_satisfied_by(Some(
            "Cloud Router Release 4.3.1 Fri Oct 11 2024"
        )));
        assert!(!minimum.is_satisfied_by(Some("Cloud Router Release 4.1")));
        assert!(!minimum.is_satisfied_by(Some("unknown")));
        assert!(!minimum.is_satisfied_by(None));
    }
}
