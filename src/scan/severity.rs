//! Severity levels for vulnerability findings
//!
//! Levels are totally ordered: Negligible < Low < Medium < High < Critical.
//! Configured level names are matched case-insensitively.

use crate::error::RelayError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Severity level of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Negligible,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All levels, lowest rank first
    pub const ALL: [Severity; 5] = [
        Severity::Negligible,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Negligible => "negligible",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Levels at or above `self`, lowest first
    pub fn and_above(self) -> impl Iterator<Item = Severity> {
        Severity::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "negligible" => Ok(Severity::Negligible),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(RelayError::UnknownSeverity(s.to_string())),
        }
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Finding counts per severity level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
    #[serde(default)]
    pub negligible: u32,
}

impl SeverityCounts {
    pub fn count(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Negligible => self.negligible,
        }
    }

    /// True when at least one finding is ranked at or above `min`
    pub fn any_at_or_above(&self, min: Severity) -> bool {
        min.and_above().any(|s| self.count(s) > 0)
    }

    pub fn total(&self) -> u32 {
        Severity::ALL.iter().map(|s| self.count(*s)).sum()
    }
}
