//! Database server version parsing and comparison.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// A server version as reported by the database, e.g. `15.4 (Debian 15.4-1)`
/// or `16.0.1000.6`.
///
/// Only the leading dotted numbers take part in comparisons. Missing
/// components compare as zero, so `12` equals `12.0.0`.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseVersion {
    pub raw: String,
    pub parts: Vec<u32>,
}

impl DatabaseVersion {
    /// Parse the numeric prefix of a version string.
    ///
    /// Returns `None` when the string does not start with a number.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let numeric: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();

        let parts: Vec<u32> = numeric
            .split('.')
            .take_while(|p| !p.is_empty())
            .map_while(|p| p.parse().ok())
            .collect();

        if parts.is_empty() {
            return None;
        }

        Some(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }

    /// Whether this version is at least `minimum`.
    pub fn at_least(&self, minimum: &DatabaseVersion) -> bool {
        self.cmp_parts(minimum) != Ordering::Less
    }

    fn cmp_parts(&self, other: &DatabaseVersion) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialEq for DatabaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_parts(other) == Ordering::Equal
    }
}

impl Eq for DatabaseVersion {}

impl PartialOrd for DatabaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DatabaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dotted: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", dotted.join("."))
    }
}
