use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Cassandra release version.
///
/// Cassandra does not always publish three-part versions (`4.1`, `5.0-beta1`),
/// so parsing pads the missing components before handing the text to semver.
/// The original text is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    inner: semver::Version,
    text: String,
}

impl Version {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let text = text.trim();
        let (numbers, suffix) = match text.find(['-', '+']) {
            Some(index) => text.split_at(index),
            None => (text, ""),
        };
        let mut parts: Vec<&str> = numbers.split('.').collect();
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            anyhow::bail!("'{text}' is not a valid version");
        }
        while parts.len() < 3 {
            parts.push("0");
        }
        let normalized = format!("{}{suffix}", parts.join("."));
        let inner = semver::Version::parse(&normalized)
            .map_err(|e| anyhow::anyhow!("'{text}' is not a valid version: {e}"))?;
        Ok(Self {
            inner,
            text: text.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.inner.major
    }

    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    /// Compare only the numeric part, ignoring any pre-release suffix
    pub fn is_at_least(&self, major: u64, minor: u64) -> bool {
        (self.inner.major, self.inner.minor) >= (major, minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self {
            inner: semver::Version::new(4, 1, 5),
            text: "4.1.5".to_string(),
        }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Version {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.text
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}
