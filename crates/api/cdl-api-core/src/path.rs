//! ConnectorPath parsing and formatting.
//!
//! Grammar (simple, dot-separated):
//!   block.child.port
//! - '.' separates segments; nesting depth is unbounded
//! - A one-segment path names a bare connector or boundary port
//!   Examples:
//!   "zoneCtl.gain1.y" -> segments=["zoneCtl","gain1","y"]
//!   "u" -> segments=["u"]
//!
//! ConnectorPath is intentionally simple and string-based; it is the key
//! type of the runtime value store, where a composite's children extend
//! their parent's path by one segment per nesting level.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectorPath {
    segments: Vec<String>,
}

impl ConnectorPath {
    /// Construct a path from pre-validated segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// A single-segment path.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Parse a path string according to the grammar described above.
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("empty connector path".to_string());
        }
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err("invalid connector path: empty segment".to_string());
        }
        if segments
            .iter()
            .any(|seg| seg.chars().any(char::is_whitespace))
        {
            return Err("invalid connector path: segment contains whitespace".to_string());
        }
        Ok(Self {
            segments: segments.into_iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Return a new path extended by one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Return a new path extended by every segment of `other`.
    pub fn join(&self, other: &ConnectorPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// The final segment (the port name).
    pub fn leaf(&self) -> &str {
        self.segments
            .last()
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    /// Iterate over all segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|s| s.as_str())
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ConnectorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for ConnectorPath {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectorPath::parse(s)
    }
}

// Serde support: serialize as string, deserialize from string
impl Serialize for ConnectorPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConnectorPath {
    fn deserialize<D>(deserializer: D) -> Result<ConnectorPath, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ConnectorPath::parse(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested() {
        let p = ConnectorPath::parse("zoneCtl.gain1.y").unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.leaf(), "y");
        assert_eq!(p.to_string(), "zoneCtl.gain1.y");
    }

    #[test]
    fn parse_single_segment() {
        let p = ConnectorPath::parse("u").unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.leaf(), "u");
    }

    #[test]
    fn child_extends() {
        let p = ConnectorPath::root("ctl").child("gain").child("u");
        assert_eq!(p.to_string(), "ctl.gain.u");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(ConnectorPath::parse("").is_err());
        assert!(ConnectorPath::parse("a..b").is_err());
        assert!(ConnectorPath::parse("a. b").is_err());
        assert!(ConnectorPath::parse(".a").is_err());
    }
}
