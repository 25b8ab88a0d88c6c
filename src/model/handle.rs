//! Connection port identifiers.
//!
//! A handle names one attachment point on a node: its kind (in/out), the
//! node side it sits on, and a 1-based index along that side. The wire form
//! is `"{kind}-{side}-{index}"` and is validated against a strict grammar
//! before anything is persisted.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ToposyncError;

static HANDLE_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(in|out)-(left|right|top|bottom)-([1-9]\d*)$").unwrap());

/// Whether a handle accepts an incoming or emits an outgoing edge.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HandleKind {
    In,
    Out,
}

/// Node side a handle sits on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HandleSide {
    Top,
    Right,
    Bottom,
    Left,
}

impl HandleSide {
    /// Fixed preference order used when a guessed side is saturated.
    pub const PREFERENCE: [HandleSide; 4] = [HandleSide::Right, HandleSide::Left, HandleSide::Top, HandleSide::Bottom];
}

/// A single connection port: (kind, side, index), index >= 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleId {
    pub kind: HandleKind,
    pub side: HandleSide,
    pub index: u32,
}

impl HandleId {
    pub fn new(
        kind: HandleKind,
        side: HandleSide,
        index: u32,
    ) -> Self {
        Self {
            kind,
            side,
            index,
        }
    }

    /// An out-handle, usable as an edge source endpoint.
    pub fn source(
        side: HandleSide,
        index: u32,
    ) -> Self {
        Self::new(HandleKind::Out, side, index)
    }

    /// An in-handle, usable as an edge target endpoint.
    pub fn target(
        side: HandleSide,
        index: u32,
    ) -> Self {
        Self::new(HandleKind::In, side, index)
    }

    /// Check a serialized handle id against the grammar.
    pub fn is_valid(s: &str) -> bool {
        HANDLE_GRAMMAR.is_match(s)
    }
}

impl fmt::Display for HandleId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{}-{}", self.kind.as_ref(), self.side.as_ref(), self.index)
    }
}

impl FromStr for HandleId {
    type Err = ToposyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let caps = HANDLE_GRAMMAR.captures(s).ok_or_else(|| ToposyncError::Handle(format!("invalid handle id '{}'", s)))?;

        let kind = caps[1].parse::<HandleKind>().map_err(|_| ToposyncError::Handle(format!("invalid handle kind in '{}'", s)))?;
        let side = caps[2].parse::<HandleSide>().map_err(|_| ToposyncError::Handle(format!("invalid handle side in '{}'", s)))?;
        let index = caps[3].parse::<u32>().map_err(|_| ToposyncError::Handle(format!("invalid handle index in '{}'", s)))?;

        Ok(Self {
            kind,
            side,
            index,
        })
    }
}

impl Serialize for HandleId {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HandleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_handle_round_trip() {
        let handle = HandleId::source(HandleSide::Right, 3);
        assert_eq!(handle.to_string(), "out-right-3");
        assert_eq!("out-right-3".parse::<HandleId>().unwrap(), handle);
    }

    #[test]
    fn test_handle_grammar() {
        assert!(HandleId::is_valid("in-top-1"));
        assert!(HandleId::is_valid("out-bottom-12"));
        assert!(!HandleId::is_valid("out-bottom-0"));
        assert!(!HandleId::is_valid("out-middle-1"));
        assert!(!HandleId::is_valid("source-right-1"));
        assert!(!HandleId::is_valid("out-right"));
        assert!(!HandleId::is_valid("out-right-1-extra"));
    }

    #[test]
    fn test_handle_rejects_invalid() {
        assert!("sideways-1".parse::<HandleId>().is_err());
        assert!("in-left-0".parse::<HandleId>().is_err());
    }

    #[test]
    fn test_handle_serde_as_string() {
        let handle: HandleId = serde_json::from_str("\"in-left-2\"").unwrap();
        assert_eq!(handle, HandleId::target(HandleSide::Left, 2));
        assert_eq!(serde_json::to_string(&handle).unwrap(), "\"in-left-2\"");
    }
}
