//! Caching policy enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Per-call cache capability, resolved once per RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachingMode {
    /// Bypass the cache entirely.
    Never,
    /// Populate and invalidate the cache, never serve reads from it.
    ///
    /// Commits always invalidate in this mode, even with
    /// [`DeleteTiming::None`].
    WriteOnly,
    /// Serve reads from the cache but never populate it.
    ReadOnly,
    /// Serve reads from the cache and populate it on misses.
    #[default]
    ReadWrite,
}

impl CachingMode {
    /// Whether lookups may be answered from the cache.
    pub fn allows_read(&self) -> bool {
        matches!(self, CachingMode::ReadOnly | CachingMode::ReadWrite)
    }

    /// Whether the call may write to the cache (populate on lookup, forced
    /// invalidation on commit).
    pub fn allows_write(&self) -> bool {
        matches!(self, CachingMode::WriteOnly | CachingMode::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CachingMode::Never => "never",
            CachingMode::WriteOnly => "write_only",
            CachingMode::ReadOnly => "read_only",
            CachingMode::ReadWrite => "read_write",
        }
    }
}

impl fmt::Display for CachingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CachingMode {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "never" => Ok(CachingMode::Never),
            "writeonly" => Ok(CachingMode::WriteOnly),
            "readonly" => Ok(CachingMode::ReadOnly),
            "readwrite" => Ok(CachingMode::ReadWrite),
            _ => Err(PolicyParseError {
                kind: "caching mode",
                value: s.to_string(),
            }),
        }
    }
}

/// When commit-triggered invalidation runs relative to the backend write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteTiming {
    /// Never invalidate on commit.
    ///
    /// Not recommended: a cached entity outlives its update or deletion
    /// unless the caching mode is write-capable.
    None,
    /// Invalidate before the commit is issued.
    BeforeCommit,
    /// Invalidate after the commit succeeded.
    AfterCommit,
    /// Invalidate both before and after the commit. Sends twice the
    /// invalidation traffic of the single-phase timings.
    #[default]
    BeforeAndAfterCommit,
}

impl DeleteTiming {
    pub fn before_commit(&self) -> bool {
        matches!(
            self,
            DeleteTiming::BeforeCommit | DeleteTiming::BeforeAndAfterCommit
        )
    }

    pub fn after_commit(&self) -> bool {
        matches!(
            self,
            DeleteTiming::AfterCommit | DeleteTiming::BeforeAndAfterCommit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteTiming::None => "none",
            DeleteTiming::BeforeCommit => "before_commit",
            DeleteTiming::AfterCommit => "after_commit",
            DeleteTiming::BeforeAndAfterCommit => "before_and_after_commit",
        }
    }
}

impl fmt::Display for DeleteTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeleteTiming {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "none" => Ok(DeleteTiming::None),
            "beforecommit" => Ok(DeleteTiming::BeforeCommit),
            "aftercommit" => Ok(DeleteTiming::AfterCommit),
            "beforeandaftercommit" => Ok(DeleteTiming::BeforeAndAfterCommit),
            _ => Err(PolicyParseError {
                kind: "delete timing",
                value: s.to_string(),
            }),
        }
    }
}

/// Error when parsing an unknown policy string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct PolicyParseError {
    pub kind: &'static str,
    pub value: String,
}

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
