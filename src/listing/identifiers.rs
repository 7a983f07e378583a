//! Canonical identifiers and sort orders.
//!
//! Every constructor here is idempotent: feeding a normalized value back in
//! yields the same value.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub const MAX_LIMIT: usize = 50_000;

const RESERVED_SUBREDDITS: &[&str] = &["api", "www", "old", "new", "mod", "admin"];

static SUBREDDIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]{1,21}$").expect("subreddit pattern"));
static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").expect("username pattern"));
static POST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{4,10}$").expect("post id pattern"));

/// Malformed identifier or option. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Lower-cased community name without the `r/` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subreddit(String);

impl Subreddit {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::new("Subreddit name cannot be empty"));
        }
        let name = raw.strip_prefix("r/").unwrap_or(raw);
        if !SUBREDDIT_RE.is_match(name) {
            return Err(ValidationError::new(format!(
                "Invalid subreddit name: '{name}'. Must be 1-21 characters, letters/numbers/underscores only"
            )));
        }
        let name = name.to_lowercase();
        if RESERVED_SUBREDDITS.contains(&name.as_str()) {
            return Err(ValidationError::new(format!(
                "Subreddit name '{name}' is reserved or problematic."
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Account name without the `u/` prefix; case is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::new("Username cannot be empty"));
        }
        let name = raw.strip_prefix("u/").unwrap_or(raw);
        if !USERNAME_RE.is_match(name) {
            return Err(ValidationError::new(format!(
                "Invalid username: '{name}'. Must be 3-20 characters, letters/numbers/underscores/hyphens only"
            )));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lower-cased base-36 post id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId(String);

impl PostId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let id = raw.trim().to_lowercase();
        if id.is_empty() {
            return Err(ValidationError::new("Post ID cannot be empty"));
        }
        if !POST_ID_RE.is_match(&id) {
            return Err(ValidationError::new(format!(
                "Invalid post ID: '{raw}'. Must be 4-10 characters, letters and numbers only"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_display {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    )*};
}

impl_display!(Subreddit, Username, PostId);

pub fn validate_limit(limit: usize) -> Result<usize, ValidationError> {
    match limit {
        0 => Err(ValidationError::new("Limit must be a positive integer")),
        n if n > MAX_LIMIT => Err(ValidationError::new(format!("Maximum limit is {MAX_LIMIT}"))),
        n => Ok(n),
    }
}

/// Sort-order enums parsed case-insensitively from their wire names.
macro_rules! sort_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let lowered = raw.trim().to_lowercase();
                if lowered.is_empty() {
                    return Err(ValidationError::new("Invalid sort method: cannot be empty"));
                }
                match lowered.as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(ValidationError::new(format!(
                        "Invalid sort method: '{lowered}'. Valid options: {}",
                        $name::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

sort_enum!(
    /// Community listing order.
    ListingSort { Hot => "hot", New => "new", Top => "top", Rising => "rising" }
);

sort_enum!(
    UserSort { New => "new", Hot => "hot", Top => "top" }
);

sort_enum!(
    CommentSort {
        Best => "best",
        Top => "top",
        New => "new",
        Controversial => "controversial",
        Old => "old",
        Qa => "qa",
    }
);

sort_enum!(
    SearchSort {
        Relevance => "relevance",
        Hot => "hot",
        Top => "top",
        New => "new",
        Comments => "comments",
    }
);

sort_enum!(
    TimeFilter {
        Hour => "hour",
        Day => "day",
        Week => "week",
        Month => "month",
        Year => "year",
        All => "all",
    }
);
