//! Listing targets, normalized items and the page walker.

pub mod identifiers;
pub mod models;
pub mod pagination;
pub mod tree;

use std::fmt;

use serde_json::Value;

pub use identifiers::{
    CommentSort, ListingSort, PostId, SearchSort, Subreddit, TimeFilter, UserSort, Username,
    ValidationError, validate_limit,
};
pub use models::{Comment, Edited, Item, Post};
pub use pagination::{Page, PageSource, Paginator};
pub use tree::{CommentThread, Replies};

use models::{KIND_COMMENT, KIND_POST, ListingEnvelope};

/// Which slice of a user's history to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserActivity {
    Submitted,
    Comments,
    Overview,
}

impl UserActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            UserActivity::Submitted => "submitted",
            UserActivity::Comments => "comments",
            UserActivity::Overview => "overview",
        }
    }
}

/// A paginated listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListingTarget {
    Subreddit {
        name: Subreddit,
        sort: ListingSort,
    },
    User {
        username: Username,
        activity: UserActivity,
        sort: UserSort,
    },
    Search {
        subreddit: Option<Subreddit>,
        query: String,
        sort: SearchSort,
        time_filter: TimeFilter,
    },
}

impl ListingTarget {
    /// `subreddit` may carry an `r/` prefix; `sort` is matched case-insensitively.
    pub fn subreddit(name: &str, sort: &str) -> Result<Self, ValidationError> {
        Ok(ListingTarget::Subreddit {
            name: Subreddit::parse(name)?,
            sort: sort.parse()?,
        })
    }

    pub fn user(username: &str, activity: UserActivity, sort: &str) -> Result<Self, ValidationError> {
        Ok(ListingTarget::User {
            username: Username::parse(username)?,
            activity,
            sort: sort.parse()?,
        })
    }

    pub fn search(
        subreddit: Option<&str>,
        query: &str,
        sort: &str,
        time_filter: &str,
    ) -> Result<Self, ValidationError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError("Search query cannot be empty".into()));
        }
        Ok(ListingTarget::Search {
            subreddit: subreddit.map(Subreddit::parse).transpose()?,
            query: query.to_string(),
            sort: sort.parse()?,
            time_filter: time_filter.parse()?,
        })
    }

    /// Path relative to the API base, including the `.json` suffix.
    pub fn path(&self) -> String {
        match self {
            ListingTarget::Subreddit { name, sort } => format!("/r/{name}/{sort}.json"),
            ListingTarget::User {
                username, activity, ..
            } => format!("/user/{username}/{}.json", activity.as_str()),
            ListingTarget::Search {
                subreddit: Some(name),
                ..
            } => format!("/r/{name}/search.json"),
            ListingTarget::Search { subreddit: None, .. } => "/search.json".to_string(),
        }
    }

    /// Target-specific query parameters; `limit`/`after` are added per page.
    pub fn query(&self) -> Vec<(String, String)> {
        match self {
            ListingTarget::Subreddit { .. } => Vec::new(),
            ListingTarget::User { sort, .. } => vec![("sort".into(), sort.as_str().into())],
            ListingTarget::Search {
                subreddit,
                query,
                sort,
                time_filter,
            } => vec![
                ("q".into(), query.clone()),
                (
                    "restrict_sr".into(),
                    if subreddit.is_some() { "on" } else { "off" }.into(),
                ),
                ("sort".into(), sort.as_str().into()),
                ("t".into(), time_filter.as_str().into()),
            ],
        }
    }

    fn accepts(&self, kind: &str) -> bool {
        match self {
            ListingTarget::User {
                activity: UserActivity::Comments,
                ..
            } => kind == KIND_COMMENT,
            ListingTarget::User {
                activity: UserActivity::Overview,
                ..
            } => kind == KIND_POST || kind == KIND_COMMENT,
            _ => kind == KIND_POST,
        }
    }

    /// Decodes one listing response into normalized items and the next cursor.
    pub fn parse_page(&self, body: Value) -> Result<Page, serde_json::Error> {
        let envelope: ListingEnvelope = serde_json::from_value(body)?;
        let raw_len = envelope.data.children.len();
        let items = envelope
            .data
            .children
            .into_iter()
            .filter(|child| self.accepts(&child.kind))
            .map(|child| match child.kind.as_str() {
                KIND_POST => Item::Post(Post::from_data(&child.data)),
                _ => Item::Comment(Comment::from_data(&child.data, 0)),
            })
            .collect();
        Ok(Page {
            items,
            after: envelope.data.after.filter(|cursor| !cursor.is_empty()),
            raw_len,
        })
    }
}

impl fmt::Display for ListingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingTarget::Subreddit { name, sort } => write!(f, "r/{name} ({sort})"),
            ListingTarget::User {
                username, activity, ..
            } => write!(f, "u/{username} ({})", activity.as_str()),
            ListingTarget::Search {
                subreddit, query, ..
            } => match subreddit {
                Some(name) => write!(f, "search r/{name}: {query}"),
                None => write!(f, "search: {query}"),
            },
        }
    }
}
