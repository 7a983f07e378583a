//! Normalized records and the wire envelopes they are projected from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const KIND_POST: &str = "t3";
pub const KIND_COMMENT: &str = "t1";
pub const KIND_MORE: &str = "more";

/// `{"kind": "Listing", "data": {"children": [...], "after": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListingEnvelope {
    pub data: ListingData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    #[serde(default)]
    pub after: Option<String>,
}

/// One child of a listing, tagged by its kind discriminator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Thing {
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// When a post was edited. Upstream sends `false` for unedited posts, a
/// timestamp for edited ones and a bare `true` on some older records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edited {
    At(f64),
    /// Edited at an unknown time; always `true`.
    Flag(bool),
}

impl Edited {
    /// `None` for the falsy shapes (`false`, `0`).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Edited::Flag(true)),
            Value::Number(n) => n.as_f64().filter(|ts| *ts != 0.0).map(Edited::At),
            _ => None,
        }
    }

    pub fn timestamp(self) -> Option<f64> {
        match self {
            Edited::At(ts) => Some(ts),
            Edited::Flag(_) => None,
        }
    }
}

/// Post projected onto the stable field set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selftext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvote_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_comments: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_flair_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<Edited>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_18: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_self: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Post {
    /// Projects a raw `t3` data object. Unknown or mistyped fields are dropped.
    pub fn from_data(data: &Value) -> Self {
        let is_self = truthy_bool(data, "is_self");
        Self {
            id: string(data, "id"),
            title: string(data, "title"),
            author: string(data, "author"),
            selftext: string(data, "selftext"),
            score: data.get("score").and_then(Value::as_i64),
            upvote_ratio: data.get("upvote_ratio").and_then(Value::as_f64),
            num_comments: data.get("num_comments").and_then(Value::as_u64),
            created_utc: data.get("created_utc").and_then(Value::as_f64),
            subreddit: string(data, "subreddit"),
            permalink: string(data, "permalink"),
            url: string(data, "url"),
            link_flair_text: string(data, "link_flair_text"),
            edited: data.get("edited").and_then(Edited::from_value),
            over_18: truthy_bool(data, "over_18"),
            is_self,
            domain: if is_self.is_some() {
                None
            } else {
                string(data, "domain").filter(|d| !d.is_empty())
            },
        }
    }
}

/// Comment with its (possibly truncated) reply subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    /// Projects a raw `t1` data object without its replies.
    pub fn from_data(data: &Value, depth: usize) -> Self {
        Self {
            id: string(data, "id"),
            author: string(data, "author"),
            body: string(data, "body"),
            score: data.get("score").and_then(Value::as_i64),
            created_utc: data.get("created_utc").and_then(Value::as_f64),
            parent_id: string(data, "parent_id"),
            permalink: string(data, "permalink"),
            depth,
            replies: Vec::new(),
        }
    }

    /// Number of comments in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.replies.iter().map(Comment::subtree_len).sum::<usize>()
    }
}

/// A normalized listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "lowercase")]
pub enum Item {
    Post(Post),
    Comment(Comment),
}

impl Item {
    pub fn id(&self) -> Option<&str> {
        match self {
            Item::Post(post) => post.id.as_deref(),
            Item::Comment(comment) => comment.id.as_deref(),
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            Item::Post(post) => Some(post),
            Item::Comment(_) => None,
        }
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            Item::Comment(comment) => Some(comment),
            Item::Post(_) => None,
        }
    }
}

fn string(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn truthy_bool(data: &Value, key: &str) -> Option<bool> {
    data.get(key).and_then(Value::as_bool).filter(|flag| *flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_post() -> Value {
        json!({
            "id": "abc123",
            "title": "Hello",
            "author": "someone",
            "selftext": "",
            "score": 42,
            "upvote_ratio": 0.97,
            "num_comments": 3,
            "created_utc": 1700000000.0,
            "subreddit": "rust",
            "permalink": "/r/rust/comments/abc123/hello/",
            "url": "https://example.com/a",
            "link_flair_text": null,
            "edited": false,
            "over_18": false,
            "is_self": false,
            "domain": "example.com",
            "thumbnail": "self",
            "gilded": 0
        })
    }

    #[test]
    fn post_keeps_only_stable_and_truthy_fields() {
        let post = Post::from_data(&raw_post());
        assert_eq!(post.id.as_deref(), Some("abc123"));
        assert_eq!(post.score, Some(42));
        assert_eq!(post.link_flair_text, None);
        assert_eq!(post.edited, None);
        assert_eq!(post.over_18, None);
        assert_eq!(post.is_self, None);
        assert_eq!(post.domain.as_deref(), Some("example.com"));

        let value = serde_json::to_value(&post).unwrap();
        assert!(value.get("thumbnail").is_none());
        assert!(value.get("edited").is_none());
    }

    #[test]
    fn self_posts_drop_domain() {
        let mut raw = raw_post();
        raw["is_self"] = json!(true);
        raw["domain"] = json!("self.rust");
        raw["edited"] = json!(1700000100.0);
        let post = Post::from_data(&raw);
        assert_eq!(post.is_self, Some(true));
        assert_eq!(post.domain, None);
        assert_eq!(post.edited, Some(Edited::At(1700000100.0)));
        assert_eq!(post.edited.and_then(Edited::timestamp), Some(1700000100.0));
    }

    #[test]
    fn edited_keeps_any_truthy_marker() {
        let mut raw = raw_post();
        raw["edited"] = json!(true);
        let post = Post::from_data(&raw);
        assert_eq!(post.edited, Some(Edited::Flag(true)));

        let value = serde_json::to_value(&post).unwrap();
        assert_eq!(value["edited"], true);
        assert_eq!(Post::from_data(&value), post);

        raw["edited"] = json!(0);
        assert_eq!(Post::from_data(&raw).edited, None);
    }

    #[test]
    fn normalization_is_idempotent() {
        let post = Post::from_data(&raw_post());
        let again = Post::from_data(&serde_json::to_value(&post).unwrap());
        assert_eq!(post, again);

        let comment = Comment::from_data(
            &json!({"id": "c1", "author": "a", "body": "hi", "score": 1, "parent_id": "t3_abc123", "ups": 1}),
            0,
        );
        let again = Comment::from_data(&serde_json::to_value(&comment).unwrap(), 0);
        assert_eq!(comment, again);
    }

    #[test]
    fn items_serialize_with_type_tag() {
        let item = Item::Post(Post::from_data(&raw_post()));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["item_type"], "post");
        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
