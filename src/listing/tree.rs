//! Comment tree reconstruction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::models::{Comment, KIND_COMMENT, KIND_MORE, Post, Thing};

/// The three shapes a comment's `replies` attribute arrives in.
#[derive(Debug, Clone, PartialEq)]
pub enum Replies {
    /// A nested listing to recurse into.
    Expanded(Vec<Thing>),
    /// A "more" marker or an empty-string placeholder.
    Collapsed,
    /// No `replies` attribute at all.
    Absent,
}

impl Replies {
    pub(crate) fn from_data(data: &Value) -> Self {
        let Some(raw) = data.get("replies") else {
            return Replies::Absent;
        };
        if raw.get("kind").and_then(Value::as_str) == Some(KIND_MORE) {
            return Replies::Collapsed;
        }
        match raw
            .get("data")
            .and_then(|d| d.get("children"))
            .cloned()
            .map(serde_json::from_value::<Vec<Thing>>)
        {
            Some(Ok(children)) => Replies::Expanded(children),
            _ => Replies::Collapsed,
        }
    }
}

/// Builds the ordered comment forest from a listing's children.
///
/// Levels deeper than `max_depth` are dropped; `more` entries are skipped.
pub(crate) fn build_comment_tree(children: &[Thing], max_depth: usize) -> Vec<Comment> {
    build_level(children, 0, max_depth)
}

fn build_level(children: &[Thing], depth: usize, max_depth: usize) -> Vec<Comment> {
    if depth >= max_depth {
        return Vec::new();
    }

    children
        .iter()
        .filter(|child| child.kind == KIND_COMMENT)
        .map(|child| {
            let mut comment = Comment::from_data(&child.data, depth);
            if let Replies::Expanded(nested) = Replies::from_data(&child.data) {
                comment.replies = build_level(&nested, depth + 1, max_depth);
            }
            comment
        })
        .collect()
}

/// A post together with its reconstructed comment forest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentThread {
    pub post: Option<Post>,
    pub comments: Vec<Comment>,
}

impl CommentThread {
    /// Pre-order walk; each comment carries its own `depth`.
    pub fn flatten(&self) -> Vec<&Comment> {
        let mut out = Vec::with_capacity(self.total_comments());
        let mut stack: Vec<&Comment> = self.comments.iter().rev().collect();
        while let Some(comment) = stack.pop() {
            out.push(comment);
            stack.extend(comment.replies.iter().rev());
        }
        out
    }

    pub fn total_comments(&self) -> usize {
        self.comments.iter().map(Comment::subtree_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn things(value: Value) -> Vec<Thing> {
        serde_json::from_value(value).unwrap()
    }

    fn listing(children: Value) -> Value {
        json!({"kind": "Listing", "data": {"children": children, "after": null}})
    }

    fn comment(id: &str, replies: Value) -> Value {
        json!({"kind": "t1", "data": {"id": id, "author": "x", "body": id, "replies": replies}})
    }

    #[test]
    fn rebuilds_three_level_chain() {
        let c = comment("c", json!(""));
        let b = comment("b", listing(json!([c])));
        let a = comment("a", listing(json!([b])));
        let tree = build_comment_tree(&things(json!([a])), 100);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id.as_deref(), Some("a"));
        assert_eq!(tree[0].replies[0].id.as_deref(), Some("b"));
        assert_eq!(tree[0].replies[0].replies[0].id.as_deref(), Some("c"));
        assert_eq!(tree[0].replies[0].replies[0].depth, 2);
        assert!(tree[0].replies[0].replies[0].replies.is_empty());
    }

    #[test]
    fn more_marker_becomes_empty_replies() {
        let more = json!({"kind": "more", "data": {"count": 4, "children": ["x1", "x2"]}});
        let raw = things(json!([
            comment("a", more.clone()),
            more,
            comment("b", Value::Null),
        ]));
        let tree = build_comment_tree(&raw, 100);
        let ids: Vec<_> = tree.iter().map(|c| c.id.as_deref().unwrap()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(tree[0].replies.is_empty());
    }

    #[test]
    fn replies_shapes_are_classified() {
        assert_eq!(Replies::from_data(&json!({"id": "a"})), Replies::Absent);
        assert_eq!(Replies::from_data(&json!({"replies": ""})), Replies::Collapsed);
        assert!(matches!(
            Replies::from_data(&json!({"replies": listing(json!([]))})),
            Replies::Expanded(children) if children.is_empty()
        ));
    }

    #[test]
    fn depth_limit_truncates() {
        let mut node = comment("leaf", json!(""));
        for id in ["d3", "d2", "d1", "d0"] {
            node = comment(id, listing(json!([node])));
        }
        let tree = build_comment_tree(&things(json!([node])), 2);
        assert_eq!(tree[0].replies.len(), 1);
        assert!(tree[0].replies[0].replies.is_empty());
    }

    #[test]
    fn flatten_is_pre_order() {
        let a = comment("a", listing(json!([comment("a1", json!("")), comment("a2", json!(""))])));
        let b = comment("b", json!(""));
        let thread = CommentThread {
            post: None,
            comments: build_comment_tree(&things(json!([a, b])), 100),
        };
        let ids: Vec<_> = thread
            .flatten()
            .iter()
            .map(|c| c.id.clone().unwrap())
            .collect();
        assert_eq!(ids, ["a", "a1", "a2", "b"]);
        assert_eq!(thread.total_comments(), 4);
    }
}
