use serde::{Deserialize, Serialize};
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Post id must be positive, got {0}")]
    NonPositiveId(i64),
    #[error("Post title must not be empty")]
    EmptyTitle,
}

// --- Post ID ---
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PostId(i64);

impl PostId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }
    pub fn value(&self) -> i64 {
        self.0
    }
}
impl From<i64> for PostId {
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}
impl From<PostId> for i64 {
    fn from(id: PostId) -> Self {
        id.0
    }
}
impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// --- Post Record ---

/// A single stored post. The id is assigned externally (seed source or store)
/// and never changes after construction; updates go through [`Post::apply_patch`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Post {
    id: PostId,
    /// Owning user. Informational only, no referential constraint is enforced.
    #[serde(rename = "userId")]
    user_id: i64,
    title: String,
    body: String,
}

impl Post {
    /// Creates a post, enforcing the required fields at construction time.
    /// The id must be positive and the title non-empty; the body may be empty.
    pub fn new(
        id: PostId,
        user_id: i64,
        title: String,
        body: String,
    ) -> Result<Self, DomainError> {
        if id.value() <= 0 {
            return Err(DomainError::NonPositiveId(id.value()));
        }
        if title.trim().is_empty() {
            return Err(DomainError::EmptyTitle);
        }
        Ok(Self {
            id,
            user_id,
            title,
            body,
        })
    }

    pub fn id(&self) -> PostId {
        self.id
    }
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Applies the fields present in the patch. Identity is untouched: the
    /// patch shape has no id field at all, so an update can never move a post
    /// to a different id. A new title is validated like at construction.
    pub fn apply_patch(&mut self, patch: PostPatch) -> Result<(), DomainError> {
        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(DomainError::EmptyTitle);
            }
            self.title = title;
        }
        if let Some(body) = patch.body {
            self.body = body;
        }
        if let Some(user_id) = patch.user_id {
            self.user_id = user_id;
        }
        Ok(())
    }

    /// Case-insensitive, unanchored substring match against the title.
    pub fn title_contains(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
    }
}

/// Partial update for a post. Only the present fields are applied.
/// Deliberately has no id field; unknown keys (including "id") in an incoming
/// JSON payload are dropped by serde.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PostPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post::new(
            PostId::new(7),
            3,
            "qui est esse".to_string(),
            "est rerum tempore vitae".to_string(),
        )
        .expect("sample post should be valid")
    }

    #[test]
    fn construction_validates_required_fields() {
        let post = sample_post();
        assert_eq!(post.id(), PostId::new(7));
        assert_eq!(post.user_id(), 3);
        assert_eq!(post.title(), "qui est esse");

        assert_eq!(
            Post::new(PostId::new(0), 1, "t".into(), "b".into()),
            Err(DomainError::NonPositiveId(0))
        );
        assert_eq!(
            Post::new(PostId::new(1), 1, "   ".into(), "b".into()),
            Err(DomainError::EmptyTitle)
        );
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut post = sample_post();
        post.apply_patch(PostPatch {
            title: Some("updated".into()),
            body: None,
            user_id: None,
        })
        .unwrap();
        assert_eq!(post.title(), "updated");
        assert_eq!(post.body(), "est rerum tempore vitae"); // untouched
        assert_eq!(post.user_id(), 3); // untouched
        assert_eq!(post.id(), PostId::new(7)); // identity preserved
    }

    #[test]
    fn patch_rejects_empty_title() {
        let mut post = sample_post();
        let result = post.apply_patch(PostPatch {
            title: Some("".into()),
            ..PostPatch::default()
        });
        assert_eq!(result, Err(DomainError::EmptyTitle));
        assert_eq!(post.title(), "qui est esse"); // unchanged on failure
    }

    #[test]
    fn patch_json_drops_id_key() {
        // An "id" in the payload must never change the record's identity.
        let patch: PostPatch =
            serde_json::from_str(r#"{"id": 999, "title": "renamed"}"#).unwrap();
        assert_eq!(patch.title.as_deref(), Some("renamed"));
        assert_eq!(patch.user_id, None);
    }

    #[test]
    fn title_match_is_case_insensitive_and_unanchored() {
        let post = sample_post();
        assert!(post.title_contains("est es"));
        assert!(post.title_contains("qui"));
        assert!(!post.title_contains("zzz"));
    }

    #[test]
    fn post_serializes_with_user_id_key() {
        let json = serde_json::to_value(sample_post()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["userId"], 3);
        assert_eq!(json["title"], "qui est esse");
    }
}
