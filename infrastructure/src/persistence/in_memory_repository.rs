// ./infrastructure/src/persistence/in_memory_repository.rs
use application::{ApplicationError, NewPost, PostPage, PostRepository};
use async_trait::async_trait;
use domain::{Post, PostId, PostPatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// In-memory post store.
///
/// One map behind one lock: writers (`create`/`update`/`delete`/`replace_all`)
/// take the write half, readers take the read half and always observe a
/// consistent snapshot. The map is a `BTreeMap` keyed by id, so listing and
/// search come out in id-ascending order, stable across calls absent
/// mutation. No lock is ever held across I/O.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostRepository {
    posts: Arc<RwLock<BTreeMap<PostId, Arc<Post>>>>,
}

impl InMemoryPostRepository {
    pub fn new() -> Self {
        Self {
            posts: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

#[async_trait]
impl PostRepository for InMemoryPostRepository {
    #[instrument(skip(self, new_post))]
    async fn create(&self, new_post: NewPost) -> Result<Post, ApplicationError> {
        let mut posts = self.posts.write().await;
        // Highest existing id + 1, so bootstrap-assigned ids are respected.
        let id = posts
            .keys()
            .next_back()
            .map_or(PostId::new(1), |last| PostId::new(last.value() + 1));
        if posts.contains_key(&id) {
            warn!(post_id = %id, "Create failed: id already taken");
            return Err(ApplicationError::Conflict(id));
        }
        let post = Post::new(id, new_post.user_id, new_post.title, new_post.body)?;
        posts.insert(id, Arc::new(post.clone()));
        debug!(post_id = %id, "Post stored");
        Ok(post)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: PostId) -> Result<Option<Post>, ApplicationError> {
        debug!(post_id = %id, "Getting post from in-memory store");
        let posts = self.posts.read().await;
        Ok(posts.get(&id).map(|post| (**post).clone()))
    }

    #[instrument(skip(self))]
    async fn list_page(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<PostPage, ApplicationError> {
        let page = page.max(1); // page numbers are 1-indexed
        let posts = self.posts.read().await;
        let total = posts.len();
        let start = (page - 1).saturating_mul(page_size);
        let items: Vec<Post> = posts
            .values()
            .skip(start)
            .take(page_size)
            .map(|post| (**post).clone())
            .collect();
        let has_more = start + items.len() < total;
        debug!(page, returned = items.len(), total, "Listed page from in-memory store");
        Ok(PostPage {
            posts: items,
            page,
            page_size,
            total,
            has_more,
        })
    }

    #[instrument(skip(self))]
    async fn search_by_title(&self, needle: &str) -> Result<Vec<Post>, ApplicationError> {
        let needle_lower = needle.to_lowercase();
        let posts = self.posts.read().await;
        let hits: Vec<Post> = posts
            .values()
            .filter(|post| post.title_contains(&needle_lower))
            .map(|post| (**post).clone())
            .collect();
        debug!(needle = %needle, hits = hits.len(), "Title search in in-memory store");
        Ok(hits)
    }

    #[instrument(skip(self, patch))]
    async fn update(
        &self,
        id: PostId,
        patch: PostPatch,
    ) -> Result<Option<Post>, ApplicationError> {
        let mut posts = self.posts.write().await;
        match posts.get_mut(&id) {
            Some(entry) => {
                // Patch a copy first; a validation failure must leave the
                // stored post untouched.
                let mut updated = (**entry).clone();
                updated.apply_patch(patch)?;
                *entry = Arc::new(updated.clone());
                debug!(post_id = %id, "Post updated");
                Ok(Some(updated))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: PostId) -> Result<bool, ApplicationError> {
        let mut posts = self.posts.write().await;
        let removed = posts.remove(&id).is_some();
        debug!(post_id = %id, removed, "Delete from in-memory store");
        Ok(removed)
    }

    #[instrument(skip(self, posts))]
    async fn replace_all(&self, posts: Vec<Post>) -> Result<usize, ApplicationError> {
        // Build the replacement map before taking the lock: the write lock is
        // held only for the swap, and readers see either the old contents or
        // the new, never an empty-then-partially-filled transition.
        let mut replacement = BTreeMap::new();
        for post in posts {
            let id = post.id();
            if replacement.insert(id, Arc::new(post)).is_some() {
                warn!(post_id = %id, "Replace-all rejected: duplicate id in input");
                return Err(ApplicationError::Conflict(id));
            }
        }
        let count = replacement.len();
        let mut current = self.posts.write().await;
        *current = replacement;
        debug!(count, "Store contents replaced");
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn count(&self) -> Result<usize, ApplicationError> {
        Ok(self.posts.read().await.len())
    }
}
