use async_trait::async_trait;
use domain::{DomainError, Post, PostId, PostPatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sysinfo::{MemoryRefreshKind, Pid, System};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Post not found: {0}")]
    NotFound(PostId),
    #[error("Post id already exists: {0}")]
    Conflict(PostId),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Seed source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Malformed seed entry: {0}")]
    MappingError(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError), // Propagate domain errors cleanly
}

// --- Infrastructure Interfaces (Traits) ---

/// Input for creating a post; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: i64,
    pub title: String,
    pub body: String,
}

/// One page of posts, ordered by id ascending.
#[derive(Serialize, Debug, PartialEq)]
pub struct PostPage {
    pub posts: Vec<Post>,
    /// The 1-based page number actually served (requests below 1 are clamped).
    pub page: usize,
    pub page_size: usize,
    /// Total posts in the store before pagination.
    pub total: usize,
    pub has_more: bool,
}

/// Interface for the post store. Implementations must keep the unique-id
/// invariant: mutations never interleave in a way that lets two posts share
/// an id, and readers always observe a consistent snapshot.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Inserts a new post under a freshly assigned id and returns it.
    /// Fails with [`ApplicationError::Conflict`] if the chosen id is taken.
    async fn create(&self, new_post: NewPost) -> Result<Post, ApplicationError>;
    /// Exact-match lookup; `None` when the id does not exist.
    async fn get(&self, id: PostId) -> Result<Option<Post>, ApplicationError>;
    /// 1-indexed page listing, id ascending. `page` below 1 is treated as 1.
    async fn list_page(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<PostPage, ApplicationError>;
    /// Case-insensitive substring match against titles, id ascending.
    async fn search_by_title(&self, needle: &str) -> Result<Vec<Post>, ApplicationError>;
    /// Applies the present patch fields; `None` when the id does not exist.
    async fn update(
        &self,
        id: PostId,
        patch: PostPatch,
    ) -> Result<Option<Post>, ApplicationError>;
    /// Returns whether a post existed and was removed.
    async fn delete(&self, id: PostId) -> Result<bool, ApplicationError>;
    /// Atomically clears the store and inserts the given posts; readers see
    /// either the old contents or the new, never an in-between state. Fails
    /// with [`ApplicationError::Conflict`] on duplicate ids in the input.
    /// Reserved for the bootstrap path.
    async fn replace_all(&self, posts: Vec<Post>) -> Result<usize, ApplicationError>;
    /// Total number of stored posts.
    async fn count(&self) -> Result<usize, ApplicationError>;
}

/// A raw entry as delivered by the external dataset, before mapping.
/// Everything is optional here: the payload is untrusted and the mapping step
/// is where missing required fields are reported.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct RawPost {
    pub id: Option<i64>,
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Interface for the external dataset the store is seeded from.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetches the full raw dataset, in source order.
    /// Fails with [`ApplicationError::SourceUnavailable`] on any transport
    /// or decoding problem.
    async fn fetch_posts(&self) -> Result<Vec<RawPost>, ApplicationError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

/// Default number of posts per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 10;
// Sensible maximum to prevent abuse
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize, Debug)]
pub struct CreatePostRequest {
    #[serde(rename = "userId", default)]
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Serialize, Debug)]
pub struct SearchResponse {
    /// The trimmed needle that was matched.
    pub query: String,
    pub hits: Vec<Post>,
    pub nb_hits: usize,
}

#[derive(Serialize, Debug)]
pub struct MemoryStats {
    total_bytes: u64,
    used_bytes: u64,
    free_bytes: u64,
    available_bytes: u64,
    process_used_bytes: u64, // Memory used by this specific process
}

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    os_name: String,
    os_version: String,
}

#[derive(Serialize, Debug)]
pub struct EngineStats {
    total_posts: usize,
}

/// Response for the /stats endpoint.
#[derive(Serialize, Debug)]
pub struct StatsResponse {
    system_info: SystemInfo,
    memory: MemoryStats,
    engine: EngineStats,
}

// --- Application Services (Use Cases) ---

/// Service for single-post CRUD operations.
pub struct PostService {
    repo: Arc<dyn PostRepository>,
}

impl PostService {
    pub fn new(repo: Arc<dyn PostRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_post(
        &self,
        request: CreatePostRequest,
    ) -> Result<Post, ApplicationError> {
        info!("Attempting to create post");
        let post = self
            .repo
            .create(NewPost {
                user_id: request.user_id,
                title: request.title,
                body: request.body,
            })
            .await?;
        info!(post_id = %post.id(), "Post created successfully");
        Ok(post)
    }

    #[instrument(skip(self))]
    pub async fn get_post(&self, id: PostId) -> Result<Post, ApplicationError> {
        debug!("Looking up post");
        self.repo.get(id).await?.ok_or_else(|| {
            warn!(post_id = %id, "Post not found");
            ApplicationError::NotFound(id)
        })
    }

    #[instrument(skip(self, patch))]
    pub async fn update_post(
        &self,
        id: PostId,
        patch: PostPatch,
    ) -> Result<Post, ApplicationError> {
        info!("Attempting to update post");
        self.repo.update(id, patch).await?.ok_or_else(|| {
            warn!(post_id = %id, "Update failed: post not found");
            ApplicationError::NotFound(id)
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_post(&self, id: PostId) -> Result<bool, ApplicationError> {
        info!("Attempting to delete post");
        let deleted = self.repo.delete(id).await?;
        if deleted {
            info!(post_id = %id, "Post deleted");
        } else {
            // Deleting a missing post is not an error, just report the outcome.
            debug!(post_id = %id, "Delete was a no-op, post did not exist");
        }
        Ok(deleted)
    }
}

/// Service for listing and title search.
pub struct SearchService {
    repo: Arc<dyn PostRepository>,
}

impl SearchService {
    pub fn new(repo: Arc<dyn PostRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self))]
    pub async fn search_posts(&self, needle: &str) -> Result<SearchResponse, ApplicationError> {
        let needle = needle.trim();
        if needle.is_empty() {
            return Err(ApplicationError::InvalidArgument(
                "Search needle cannot be empty".to_string(),
            ));
        }
        let hits = self.repo.search_by_title(needle).await?;
        info!(query = %needle, nb_hits = hits.len(), "Title search completed");
        Ok(SearchResponse {
            query: needle.to_string(),
            nb_hits: hits.len(),
            hits,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_posts(
        &self,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<PostPage, ApplicationError> {
        let page = page.unwrap_or(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ApplicationError::InvalidArgument(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }
        let result = self.repo.list_page(page, page_size).await?;
        debug!(
            page = result.page,
            returned = result.posts.len(),
            total = result.total,
            has_more = result.has_more,
            "Page listed"
        );
        Ok(result)
    }
}

/// One-time bootstrap of an empty store from the external dataset.
///
/// The whole check-fetch-map-replace sequence runs under a single guard, so
/// concurrent startup callers wait for the in-flight attempt instead of
/// triggering a second fetch. The store's own lock is only taken by the final
/// `replace_all`; the fetch never blocks store readers.
pub struct BootstrapService {
    repo: Arc<dyn PostRepository>,
    source: Arc<dyn PostSource>,
    guard: Mutex<()>,
}

impl BootstrapService {
    pub fn new(repo: Arc<dyn PostRepository>, source: Arc<dyn PostSource>) -> Self {
        Self {
            repo,
            source,
            guard: Mutex::new(()),
        }
    }

    /// Seeds the store if and only if it is empty. Returns the number of
    /// posts loaded, 0 when the store was already populated. On any failure
    /// the store keeps its prior contents and the error goes to the caller,
    /// which decides whether to retry, halt, or serve an empty store.
    #[instrument(skip(self))]
    pub async fn ensure_seeded(&self) -> Result<usize, ApplicationError> {
        let _guard = self.guard.lock().await;

        if self.repo.count().await? > 0 {
            debug!("Store already populated, skipping seed");
            return Ok(0);
        }

        info!("Store is empty, fetching seed dataset");
        let raw_posts = self.source.fetch_posts().await?;
        let posts = raw_posts
            .into_iter()
            .enumerate()
            .map(|(index, raw)| map_raw_post(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let count = self.repo.replace_all(posts).await?;
        info!(count, "Seeding completed");
        Ok(count)
    }
}

/// Maps one raw seed entry into a post. `id`, `title` and `body` are
/// required; a missing `userId` defaults to 0 (the field is informational).
fn map_raw_post(index: usize, raw: RawPost) -> Result<Post, ApplicationError> {
    let id = raw
        .id
        .ok_or_else(|| ApplicationError::MappingError(format!("entry {}: missing id", index)))?;
    let title = raw.title.ok_or_else(|| {
        ApplicationError::MappingError(format!("entry {} (id {}): missing title", index, id))
    })?;
    let body = raw.body.ok_or_else(|| {
        ApplicationError::MappingError(format!("entry {} (id {}): missing body", index, id))
    })?;
    Post::new(PostId::new(id), raw.user_id.unwrap_or(0), title, body).map_err(|e| {
        ApplicationError::MappingError(format!("entry {} (id {}): {}", index, id, e))
    })
}

pub struct StatsService {
    repo: Arc<dyn PostRepository>,
}

impl StatsService {
    pub fn new(repo: Arc<dyn PostRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<StatsResponse, ApplicationError> {
        info!("Gathering engine and system statistics");

        let total_posts = self.repo.count().await?;
        let engine_stats = EngineStats { total_posts };

        // --- Gather System Stats (Sync Part in Blocking Task) ---
        let (system_info, memory_stats) = tokio::task::spawn_blocking(move || {
            let mut sys = System::new_all();
            sys.refresh_memory_specifics(MemoryRefreshKind::everything());

            let current_pid = Pid::from(std::process::id() as usize);
            let process_memory = sys.process(current_pid).map_or(0, |p| p.memory());

            let memory_stats = MemoryStats {
                total_bytes: sys.total_memory(),
                used_bytes: sys.used_memory(),
                free_bytes: sys.free_memory(),
                available_bytes: sys.available_memory(),
                process_used_bytes: process_memory,
            };
            let system_info = SystemInfo {
                os_name: System::name().unwrap_or_else(|| "Unknown OS".to_string()),
                os_version: System::os_version()
                    .unwrap_or_else(|| "Unknown Version".to_string()),
            };
            (system_info, memory_stats)
        })
        .await
        .map_err(|e| {
            error!("System stat gathering task failed: {}", e);
            ApplicationError::Infrastructure(format!("System stat gathering task failed: {}", e))
        })?;

        Ok(StatsResponse {
            system_info,
            memory: memory_stats,
            engine: engine_stats,
        })
    }
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal repository double for synchronizer tests: `count` and
    /// `replace_all` behave like the real store, the rest is unreachable
    /// from the paths under test.
    #[derive(Default)]
    struct SeedTargetRepo {
        posts: std::sync::Mutex<BTreeMap<PostId, Post>>,
    }

    #[async_trait]
    impl PostRepository for SeedTargetRepo {
        async fn create(&self, _new_post: NewPost) -> Result<Post, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn get(&self, _id: PostId) -> Result<Option<Post>, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn list_page(
            &self,
            _page: usize,
            _page_size: usize,
        ) -> Result<PostPage, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn search_by_title(
            &self,
            _needle: &str,
        ) -> Result<Vec<Post>, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn update(
            &self,
            _id: PostId,
            _patch: PostPatch,
        ) -> Result<Option<Post>, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn delete(&self, _id: PostId) -> Result<bool, ApplicationError> {
            Err(ApplicationError::Infrastructure("not exercised".into()))
        }
        async fn replace_all(&self, posts: Vec<Post>) -> Result<usize, ApplicationError> {
            let mut map = BTreeMap::new();
            for post in posts {
                if map.insert(post.id(), post.clone()).is_some() {
                    return Err(ApplicationError::Conflict(post.id()));
                }
            }
            let count = map.len();
            *self.posts.lock().unwrap() = map;
            Ok(count)
        }
        async fn count(&self) -> Result<usize, ApplicationError> {
            Ok(self.posts.lock().unwrap().len())
        }
    }

    /// Source double that counts fetches and fails for the first
    /// `fail_first` calls.
    struct ScriptedSource {
        fetches: AtomicUsize,
        fail_first: usize,
        payload: Vec<RawPost>,
    }

    impl ScriptedSource {
        fn new(fail_first: usize, payload: Vec<RawPost>) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail_first,
                payload,
            }
        }
        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PostSource for ScriptedSource {
        async fn fetch_posts(&self) -> Result<Vec<RawPost>, ApplicationError> {
            let attempt = self.fetches.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(ApplicationError::SourceUnavailable(
                    "connection refused".to_string(),
                ));
            }
            Ok(self.payload.clone())
        }
    }

    fn raw(id: i64, title: &str) -> RawPost {
        RawPost {
            id: Some(id),
            user_id: Some(1),
            title: Some(title.to_string()),
            body: Some("body".to_string()),
        }
    }

    #[tokio::test]
    async fn ensure_seeded_is_idempotent() {
        let repo = Arc::new(SeedTargetRepo::default());
        let source = Arc::new(ScriptedSource::new(0, vec![raw(1, "a"), raw(2, "b")]));
        let bootstrap = BootstrapService::new(repo.clone(), source.clone());

        assert_eq!(bootstrap.ensure_seeded().await.unwrap(), 2);
        // Second call must neither fetch nor replace.
        assert_eq!(bootstrap.ensure_seeded().await.unwrap(), 0);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_trigger_a_single_fetch() {
        let repo = Arc::new(SeedTargetRepo::default());
        let source = Arc::new(ScriptedSource::new(0, vec![raw(1, "a")]));
        let bootstrap = Arc::new(BootstrapService::new(repo.clone(), source.clone()));

        let (first, second) =
            tokio::join!(bootstrap.ensure_seeded(), bootstrap.ensure_seeded());
        // One caller does the work, the other observes the populated store.
        let mut results = [first.unwrap(), second.unwrap()];
        results.sort_unstable();
        assert_eq!(results, [0, 1]);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_store_untouched_and_retry_succeeds() {
        let repo = Arc::new(SeedTargetRepo::default());
        let source = Arc::new(ScriptedSource::new(1, vec![raw(1, "a")]));
        let bootstrap = BootstrapService::new(repo.clone(), source.clone());

        let err = bootstrap.ensure_seeded().await.unwrap_err();
        assert!(matches!(err, ApplicationError::SourceUnavailable(_)));
        assert_eq!(repo.count().await.unwrap(), 0);

        // Source recovered: the next attempt completes the seed.
        assert_eq!(bootstrap.ensure_seeded().await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_entry_aborts_the_seed() {
        let repo = Arc::new(SeedTargetRepo::default());
        let broken = RawPost {
            id: Some(3),
            title: None, // required
            ..RawPost::default()
        };
        let source = Arc::new(ScriptedSource::new(0, vec![raw(1, "a"), broken]));
        let bootstrap = BootstrapService::new(repo.clone(), source);

        let err = bootstrap.ensure_seeded().await.unwrap_err();
        assert!(matches!(err, ApplicationError::MappingError(_)));
        assert_eq!(repo.count().await.unwrap(), 0); // no partial seed
    }

    #[test]
    fn map_raw_post_defaults_missing_user_id() {
        let mapped = map_raw_post(
            0,
            RawPost {
                id: Some(5),
                user_id: None,
                title: Some("t".into()),
                body: Some("b".into()),
            },
        )
        .unwrap();
        assert_eq!(mapped.user_id(), 0);
        assert_eq!(mapped.id(), PostId::new(5));
    }

    #[tokio::test]
    async fn empty_search_needle_is_rejected() {
        let service = SearchService::new(Arc::new(SeedTargetRepo::default()));
        let err = service.search_posts("   ").await.unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let service = SearchService::new(Arc::new(SeedTargetRepo::default()));
        let err = service.list_posts(Some(1), Some(0)).await.unwrap_err();
        assert!(matches!(err, ApplicationError::InvalidArgument(_)));
    }
}
