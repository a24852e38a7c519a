// ./api/src/main.rs
use axum::{
    Json,
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Import application layer components
use application::{
    ApplicationError,
    BootstrapService,
    // DTOs / Requests / Responses
    CreatePostRequest,
    // Services
    PostService,
    SearchService,
    StatsService,
};
// Import domain types used directly in API (ids from URL paths, patch bodies)
use domain::{PostId, PostPatch};
// Import infrastructure layer implementations
use infrastructure::{DEFAULT_SEED_URL, InMemoryPostRepository, JsonPlaceholderSource};

/// Application state shared by all request handlers.
#[derive(Clone)]
struct AppState {
    post_service: Arc<PostService>,
    search_service: Arc<SearchService>,
    stats_service: Arc<StatsService>,
}

const DEFAULT_PORT: u16 = 3000;

// Application entry point
#[tokio::main]
async fn main() {
    let port = match env::var("PORT") {
        Ok(port_str) => match u16::from_str(&port_str) {
            Ok(port_num) => {
                info!("Using port {} from environment variable PORT.", port_num);
                port_num
            }
            Err(_) => {
                warn!(
                    "Invalid PORT value '{}' in environment variable. Using default port {}.",
                    port_str, DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        },
        Err(_) => {
            info!(
                "PORT environment variable not set. Using default port {}.",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    };

    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let seed_url = match env::var("POSTS_SOURCE_URL") {
        Ok(url) => {
            info!("Using seed source URL from environment: {}", url);
            url
        }
        Err(_) => DEFAULT_SEED_URL.to_string(),
    };

    // --- Dependency Injection ---
    // 1. Create infrastructure components
    let repository = Arc::new(InMemoryPostRepository::new());
    let seed_source = match JsonPlaceholderSource::new(seed_url) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("Failed to construct seed source HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    info!("Infrastructure components initialized.");

    // 2. Create application services, injecting dependencies
    let post_service = Arc::new(PostService::new(repository.clone()));
    let search_service = Arc::new(SearchService::new(repository.clone()));
    let stats_service = Arc::new(StatsService::new(repository.clone()));
    let bootstrap_service = BootstrapService::new(repository.clone(), seed_source);
    info!("Application services initialized.");

    // --- One-time Bootstrap ---
    // Seed failure is not fatal: the process serves whatever the store holds
    // (an empty collection on first run) and a restart retries the seed.
    match bootstrap_service.ensure_seeded().await {
        Ok(0) => info!("Store already populated, no seeding performed."),
        Ok(count) => info!("Seeding completed, {} posts loaded.", count),
        Err(e) => error!("Seeding failed: {}. Serving with current store contents.", e),
    }

    // 3. Create the application state
    let app_state = AppState {
        post_service,
        search_service,
        stats_service,
    };

    // --- API Router Definition ---
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats_handler))
        // Post CRUD + listing
        .route("/posts", get(list_posts_handler))
        .route("/posts", post(create_post_handler))
        .route("/posts/:id", get(get_post_handler))
        .route("/posts/:id", put(update_post_handler))
        .route("/posts/:id", delete(delete_post_handler))
        // Title search
        .route("/posts/search", get(search_posts_handler))
        // Provide the application state to the handlers
        .with_state(app_state);

    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server starting on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

// --- Query Parameter Shapes ---

#[derive(Deserialize, Debug)]
struct ListParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct SearchParams {
    title: Option<String>,
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Handler for listing posts page by page (GET /posts?page=&page_size=).
async fn list_posts_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    info!(page = ?params.page, page_size = ?params.page_size, "Received request to list posts");
    match state
        .search_service
        .list_posts(params.page, params.page_size)
        .await
    {
        Ok(page) => (StatusCode::OK, JsonResponse(page)).into_response(),
        Err(e) => {
            error!("Failed to list posts via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for creating a post (POST /posts).
async fn create_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Response {
    info!(title = %payload.title, "Received request to create post");
    match state.post_service.create_post(payload).await {
        Ok(created) => (StatusCode::CREATED, JsonResponse(created)).into_response(),
        Err(e) => {
            error!("Failed to create post via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for fetching a single post (GET /posts/:id).
/// A non-numeric id is rejected by path extraction before reaching the core.
async fn get_post_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    info!(post_id = id, "Received request to get post");
    match state.post_service.get_post(PostId::new(id)).await {
        Ok(found) => (StatusCode::OK, JsonResponse(found)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for partially updating a post (PUT /posts/:id).
async fn update_post_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<PostPatch>,
) -> Response {
    info!(post_id = id, "Received request to update post");
    match state.post_service.update_post(PostId::new(id), patch).await {
        Ok(updated) => (StatusCode::OK, JsonResponse(updated)).into_response(),
        Err(e) => {
            error!(post_id = id, "Failed to update post via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for deleting a post (DELETE /posts/:id).
async fn delete_post_handler(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    info!(post_id = id, "Received request to delete post");
    match state.post_service.delete_post(PostId::new(id)).await {
        Ok(true) => (StatusCode::NO_CONTENT, "").into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            format!("No post found with ID {}", id),
        )
            .into_response(),
        Err(e) => {
            error!(post_id = id, "Failed to delete post via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for title search (GET /posts/search?title=).
async fn search_posts_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let needle = params.title.unwrap_or_default();
    info!(title = %needle, "Received search request");
    match state.search_service.search_posts(&needle).await {
        Ok(response) => {
            info!("Search completed via handler, {} hits", response.nb_hits);
            (StatusCode::OK, JsonResponse(response)).into_response()
        }
        Err(e) => {
            error!("Failed to search posts via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

async fn get_stats_handler(State(state): State<AppState>) -> Response {
    info!("Received request to get statistics");
    match state.stats_service.get_stats().await {
        Ok(stats_response) => (StatusCode::OK, JsonResponse(stats_response)).into_response(),
        Err(e) => {
            error!("Failed to get statistics via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Helper function to map ApplicationError enum to HTTP status codes and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, body) = match err {
        ApplicationError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            format!("No post found with ID {}", id),
        ),
        ApplicationError::Conflict(id) => (
            StatusCode::CONFLICT,
            format!("Post with ID {} already exists", id),
        ),
        ApplicationError::Domain(domain_err) => {
            // Construction/patch validation failures are caller errors
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        // Bootstrap errors never come out of request handlers, but the
        // mapping stays total rather than panicking on a new caller.
        ApplicationError::SourceUnavailable(msg) => {
            error!("Seed source unavailable: {}", msg);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Seed source unavailable".to_string(),
            )
        }
        ApplicationError::MappingError(msg) => {
            error!("Seed mapping error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Seed dataset could not be mapped".to_string(),
            )
        }
        ApplicationError::Infrastructure(msg) => {
            error!("Underlying infrastructure error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (status, body).into_response() // Convert tuple to Response
}
