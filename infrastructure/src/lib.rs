// Module declarations
pub mod persistence;
pub mod source;

// Re-export all implementations
pub use persistence::InMemoryPostRepository;
pub use source::{DEFAULT_SEED_URL, JsonPlaceholderSource};
