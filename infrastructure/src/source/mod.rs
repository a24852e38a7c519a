pub mod json_placeholder;

// Re-export the seed source adapter
pub use json_placeholder::{DEFAULT_SEED_URL, JsonPlaceholderSource};
