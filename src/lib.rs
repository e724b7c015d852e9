// Re-export needed modules for testing
pub mod backend;
pub mod feed;
pub mod models;
pub mod render;

// Re-export main types for convenience
pub use backend::{IdentityProvider, LocalIdentityProvider, LocalStore, MessageStore};
pub use feed::{FeedController, FeedEvent, FeedSender, SendOutcome};
pub use models::*;
