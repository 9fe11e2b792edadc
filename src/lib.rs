pub mod api;
pub mod cache; // request cache owned by collaborators
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod reducer;
pub mod refresh;
pub mod render;
pub mod session;
pub mod thread;
pub mod validate;

// Re-export commonly used items for tests / external users
pub use api::CommentApi;
pub use error::{ApiError, SessionError, ValidationError};
pub use session::{ChangeCallback, CloseReport, SessionController};
pub use thread::{build_forest, AuthorContext, SortKey};
