pub mod backend;
pub mod body;
pub mod context;
pub mod handler;
pub mod headers;

pub use handler::{handle_request, STATUS_CHECK_PATH};
