//! HTTP front end for the relay and the message queue.

mod api;
mod app;
mod error;
mod handlers;
mod queue;

pub use api::*;
pub use app::*;
pub use error::{ApiError, OVERLOADED_MESSAGE};
pub use handlers::*;
pub use queue::*;
