//! Prompt relay: attempts, retry policy, coordination and completion mapping.

mod attempt;
mod coordinator;
mod error;
mod mapper;
mod policy;
mod runner;

pub use attempt::*;
pub use coordinator::*;
pub use error::*;
pub use mapper::*;
pub use policy::*;
pub use runner::*;
