//! Command orchestration: decoding, execution and reporting

pub mod dispatcher;
pub mod engine;
pub mod handlers;
pub mod request;
pub mod response;
pub mod schema;

pub use dispatcher::Dispatcher;
pub use engine::{Collaborators, Engine, EngineOptions, Outcome};
pub use request::{CommandKind, Request};
