//! Routes inbound payloads to the engine

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::orchestrator::engine::Engine;
use crate::orchestrator::request::{ParseError, Request};

/// Decodes payloads and hands valid requests to the engine.
///
/// Payloads without a correlation id are dropped without a reply, since no
/// response could be matched to them.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<Engine>,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn dispatch(&self, payload: Value) {
        match Request::parse(payload) {
            Ok(request) => self.engine.handle(&request).await,
            Err(ParseError::MissingRequestId) => {
                debug!("Dropping message without request_id");
            }
            Err(ParseError::NotAnObject) => {
                warn!("Dropping message that is not a JSON object");
            }
            Err(ParseError::UnknownCommand(name)) => {
                error!("Unknown request '{}', dropping it", name);
            }
        }
    }
}
