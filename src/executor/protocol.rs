//! Loopback Protocol Definitions
//!
//! Endpoints and DTOs a node uses to invoke its own runners over HTTP.

use super::types::*;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_RUNNER_DISPATCH: &str = "/internal/runner/:id/dispatch";
pub const ENDPOINT_HEALTHCHECK: &str = "/internal/healthcheck";

pub fn runner_dispatch_path(runner_id: &str) -> String {
    ENDPOINT_RUNNER_DISPATCH.replace(":id", runner_id)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchAck {
    pub runner_id: String,
    /// `false` when no runner with this id exists.
    pub accepted: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HealthcheckReport {
    /// Stuck runners that were re-invoked.
    pub resumed: Vec<String>,
    /// Runners whose queue had drained; their schedule was cleared.
    pub cleared: Vec<String>,
    pub outcomes: Vec<HandleOutcome>,
}
