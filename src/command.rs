use tracing::{error, info, warn};

use crate::error::UpdateError;
use crate::update::{UpdateHandler, UpdateRequest};

pub const UPDATE_ACTION: &str = "update";

/// Where a message arrived and who received it.
#[derive(Debug, Clone)]
pub struct MessageContext<'a> {
    pub thing_name: &'a str,
    pub topic: &'a str,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Payload was not JSON; logged and dropped.
    NotJson,
    /// Any command other than `update`. Logged, no side effects.
    Received { action: Option<String> },
    /// `update` with missing or unusable fields. Nothing was created.
    UpdateRejected,
    /// The scratch directory could not be created.
    UpdateAborted,
    UpdateDownloadFailed,
    UpdateCommandFailed,
    Updated,
}

/// Handle one inbound payload. Every failure is logged here and folded into
/// the returned [`Outcome`]; nothing propagates to the subscription loop.
pub async fn handle_message(ctx: &MessageContext<'_>, payload: &[u8], updater: &UpdateHandler) -> Outcome {
    let text = String::from_utf8_lossy(payload);
    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => {
            warn!("[{}] Received non-JSON payload on {}: {}", ctx.thing_name, ctx.topic, text);
            return Outcome::NotJson;
        }
    };

    info!("[{}] Message on {}: {}", ctx.thing_name, ctx.topic, text);

    let action = value.get("action").and_then(serde_json::Value::as_str);
    if action != Some(UPDATE_ACTION) {
        return Outcome::Received {
            action: action.map(String::from),
        };
    }

    let request = match UpdateRequest::from_payload(&value) {
        Ok(r) => r,
        Err(e) => {
            error!("[{}] Rejected update message: {}", ctx.thing_name, e);
            return Outcome::UpdateRejected;
        }
    };

    match updater.apply(&request).await {
        Ok(()) => Outcome::Updated,
        Err(e @ UpdateError::Command { .. }) => {
            error!("[{}] Update command failed: {}", ctx.thing_name, e);
            Outcome::UpdateCommandFailed
        }
        Err(e @ UpdateError::Download { .. }) => {
            error!("[{}] Failed to download update artifact: {}", ctx.thing_name, e);
            Outcome::UpdateDownloadFailed
        }
        Err(e) => {
            error!("[{}] Update aborted: {}", ctx.thing_name, e);
            Outcome::UpdateAborted
        }
    }
}
