//! Routes host commands to the widget loop.

use crate::host::contract::{CommandEnvelope, CommandName, EVENT_VERSION, ResponseEnvelope};
use crate::widget::{WidgetCommand, WidgetHandle};
use serde_json::json;
use tracing::warn;

#[derive(Clone)]
pub struct HostRouter {
    widget: WidgetHandle,
}

impl HostRouter {
    #[must_use]
    pub fn new(widget: WidgetHandle) -> Self {
        Self { widget }
    }

    /// Route a command envelope; failures become error envelopes.
    pub async fn route(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        if let Err(e) = envelope.validate() {
            warn!(request_id = %envelope.request_id, "invalid host command envelope: {e}");
            return ResponseEnvelope::error(envelope.request_id.clone(), e.to_string());
        }

        let request_id = envelope.request_id.clone();
        let command = match envelope.command {
            CommandName::HostPing => {
                return ResponseEnvelope::ok(
                    request_id,
                    json!({ "pong": true, "contract_version": EVENT_VERSION }),
                );
            }
            CommandName::SessionStatus => {
                return match self.widget.status().await {
                    Ok(status) => ResponseEnvelope::ok(
                        request_id,
                        serde_json::to_value(status).unwrap_or_default(),
                    ),
                    Err(e) => ResponseEnvelope::error(request_id, e.to_string()),
                };
            }
            CommandName::WidgetOpen => WidgetCommand::Open,
            CommandName::WidgetClose => WidgetCommand::Close,
            CommandName::SessionStart => WidgetCommand::Start,
            CommandName::SessionEnd => WidgetCommand::End,
            CommandName::SessionRetry => WidgetCommand::Retry,
            CommandName::SessionDismiss => WidgetCommand::Dismiss,
        };

        // Outcomes of accepted commands arrive as events.
        match self.widget.send(command).await {
            Ok(()) => ResponseEnvelope::ok(request_id, json!({ "accepted": true })),
            Err(e) => ResponseEnvelope::error(request_id, e.to_string()),
        }
    }
}
