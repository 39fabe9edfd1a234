//! Booking validation and delivery to the form relay.
//!
//! A `bookDemoMeeting` tool call becomes a [`BookingRequest`] only when all
//! four required fields are present and non-blank. Delivery goes through a
//! [`Notifier`]; the production one is [`FormRelayNotifier`], which POSTs
//! JSON to a FormSubmit-style `ajax` endpoint.

use crate::config::BookingConfig;
use crate::error::{Result, VoiceError};
use crate::persona::{BOOKING_REQUIRED_FIELDS, BOOKING_SUMMARY_FIELD};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// A validated demo-meeting booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub full_name: String,
    pub mobile_number: String,
    pub email_address: String,
    pub preferred_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_summary: Option<String>,
}

impl BookingRequest {
    /// Build a request from tool-call arguments.
    ///
    /// Numbers are accepted for any field and rendered as text (models
    /// sometimes send the mobile number as a number).
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::IncompleteBookingArgs`] naming every required
    /// field that is missing or blank.
    pub fn from_args(args: &Value) -> Result<Self> {
        let mut values = Vec::with_capacity(BOOKING_REQUIRED_FIELDS.len());
        let mut missing = Vec::new();
        for field in BOOKING_REQUIRED_FIELDS {
            match text_field(args, field) {
                Some(v) => values.push(v),
                None => missing.push(field.to_owned()),
            }
        }
        if !missing.is_empty() {
            return Err(VoiceError::IncompleteBookingArgs { missing });
        }

        let mut values = values.into_iter();
        let mut next = || values.next().unwrap_or_default();
        Ok(Self {
            full_name: next(),
            mobile_number: next(),
            email_address: next(),
            preferred_time: next(),
            call_summary: text_field(args, BOOKING_SUMMARY_FIELD),
        })
    }

    /// Human-readable body for the notification email.
    pub fn message(&self) -> String {
        let mut body = format!(
            "A new demo meeting has been scheduled.\n\n\
             Visitor: {}\nEmail: {}\nMobile: {}\nTime: {}\n",
            self.full_name, self.email_address, self.mobile_number, self.preferred_time
        );
        if let Some(summary) = &self.call_summary {
            body.push_str(&format!("Summary: {summary}\n"));
        }
        body.push_str("\nLead generated by Cheshta AI.");
        body
    }

    /// JSON body posted to the relay: the booking fields plus relay
    /// directives (`_subject`, `_cc`) and `message`.
    pub fn relay_payload(&self, config: &BookingConfig) -> Value {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.insert("_subject".into(), Value::String(config.subject.clone()));
        if config.cc_visitor {
            map.insert("_cc".into(), Value::String(self.email_address.clone()));
        }
        map.insert("message".into(), Value::String(self.message()));
        Value::Object(map)
    }
}

fn text_field(args: &Value, field: &str) -> Option<String> {
    let text = match args.get(field)? {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Delivers bookings to a human.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one booking.
    ///
    /// # Errors
    ///
    /// Returns [`VoiceError::NotificationDeliveryFailed`] when the booking
    /// was not accepted.
    async fn deliver(&self, request: &BookingRequest) -> Result<()>;
}

/// POSTs bookings to a form-relay email service.
#[derive(Debug, Clone)]
pub struct FormRelayNotifier {
    client: reqwest::Client,
    config: BookingConfig,
}

impl FormRelayNotifier {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BookingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Notifier for FormRelayNotifier {
    async fn deliver(&self, request: &BookingRequest) -> Result<()> {
        let body = request.relay_payload(&self.config);
        let response = self
            .client
            .post(&self.config.relay_url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                VoiceError::NotificationDeliveryFailed(format!("relay request failed: {e}"))
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(%status, "form relay rejected booking");
            return Err(VoiceError::NotificationDeliveryFailed(format!(
                "relay returned {status}: {text}"
            )));
        }
        // The ajax relay answers 200 with `"success": "false"` for some
        // rejections (unconfirmed inbox, spam filter).
        if let Ok(reply) = serde_json::from_str::<Value>(&text)
            && (matches!(reply.get("success"), Some(Value::Bool(false)))
                || matches!(reply.get("success"), Some(Value::String(s)) if s == "false"))
        {
            let reason = reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("relay reported failure");
            warn!(reason, "form relay rejected booking");
            return Err(VoiceError::NotificationDeliveryFailed(reason.to_owned()));
        }

        info!(visitor = %request.full_name, "booking delivered");
        Ok(())
    }
}
