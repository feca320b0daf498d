//! Trigger records and the append-only trigger log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The entry family a trigger attempt came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    Webhook,
    ApiKey,
    Event,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Schedule => "schedule",
            TriggerType::Webhook => "webhook",
            TriggerType::ApiKey => "api_key",
            TriggerType::Event => "event",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(TriggerType::Schedule),
            "webhook" => Ok(TriggerType::Webhook),
            "api_key" => Ok(TriggerType::ApiKey),
            "event" => Ok(TriggerType::Event),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("invalid trigger type: '{other}'")),
        }
    }
}

/// Type-specific trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule {
        /// Cron expression or human-readable schedule ("every 5 minutes").
        cron_expression: String,
        #[serde(default = "default_timezone")]
        timezone: String,
    },
    Webhook {
        /// SHA-256 hex of the opaque URL token. The raw token is never stored.
        token_hash: String,
        /// Optional HMAC-SHA256 secret for payload signatures.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signing_secret: Option<String>,
    },
    ApiKey {
        /// SHA-256 hex of the API key.
        key_hash: String,
        /// Non-secret prefix shown in listings.
        key_prefix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    Event {
        event_type: String,
        /// Field-equality filter applied to the event payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_filter: Option<Map<String, Value>>,
    },
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TriggerKind {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerKind::Schedule { .. } => TriggerType::Schedule,
            TriggerKind::Webhook { .. } => TriggerType::Webhook,
            TriggerKind::ApiKey { .. } => TriggerType::ApiKey,
            TriggerKind::Event { .. } => TriggerType::Event,
        }
    }
}

/// An organization-scoped trigger bound to a workflow root (not a version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecord {
    pub id: Uuid,
    pub organization_id: String,
    pub workflow_root_id: Uuid,
    pub kind: TriggerKind,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of a trigger attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerLogStatus {
    Accepted,
    Rejected,
    Duplicate,
    RateLimited,
}

impl TriggerLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerLogStatus::Accepted => "accepted",
            TriggerLogStatus::Rejected => "rejected",
            TriggerLogStatus::Duplicate => "duplicate",
            TriggerLogStatus::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for TriggerLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerLogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(TriggerLogStatus::Accepted),
            "rejected" => Ok(TriggerLogStatus::Rejected),
            "duplicate" => Ok(TriggerLogStatus::Duplicate),
            "rate_limited" => Ok(TriggerLogStatus::RateLimited),
            other => Err(format!("invalid trigger log status: '{other}'")),
        }
    }
}

/// Append-only audit row for one trigger attempt.
///
/// Among `Accepted` rows, `(organization_id, idempotency_key)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerLog {
    pub id: Uuid,
    pub organization_id: String,
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_root_id: Option<Uuid>,
    pub status: TriggerLogStatus,
    /// Dedupe key, unique per organization among accepted logs. Event
    /// fan-out stores `event:{trigger_id}:{key}` so each subscription
    /// dedupes on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// The key exactly as the caller sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wf_execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_kind_tagged_serialization() {
        let kind = TriggerKind::Event {
            event_type: "order.created".to_string(),
            event_filter: Some(
                json!({ "channel": "shop" }).as_object().cloned().unwrap(),
            ),
        };
        let v = serde_json::to_value(&kind).unwrap();
        assert_eq!(v["type"], "event");
        assert_eq!(v["event_type"], "order.created");
        let back: TriggerKind = serde_json::from_value(v).unwrap();
        assert_eq!(back.trigger_type(), TriggerType::Event);
    }

    #[test]
    fn schedule_timezone_defaults_to_utc() {
        let kind: TriggerKind =
            serde_json::from_value(json!({ "type": "schedule", "cron_expression": "0 9 * * *" }))
                .unwrap();
        match kind {
            TriggerKind::Schedule { timezone, .. } => assert_eq!(timezone, "UTC"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn log_status_strings() {
        assert_eq!(TriggerLogStatus::RateLimited.as_str(), "rate_limited");
        assert_eq!(
            "duplicate".parse::<TriggerLogStatus>().unwrap(),
            TriggerLogStatus::Duplicate
        );
    }
}
