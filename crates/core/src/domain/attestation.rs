use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::approval::{Stage, StageStatus};
use crate::domain::request::{ItemId, RequestId};

/// Identifier the external log assigned to an attested event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttestationEventType {
    Approval,
    Delivery,
    Relocation,
    Damage,
}

impl AttestationEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Delivery => "delivery",
            Self::Relocation => "relocation",
            Self::Damage => "damage",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approval" => Some(Self::Approval),
            "delivery" => Some(Self::Delivery),
            "relocation" => Some(Self::Relocation),
            "damage" => Some(Self::Damage),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DamageSeverity {
    Minor,
    Moderate,
    Severe,
    WriteOff,
}

/// Event handed to the attestation sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttestationEvent {
    Approval { request_id: RequestId, stage: Stage, decision: StageStatus, comment: String },
    Delivery { request_id: RequestId, tracking_reference: String },
    Relocation { item_id: ItemId, from_location: String, to_location: String },
    Damage { item_id: ItemId, severity: DamageSeverity, details: String },
}

impl AttestationEvent {
    pub fn event_type(&self) -> AttestationEventType {
        match self {
            Self::Approval { .. } => AttestationEventType::Approval,
            Self::Delivery { .. } => AttestationEventType::Delivery,
            Self::Relocation { .. } => AttestationEventType::Relocation,
            Self::Damage { .. } => AttestationEventType::Damage,
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Approval { request_id, .. } | Self::Delivery { request_id, .. } => {
                Some(request_id)
            }
            Self::Relocation { .. } | Self::Damage { .. } => None,
        }
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::Relocation { item_id, .. } | Self::Damage { item_id, .. } => Some(item_id),
            Self::Approval { .. } | Self::Delivery { .. } => None,
        }
    }

    /// Stable key used when hashing or logging the event.
    pub fn subject_key(&self) -> String {
        match self {
            Self::Approval { request_id, stage, .. } => format!("request:{}:{}", request_id, stage),
            Self::Delivery { request_id, .. } => format!("request:{request_id}:delivery"),
            Self::Relocation { item_id, .. } | Self::Damage { item_id, .. } => {
                format!("item:{}", item_id.0)
            }
        }
    }
}

/// Persisted link between an attested event and the off-chain entity it covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub id: String,
    pub event_type: AttestationEventType,
    pub transaction_id: TransactionId,
    pub request_id: Option<RequestId>,
    pub item_id: Option<ItemId>,
    pub initiated_by: UserId,
    pub payload: serde_json::Value,
    pub simulated: bool,
    pub logged_at: DateTime<Utc>,
}
