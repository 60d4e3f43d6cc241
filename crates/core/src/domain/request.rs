use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::{Actor, Role, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to an inventory item owned by the stock ledger.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// Decision a stores reviewer makes on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoresDecision {
    Approve,
    Reject,
}

impl StoresDecision {
    pub fn resulting_status(self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub requested_by: UserId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub priority: Priority,
    pub reason: String,
    pub status: RequestStatus,
    pub stores_comment: String,
    pub stores_reviewer: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a new department request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub item_id: String,
    pub quantity: i64,
    #[serde(default)]
    pub priority: Priority,
    pub reason: String,
}

/// Requester-side edits allowed while a request is still pending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAmendment {
    pub quantity: Option<i64>,
    pub priority: Option<Priority>,
    pub reason: Option<String>,
}

impl RequestAmendment {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.priority.is_none() && self.reason.is_none()
    }
}

pub fn validate_quantity(quantity: i64) -> Result<u32, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::InvalidQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| {
        DomainError::InvalidInput(format!("requested quantity {quantity} is out of range"))
    })
}

fn required_text(field: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidInput(format!("{field} must not be blank")));
    }
    Ok(trimmed.to_string())
}

impl Request {
    /// Builds a pending request on behalf of `requester`.
    pub fn open(
        id: RequestId,
        requester: &Actor,
        input: NewRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if requester.role != Role::Requester {
            return Err(DomainError::unauthorized(format!(
                "role `{}` cannot submit stock requests",
                requester.role
            )));
        }

        let quantity = validate_quantity(input.quantity)?;
        let item_id = required_text("item_id", &input.item_id)?;
        let reason = required_text("reason", &input.reason)?;

        Ok(Self {
            id,
            requested_by: requester.id.clone(),
            item_id: ItemId(item_id),
            quantity,
            priority: input.priority,
            reason,
            status: RequestStatus::Pending,
            stores_comment: String::new(),
            stores_reviewer: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        actor.role.sees_all_requests()
            || (actor.role == Role::Requester && self.requested_by == actor.id)
    }

    /// Guard for a stores-level decision. The caller still has to commit the
    /// status change with a compare-and-swap at the storage layer.
    pub fn check_stores_decision(&self, actor: &Actor) -> Result<(), DomainError> {
        if !actor.role.can_decide_requests() {
            return Err(DomainError::unauthorized(format!(
                "role `{}` cannot decide stock requests",
                actor.role
            )));
        }
        if self.status.is_terminal() {
            return Err(DomainError::request_already_decided(self.id.0.clone(), self.status));
        }
        Ok(())
    }

    pub fn apply_amendment(
        &mut self,
        actor: &Actor,
        amendment: RequestAmendment,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if actor.role != Role::Requester || actor.id != self.requested_by {
            return Err(DomainError::unauthorized("only the requester may amend a request"));
        }
        if self.status.is_terminal() {
            return Err(DomainError::request_already_decided(self.id.0.clone(), self.status));
        }
        if amendment.is_empty() {
            return Err(DomainError::InvalidInput("amendment has no changes".to_string()));
        }

        if let Some(quantity) = amendment.quantity {
            self.quantity = validate_quantity(quantity)?;
        }
        if let Some(priority) = amendment.priority {
            self.priority = priority;
        }
        if let Some(reason) = amendment.reason {
            self.reason = required_text("reason", &reason)?;
        }
        self.updated_at = now;
        Ok(())
    }
}
