use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub String);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed pipeline steps, in the order a request passes through them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Stores,
    Procurement,
    Cfo,
}

impl Stage {
    pub const PIPELINE: [Stage; 3] = [Stage::Stores, Stage::Procurement, Stage::Cfo];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stores => "stores",
            Self::Procurement => "procurement",
            Self::Cfo => "cfo",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stores" => Some(Self::Stores),
            "procurement" => Some(Self::Procurement),
            "cfo" => Some(Self::Cfo),
            _ => None,
        }
    }

    pub fn position(self) -> u8 {
        match self {
            Self::Stores => 1,
            Self::Procurement => 2,
            Self::Cfo => 3,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Stores => "Stores Manager Approval",
            Self::Procurement => "Procurement Officer Approval",
            Self::Cfo => "CFO Approval",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Approved,
    Rejected,
}

impl StageStatus {
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

/// Action an approver takes on a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageAction {
    Approve,
    Reject,
    /// Annotates the stage without deciding it.
    #[serde(alias = "SUGGEST_RESUBMISSION")]
    RequestResubmission,
}

impl StageAction {
    /// Terminal status this action records, if it decides the stage.
    pub fn terminal_status(self) -> Option<StageStatus> {
        match self {
            Self::Approve => Some(StageStatus::Approved),
            Self::Reject => Some(StageStatus::Rejected),
            Self::RequestResubmission => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::RequestResubmission => "request_resubmission",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStage {
    pub id: StageId,
    pub request_id: RequestId,
    pub stage: Stage,
    pub approver: UserId,
    pub status: StageStatus,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived status of a request's chain; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    FullyApproved,
    Blocked,
    InProgress,
}

impl AggregateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullyApproved => "fully_approved",
            Self::Blocked => "blocked",
            Self::InProgress => "in_progress",
        }
    }
}
