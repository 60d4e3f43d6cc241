use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    StoresReviewer,
    ProcurementReviewer,
    CfoReviewer,
    Requester,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::StoresReviewer,
        Role::ProcurementReviewer,
        Role::CfoReviewer,
        Role::Requester,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StoresReviewer => "stores_reviewer",
            Self::ProcurementReviewer => "procurement_reviewer",
            Self::CfoReviewer => "cfo_reviewer",
            Self::Requester => "requester",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stores_reviewer" => Some(Self::StoresReviewer),
            "procurement_reviewer" => Some(Self::ProcurementReviewer),
            "cfo_reviewer" => Some(Self::CfoReviewer),
            "requester" => Some(Self::Requester),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Roles that may read every department request.
    pub fn sees_all_requests(self) -> bool {
        matches!(
            self,
            Self::StoresReviewer | Self::ProcurementReviewer | Self::CfoReviewer | Self::Admin
        )
    }

    pub fn can_decide_requests(self) -> bool {
        matches!(self, Self::StoresReviewer | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated identity performing an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: UserId(id.into()), role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Directory entry for a user who can act in the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub attestation_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn actor(&self) -> Actor {
        Actor { id: self.id.clone(), role: self.role }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_parse_accepts_storage_labels() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse(" CFO_REVIEWER "), Some(Role::CfoReviewer));
        assert_eq!(Role::parse("department_dean"), None);
    }

    #[test]
    fn only_stores_and_admin_decide_requests() {
        let deciders: Vec<Role> =
            Role::ALL.into_iter().filter(|role| role.can_decide_requests()).collect();
        assert_eq!(deciders, vec![Role::StoresReviewer, Role::Admin]);
        assert!(!Role::Requester.sees_all_requests());
    }
}
