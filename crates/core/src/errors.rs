use thiserror::Error;

use crate::domain::approval::StageStatus;
use crate::domain::request::RequestStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },
    #[error("{entity} `{id}` has already been decided ({status})")]
    AlreadyDecided { entity: &'static str, id: String, status: String },
    #[error("requested quantity must be greater than zero (got {quantity})")]
    InvalidQuantity { quantity: i64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DomainError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized { reason: reason.into() }
    }

    pub fn request_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { entity: "request", id: id.into() }
    }

    pub fn stage_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { entity: "approval stage", id: id.into() }
    }

    pub fn request_already_decided(id: impl Into<String>, status: RequestStatus) -> Self {
        Self::AlreadyDecided { entity: "request", id: id.into(), status: status.as_str().into() }
    }

    pub fn stage_already_decided(id: impl Into<String>, status: StageStatus) -> Self {
        Self::AlreadyDecided {
            entity: "approval stage",
            id: id.into(),
            status: status.as_str().into(),
        }
    }

    /// Stable machine-readable kind surfaced to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(domain) => domain.kind(),
            Self::Persistence(_) | Self::Integration(_) => "service_unavailable",
            Self::Configuration(_) => "internal",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { kind: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "unauthorized",
            Self::Conflict { .. } => "already_decided",
            Self::BadRequest { kind, .. } => kind,
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Forbidden { .. } => "You are not allowed to act on this record.",
            Self::Conflict { .. } => "This record has already been handled.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(domain) => {
                let message = domain.to_string();
                match domain {
                    DomainError::NotFound { .. } => Self::NotFound { message, correlation_id },
                    DomainError::Unauthorized { .. } => {
                        Self::Forbidden { message, correlation_id }
                    }
                    DomainError::AlreadyDecided { .. } => {
                        Self::Conflict { message, correlation_id }
                    }
                    DomainError::InvalidQuantity { .. } => {
                        Self::BadRequest { kind: "invalid_quantity", message, correlation_id }
                    }
                    DomainError::InvalidInput(_) => {
                        Self::BadRequest { kind: "invalid_input", message, correlation_id }
                    }
                }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
