pub mod actor;
pub mod approval;
pub mod attestation;
pub mod request;
