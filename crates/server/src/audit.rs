use stockflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events into the structured log stream under `audit.*`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let request_id = event.request_id.as_ref().map_or("none", |id| id.0.as_str());
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = "audit.event",
                correlation_id = %event.correlation_id,
                audit_event = %event.event_type,
                audit_event_id = %event.event_id,
                category = ?event.category,
                request_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = "audit.event",
                correlation_id = %event.correlation_id,
                audit_event = %event.event_type,
                audit_event_id = %event.event_id,
                category = ?event.category,
                outcome = ?event.outcome,
                request_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
