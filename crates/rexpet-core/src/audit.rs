//! Best-effort audit trail

use std::net::IpAddr;
use std::sync::Arc;

use uuid::Uuid;

use crate::model::{AuditEvent, AuditEventType};
use crate::store::Store;

/// Writes audit events without ever failing the caller
#[derive(Clone)]
pub struct Auditor {
    store: Arc<dyn Store>,
}

impl Auditor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append an event; a failed write is logged and swallowed
    pub async fn record(
        &self,
        event_type: AuditEventType,
        user_id: Option<Uuid>,
        metadata: serde_json::Value,
        ip: Option<IpAddr>,
    ) {
        let event = AuditEvent::new(event_type, user_id)
            .with_metadata(metadata)
            .with_ip(ip);

        if let Err(e) = self.store.append_audit(event).await {
            tracing::warn!(
                event_type = %event_type,
                user_id = ?user_id,
                error = %e,
                "Audit write failed"
            );
        }
    }
}
