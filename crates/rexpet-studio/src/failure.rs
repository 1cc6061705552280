//! Refund path shared by the request handler, worker and reaper

use std::sync::Arc;

use rexpet_core::{AuditEventType, Auditor, CoreError, Refund, Result, Store};
use uuid::Uuid;

/// Fail a generation and refund its credit in one store operation.
///
/// Returns `None` when the record was already terminal; a generation is
/// refunded at most once no matter how many paths race to fail it.
pub(crate) async fn fail_generation(
    store: &Arc<dyn Store>,
    auditor: &Auditor,
    generation_id: Uuid,
    error_message: &str,
    source: &'static str,
) -> Result<Option<Refund>> {
    let refund = match store
        .fail_and_refund(generation_id, error_message.to_string())
        .await
    {
        Ok(refund) => refund,
        Err(CoreError::Conflict(_)) => {
            tracing::debug!(generation_id = %generation_id, source, "Generation already terminal");
            return Ok(None);
        }
        Err(e) => {
            tracing::error!(
                generation_id = %generation_id,
                source,
                error = %e,
                "Refund failed; generation left for the reaper"
            );
            return Err(e);
        }
    };

    tracing::info!(
        generation_id = %generation_id,
        user_id = %refund.generation.user_id,
        balance_after = refund.entry.balance_after,
        source,
        error = %error_message,
        "Generation failed and refunded"
    );

    auditor
        .record(
            AuditEventType::GenerationFailed,
            Some(refund.generation.user_id),
            serde_json::json!({
                "generation_id": generation_id,
                "error": error_message,
                "refund_entry_id": refund.entry.id,
                "source": source,
            }),
            None,
        )
        .await;

    Ok(Some(refund))
}
