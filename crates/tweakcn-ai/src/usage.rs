//! Usage recording after a completed turn.

use tweakcn_store::{UsageLedger, UsageRecord};

use crate::llm::types::Usage;

/// Persist token usage for a finished turn.
///
/// Best effort: a failure is logged with the attempted record and never
/// reaches the caller.
pub async fn record_usage(
    ledger: &dyn UsageLedger,
    user_id: Option<&str>,
    model_id: &str,
    usage: Usage,
) {
    let record = UsageRecord {
        user_id: user_id.map(str::to_owned),
        model_id: model_id.to_owned(),
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
    };

    match ledger.record(&record).await {
        Ok(()) => tracing::debug!(
            model_id = %record.model_id,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            "recorded AI usage"
        ),
        Err(e) => tracing::error!(
            error = %e,
            action = "record_usage",
            record = ?record,
            "failed to record AI usage"
        ),
    }
}
