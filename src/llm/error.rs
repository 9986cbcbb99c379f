//! Error kinds raised by the reasoning capability

use thiserror::Error;

/// Failures of the reasoning capability that callers need to tell apart.
///
/// Travels inside `anyhow::Error`; use [`is_quota_exhausted`] rather than
/// matching error strings.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    /// The daily budget for the reasoning capability is used up.
    #[error("reasoning quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Transient throttling, safe to retry later
    #[error("reasoning capability rate limited: {0}")]
    RateLimited(String),

    #[error("reasoning API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed reasoning response: {0}")]
    MalformedResponse(String),
}

/// Markers providers use for hard budget exhaustion
const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota_exceeded",
    "billing_hard_limit",
    "daily budget",
    "credit balance is too low",
];

/// Classify a non-success HTTP response from the reasoning API.
///
/// Quota markers win over the status code: some providers answer 429 for
/// both throttling and exhausted budgets.
pub fn classify_llm_error(status: u16, body: &str) -> LlmError {
    let lowered = body.to_ascii_lowercase();
    let message = extract_message(body).unwrap_or_else(|| body.to_string());

    if QUOTA_MARKERS.iter().any(|m| lowered.contains(m)) {
        return LlmError::QuotaExhausted(message);
    }
    if status == 429 {
        return LlmError::RateLimited(message);
    }
    LlmError::Api { status, message }
}

/// Pull `error.message` out of an OpenAI-style error body
fn extract_message(body: &str) -> Option<String> {
    let json_start = body.find('{')?;
    let parsed: serde_json::Value = serde_json::from_str(&body[json_start..]).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// Whether an error (or anything in its cause chain) is the quota-exhausted kind
pub fn is_quota_exhausted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<LlmError>(),
            Some(LlmError::QuotaExhausted(_))
        )
    })
}
