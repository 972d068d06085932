use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static CHAT_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();
static CHAT_TOKENS: OnceLock<IntCounter> = OnceLock::new();
static SAVE_FAILURES: OnceLock<IntCounter> = OnceLock::new();

/// Outcome label values for `chat_requests_total`.
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_MODEL_FAILURE: &str = "model_failure";
pub const OUTCOME_INVALID: &str = "invalid";

/// Create and register the collectors. Safe to call more than once.
pub fn init_metrics() -> prometheus::Result<()> {
    if CHAT_REQUESTS.get().is_some() {
        return Ok(());
    }

    let chat_requests = IntCounterVec::new(
        prometheus::opts!("chat_requests_total", "Chat requests by outcome"),
        &["outcome"],
    )?;
    let chat_tokens = IntCounter::new("chat_tokens_total", "Tokens reported by the model")?;
    let save_failures = IntCounter::new(
        "conversation_save_failures_total",
        "Chat exchanges whose conversation could not be persisted",
    )?;

    if CHAT_REQUESTS.set(chat_requests.clone()).is_ok() {
        REGISTRY.register(Box::new(chat_requests))?;
    }
    if CHAT_TOKENS.set(chat_tokens.clone()).is_ok() {
        REGISTRY.register(Box::new(chat_tokens))?;
    }
    if SAVE_FAILURES.set(save_failures.clone()).is_ok() {
        REGISTRY.register(Box::new(save_failures))?;
    }
    Ok(())
}

pub fn inc_chat(outcome: &str) {
    if let Some(counter) = CHAT_REQUESTS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn add_tokens(tokens: u64) {
    if let Some(counter) = CHAT_TOKENS.get() {
        counter.inc_by(tokens);
    }
}

pub fn inc_save_failure() {
    if let Some(counter) = SAVE_FAILURES.get() {
        counter.inc();
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
