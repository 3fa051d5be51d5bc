use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ErrorKind;
use crate::protocol::FinishReason;

const PROXY_ENV_VARS: [&str; 6] = [
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log which proxy variables the HTTP client may pick up.
pub fn log_proxy_environment() {
    let mut any = false;
    for name in PROXY_ENV_VARS {
        if let Ok(value) = std::env::var(name) {
            if !value.trim().is_empty() {
                any = true;
                info!(variable = name, value = %value, "proxy environment variable set");
            }
        }
    }
    if !any {
        info!("no proxy environment variables set");
    }
}

/// How a translated stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    CacheHit,
    Completed(FinishReason),
    ToolCalls(usize),
    Failed(ErrorKind),
}

impl StreamOutcome {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            StreamOutcome::CacheHit => "cache_hit",
            StreamOutcome::Completed(_) => "completed",
            StreamOutcome::ToolCalls(_) => "tool_calls",
            StreamOutcome::Failed(_) => "error",
        }
    }
}

/// One line per finished stream.
pub fn log_stream_complete(
    provider: &str,
    model: &str,
    outcome: StreamOutcome,
    prompt_tokens: u64,
    completion_tokens: u64,
    elapsed: Duration,
) {
    let finish_reason = match outcome {
        StreamOutcome::Completed(reason) => reason.as_str(),
        StreamOutcome::ToolCalls(_) => FinishReason::ToolCalls.as_str(),
        StreamOutcome::Failed(_) => FinishReason::Error.as_str(),
        StreamOutcome::CacheHit => "replayed",
    };
    let tool_calls = match outcome {
        StreamOutcome::ToolCalls(count) => count,
        _ => 0,
    };
    match outcome {
        StreamOutcome::Failed(kind) => info!(
            provider,
            model,
            outcome = outcome.label(),
            error_kind = ?kind,
            duration_seconds = elapsed.as_secs_f64(),
            "stream completed"
        ),
        _ => info!(
            provider,
            model,
            outcome = outcome.label(),
            finish_reason,
            tool_calls,
            prompt_tokens,
            completion_tokens,
            duration_seconds = elapsed.as_secs_f64(),
            "stream completed"
        ),
    }
}
