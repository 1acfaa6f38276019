use crate::config::LogFormat;
use crate::reconcile::MessageAccumulator;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Map a config log level onto a tracing filter directive.
///
/// - "DISABLED" -> `None`, no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, WARN, ERROR)
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level and format.
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    // try_init: tests and embedders may have installed a subscriber already.
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Log a one-line summary of a finished turn.
pub fn log_turn_complete(
    outcome: &str,
    message: &MessageAccumulator,
    start_time: std::time::Instant,
) {
    let elapsed = start_time.elapsed();
    info!(
        message_id = %message.message_id,
        outcome,
        content_chars = message.main_text.chars().count(),
        reasoning_chars = message.reasoning_text.as_deref().map_or(0, |text| text.chars().count()),
        tool_calls = message.tool_calls.len(),
        search_results = message.search_results.len(),
        images = message.image_urls.len(),
        finish_reason = message.finish_reason.as_deref().unwrap_or("-"),
        duration_ms = elapsed.as_millis() as u64,
        "turn complete"
    );
}
