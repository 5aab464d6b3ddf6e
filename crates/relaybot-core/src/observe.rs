//! Request/response logging helpers

use std::fmt::Display;
use std::time::Duration;
use tracing::{error, info};

const REQUEST_PREVIEW_CHARS: usize = 200;
const RESPONSE_PREVIEW_CHARS: usize = 500;

pub fn log_request(user_id: i64, request_type: &str, content: &str) {
    info!(
        user_id,
        request_type,
        content = %preview(content, REQUEST_PREVIEW_CHARS),
        "Incoming request"
    );
}

pub fn log_response(user_id: i64, response: &str, elapsed: Duration) {
    info!(
        user_id,
        elapsed_ms = elapsed.as_millis() as u64,
        response = %preview(response, RESPONSE_PREVIEW_CHARS),
        "Bot response"
    );
}

pub fn log_error(user_id: i64, err: &dyn Display) {
    error!(user_id, error = %err, "Request failed");
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
