//! Lenient JSON extraction from capability output.
//!
//! Capabilities are asked to answer in JSON but routinely wrap it in prose
//! or markdown fences. [`extract_json`] tries three strategies in order and
//! stops at the first that parses; callers get a value or a typed failure,
//! never a null they have to re-log.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum JsonExtractError {
    #[error("response contains no JSON object")]
    NoJsonFound,
    #[error("candidate JSON fragment failed to parse: {0}")]
    Unparseable(String),
}

/// Extract the JSON object embedded in free-form capability output.
///
/// Strategies, first success wins:
/// 1. the whole text parses as JSON;
/// 2. the contents of the first fenced code block parse as JSON;
/// 3. the substring from the first `{` to the last `}` parses as JSON.
///
/// Strategy 3 is greedy and cannot split two independent JSON blocks in one
/// response; the fenced-block strategy running first covers the common case.
pub fn extract_json(text: &str) -> Result<Value, JsonExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(JsonExtractError::NoJsonFound);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced) {
            return Ok(value);
        }
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            let candidate = &trimmed[start..=end];
            serde_json::from_str::<Value>(candidate)
                .map_err(|e| JsonExtractError::Unparseable(e.to_string()))
        }
        _ => Err(JsonExtractError::NoJsonFound),
    }
}

/// Contents of the first ``` fenced block, language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let close = after_open.find("```")?;
    let block = &after_open[..close];
    // Drop the language tag line ("json", "JSON", ...), if any
    match block.find('\n') {
        Some(newline) if !block[..newline].trim().contains(['{', '[']) => {
            Some(block[newline + 1..].trim())
        }
        _ => Some(block.trim()),
    }
}
