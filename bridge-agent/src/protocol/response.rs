use serde_json::Value;

use crate::ModelError;

pub(crate) fn parse_output_text(body: &[u8]) -> Result<String, ModelError> {
    let payload = serde_json::from_slice::<Value>(body)?;

    if let Some(text) = payload
        .get("output_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Ok(text.to_string());
    }

    payload
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .find_map(parse_output_text_from_message)
        .ok_or(ModelError::EmptyOutput)
}

fn parse_output_text_from_message(item: &Value) -> Option<String> {
    let content_items = item.get("content").and_then(Value::as_array)?;
    for content_item in content_items {
        let content_type = content_item
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if content_type != "output_text" && content_type != "text" {
            continue;
        }
        if let Some(text) = content_item.get("text").and_then(Value::as_str) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
