use serde_json::{json, Value};

pub(crate) fn build_responses_request_payload(
    model: &str,
    instructions: &str,
    input: &[Value],
) -> Value {
    let mut payload = json!({
        "model": model,
        "stream": false,
        "store": false,
        "input": input,
    });

    let instructions = instructions.trim();
    if !instructions.is_empty() {
        payload["instructions"] = Value::String(instructions.to_string());
    }

    payload
}

pub(crate) fn build_text_message(role: &str, text: &str) -> Value {
    let content_type = if role == "assistant" {
        "output_text"
    } else {
        "input_text"
    };
    json!({
        "type": "message",
        "role": role,
        "content": [
            {
                "type": content_type,
                "text": text,
            }
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_model_instructions_and_input() {
        let input = vec![build_text_message("user", "<Steve> hi")];
        let payload = build_responses_request_payload("gpt-test", "  be brief  ", &input);

        assert_eq!(payload["model"], "gpt-test");
        assert_eq!(payload["instructions"], "be brief");
        assert_eq!(payload["stream"], false);
        assert_eq!(payload["input"][0]["content"][0]["type"], "input_text");
    }

    #[test]
    fn blank_instructions_are_omitted() {
        let payload = build_responses_request_payload("gpt-test", " ", &[]);
        assert!(payload.get("instructions").is_none());
    }

    #[test]
    fn assistant_messages_use_output_text() {
        let message = build_text_message("assistant", "ok");
        assert_eq!(message["content"][0]["type"], "output_text");
    }
}
