use crate::content::Content;

/// A message received from the live session. Exactly one of the fields is set on
/// well-formed messages; anything else is left to the caller to log and ignore.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Audio or text produced by the model for the current turn.
    #[serde(default)]
    pub model_turn: Option<Content>,
    /// The model finished its turn.
    #[serde(default)]
    pub turn_complete: Option<bool>,
    /// The user started speaking while the model was still talking.
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub generation_complete: Option<bool>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Notice that the server will close the connection soon.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u32>,
    #[serde(default)]
    pub response_token_count: Option<u32>,
    #[serde(default)]
    pub total_token_count: Option<u32>,
}

impl ServerMessage {
    /// Returns the name of the first populated field, for logging.
    pub fn kind(&self) -> &'static str {
        if self.setup_complete.is_some() {
            "setupComplete"
        } else if self.server_content.is_some() {
            "serverContent"
        } else if self.tool_call.is_some() {
            "toolCall"
        } else if self.tool_call_cancellation.is_some() {
            "toolCallCancellation"
        } else if self.go_away.is_some() {
            "goAway"
        } else if self.usage_metadata.is_some() {
            "usageMetadata"
        } else {
            "unknown"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_server_content_with_audio() {
        let text = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAE=" } }]
                },
                "turnComplete": true
            }
        }"#;
        let message: ServerMessage = serde_json::from_str(text).unwrap();
        assert_eq!(message.kind(), "serverContent");

        let content = message.server_content.unwrap();
        assert_eq!(content.turn_complete, Some(true));
        let blob = content.model_turn.unwrap().parts[0]
            .inline_data
            .clone()
            .unwrap();
        assert_eq!(blob.data, "AAE=");
    }

    #[test]
    fn test_deserialize_tool_call() {
        let text = r#"{
            "toolCall": {
                "functionCalls": [
                    { "id": "abc", "name": "navigate_to_section", "args": { "section": "settings" } }
                ]
            }
        }"#;
        let message: ServerMessage = serde_json::from_str(text).unwrap();
        let tool_call = message.tool_call.unwrap();
        let call = &tool_call.function_calls[0];
        assert_eq!(call.id, "abc");
        assert_eq!(call.name, "navigate_to_section");
        assert_eq!(call.args["section"], "settings");
    }

    #[test]
    fn test_unknown_shape_deserializes_to_empty_message() {
        let message: ServerMessage = serde_json::from_str(r#"{ "somethingNew": {} }"#).unwrap();
        assert_eq!(message.kind(), "unknown");
    }
}
