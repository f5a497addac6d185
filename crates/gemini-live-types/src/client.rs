use crate::content::{Blob, Content};
use crate::tools::Tool;

/// Messages sent from the client to the live session. Each one is serialized as a
/// single-key object, e.g. `{"setup": {...}}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// The first message of every session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// The model resource name, e.g. "models/gemini-2.0-flash-live-001".
    model: String,

    /// Output modalities and speech configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,

    /// The system instructions for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    /// Tools(Functions) available to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,

    /// Enables transcription of the user's audio. Sent as an empty object.
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<AudioTranscriptionConfig>,

    /// Enables transcription of the model's audio. Sent as an empty object.
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<AudioTranscriptionConfig>,
}

impl Setup {
    pub fn builder(model: &str) -> SetupBuilder {
        SetupBuilder::new(model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generation_config(&self) -> Option<&GenerationConfig> {
        self.generation_config.as_ref()
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }
}

pub struct SetupBuilder {
    setup: Setup,
}

impl SetupBuilder {
    pub fn new(model: &str) -> Self {
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: Some(GenerationConfig::audio()),
                system_instruction: None,
                tools: vec![],
                input_audio_transcription: None,
                output_audio_transcription: None,
            },
        }
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        let config = self
            .setup
            .generation_config
            .get_or_insert_with(GenerationConfig::audio);
        config.speech_config = Some(SpeechConfig::prebuilt(voice));
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.setup.system_instruction = Some(Content::from_text(instruction));
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.setup.tools = tools;
        self
    }

    pub fn with_transcription_enable(mut self) -> Self {
        self.setup.input_audio_transcription = Some(AudioTranscriptionConfig {});
        self.setup.output_audio_transcription = Some(AudioTranscriptionConfig {});
        self
    }

    pub fn build(self) -> Setup {
        self.setup
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

impl GenerationConfig {
    pub fn audio() -> Self {
        Self {
            response_modalities: vec![Modality::Audio],
            speech_config: None,
        }
    }

    pub fn response_modalities(&self) -> &[Modality] {
        &self.response_modalities
    }

    pub fn voice_name(&self) -> Option<&str> {
        self.speech_config
            .as_ref()
            .map(|c| c.voice_config.prebuilt_voice_config.voice_name.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: &str) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AudioTranscriptionConfig {}

/// Streamed user input. Only audio is sent by this client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Blob>,
}

impl RealtimeInput {
    pub fn audio(blob: Blob) -> Self {
        Self { audio: Some(blob) }
    }

    pub fn audio_blob(&self) -> Option<&Blob> {
        self.audio.as_ref()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    pub fn new(function_responses: Vec<FunctionResponse>) -> Self {
        Self { function_responses }
    }

    pub fn function_responses(&self) -> &[FunctionResponse] {
        &self.function_responses
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionResponse {
    /// The id of the function call this responds to.
    id: String,
    name: String,
    /// `{"result": ...}` on success or `{"error": ...}` on failure.
    response: serde_json::Value,
}

impl FunctionResponse {
    pub fn result(id: &str, name: &str, result: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            response: serde_json::json!({ "result": result }),
        }
    }

    pub fn error(id: &str, name: &str, error: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            response: serde_json::json!({ "error": error }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn response(&self) -> &serde_json::Value {
        &self.response
    }
}
