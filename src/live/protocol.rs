//! Wire types for the Gemini Live `BidiGenerateContent` WebSocket.
//!
//! Client messages are externally tagged (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`, `{"toolResponse": {...}}`). Server messages
//! carry any subset of `setupComplete`, `serverContent`, `toolCall`,
//! `toolCallCancellation`, `goAway`; unknown fields are ignored.

use super::{FunctionCall, OutboundMessage, RemoteEvent, SessionSetup};
use crate::audio::MediaChunk;
use crate::error::{Result, VoiceError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl From<&SessionSetup> for ClientMessage {
    fn from(setup: &SessionSetup) -> Self {
        let tools = if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: setup.tools.clone(),
            }]
        };
        Self::Setup(Setup {
            model: setup.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_owned()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.system_instruction.clone(),
                }],
            },
            tools,
            input_audio_transcription: setup.input_transcription.then(Map::new),
        })
    }
}

impl From<OutboundMessage> for ClientMessage {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Text(text) => Self::RealtimeInput(RealtimeInput {
                text: Some(text),
                ..RealtimeInput::default()
            }),
            OutboundMessage::Audio(chunk) => Self::RealtimeInput(RealtimeInput {
                text: None,
                media_chunks: vec![Blob {
                    mime_type: chunk.mime_type,
                    data: chunk.data,
                }],
            }),
            OutboundMessage::ToolResponse { id, name, response } => {
                Self::ToolResponse(ToolResponse {
                    function_responses: vec![FunctionResponse { id, name, response }],
                })
            }
        }
    }
}

impl ClientMessage {
    /// Serialize to the JSON text frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| VoiceError::Protocol(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallMessage>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ModelPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPart {
    #[serde(default)]
    pub inline_data: Option<Blob>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<WireFunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFunctionCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    /// Parse one text (or UTF-8 binary) frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON object of this shape.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| VoiceError::Protocol(e.to_string()))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into session events.
    ///
    /// Within one message: transcript, tool calls, interruption, audio,
    /// turn completion, cancellations, go-away.
    pub fn into_events(self) -> Vec<RemoteEvent> {
        let mut events = Vec::new();

        if let Some(content) = self.server_content {
            if let Some(t) = content.input_transcription
                && !t.text.trim().is_empty()
            {
                events.push(RemoteEvent::Transcript { text: t.text });
            }
            if let Some(call) = self.tool_call {
                push_calls(&mut events, call);
            }
            if content.interrupted {
                events.push(RemoteEvent::Interrupted);
            }
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data
                        && blob.mime_type.starts_with("audio/")
                    {
                        events.push(RemoteEvent::Audio(MediaChunk {
                            mime_type: blob.mime_type,
                            data: blob.data,
                        }));
                    }
                }
            }
            if content.turn_complete {
                events.push(RemoteEvent::TurnComplete);
            }
        } else if let Some(call) = self.tool_call {
            push_calls(&mut events, call);
        }

        if let Some(cancel) = self.tool_call_cancellation {
            events.push(RemoteEvent::ToolCallCancelled { ids: cancel.ids });
        }
        if let Some(go_away) = self.go_away {
            events.push(RemoteEvent::GoAway {
                time_left: go_away.time_left,
            });
        }
        events
    }
}

fn push_calls(events: &mut Vec<RemoteEvent>, call: ToolCallMessage) {
    for fc in call.function_calls {
        events.push(RemoteEvent::ToolCall(FunctionCall {
            id: fc.id,
            name: fc.name,
            args: fc.args,
        }));
    }
}
