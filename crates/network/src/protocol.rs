//! Messages échangés avec le service vocal
//!
//! Côté session, seules deux familles d'unités existent :
//! - [`OutboundUnit`] : le déclencheur « prêt » puis un fragment par frame micro
//! - [`InboundUnit`] : audio, interruption, fin de tour, erreur du service
//!
//! La traduction vers le JSON du service est isolée ici, le reste du crate
//! ne connaît que ces unités.

use serde::{Deserialize, Serialize};

use audio::EncodedChunk;
use crate::{InterviewContext, NetworkError, NetworkResult, SessionConfig};

/// Unité envoyée au service
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundUnit {
    /// Tour utilisateur textuel qui déclenche la première question
    ReadyTrigger(String),

    /// Une frame micro encodée
    Media(EncodedChunk),
}

impl OutboundUnit {
    /// Sérialise l'unité au format JSON du service
    pub fn to_json(&self) -> NetworkResult<String> {
        let json = match self {
            OutboundUnit::ReadyTrigger(text) => serde_json::to_string(&ClientContentMessage {
                client_content: ClientContent {
                    turns: vec![Content {
                        role: Some("user".to_string()),
                        parts: vec![Part::text(text)],
                    }],
                    turn_complete: true,
                },
            })?,
            OutboundUnit::Media(chunk) => serde_json::to_string(&RealtimeInputMessage {
                realtime_input: RealtimeInput {
                    media_chunks: vec![Blob::from(chunk)],
                },
            })?,
        };
        Ok(json)
    }

    pub fn is_media(&self) -> bool {
        matches!(self, OutboundUnit::Media(_))
    }
}

/// Unité reçue du service, dans l'ordre de traitement
#[derive(Clone, Debug, PartialEq)]
pub enum InboundUnit {
    /// Le service a accepté la configuration
    SetupComplete,

    /// Fragment de voix à jouer
    Audio(EncodedChunk),

    /// L'utilisateur a coupé la parole : tout ce qui est en lecture doit cesser
    Interrupted,

    TurnComplete,

    /// Erreur signalée par le service
    ServiceError(String),
}

/// Message de configuration envoyé à l'ouverture
pub fn setup_message(config: &SessionConfig, context: &InterviewContext) -> NetworkResult<String> {
    let message = SetupMessage {
        setup: Setup {
            model: config.model_path(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(&context.system_instruction())],
            },
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Découpe un message texte du service en unités
///
/// L'audio d'un message passe avant son éventuelle interruption. Les champs
/// inconnus sont ignorés ; un message sans rien d'utile donne une liste vide.
///
/// # Erreurs
/// - `NetworkError::Serialization` si le texte n'est pas un message JSON
///
/// # Example
/// ```rust
/// use network::{parse_server_message, InboundUnit};
///
/// let units = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
/// assert_eq!(units, vec![InboundUnit::Interrupted]);
/// ```
pub fn parse_server_message(text: &str) -> NetworkResult<Vec<InboundUnit>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut units = Vec::new();

    if message.setup_complete.is_some() {
        units.push(InboundUnit::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if let Some(turn) = content.model_turn {
            units.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .map(|blob| InboundUnit::Audio(EncodedChunk::new(blob.data, blob.mime_type))),
            );
        }
        if content.interrupted {
            units.push(InboundUnit::Interrupted);
        }
        if content.turn_complete {
            units.push(InboundUnit::TurnComplete);
        }
    }

    if let Some(error) = message.error {
        let description = match error.code {
            Some(code) => format!("{} (code {})", error.message, code),
            None => error.message,
        };
        units.push(InboundUnit::ServiceError(description));
    }

    Ok(units)
}

/// Variante pour les trames binaires, que le service utilise aussi pour du JSON
pub fn parse_server_frame(bytes: &[u8]) -> NetworkResult<Vec<InboundUnit>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| NetworkError::Protocol(format!("trame binaire non UTF-8: {}", e)))?;
    if !text.trim_start().starts_with('{') {
        return Err(NetworkError::Protocol(format!("trame binaire inattendue ({} octets)", bytes.len())));
    }
    parse_server_message(text)
}

// Schéma JSON du service

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContentMessage {
    client_content: ClientContent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<Blob>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    #[serde(default)]
    mime_type: String,
    data: String,
}

impl From<&EncodedChunk> for Blob {
    fn from(chunk: &EncodedChunk) -> Self {
        Self {
            mime_type: chunk.mime_type.clone(),
            data: chunk.data.clone(),
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    error: Option<ServiceErrorBody>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<Content>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::pcm_mime_type;
    use serde_json::Value;

    #[test]
    fn test_ready_trigger_json() {
        let unit = OutboundUnit::ReadyTrigger(crate::READY_TEXT.to_string());
        let json: Value = serde_json::from_str(&unit.to_json().unwrap()).unwrap();

        let turn = &json["clientContent"]["turns"][0];
        assert_eq!(turn["role"], "user");
        assert_eq!(turn["parts"][0]["text"], "I am ready. Start the interview.");
        assert_eq!(json["clientContent"]["turnComplete"], true);
        assert!(!unit.is_media());
    }

    #[test]
    fn test_media_json() {
        let unit = OutboundUnit::Media(EncodedChunk::new("AAA=".to_string(), pcm_mime_type(16000)));
        let json: Value = serde_json::from_str(&unit.to_json().unwrap()).unwrap();

        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAA=");
    }

    #[test]
    fn test_setup_message() {
        let config = SessionConfig::default();
        let context = InterviewContext::new("Low Latency Engineer", "High Frequency Trading Firm");
        let json: Value = serde_json::from_str(&setup_message(&config, &context).unwrap()).unwrap();

        let setup = &json["setup"];
        assert!(setup["model"].as_str().unwrap().starts_with("models/"));
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Fenrir"
        );
        let instruction = setup["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.contains("Low Latency Engineer at High Frequency Trading Firm"));
        assert!(setup["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_audio_before_interruption() {
        let text = r#"{
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAAA" } },
                    { "text": "transcription ignorée" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQAB" } }
                ] },
                "interrupted": true
            }
        }"#;

        let units = parse_server_message(text).unwrap();
        assert_eq!(units.len(), 3);
        assert!(matches!(&units[0], InboundUnit::Audio(chunk) if chunk.data == "AAAA"));
        assert!(matches!(&units[1], InboundUnit::Audio(chunk) if chunk.data == "AQAB"));
        assert_eq!(units[2], InboundUnit::Interrupted);
    }

    #[test]
    fn test_control_messages() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            vec![InboundUnit::SetupComplete]
        );
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"turnComplete":true}}"#).unwrap(),
            vec![InboundUnit::TurnComplete]
        );
        assert_eq!(
            parse_server_message(r#"{"error":{"code":429,"message":"quota"}}"#).unwrap(),
            vec![InboundUnit::ServiceError("quota (code 429)".to_string())]
        );
        assert!(parse_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(parse_server_message("{pas du json"), Err(NetworkError::Serialization(_))));
        assert!(matches!(parse_server_frame(&[0xff, 0xfe]), Err(NetworkError::Protocol(_))));
        assert!(matches!(parse_server_frame(b"RIFF"), Err(NetworkError::Protocol(_))));
        assert_eq!(
            parse_server_frame(br#"{"setupComplete":{}}"#).unwrap(),
            vec![InboundUnit::SetupComplete]
        );
    }
}
