//! Gestion d'erreurs pour la session vocale
//!
//! Ce module définit les erreurs possibles côté liaison avec le service
//! distant. Il suit les mêmes patterns que le module audio pour la
//! cohérence du code.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use audio::AudioError;

/// Énumération de toutes les erreurs possibles côté session
///
/// Deux familles : les erreurs de liaison (fatales, la session passe en
/// état `Error`) et les erreurs de données (un message est ignoré, la
/// session continue).
#[derive(Error, Debug)]
pub enum NetworkError {
    /// La connexion au service n'a pas pu être ouverte
    #[error("Connexion au service impossible: {0}")]
    ConnectionFailed(String),

    /// Le service a fermé la connexion
    #[error("Connexion fermée par le service: {0}")]
    ConnectionClosed(String),

    /// Erreur du protocole WebSocket
    #[error("Erreur WebSocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Le service n'a pas confirmé la configuration à temps
    #[error("Timeout - configuration non confirmée après {timeout_ms}ms")]
    SetupTimeout { timeout_ms: u64 },

    /// Aucune clé d'API fournie
    #[error("Clé d'API manquante (GEMINI_API_KEY ou API_KEY)")]
    MissingApiKey,

    /// Erreur de sérialisation JSON d'un message
    #[error("Erreur de sérialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message du service au format inattendu
    #[error("Message invalide reçu du service: {0}")]
    Protocol(String),

    /// Opération tentée alors que la session n'est pas dans le bon état
    #[error("Opération {operation} invalide dans l'état {current_state}")]
    InvalidState { operation: String, current_state: String },

    /// Erreur de la chaîne audio locale
    #[error("Erreur audio: {0}")]
    Audio(#[from] AudioError),

    /// Erreur de configuration de session
    #[error("Configuration de session invalide: {0}")]
    ConfigError(String),
}

/// Type Result personnalisé pour notre crate network
pub type NetworkResult<T> = Result<T, NetworkError>;

impl NetworkError {
    /// Crée une erreur d'état avec contexte
    pub fn invalid_state(operation: &str, current_state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            current_state: current_state.to_string(),
        }
    }

    /// L'erreur termine la session (état `Error`, pas de reprise)
    pub fn is_fatal(&self) -> bool {
        match self {
            NetworkError::ConnectionFailed(_)
            | NetworkError::ConnectionClosed(_)
            | NetworkError::WebSocket(_)
            | NetworkError::SetupTimeout { .. }
            | NetworkError::MissingApiKey
            | NetworkError::ConfigError(_) => true,
            NetworkError::Audio(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// L'erreur ne concerne qu'un message : on l'ignore et on continue
    pub fn is_recoverable(&self) -> bool {
        match self {
            NetworkError::Protocol(_) | NetworkError::Serialization(_) => true,
            NetworkError::Audio(e) => e.is_data_error(),
            _ => false,
        }
    }
}
