//! Gestion d'erreurs pour le système audio
//!
//! Ce module définit tous les types d'erreurs possibles dans la chaîne audio.
//! Deux familles se distinguent :
//! - les erreurs fatales pour la session (périphérique absent ou refusé)
//! - les erreurs de données (payload corrompu), récupérées localement

use thiserror::Error;

use crate::BufferId;

/// Largeur d'un échantillon PCM 16 bits en octets
pub const PCM16_SAMPLE_WIDTH: usize = 2;

/// Énumération de toutes les erreurs possibles dans le système audio
#[derive(Error, Debug)]
pub enum AudioError {
    /// L'accès au micro ou au contexte audio a été refusé
    #[error("Accès au périphérique audio refusé: {0}")]
    PermissionDenied(String),

    /// Aucun périphérique audio (microphone ou haut-parleurs) n'a été trouvé
    #[error("Aucun périphérique audio trouvé")]
    NoDeviceFound,

    /// Erreur lors de la configuration des paramètres audio (sample rate, etc.)
    #[error("Erreur de configuration audio: {0}")]
    ConfigError(String),

    /// Erreur provenant de la librairie cpal au démarrage du stream
    #[error("Erreur cpal: {0}")]
    CpalError(#[from] cpal::PlayStreamError),

    /// Payload base64 invalide (mauvais alphabet ou longueur)
    #[error("Payload audio non décodable: {0}")]
    DecodeError(String),

    /// Nombre d'octets incompatible avec le format PCM
    #[error("Format PCM invalide: {len} octets, pas un multiple de {sample_width}")]
    FormatError { len: usize, sample_width: usize },

    /// Fréquence déclarée hors de la plage acceptée
    #[error("Fréquence d'échantillonnage non supportée: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Échec du rééchantillonneur rubato
    #[error("Rééchantillonnage impossible: {0}")]
    ResampleError(String),

    /// Arrêt d'un buffer déjà terminé ou jamais démarré
    ///
    /// Toujours avalée par l'appelant.
    #[error("Buffer {0} déjà terminé ou inconnu")]
    PlaybackStop(BufferId),

    /// Le périphérique audio a été débranché pendant l'utilisation
    #[error("Périphérique audio déconnecté")]
    DeviceDisconnected,

    /// Erreur lors de l'initialisation d'un composant
    #[error("Erreur d'initialisation: {0}")]
    InitializationError(String),
}

impl AudioError {
    /// Vérifie si l'erreur doit terminer la session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AudioError::PermissionDenied(_)
                | AudioError::NoDeviceFound
                | AudioError::CpalError(_)
                | AudioError::DeviceDisconnected
                | AudioError::InitializationError(_)
        )
    }

    /// Vérifie si l'erreur porte sur une donnée reçue (à ignorer puis continuer)
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            AudioError::DecodeError(_)
                | AudioError::FormatError { .. }
                | AudioError::UnsupportedSampleRate(_)
                | AudioError::ResampleError(_)
        )
    }
}

/// Conversion des erreurs de décodage base64
impl From<base64::DecodeError> for AudioError {
    fn from(err: base64::DecodeError) -> Self {
        AudioError::DecodeError(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        AudioError::ResampleError(err.to_string())
    }
}

impl From<rubato::ResampleError> for AudioError {
    fn from(err: rubato::ResampleError) -> Self {
        AudioError::ResampleError(err.to_string())
    }
}

/// Conversion des erreurs cpal::BuildStreamError
///
/// Un périphérique indisponible à la construction du stream signifie en pratique
/// que l'accès a été refusé ou que le contexte ne peut pas être créé.
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::PermissionDenied("périphérique indisponible".to_string())
            }
            other => AudioError::ConfigError(format!("Erreur construction stream: {:?}", other)),
        }
    }
}

/// Conversion des erreurs cpal::DefaultStreamConfigError
impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                AudioError::PermissionDenied("configuration du périphérique inaccessible".to_string())
            }
            other => AudioError::ConfigError(format!("Erreur config par défaut: {:?}", other)),
        }
    }
}

/// Conversion des erreurs cpal::PauseStreamError
impl From<cpal::PauseStreamError> for AudioError {
    fn from(err: cpal::PauseStreamError) -> Self {
        AudioError::ConfigError(format!("Erreur pause stream: {:?}", err))
    }
}

/// Type Result personnalisé pour notre crate
pub type AudioResult<T> = Result<T, AudioError>;
