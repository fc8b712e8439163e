//! Interfaces des périphériques de la session
//!
//! La session ne voit le micro, la sortie et le codec qu'à travers ces
//! traits. Les tests les remplacent par des implémentations scriptées.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{AnalyserTap, AudioFrame, AudioResult, BufferId, EncodedChunk, InputLevel, ScheduledBuffer};

/// Trait pour capturer l'audio depuis le microphone
///
/// Les frames produites sont mono, au format attendu par le service
/// (2048 échantillons à 16 kHz avec la configuration par défaut).
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Démarre la capture audio
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` : Aucun microphone trouvé
    /// - `AudioError::PermissionDenied` : Accès au microphone refusé
    /// - `AudioError::ConfigError` : Format du périphérique non supporté
    async fn start(&mut self) -> AudioResult<()>;

    /// Arrête la capture et rend le périphérique au système
    ///
    /// Idempotent : un second appel ne fait rien.
    async fn stop(&mut self) -> AudioResult<()>;

    /// Récupère la prochaine frame audio
    ///
    /// Attend qu'une frame complète soit disponible. Rien n'arrive tant que
    /// le micro est coupé.
    ///
    /// # Erreurs
    /// - `AudioError::DeviceDisconnected` : Le flux de capture s'est tari
    ///
    /// # Example
    /// ```rust,no_run
    /// use audio::{AudioCapture, CpalCapture, AudioConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut capture = CpalCapture::new(AudioConfig::default())?;
    /// capture.start().await?;
    ///
    /// let frame = capture.next_frame().await?;
    /// println!("Reçu frame avec {} échantillons", frame.samples.len());
    /// # Ok(())
    /// # }
    /// ```
    async fn next_frame(&mut self) -> AudioResult<AudioFrame>;

    /// Coupe ou réactive le micro au niveau du périphérique
    ///
    /// Idempotent : demander l'état courant ne change rien.
    fn set_muted(&mut self, muted: bool) -> AudioResult<()>;

    fn is_muted(&self) -> bool;

    /// Inverse l'état du micro et retourne le nouvel état
    fn toggle_mute(&mut self) -> AudioResult<bool> {
        let muted = !self.is_muted();
        self.set_muted(muted)?;
        Ok(muted)
    }

    /// Vérifie si la capture est active
    fn is_recording(&self) -> bool;

    /// Niveau d'entrée de la dernière frame (vumètre)
    fn input_level(&self) -> watch::Receiver<InputLevel>;

    /// Retourne des informations sur le périphérique utilisé
    fn device_info(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Trait pour la sortie audio planifiée
///
/// Contrairement à une file FIFO, chaque buffer est démarré à un instant
/// précis de l'horloge de sortie (voir [`PlaybackScheduler`](crate::PlaybackScheduler)).
/// Le puits signale la fin naturelle de chaque buffer sur un canal dédié.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Ouvre le périphérique de sortie et démarre l'horloge
    async fn start(&mut self) -> AudioResult<()>;

    /// Horloge de sortie en secondes
    fn current_time(&self) -> f64;

    /// Attache un buffer décodé à son créneau
    ///
    /// # Erreurs
    /// - `AudioError::InitializationError` : Sortie pas encore ouverte
    /// - `AudioError::DeviceDisconnected` : Le périphérique a disparu
    fn start_buffer(&mut self, buffer: ScheduledBuffer, frame: AudioFrame) -> AudioResult<()>;

    /// Arrête un buffer en cours ou à venir
    ///
    /// # Erreurs
    /// - `AudioError::PlaybackStop` : Le buffer n'a pas pu être arrêté
    fn stop_buffer(&mut self, id: BufferId) -> AudioResult<()>;

    /// Arrête tous les buffers sans fermer la sortie
    fn stop_all(&mut self);

    /// Canal des buffers terminés naturellement (ne peut être pris qu'une fois)
    fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<BufferId>>;

    /// Point d'écoute du signal de sortie pour l'analyseur
    fn analyser_tap(&self) -> AnalyserTap;

    /// Ferme la sortie. Idempotent.
    async fn close(&mut self) -> AudioResult<()>;

    fn is_open(&self) -> bool;

    /// Retourne des informations sur le périphérique de sortie
    fn device_info(&self) -> String {
        "Périphérique de sortie inconnu".to_string()
    }
}

/// Trait pour le transport des échantillons en texte
///
/// L'implémentation principale est [`PcmCodec`](crate::PcmCodec) :
/// PCM 16 bits little-endian encodé en base64.
pub trait AudioCodec: Send + Sync {
    /// Encode une frame capturée en fragment prêt à être envoyé
    ///
    /// # Example
    /// ```rust
    /// use audio::{AudioCodec, AudioFrame, PcmCodec};
    ///
    /// let codec = PcmCodec::new(16000);
    /// let chunk = codec.encode(&AudioFrame::silence(4, 16000, 0));
    ///
    /// assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
    /// assert_eq!(chunk.data, "AAAAAAAAAAA=");
    /// ```
    fn encode(&self, frame: &AudioFrame) -> EncodedChunk;

    /// Décode le texte d'un fragment en octets bruts
    ///
    /// # Erreurs
    /// - `AudioError::DecodeError` : Texte hors alphabet base64
    fn decode(&self, chunk: &EncodedChunk) -> AudioResult<Vec<u8>>;

    /// Interprète des octets PCM16 comme une frame jouable
    ///
    /// # Erreurs
    /// - `AudioError::FormatError` : Longueur incompatible avec le format
    fn decode_audio_samples(&self, bytes: &[u8], sample_rate: u32, channels: u16) -> AudioResult<AudioFrame>;

    /// Retourne des informations sur la configuration du codec
    fn codec_info(&self) -> String {
        "Codec audio".to_string()
    }
}
