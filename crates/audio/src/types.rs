//! Types de données pour le système audio
//!
//! Ce module définit les structures principales qui circulent dans la chaîne :
//! - AudioFrame : bloc d'échantillons bruts avec sa fréquence d'échantillonnage
//! - EncodedChunk : représentation filaire d'une frame (PCM 16 bits en base64)
//! - ScheduledBuffer : buffer de sortie placé sur l'horloge du périphérique
//! - PlaybackStats / InputLevel : valeurs exposées à la présentation

use std::time::Instant;
use serde::{Deserialize, Serialize};

/// Type pour un échantillon audio
///
/// Valeurs normalisées entre -1.0 et +1.0, 0.0 = silence.
pub type Sample = f32;

/// Identifiant d'un buffer de sortie ordonnancé
pub type BufferId = u64;

/// Frame d'audio brute
///
/// Une frame est possédée par l'étage qui la traite et transmise par valeur
/// à l'étage suivant. Elle n'est jamais partagée en mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Échantillons entrelacés si `channels > 1`
    pub samples: Vec<Sample>,

    /// Fréquence d'échantillonnage en Hz
    pub sample_rate: u32,

    /// Nombre de canaux
    pub channels: u16,

    /// Moment de création de la frame
    pub timestamp: Instant,

    /// Numéro de séquence (ordre de production)
    pub sequence_number: u64,
}

impl AudioFrame {
    /// Crée une nouvelle frame audio
    ///
    /// # Example
    /// ```rust
    /// use audio::AudioFrame;
    ///
    /// let frame = AudioFrame::new(vec![0.1, 0.2, -0.1, 0.0], 16000, 1, 42);
    /// assert_eq!(frame.frame_count(), 4);
    /// ```
    pub fn new(samples: Vec<Sample>, sample_rate: u32, channels: u16, sequence_number: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp: Instant::now(),
            sequence_number,
        }
    }

    /// Crée une frame mono de silence
    pub fn silence(sample_count: usize, sample_rate: u32, sequence_number: u64) -> Self {
        Self::new(vec![0.0; sample_count], sample_rate, 1, sequence_number)
    }

    /// Nombre de frames temporelles (échantillons par canal)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Durée de la frame en secondes
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Vérifie si cette frame est essentiellement silencieuse
    pub fn is_silence(&self, threshold: f32) -> bool {
        self.samples.iter().all(|&sample| sample.abs() < threshold)
    }

    /// Niveau RMS (Root Mean Square), entre 0.0 et 1.0
    pub fn rms_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self.samples.iter()
            .map(|&s| s * s)
            .sum();

        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// Amplitude maximale (peak)
    pub fn peak_level(&self) -> f32 {
        self.samples.iter()
            .map(|&s| s.abs())
            .fold(0.0, f32::max)
    }

    /// Convertit la frame en mono en moyennant les canaux
    pub fn to_mono(&self) -> Vec<Sample> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    }
}

/// Type MIME annoncé au service pour du PCM 16 bits à la fréquence donnée
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Représentation filaire d'une frame audio
///
/// Échantillons quantifiés en PCM 16 bits little-endian, puis encodés en base64
/// pour pouvoir voyager dans un message texte.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    /// Octets PCM encodés en base64 standard
    pub data: String,

    /// Type MIME, par exemple `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedChunk {
    pub fn new(data: String, mime_type: impl Into<String>) -> Self {
        Self { data, mime_type: mime_type.into() }
    }

    /// Fréquence d'échantillonnage déclarée dans le type MIME, si présente
    pub fn declared_sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }
}

/// Buffer placé sur l'horloge du périphérique de sortie
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledBuffer {
    pub id: BufferId,

    /// Instant de départ en secondes (horloge du périphérique)
    pub start_time: f64,

    /// Durée en secondes
    pub duration: f64,
}

impl ScheduledBuffer {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Statistiques de lecture
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Buffers ordonnancés depuis le début de la session
    pub buffers_scheduled: u64,

    /// Buffers arrivés au bout de leur lecture
    pub buffers_completed: u64,

    /// Interruptions (barge-in) traitées
    pub interruptions: u64,

    /// Buffers stoppés par une interruption ou un arrêt
    pub buffers_stopped: u64,

    /// Buffers arrivés après que le curseur soit passé derrière l'horloge
    pub underrun_gaps: u64,

    /// Secondes d'audio ordonnancées
    pub scheduled_seconds: f64,
}

/// Niveau d'entrée micro pour le visualiseur
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputLevel {
    pub rms: f32,
    pub peak: f32,
}

impl InputLevel {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            rms: frame.rms_level(),
            peak: frame.peak_level(),
        }
    }

    /// Niveau nul (micro coupé ou arrêté)
    pub fn silent() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(2048, 16000, 0);
        assert!((frame.duration_secs() - 0.128).abs() < 1e-12);

        let stereo = AudioFrame::new(vec![0.0; 4800], 24000, 2, 0);
        assert_eq!(stereo.frame_count(), 2400);
        assert!((stereo.duration_secs() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_frame_levels() {
        let frame = AudioFrame::new(vec![0.5, -0.5, 0.5, -0.5], 16000, 1, 1);
        assert!((frame.rms_level() - 0.5).abs() < 1e-6);
        assert!((frame.peak_level() - 0.5).abs() < 1e-6);
        assert!(!frame.is_silence(0.1));
        assert!(AudioFrame::silence(10, 16000, 0).is_silence(0.001));
    }

    #[test]
    fn test_to_mono() {
        let frame = AudioFrame::new(vec![1.0, 0.0, 0.5, 0.5], 48000, 2, 0);
        assert_eq!(frame.to_mono(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_declared_sample_rate() {
        let chunk = EncodedChunk::new(String::new(), pcm_mime_type(24000));
        assert_eq!(chunk.mime_type, "audio/pcm;rate=24000");
        assert_eq!(chunk.declared_sample_rate(), Some(24000));

        let bare = EncodedChunk::new(String::new(), "audio/pcm");
        assert_eq!(bare.declared_sample_rate(), None);
    }

    #[test]
    fn test_scheduled_buffer_end() {
        let buffer = ScheduledBuffer { id: 1, start_time: 0.05, duration: 0.5 };
        assert!((buffer.end_time() - 0.55).abs() < 1e-12);
    }
}
