//! Crate audio pour l'entretien simulé - chaîne audio temps réel
//!
//! Ce crate gère toute la chaîne audio locale :
//! - Capture microphone avec cpal (frames mono 16 kHz)
//! - Codec PCM 16 bits / base64
//! - Ordonnancement sans trou de la voix reçue
//! - Lecture audio avec cpal
//! - Enveloppe de parole pour l'avatar

pub mod config;      // Configuration audio
pub mod types;       // Types de données (AudioFrame, etc.)
pub mod traits;      // Traits abstraits
pub mod error;       // Gestion d'erreurs
pub mod codec;       // PCM16 + base64
pub mod resample;    // Rééchantillonnage sinc (rubato)
pub mod scheduler;   // Curseur de lecture
pub mod analyser;    // Magnitudes spectrales
pub mod envelope;    // Ouverture de bouche
pub mod capture;     // Implémentation capture avec cpal
pub mod playback;    // Implémentation lecture avec cpal
pub mod pipeline;    // Sortie complète
pub mod mock;        // Périphériques simulés

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use types::*;
pub use traits::*;
pub use error::*;

// Réexports des implémentations principales
pub use analyser::{AnalyserTap, SpectrumAnalyser};
pub use capture::CpalCapture;
pub use codec::{PcmCodec, dequantize_pcm16, quantize_pcm16};
pub use envelope::{EnvelopeAnalyzer, EnvelopeConfig, EnvelopeMonitor, EnvelopeSample};
pub use pipeline::OutputPipeline;
pub use playback::{CpalPlayback, Mixer, MixerCommand};
pub use scheduler::PlaybackScheduler;

/// Utilitaires pour les outils de diagnostic
pub mod utils {
    use crate::{AudioFrame, Sample};
    use cpal::traits::{DeviceTrait, HostTrait};

    /// Liste les périphériques d'entrée et de sortie disponibles
    pub fn list_devices() -> (Vec<String>, Vec<String>) {
        let host = cpal::default_host();
        let name = |device: cpal::Device| {
            device
                .description()
                .ok()
                .map(|desc| desc.name().to_string())
                .unwrap_or_else(|| "Périphérique inconnu".to_string())
        };

        let inputs = host
            .input_devices()
            .map(|devices| devices.map(name).collect())
            .unwrap_or_default();
        let outputs = host
            .output_devices()
            .map(|devices| devices.map(name).collect())
            .unwrap_or_default();

        (inputs, outputs)
    }

    /// Génère une sinusoïde mono
    pub fn sine_frame(frequency: f32, amplitude: f32, seconds: f64, sample_rate: u32) -> AudioFrame {
        let count = (seconds * sample_rate as f64).round() as usize;
        let samples: Vec<Sample> = (0..count)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude
            })
            .collect();
        AudioFrame::new(samples, sample_rate, 1, 0)
    }
}
