//! Configuration audio pour l'entretien en direct
//!
//! Ce module regroupe tous les paramètres de la chaîne audio :
//! capture micro, lecture de la voix synthétisée, analyseur spectral.
//! Les valeurs par défaut correspondent au contrat attendu par le service vocal distant
//! (PCM 16 bits mono, 16 kHz en entrée, 24 kHz en sortie).

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Configuration principale pour tout le système audio
///
/// Cette structure contient tous les paramètres nécessaires pour configurer :
/// - La capture audio (microphone) et le découpage en frames
/// - L'ordonnancement de la lecture (marge d'avance, gain)
/// - L'analyseur spectral utilisé pour l'enveloppe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage des frames envoyées au service (Hz)
    pub capture_sample_rate: u32,

    /// Nombre d'échantillons par frame capturée
    ///
    /// 2048 échantillons à 16 kHz = 128ms par frame
    pub capture_frame_size: usize,

    /// Profondeur de la file entre le callback micro et la session
    pub capture_queue_size: usize,

    /// Fréquence d'échantillonnage de l'audio reçu du service (Hz)
    pub playback_sample_rate: u32,

    /// Nombre de canaux des deux côtés (la voix reste en mono)
    pub channels: u16,

    /// Marge ajoutée à l'horloge de sortie avant de démarrer un buffer
    ///
    /// Absorbe le jitter d'ordonnancement. 50ms par défaut.
    pub lookahead_ms: u32,

    /// Gain appliqué après l'analyseur, juste avant la sortie
    pub output_gain: f32,

    /// Taille de FFT de l'analyseur de sortie (puissance de 2)
    pub analyser_fft_size: usize,

    /// Constante de lissage temporel de l'analyseur (0.0 - 1.0)
    pub analyser_smoothing: f32,

    /// Fréquence des ticks de l'analyseur d'enveloppe (Hz)
    pub envelope_tick_hz: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16000,     // Format attendu par le service
            capture_frame_size: 2048,       // 128ms à 16 kHz
            capture_queue_size: 32,         // ~4s de marge
            playback_sample_rate: 24000,    // Voix synthétisée
            channels: 1,                    // Mono
            lookahead_ms: 50,
            output_gain: 1.2,
            analyser_fft_size: 128,         // 64 bins de fréquence
            analyser_smoothing: 0.2,
            envelope_tick_hz: 60,           // Rafraîchissement d'écran
        }
    }
}

impl AudioConfig {
    /// Marge d'avance en secondes, dans l'horloge du périphérique de sortie
    pub fn lookahead_secs(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }

    /// Durée d'une frame capturée
    ///
    /// Exemple : 2048 / 16000 = 128ms
    pub fn capture_frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.capture_frame_size as f64 / self.capture_sample_rate as f64)
    }

    /// Intervalle entre deux ticks de l'analyseur d'enveloppe
    pub fn envelope_tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.envelope_tick_hz.max(1) as f64)
    }

    /// Nombre de bins de fréquence produits par l'analyseur
    pub fn analyser_bin_count(&self) -> usize {
        self.analyser_fft_size / 2
    }

    /// Valide que la configuration est cohérente
    ///
    /// Vérifie que tous les paramètres sont dans des plages acceptables
    pub fn validate(&self) -> Result<(), String> {
        if self.capture_sample_rate < 8000 || self.capture_sample_rate > 48000 {
            return Err(format!("Sample rate de capture invalide: {} (doit être entre 8000 et 48000)", self.capture_sample_rate));
        }

        if self.playback_sample_rate < 8000 || self.playback_sample_rate > 48000 {
            return Err(format!("Sample rate de lecture invalide: {} (doit être entre 8000 et 48000)", self.playback_sample_rate));
        }

        if self.channels == 0 || self.channels > 2 {
            return Err(format!("Nombre de canaux invalide: {} (doit être 1 ou 2)", self.channels));
        }

        if self.capture_frame_size == 0 {
            return Err("Taille de frame de capture nulle".to_string());
        }

        if self.capture_queue_size == 0 {
            return Err("File de capture de taille nulle".to_string());
        }

        if self.lookahead_ms > 1000 {
            return Err(format!("Marge d'avance invalide: {}ms (max 1000ms)", self.lookahead_ms));
        }

        if !(0.0..=4.0).contains(&self.output_gain) {
            return Err(format!("Gain de sortie invalide: {} (doit être entre 0 et 4)", self.output_gain));
        }

        if !self.analyser_fft_size.is_power_of_two() || !(32..=32768).contains(&self.analyser_fft_size) {
            return Err(format!("Taille de FFT invalide: {} (puissance de 2 entre 32 et 32768)", self.analyser_fft_size));
        }

        if !(0.0..1.0).contains(&self.analyser_smoothing) {
            return Err(format!("Lissage de l'analyseur invalide: {} (doit être dans [0, 1[)", self.analyser_smoothing));
        }

        if self.envelope_tick_hz == 0 || self.envelope_tick_hz > 240 {
            return Err(format!("Fréquence de tick invalide: {} Hz", self.envelope_tick_hz));
        }

        Ok(())
    }

    /// Configuration avec une marge d'avance réduite
    ///
    /// Moins de latence, plus sensible au jitter réseau.
    pub fn low_latency() -> Self {
        Self {
            lookahead_ms: 20,
            capture_frame_size: 1024,
            ..Default::default()
        }
    }

    /// Configuration pour les tests (petites frames, file courte)
    pub fn test_config() -> Self {
        Self {
            capture_frame_size: 256,
            capture_queue_size: 4,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();

        assert_eq!(config.capture_frame_duration().as_millis(), 128);
        assert!((config.lookahead_secs() - 0.05).abs() < 1e-12);
        assert_eq!(config.analyser_bin_count(), 64);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AudioConfig::default();

        config.capture_sample_rate = 1000; // Trop bas
        assert!(config.validate().is_err());

        config.capture_sample_rate = 16000;
        config.analyser_fft_size = 100; // Pas une puissance de 2
        assert!(config.validate().is_err());

        config.analyser_fft_size = 128;
        config.analyser_smoothing = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_configs() {
        let low_lat = AudioConfig::low_latency();
        assert_eq!(low_lat.lookahead_ms, 20);
        assert!(low_lat.validate().is_ok());

        let test = AudioConfig::test_config();
        assert!(test.validate().is_ok());
    }
}
