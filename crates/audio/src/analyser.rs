//! Analyseur spectral du signal de sortie
//!
//! Le mixeur écrit le signal (avant gain) dans un [`AnalyserTap`], un petit
//! tampon circulaire partagé avec le callback audio. Le [`SpectrumAnalyser`]
//! en tire, à chaque tick, des magnitudes par bin de fréquence sur 0..=255 :
//! fenêtre de Blackman, FFT réelle, lissage temporel, conversion en dB puis
//! projection linéaire de [-100 dB, -30 dB] vers [0, 255].

use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};

use realfft::{RealFftPlanner, RealToComplex};
use realfft::num_complex::Complex32;

use crate::{AudioConfig, AudioError, AudioResult, Sample};

/// Bornes de la plage dB projetée sur les octets
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

struct TapBuffer {
    ring: Vec<Sample>,
    write: usize,
}

/// Tampon circulaire des derniers échantillons joués
///
/// Écrit depuis le callback audio avec `try_lock` : si la tâche d'analyse
/// tient le verrou à ce moment-là, le bloc est simplement sauté.
#[derive(Clone)]
pub struct AnalyserTap {
    inner: Arc<Mutex<TapBuffer>>,
}

impl AnalyserTap {
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapBuffer {
                ring: vec![0.0; size.max(1)],
                write: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapBuffer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ajoute un bloc (non bloquant, appelé depuis le thread temps réel)
    pub fn push(&self, block: &[Sample]) {
        if let Ok(mut buffer) = self.inner.try_lock() {
            let size = buffer.ring.len();
            for &sample in block {
                let index = buffer.write;
                buffer.ring[index] = sample;
                buffer.write = (index + 1) % size;
            }
        }
    }

    /// Copie les échantillons dans l'ordre chronologique (le plus ancien d'abord)
    pub fn snapshot(&self, out: &mut [Sample]) {
        let buffer = self.lock();
        let size = buffer.ring.len();
        let count = out.len().min(size);
        // Les `count` derniers échantillons écrits
        let start = (buffer.write + size - count) % size;
        for (i, slot) in out.iter_mut().take(count).enumerate() {
            *slot = buffer.ring[(start + i) % size];
        }
    }

    /// Remet le tampon à zéro (silence)
    pub fn clear(&self) {
        let mut buffer = self.lock();
        buffer.ring.iter_mut().for_each(|s| *s = 0.0);
        buffer.write = 0;
    }
}

/// Analyseur de fréquences façon nœud d'analyse navigateur
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    /// Magnitudes lissées d'un tick à l'autre
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    /// Crée un analyseur à partir de la configuration audio
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la taille de FFT n'est pas une puissance de 2
    pub fn new(config: &AudioConfig) -> AudioResult<Self> {
        Self::with_params(config.analyser_fft_size, config.analyser_smoothing)
    }

    pub fn with_params(fft_size: usize, smoothing: f32) -> AudioResult<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(AudioError::ConfigError(format!(
                "Taille de FFT invalide pour l'analyseur: {}", fft_size
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let spectrum = fft.make_output_vec();

        Ok(Self {
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.999),
            fft,
            window: blackman_window(fft_size),
            input: vec![0.0; fft_size],
            spectrum,
            smoothed: vec![0.0; fft_size / 2],
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Nombre de bins produits (moitié de la taille de FFT)
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Calcule les magnitudes en octets à partir des derniers échantillons
    ///
    /// `time_domain` doit contenir au moins `fft_size` échantillons ; seuls
    /// les `fft_size` derniers sont utilisés. `out` reçoit `bin_count()` valeurs.
    pub fn byte_frequency_data(&mut self, time_domain: &[Sample], out: &mut [u8]) {
        let offset = time_domain.len().saturating_sub(self.fft_size);
        let recent = &time_domain[offset..];

        for (i, slot) in self.input.iter_mut().enumerate() {
            let sample = recent.get(i).copied().unwrap_or(0.0);
            *slot = sample * self.window[i];
        }

        if self.fft.process(&mut self.input, &mut self.spectrum).is_err() {
            // Longueurs fixées à la construction : ne devrait jamais arriver
            out.iter_mut().for_each(|b| *b = 0);
            return;
        }

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

            if let Some(byte) = out.get_mut(k) {
                let decibels = if *smoothed > 0.0 {
                    20.0 * smoothed.log10()
                } else {
                    f32::NEG_INFINITY
                };
                let scaled = 255.0 / range * (decibels - MIN_DECIBELS);
                *byte = scaled.clamp(0.0, 255.0) as u8;
            }
        }
    }

    /// Oublie l'historique de lissage
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}

/// Fenêtre de Blackman (alpha = 0.16)
fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin() * amplitude)
            .collect()
    }

    #[test]
    fn test_silence_gives_zero_bins() {
        let mut analyser = SpectrumAnalyser::with_params(128, 0.2).unwrap();
        let mut bins = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&[0.0; 128], &mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_lands_in_expected_bin() {
        // 24 kHz / 128 = 187.5 Hz par bin : 1875 Hz tombe dans le bin 10
        let mut analyser = SpectrumAnalyser::with_params(128, 0.0).unwrap();
        let mut bins = vec![0u8; analyser.bin_count()];
        // Amplitude faible pour rester sous -30 dB (pas de saturation à 255)
        analyser.byte_frequency_data(&sine(1875.0, 24000.0, 128, 0.01), &mut bins);

        assert!(bins[10] > 150);
        assert!(bins[10] > bins[9]);
        assert!(bins[10] > bins[11]);
        assert_eq!(bins[30], 0);
    }

    #[test]
    fn test_smoothing_decays() {
        let mut analyser = SpectrumAnalyser::with_params(128, 0.8).unwrap();
        let mut loud = vec![0u8; 64];
        analyser.byte_frequency_data(&sine(1875.0, 24000.0, 128, 0.8), &mut loud);

        let mut after = vec![0u8; 64];
        analyser.byte_frequency_data(&[0.0; 128], &mut after);
        // Le lissage garde une trace du signal précédent
        assert!(after[10] > 0);

        analyser.reset();
        analyser.byte_frequency_data(&[0.0; 128], &mut after);
        assert_eq!(after[10], 0);
    }

    #[test]
    fn test_invalid_fft_size() {
        assert!(SpectrumAnalyser::with_params(100, 0.2).is_err());
    }

    #[test]
    fn test_tap_keeps_latest_samples() {
        let tap = AnalyserTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0]);

        let mut out = [0.0; 4];
        tap.snapshot(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);

        tap.clear();
        tap.snapshot(&mut out);
        assert_eq!(out, [0.0; 4]);
    }
}
