//! Enveloppe de parole pour la synchronisation labiale
//!
//! À chaque tick d'animation, on lit les magnitudes spectrales du signal de
//! sortie, on moyenne une sous-bande (on saute les 2 premiers bins, on prend
//! les 38 suivants) et on en dérive :
//!
//! ```text
//! cible     = max(0, (moyenne - 15) / 140), ramenée à 0 sous 0.04
//! ouverture = ouverture * 0.6 + cible * 0.4
//! parle     = moyenne > 15
//! ```
//!
//! [`EnvelopeAnalyzer`] porte le calcul pur. [`EnvelopeMonitor`] le branche sur
//! l'analyseur spectral et publie les valeurs via un `watch` à chaque tick.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{AnalyserTap, AudioConfig, AudioResult, SpectrumAnalyser};

/// Constantes de l'enveloppe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Bins ignorés en bas du spectre
    pub band_start: usize,

    /// Nombre de bins moyennés
    pub band_len: usize,

    /// Énergie moyenne en dessous de laquelle on considère le silence
    pub energy_floor: f32,

    /// Plage d'énergie ramenée sur [0, 1]
    pub energy_range: f32,

    /// Ouverture cible en dessous de laquelle on force 0
    pub noise_floor: f32,

    /// Poids de la valeur précédente dans le lissage exponentiel
    pub smoothing: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            band_start: 2,
            band_len: 38,
            energy_floor: 15.0,
            energy_range: 140.0,
            noise_floor: 0.04,
            smoothing: 0.6,
        }
    }
}

/// Valeur d'enveloppe publiée à chaque tick
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EnvelopeSample {
    /// Ouverture lissée, dans [0, 1]
    pub openness: f32,

    /// La voix synthétisée est audible
    pub is_speaking: bool,

    /// Énergie moyenne de la sous-bande (0 - 255)
    pub average: f32,
}

impl EnvelopeSample {
    pub fn silent() -> Self {
        Self::default()
    }
}

/// Calcul pur de l'enveloppe, sans état partagé
#[derive(Debug, Clone)]
pub struct EnvelopeAnalyzer {
    config: EnvelopeConfig,
    current: EnvelopeSample,
}

impl EnvelopeAnalyzer {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            current: EnvelopeSample::silent(),
        }
    }

    /// Moyenne de la sous-bande analysée
    pub fn band_average(&self, bins: &[u8]) -> f32 {
        let band: Vec<u8> = bins
            .iter()
            .skip(self.config.band_start)
            .take(self.config.band_len)
            .copied()
            .collect();

        if band.is_empty() {
            return 0.0;
        }
        band.iter().map(|&b| b as f32).sum::<f32>() / band.len() as f32
    }

    /// Ouverture cible avant lissage
    pub fn target_openness(&self, average: f32) -> f32 {
        let target = ((average - self.config.energy_floor) / self.config.energy_range).max(0.0);
        if target > self.config.noise_floor {
            target.min(1.0)
        } else {
            0.0
        }
    }

    /// Avance d'un tick avec les magnitudes courantes
    pub fn update(&mut self, bins: &[u8]) -> EnvelopeSample {
        let average = self.band_average(bins);
        let target = self.target_openness(average);
        let smoothing = self.config.smoothing;

        self.current = EnvelopeSample {
            openness: self.current.openness * smoothing + target * (1.0 - smoothing),
            is_speaking: average > self.config.energy_floor,
            average,
        };
        self.current
    }

    /// Retour immédiat au silence
    pub fn reset(&mut self) {
        self.current = EnvelopeSample::silent();
    }

    pub fn current(&self) -> EnvelopeSample {
        self.current
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }
}

struct MonitorState {
    spectrum: SpectrumAnalyser,
    envelope: EnvelopeAnalyzer,
    window: Vec<f32>,
    bins: Vec<u8>,
}

/// Boucle d'analyse branchée sur la sortie audio
///
/// Clonable : la session garde un handle pour réinitialiser l'enveloppe lors
/// d'une interruption, la tâche de tick en garde un autre.
#[derive(Clone)]
pub struct EnvelopeMonitor {
    state: Arc<Mutex<MonitorState>>,
    tap: AnalyserTap,
    sender: Arc<watch::Sender<EnvelopeSample>>,
}

impl EnvelopeMonitor {
    /// Crée un moniteur lisant le signal écrit dans `tap`
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si la configuration de l'analyseur est invalide
    pub fn new(tap: AnalyserTap, audio: &AudioConfig, config: EnvelopeConfig) -> AudioResult<Self> {
        let spectrum = SpectrumAnalyser::new(audio)?;
        let state = MonitorState {
            window: vec![0.0; spectrum.fft_size()],
            bins: vec![0; spectrum.bin_count()],
            spectrum,
            envelope: EnvelopeAnalyzer::new(config),
        };
        let (sender, _) = watch::channel(EnvelopeSample::silent());

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            tap,
            sender: Arc::new(sender),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Un tick d'analyse : lit la sortie, met à jour et publie l'enveloppe
    pub fn tick(&self) -> EnvelopeSample {
        let mut guard = self.lock();
        let state = &mut *guard;

        self.tap.snapshot(&mut state.window);
        state.spectrum.byte_frequency_data(&state.window, &mut state.bins);
        let sample = state.envelope.update(&state.bins);

        self.sender.send_replace(sample);
        sample
    }

    /// Remet l'enveloppe au silence (interruption ou arrêt)
    pub fn reset(&self) {
        let mut state = self.lock();
        state.envelope.reset();
        state.spectrum.reset();
        self.tap.clear();
        self.sender.send_replace(EnvelopeSample::silent());
    }

    pub fn current(&self) -> EnvelopeSample {
        *self.sender.borrow()
    }

    /// Abonnement pour la présentation (avatar, visualiseur)
    pub fn subscribe(&self) -> watch::Receiver<EnvelopeSample> {
        self.sender.subscribe()
    }

    /// Lance la boucle de ticks jusqu'à l'annulation du jeton
    ///
    /// Chaque tick planifie le suivant ; le jeton est vérifié entre deux ticks.
    pub fn spawn(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.tick();
                    }
                }
            }

            monitor.reset();
            debug!("🛑 Boucle d'enveloppe arrêtée");
        })
    }
}
