//! Rééchantillonnage sinc via rubato
//!
//! Les périphériques tournent rarement au format du service (16 kHz en entrée,
//! 24 kHz en sortie). Le filtre sinc coupe tout ce qui dépasse la nouvelle
//! fréquence de Nyquist avant décimation : 48 kHz -> 16 kHz ne replie pas
//! les aigus dans la bande de la voix.
//!
//! Deux usages :
//! - [`resample`] : un bloc complet d'un coup (attache d'un buffer de lecture)
//! - [`ChunkResampler`] : un flux découpé en blocs fixes, pour les callbacks

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::{AudioError, AudioResult, Sample};

/// Taille des blocs d'entrée côté capture (fréquence du micro)
pub const CAPTURE_CHUNK_SIZE: usize = 512;

/// Taille des blocs d'entrée côté lecture (fréquence de mixage)
pub const MIX_CHUNK_SIZE: usize = 256;

fn check_rate(rate: u32) -> AudioResult<()> {
    if rate == 0 {
        return Err(AudioError::UnsupportedSampleRate(rate));
    }
    Ok(())
}

/// Paramètres du filtre selon le rapport de conversion
///
/// Les rapports éloignés de 1 ont besoin d'un filtre plus long pour garder
/// une bande de transition étroite.
fn sinc_parameters(ratio: f64) -> SincInterpolationParameters {
    let (sinc_len, interpolation) = if ratio >= 1.5 || ratio <= 0.5 {
        (256, SincInterpolationType::Cubic)
    } else {
        (128, SincInterpolationType::Linear)
    };

    SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn sinc_resampler(from_rate: u32, to_rate: u32, chunk_size: usize) -> AudioResult<SincFixedIn<f32>> {
    let ratio = to_rate as f64 / from_rate as f64;
    Ok(SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(ratio), chunk_size.max(1), 1)?)
}

/// Rééchantillonne un bloc mono complet
///
/// La sortie est réalignée sur l'entrée (retard du filtre retiré) et compte
/// `round(len * to / from)` échantillons.
pub fn resample(input: &[Sample], from_rate: u32, to_rate: u32) -> AudioResult<Vec<Sample>> {
    check_rate(from_rate)?;
    check_rate(to_rate)?;
    if from_rate == to_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let mut resampler = sinc_resampler(from_rate, to_rate, input.len())?;
    let expected = (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();

    let waves_in = vec![input.to_vec()];
    let mut output = resampler
        .process(&waves_in, None)?
        .into_iter()
        .next()
        .unwrap_or_default();

    // Vide le filtre pour récupérer la fin du signal
    while output.len() < delay + expected {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        match tail.into_iter().next() {
            Some(channel) if !channel.is_empty() => output.extend(channel),
            _ => break,
        }
    }

    debug!(
        from_rate,
        to_rate,
        input = input.len(),
        output = expected,
        "🔄 Bloc rééchantillonné"
    );

    Ok(output.into_iter().skip(delay).take(expected).collect())
}

/// Rééchantillonneur de flux mono à blocs d'entrée fixes
///
/// Accumule les échantillons reçus jusqu'à former un bloc complet, puis le
/// convertit. Les tampons sont alloués une fois : aucun appel ne réalloue
/// après le premier bloc, ce qui le rend utilisable dans un callback audio.
pub struct ChunkResampler {
    /// `None` quand les deux fréquences sont égales
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<Sample>,
    output: Vec<Vec<Sample>>,
}

impl ChunkResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> AudioResult<Self> {
        check_rate(from_rate)?;
        check_rate(to_rate)?;

        if from_rate == to_rate {
            return Ok(Self { inner: None, pending: Vec::new(), output: Vec::new() });
        }

        let inner = sinc_resampler(from_rate, to_rate, chunk_size)?;
        let output = vec![vec![0.0; inner.output_frames_max()]];
        Ok(Self {
            pending: Vec::with_capacity(chunk_size * 2),
            output,
            inner: Some(inner),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Échantillons d'entrée manquants avant la prochaine sortie (0 en transparence)
    pub fn frames_until_output(&self) -> usize {
        match &self.inner {
            Some(inner) => inner.input_frames_next().saturating_sub(self.pending.len()),
            None => 0,
        }
    }

    /// Pousse un bloc d'entrée et appelle `emit` pour chaque bloc converti
    pub fn push(&mut self, block: &[Sample], mut emit: impl FnMut(&[Sample])) -> AudioResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            emit(block);
            return Ok(());
        };

        self.pending.extend_from_slice(block);

        let mut consumed = 0;
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let chunk = [&self.pending[consumed..consumed + needed]];
            let (used, produced) = inner.process_into_buffer(&chunk[..], &mut self.output, None)?;
            consumed += used;
            emit(&self.output[0][..produced]);
        }

        self.pending.drain(..consumed);
        Ok(())
    }

    /// Oublie l'entrée partielle et l'historique du filtre
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }
}
