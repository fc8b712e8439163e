//! Sortie de la voix de l'intervieweur via cpal
//!
//! La topologie est fixée à l'ouverture du périphérique :
//!
//! ```text
//! buffers planifiés -> mixeur -> analyseur (avant gain) -> gain -> sortie
//! ```
//!
//! Seuls les buffers sont attachés/détachés au fil de l'eau, via des commandes
//! envoyées au [`Mixer`] qui vit dans le callback cpal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    AnalyserTap, AudioConfig, AudioError, AudioFrame, AudioResult, BufferId, PlaybackSink,
    Sample, ScheduledBuffer,
    resample::{MIX_CHUNK_SIZE, ChunkResampler, resample},
};

/// Commandes envoyées au mixeur depuis la tâche de session
#[derive(Debug)]
pub enum MixerCommand {
    /// Attache un buffer qui démarrera à `start_frame` (horloge de mixage)
    Start { id: BufferId, start_frame: u64, samples: Vec<Sample> },
    /// Détache un buffer (sans effet s'il est déjà terminé)
    Stop(BufferId),
    /// Détache tous les buffers
    StopAll,
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<Sample>,
    cursor: usize,
}

impl Voice {
    fn is_finished(&self) -> bool {
        self.cursor >= self.samples.len()
    }
}

/// Mixeur temps réel
///
/// Possédé par le callback de sortie. Il mixe à la fréquence de lecture
/// (24 kHz) par blocs, puis convertit vers la fréquence du périphérique avec
/// rubato. L'horloge partagée compte les échantillons mixés.
pub struct Mixer {
    commands: std_mpsc::Receiver<MixerCommand>,
    ended: mpsc::UnboundedSender<BufferId>,
    voices: Vec<Voice>,
    clock: Arc<AtomicU64>,
    position: u64,
    gain: f32,
    tap: AnalyserTap,
    converter: ChunkResampler,
    /// Échantillons à la fréquence du périphérique, prêts à sortir
    ready: VecDeque<Sample>,
    /// Bloc mixé courant (pour l'analyseur et la conversion)
    mixed: Vec<Sample>,
}

impl Mixer {
    pub fn new(
        commands: std_mpsc::Receiver<MixerCommand>,
        ended: mpsc::UnboundedSender<BufferId>,
        clock: Arc<AtomicU64>,
        tap: AnalyserTap,
        gain: f32,
        mix_rate: u32,
        device_rate: u32,
    ) -> AudioResult<Self> {
        Ok(Self {
            commands,
            ended,
            voices: Vec::new(),
            clock,
            position: 0,
            gain,
            tap,
            converter: ChunkResampler::new(mix_rate, device_rate, MIX_CHUNK_SIZE)?,
            ready: VecDeque::with_capacity(MIX_CHUNK_SIZE * 8),
            mixed: Vec::with_capacity(MIX_CHUNK_SIZE * 4),
        })
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Start { id, start_frame, samples } => {
                    self.voices.push(Voice { id, start_frame, samples, cursor: 0 });
                }
                MixerCommand::Stop(id) => self.voices.retain(|voice| voice.id != id),
                MixerCommand::StopAll => self.voices.clear(),
            }
        }
    }

    /// Mixe `count` échantillons à la fréquence de lecture dans `mixed`
    fn mix_block(&mut self, count: usize) {
        self.mixed.clear();
        for _ in 0..count {
            let position = self.position;
            let mut value = 0.0;
            for voice in self.voices.iter_mut() {
                if position < voice.start_frame {
                    continue;
                }
                if let Some(&sample) = voice.samples.get(voice.cursor) {
                    value += sample;
                    voice.cursor += 1;
                }
            }
            self.position += 1;
            self.mixed.push(value);
        }

        // L'analyseur observe le signal avant le gain
        self.tap.push(&self.mixed);
    }

    /// Remplit un buffer de sortie entrelacé de `channels` canaux
    pub fn render(&mut self, output: &mut [Sample], channels: usize) {
        self.apply_commands();

        let channels = channels.max(1);
        let frames = output.len().div_ceil(channels);

        while self.ready.len() < frames {
            let count = match self.converter.frames_until_output() {
                0 => frames - self.ready.len(),
                needed => needed,
            };
            self.mix_block(count);

            let ready = &mut self.ready;
            if let Err(e) = self.converter.push(&self.mixed, |block| ready.extend(block.iter().copied())) {
                warn!("⚠️  Conversion vers le périphérique impossible : {}", e);
                self.ready.extend(self.mixed.iter().copied());
            }
        }

        for chunk in output.chunks_mut(channels) {
            let value = self.ready.pop_front().unwrap_or(0.0);
            chunk.fill((value * self.gain).clamp(-1.0, 1.0));
        }

        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.is_finished() {
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });

        self.clock.store(self.position, Ordering::Release);
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }
}

/// Implémentation de lecture audio avec cpal
///
/// # Architecture thread
///
/// La tâche de session envoie des [`MixerCommand`] par un canal non bloquant.
/// Le callback cpal (thread temps réel) les applique au début de chaque bloc,
/// publie l'horloge et signale les buffers terminés.
pub struct CpalPlayback {
    /// Périphérique audio de sortie (haut-parleurs)
    device: Device,

    config: AudioConfig,

    /// Stream audio actif (None si fermé)
    stream: Option<Stream>,

    device_name: String,

    /// Échantillons mixés depuis l'ouverture (horloge de sortie)
    clock: Arc<AtomicU64>,

    commands: Option<std_mpsc::Sender<MixerCommand>>,

    ended_receiver: Option<mpsc::UnboundedReceiver<BufferId>>,

    tap: AnalyserTap,

    is_open: bool,
}

impl CpalPlayback {
    /// Crée une nouvelle instance de lecture
    ///
    /// Découvre le périphérique de sortie par défaut sans l'ouvrir.
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` si aucun haut-parleur n'est disponible
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDeviceFound)?;

        let device_name = device.description()
            .ok()
            .map(|desc| desc.name().to_string())
            .unwrap_or_else(|| "Périphérique inconnu".to_string());

        info!("🔊 Périphérique de lecture trouvé : {}", device_name);

        let tap = AnalyserTap::new(config.analyser_fft_size);

        Ok(Self {
            device,
            config,
            stream: None,
            device_name,
            clock: Arc::new(AtomicU64::new(0)),
            commands: None,
            ended_receiver: None,
            tap,
            is_open: false,
        })
    }

    fn default_stream_config(&self) -> AudioResult<SupportedStreamConfig> {
        let default_config = self.device.default_output_config()?;

        debug!(
            sample_rate = %default_config.sample_rate(),
            channels = default_config.channels(),
            format = ?default_config.sample_format(),
            "📋 Config par défaut du périphérique de sortie"
        );

        Ok(default_config)
    }

    /// Construit le stream et le mixeur associé
    fn build_stream(&mut self) -> AudioResult<Stream> {
        let stream_config = self.default_stream_config()?;
        let device_rate = stream_config.sample_rate();
        let channels = stream_config.channels() as usize;

        let (command_tx, command_rx) = std_mpsc::channel();
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();

        self.clock.store(0, Ordering::Release);
        let mixer = Mixer::new(
            command_rx,
            ended_tx,
            Arc::clone(&self.clock),
            self.tap.clone(),
            self.config.output_gain,
            self.config.playback_sample_rate,
            device_rate,
        )?;

        info!(
            "🎵 Démarrage lecture : mixage {} Hz -> périphérique {} Hz, {} canaux, gain {}",
            self.config.playback_sample_rate, device_rate, channels, self.config.output_gain
        );

        let config = stream_config.config();
        let sample_format = stream_config.sample_format();
        let stream = match sample_format {
            SampleFormat::F32 => self.build_typed_stream::<f32>(&config, mixer, channels)?,
            SampleFormat::I16 => self.build_typed_stream::<i16>(&config, mixer, channels)?,
            SampleFormat::U16 => self.build_typed_stream::<u16>(&config, mixer, channels)?,
            _ => return Err(AudioError::ConfigError(format!("Format d'échantillon non supporté : {:?}", sample_format))),
        };

        self.commands = Some(command_tx);
        self.ended_receiver = Some(ended_rx);
        Ok(stream)
    }

    fn build_typed_stream<T>(&self, config: &StreamConfig, mut mixer: Mixer, channels: usize) -> AudioResult<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mut scratch: Vec<f32> = Vec::with_capacity(8192);
        let stream = self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch, channels);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| {
                error!("❌ Erreur stream audio sortie : {}", err);
            },
            None,
        )?;
        Ok(stream)
    }

    fn send(&self, command: MixerCommand) -> bool {
        match &self.commands {
            Some(commands) => commands.send(command).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PlaybackSink for CpalPlayback {
    async fn start(&mut self) -> AudioResult<()> {
        if self.is_open {
            return Ok(()); // Déjà ouvert
        }

        info!("🚀 Ouverture de la sortie audio...");

        let stream = self.build_stream()?;
        stream.play()?;

        self.stream = Some(stream);
        self.is_open = true;

        info!("✅ Sortie audio ouverte");
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let frames = self.clock.load(Ordering::Acquire);
        frames as f64 / self.config.playback_sample_rate as f64
    }

    fn start_buffer(&mut self, buffer: ScheduledBuffer, frame: AudioFrame) -> AudioResult<()> {
        if !self.is_open {
            return Err(AudioError::InitializationError("Sortie audio non ouverte".to_string()));
        }

        let mix_rate = self.config.playback_sample_rate;
        let samples = resample(&frame.to_mono(), frame.sample_rate, mix_rate)?;
        let start_frame = (buffer.start_time * mix_rate as f64).round() as u64;

        if self.send(MixerCommand::Start { id: buffer.id, start_frame, samples }) {
            Ok(())
        } else {
            Err(AudioError::DeviceDisconnected)
        }
    }

    fn stop_buffer(&mut self, id: BufferId) -> AudioResult<()> {
        if self.send(MixerCommand::Stop(id)) {
            Ok(())
        } else {
            Err(AudioError::PlaybackStop(id))
        }
    }

    fn stop_all(&mut self) {
        let _ = self.send(MixerCommand::StopAll);
    }

    fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<BufferId>> {
        self.ended_receiver.take()
    }

    fn analyser_tap(&self) -> AnalyserTap {
        self.tap.clone()
    }

    async fn close(&mut self) -> AudioResult<()> {
        if !self.is_open {
            return Ok(()); // Déjà fermé
        }

        info!("🛑 Fermeture de la sortie audio...");

        self.stop_all();
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("⚠️  Pause du stream de sortie impossible : {:?}", e);
            }
        }
        self.commands = None;
        self.is_open = false;

        info!("✅ Sortie audio fermée");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn device_info(&self) -> String {
        self.device_name.clone()
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        if self.is_open {
            debug!("🧹 Nettoyage automatique de la sortie audio");
            // Le stream est arrêté en étant dropped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        mixer: Mixer,
        commands: std_mpsc::Sender<MixerCommand>,
        ended: mpsc::UnboundedReceiver<BufferId>,
        clock: Arc<AtomicU64>,
        tap: AnalyserTap,
    }

    fn harness(device_rate: u32) -> Harness {
        let (commands, command_rx) = std_mpsc::channel();
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let clock = Arc::new(AtomicU64::new(0));
        let tap = AnalyserTap::new(128);
        let mixer = Mixer::new(command_rx, ended_tx, Arc::clone(&clock), tap.clone(), 1.2, 24000, device_rate).unwrap();
        Harness { mixer, commands, ended, clock, tap }
    }

    #[test]
    fn test_mixer_starts_voice_on_schedule() {
        let mut h = harness(24000);
        h.commands
            .send(MixerCommand::Start { id: 7, start_frame: 10, samples: vec![0.5; 5] })
            .unwrap();

        let mut output = vec![0.0; 20];
        h.mixer.render(&mut output, 1);

        let audible: Vec<usize> = output
            .iter()
            .enumerate()
            .filter(|(_, s)| s.abs() > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(audible.len(), 5);
        // Gain appliqué en sortie
        assert!((output[audible[0]] - 0.6).abs() < 1e-6);

        assert_eq!(h.ended.try_recv().unwrap(), 7);
        assert_eq!(h.mixer.active_voices(), 0);
        assert_eq!(h.clock.load(Ordering::Acquire), 20);
    }

    #[test]
    fn test_mixer_tap_is_pre_gain() {
        let mut h = harness(24000);
        h.commands
            .send(MixerCommand::Start { id: 1, start_frame: 0, samples: vec![0.5; 256] })
            .unwrap();

        let mut output = vec![0.0; 200];
        h.mixer.render(&mut output, 1);

        let mut window = [0.0; 128];
        h.tap.snapshot(&mut window);
        assert!(window.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_mixer_stop_detaches_voice() {
        let mut h = harness(24000);
        h.commands
            .send(MixerCommand::Start { id: 1, start_frame: 0, samples: vec![0.5; 1000] })
            .unwrap();
        h.commands
            .send(MixerCommand::Start { id: 2, start_frame: 0, samples: vec![0.5; 1000] })
            .unwrap();

        let mut output = vec![0.0; 10];
        h.mixer.render(&mut output, 1);
        assert_eq!(h.mixer.active_voices(), 2);

        h.commands.send(MixerCommand::Stop(1)).unwrap();
        h.commands.send(MixerCommand::Stop(99)).unwrap(); // inconnu : sans effet
        h.mixer.render(&mut output, 1);
        assert_eq!(h.mixer.active_voices(), 1);

        h.commands.send(MixerCommand::StopAll).unwrap();
        h.mixer.render(&mut output, 1);
        assert_eq!(h.mixer.active_voices(), 0);
        assert!(output.iter().skip(1).all(|&s| s == 0.0));
    }

    #[test]
    fn test_mixer_clock_at_mix_rate() {
        // Périphérique à 48 kHz : le mixage avance par blocs à 24 kHz
        let mut h = harness(48000);
        let mut output = vec![0.0; 96];
        h.mixer.render(&mut output, 2);
        assert_eq!(h.clock.load(Ordering::Acquire), MIX_CHUNK_SIZE as u64);

        // Le bloc converti couvre encore le callback suivant
        h.mixer.render(&mut output, 2);
        assert_eq!(h.clock.load(Ordering::Acquire), MIX_CHUNK_SIZE as u64);
    }

    #[test]
    fn test_mixer_converts_to_device_rate() {
        let mut h = harness(48000);
        h.commands
            .send(MixerCommand::Start { id: 1, start_frame: 0, samples: vec![0.5; 4800] })
            .unwrap();

        let mut output = vec![0.0; 2048];
        h.mixer.render(&mut output, 1);

        let mixed = h.clock.load(Ordering::Acquire);
        assert!(mixed >= 1024 && mixed % MIX_CHUNK_SIZE as u64 == 0, "mixé {}", mixed);
        // Une fois le filtre établi : 0.5 x gain 1.2
        assert!(output[1024..].iter().all(|&s| (s - 0.6).abs() < 0.02));
    }

    #[test]
    fn test_playback_creation() {
        match CpalPlayback::new(AudioConfig::default()) {
            Ok(playback) => {
                assert!(!playback.is_open());
                assert!(!playback.device_info().is_empty());
                assert_eq!(playback.current_time(), 0.0);
            },
            Err(AudioError::NoDeviceFound) => {
                println!("⚠️  Pas de haut-parleur disponible pour le test");
            },
            Err(e) => panic!("Erreur inattendue: {}", e),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        if let Ok(mut playback) = CpalPlayback::new(AudioConfig::default()) {
            let _ = playback.start().await;
            assert!(playback.close().await.is_ok());
            assert!(playback.close().await.is_ok());
            assert!(!playback.is_open());
            // Après fermeture, l'arrêt d'un buffer est signalé mais sans conséquence
            assert!(matches!(playback.stop_buffer(1), Err(AudioError::PlaybackStop(1))));
        }
    }

    // Note: Ce test nécessite de vrais haut-parleurs et peut être audible
    #[tokio::test]
    #[ignore]
    async fn test_playback_tone() {
        use crate::PlaybackScheduler;
        use tokio::time::{sleep, Duration};

        let config = AudioConfig::default();
        if let Ok(mut playback) = CpalPlayback::new(config.clone()) {
            if playback.start().await.is_ok() {
                let mut scheduler = PlaybackScheduler::from_config(&config);
                for (i, freq) in [440.0f32, 523.0, 659.0].iter().enumerate() {
                    let samples: Vec<f32> = (0..4800)
                        .map(|n| (2.0 * std::f32::consts::PI * freq * n as f32 / 24000.0).sin() * 0.3)
                        .collect();
                    let frame = AudioFrame::new(samples, 24000, 1, i as u64);
                    let slot = scheduler.schedule(frame.duration_secs(), playback.current_time());
                    playback.start_buffer(slot, frame).unwrap();
                }
                sleep(Duration::from_millis(800)).await;
                let _ = playback.close().await;
            }
        }
    }
}
