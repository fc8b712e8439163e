//! Capture micro du candidat via cpal
//!
//! Le service attend des frames de 2048 échantillons mono à 16 kHz. Le micro
//! tourne rarement à ce format : le callback mixe les canaux en mono,
//! rééchantillonne à 16 kHz, puis découpe en frames de taille fixe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use cpal::{Device, FromSample, Sample as CpalSample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    AudioCapture, AudioConfig, AudioError, AudioFrame, AudioResult, InputLevel, Sample,
    resample::{CAPTURE_CHUNK_SIZE, ChunkResampler},
};

/// Découpe le flux du micro en frames mono de taille fixe
///
/// Vit dans le callback cpal. Aucune attente : les frames complètes sont
/// remises à l'appelant qui les pousse sans bloquer.
pub struct FrameAssembler {
    device_channels: usize,
    target_rate: u32,
    frame_size: usize,
    resampler: ChunkResampler,
    /// Bloc mono courant, réutilisé d'un callback à l'autre
    mono: Vec<Sample>,
    pending: Vec<Sample>,
    sequence: u64,
}

impl FrameAssembler {
    pub fn new(device_rate: u32, device_channels: u16, target_rate: u32, frame_size: usize) -> AudioResult<Self> {
        Ok(Self {
            device_channels: device_channels.max(1) as usize,
            target_rate,
            frame_size: frame_size.max(1),
            resampler: ChunkResampler::new(device_rate, target_rate, CAPTURE_CHUNK_SIZE)?,
            mono: Vec::with_capacity(4096),
            pending: Vec::with_capacity(frame_size * 2),
            sequence: 0,
        })
    }

    /// Ajoute un bloc entrelacé et appelle `emit` pour chaque frame complète
    pub fn push_interleaved<T>(&mut self, data: &[T], mut emit: impl FnMut(AudioFrame)) -> AudioResult<()>
    where
        T: CpalSample,
        f32: FromSample<T>,
    {
        self.mono.clear();
        self.mono.extend(
            data.chunks(self.device_channels)
                .map(|chunk| chunk.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / chunk.len() as f32),
        );

        let pending = &mut self.pending;
        self.resampler.push(&self.mono, |block| pending.extend_from_slice(block))?;

        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            emit(AudioFrame::new(samples, self.target_rate, 1, self.sequence));
            self.sequence += 1;
        }
        Ok(())
    }

    /// Oublie l'audio partiel d'avant une coupure du micro
    ///
    /// La numérotation des frames continue.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }

    /// Échantillons en attente d'une frame complète
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Implémentation de capture audio avec cpal
///
/// # Architecture thread
///
/// cpal fonctionne avec des callbacks. Le callback assemble les frames et les
/// pousse avec `try_send` : il ne bloque jamais. Si la file est pleine, la
/// frame est perdue et comptée, avec un avertissement dans les logs.
///
/// Le mode muet met le stream en pause : le périphérique cesse de produire
/// des échantillons, rien ne sort du processus.
pub struct CpalCapture {
    /// Périphérique audio d'entrée (microphone)
    device: Device,

    config: AudioConfig,

    /// Stream audio actif (None si arrêté)
    stream: Option<Stream>,

    frame_receiver: mpsc::Receiver<AudioFrame>,

    /// Cloné dans le callback à chaque construction du stream
    frame_sender: mpsc::Sender<AudioFrame>,

    is_recording: bool,

    muted: bool,

    /// Frames perdues faute de place dans la file
    dropped_frames: Arc<AtomicU64>,

    /// Levé à la réactivation du micro : le callback vide l'assembleur
    resync: Arc<AtomicBool>,

    level: watch::Sender<InputLevel>,

    device_name: String,
}

impl CpalCapture {
    /// Crée une nouvelle instance de capture
    ///
    /// Découvre le périphérique d'entrée par défaut sans démarrer la capture.
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` si aucun microphone n'est disponible
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(AudioError::NoDeviceFound)?;

        let device_name = device.description()
            .ok()
            .map(|desc| desc.name().to_string())
            .unwrap_or_else(|| "Périphérique inconnu".to_string());

        let (frame_sender, frame_receiver) = mpsc::channel(config.capture_queue_size.max(1));
        let (level, _) = watch::channel(InputLevel::silent());

        info!("🎤 Périphérique de capture trouvé : {}", device_name);

        Ok(Self {
            device,
            config,
            stream: None,
            frame_receiver,
            frame_sender,
            is_recording: false,
            muted: false,
            dropped_frames: Arc::new(AtomicU64::new(0)),
            resync: Arc::new(AtomicBool::new(false)),
            level,
            device_name,
        })
    }

    fn default_stream_config(&self) -> AudioResult<SupportedStreamConfig> {
        let default_config = self.device.default_input_config()?;

        debug!(
            sample_rate = %default_config.sample_rate(),
            channels = default_config.channels(),
            format = ?default_config.sample_format(),
            "📋 Config par défaut du micro"
        );

        Ok(default_config)
    }

    /// Construit et configure le stream audio
    fn build_stream(&mut self) -> AudioResult<Stream> {
        let stream_config = self.default_stream_config()?;

        let assembler = FrameAssembler::new(
            stream_config.sample_rate(),
            stream_config.channels(),
            self.config.capture_sample_rate,
            self.config.capture_frame_size,
        )?;

        info!(
            "🎵 Démarrage capture : {} Hz x{} -> {} Hz mono, frames de {} échantillons",
            stream_config.sample_rate(),
            stream_config.channels(),
            self.config.capture_sample_rate,
            self.config.capture_frame_size,
        );

        let config = stream_config.config();
        let sample_format = stream_config.sample_format();
        match sample_format {
            SampleFormat::F32 => self.build_typed_stream::<f32>(&config, assembler),
            SampleFormat::I16 => self.build_typed_stream::<i16>(&config, assembler),
            SampleFormat::U16 => self.build_typed_stream::<u16>(&config, assembler),
            _ => Err(AudioError::ConfigError(format!("Format d'échantillon non supporté : {:?}", sample_format))),
        }
    }

    fn build_typed_stream<T>(&self, config: &StreamConfig, mut assembler: FrameAssembler) -> AudioResult<Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let sender = self.frame_sender.clone();
        let dropped = Arc::clone(&self.dropped_frames);
        let resync = Arc::clone(&self.resync);

        let stream = self.device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if resync.swap(false, Ordering::AcqRel) {
                    assembler.reset();
                }
                let pushed = assembler.push_interleaved(data, |frame| {
                    Self::dispatch_frame(&sender, &dropped, frame);
                });
                if let Err(e) = pushed {
                    warn!("⚠️  Bloc micro ignoré : {}", e);
                }
            },
            move |err| {
                error!("❌ Erreur stream audio : {}", err);
            },
            None,
        )?;
        Ok(stream)
    }

    /// Pousse une frame vers la session sans jamais bloquer le callback
    fn dispatch_frame(sender: &mpsc::Sender<AudioFrame>, dropped: &AtomicU64, frame: AudioFrame) {
        match sender.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    sequence = frame.sequence_number,
                    dropped_total = total,
                    "⚠️  File de capture pleine, frame perdue"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Session terminée : plus personne pour lire
            }
        }
    }

    /// Nombre total de frames perdues depuis la création
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self) -> AudioResult<()> {
        if self.is_recording {
            return Ok(()); // Déjà démarré
        }

        info!("🚀 Démarrage de la capture audio...");

        let stream = self.build_stream()?;
        if !self.muted {
            stream.play()?;
        }

        self.stream = Some(stream);
        self.is_recording = true;

        info!(muted = self.muted, "✅ Capture audio démarrée");
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        if !self.is_recording {
            return Ok(()); // Déjà arrêté
        }

        info!("🛑 Arrêt de la capture audio...");

        // Libère le stream : le périphérique est rendu au système
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("⚠️  Pause du stream micro impossible : {:?}", e);
            }
        }

        self.is_recording = false;
        self.level.send_replace(InputLevel::silent());

        info!(dropped = self.dropped_frames(), "✅ Capture audio arrêtée");
        Ok(())
    }

    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        match self.frame_receiver.recv().await {
            Some(frame) => {
                self.level.send_replace(InputLevel::from_frame(&frame));
                Ok(frame)
            }
            None => Err(AudioError::DeviceDisconnected),
        }
    }

    fn set_muted(&mut self, muted: bool) -> AudioResult<()> {
        if self.muted == muted {
            return Ok(());
        }

        if let Some(stream) = &self.stream {
            if muted {
                stream.pause()?;
            } else {
                // L'audio d'avant la coupure ne doit pas se coller au nouveau
                self.resync.store(true, Ordering::Release);
                stream.play()?;
            }
        }

        self.muted = muted;
        if muted {
            self.level.send_replace(InputLevel::silent());
        }
        info!(muted, "🎙️  Micro {}", if muted { "coupé" } else { "réactivé" });
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn is_recording(&self) -> bool {
        self.is_recording
    }

    fn input_level(&self) -> watch::Receiver<InputLevel> {
        self.level.subscribe()
    }

    fn device_info(&self) -> String {
        self.device_name.clone()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if self.is_recording {
            debug!("🧹 Nettoyage automatique de la capture audio");
            // Le stream sera automatiquement arrêté quand il sera dropped
        }
    }
}
