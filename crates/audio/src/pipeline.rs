//! Pipeline de sortie : décodage, planification, lecture, enveloppe
//!
//! Ce module combine :
//! - le codec PCM16/base64 pour les fragments reçus
//! - l'ordonnanceur (curseur + ensemble des buffers vivants)
//! - la sortie audio ([`PlaybackSink`])
//! - la boucle d'enveloppe branchée sur la sortie
//!
//! ```text
//! fragment base64 → [Décodage] → [Ordonnanceur] → [Sortie] → haut-parleurs
//!                                                     │
//!                                                     └→ [Analyseur] → enveloppe
//! ```
//!
//! Le pipeline est possédé par la tâche de session, qui est la seule à le
//! muter. L'interruption est donc atomique vis-à-vis des arrivées audio.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    AudioCodec, AudioConfig, AudioError, AudioFrame, AudioResult, BufferId, EncodedChunk,
    EnvelopeConfig, EnvelopeMonitor, EnvelopeSample, PcmCodec, PlaybackScheduler, PlaybackSink,
    PlaybackStats, ScheduledBuffer,
};

pub struct OutputPipeline<P: PlaybackSink> {
    sink: P,
    scheduler: PlaybackScheduler,
    codec: PcmCodec,
    monitor: EnvelopeMonitor,
    config: AudioConfig,

    /// Fins naturelles signalées par la sortie
    ended: Option<mpsc::UnboundedReceiver<BufferId>>,

    monitor_cancel: CancellationToken,
    monitor_task: Option<JoinHandle<()>>,

    is_running: bool,
    torn_down: bool,
}

impl<P: PlaybackSink> OutputPipeline<P> {
    /// Crée le pipeline autour d'une sortie (pas encore ouverte)
    ///
    /// # Erreurs
    /// - `AudioError::ConfigError` si l'analyseur ne peut pas être construit
    pub fn new(sink: P, config: AudioConfig, envelope: EnvelopeConfig) -> AudioResult<Self> {
        let monitor = EnvelopeMonitor::new(sink.analyser_tap(), &config, envelope)?;

        Ok(Self {
            scheduler: PlaybackScheduler::from_config(&config),
            codec: PcmCodec::new(config.playback_sample_rate),
            monitor,
            sink,
            config,
            ended: None,
            monitor_cancel: CancellationToken::new(),
            monitor_task: None,
            is_running: false,
            torn_down: false,
        })
    }

    /// Ouvre la sortie et lance la boucle d'enveloppe
    ///
    /// La boucle s'arrête quand `parent` est annulé ou au `teardown`.
    pub async fn start(&mut self, parent: &CancellationToken) -> AudioResult<()> {
        if self.is_running {
            return Ok(());
        }
        if self.torn_down {
            return Err(AudioError::InitializationError("Pipeline de sortie déjà fermé".to_string()));
        }

        info!("🚀 Démarrage du pipeline de sortie...");

        self.sink.start().await?;
        if self.ended.is_none() {
            self.ended = self.sink.take_ended();
        }

        self.monitor_cancel = parent.child_token();
        self.monitor_task = Some(
            self.monitor
                .spawn(self.config.envelope_tick_interval(), self.monitor_cancel.clone()),
        );

        self.is_running = true;
        info!("✅ Pipeline de sortie prêt ({})", self.sink.device_info());
        Ok(())
    }

    /// Planifie une frame décodée et la confie à la sortie
    pub fn enqueue(&mut self, frame: AudioFrame) -> AudioResult<ScheduledBuffer> {
        if self.torn_down {
            return Err(AudioError::InitializationError("Pipeline de sortie déjà fermé".to_string()));
        }

        let now = self.sink.current_time();
        let slot = self.scheduler.reserve(frame.duration_secs(), now);

        // Le créneau n'est retenu qu'une fois le buffer accepté par la sortie
        self.sink.start_buffer(slot, frame)?;
        self.scheduler.commit(slot);

        debug!(
            id = slot.id,
            start = slot.start_time,
            duration = slot.duration,
            now,
            "🔊 Buffer planifié"
        );
        Ok(slot)
    }

    /// Décode un fragment base64 puis le planifie
    ///
    /// Un fragment sans fréquence déclarée est lu à la fréquence de sortie.
    ///
    /// # Erreurs
    /// - `AudioError::DecodeError` / `AudioError::FormatError` : fragment
    ///   corrompu. `AudioError::UnsupportedSampleRate` : fréquence déclarée
    ///   hors plage. Rien n'est planifié et l'état reste intact.
    pub fn enqueue_encoded(&mut self, chunk: &EncodedChunk) -> AudioResult<ScheduledBuffer> {
        let bytes = self.codec.decode(chunk)?;
        let sample_rate = chunk
            .declared_sample_rate()
            .unwrap_or(self.config.playback_sample_rate);
        let frame = self.codec.decode_audio_samples(&bytes, sample_rate, self.config.channels)?;
        self.enqueue(frame)
    }

    /// Attend la prochaine fin naturelle de buffer
    ///
    /// Reste en attente indéfiniment si la sortie ne signale rien
    /// (utilisable tel quel dans un `select!`).
    pub async fn next_ended(&mut self) -> BufferId {
        match self.ended.as_mut() {
            Some(ended) => match ended.recv().await {
                Some(id) => id,
                None => {
                    self.ended = None;
                    std::future::pending().await
                }
            },
            None => std::future::pending().await,
        }
    }

    /// Retire un buffer terminé de l'ensemble vivant
    pub fn on_buffer_ended(&mut self, id: BufferId) -> bool {
        self.scheduler.complete(id)
    }

    /// Coupe la parole de l'interlocuteur
    ///
    /// Arrête chaque buffer vivant, vide l'ensemble, remet le curseur à 0 et
    /// ramène l'enveloppe au silence. Un échec d'arrêt sur un buffer est
    /// journalisé et n'empêche pas d'arrêter les suivants.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.scheduler.interrupt();
        self.stop_buffers(&stopped);
        self.monitor.reset();

        info!(stopped = stopped.len(), "✋ Interruption : lecture coupée");
        stopped.len()
    }

    fn stop_buffers(&mut self, ids: &[BufferId]) {
        for &id in ids {
            if let Err(e) = self.sink.stop_buffer(id) {
                debug!("Arrêt du buffer {} ignoré : {}", id, e);
            }
        }
        self.sink.stop_all();
    }

    /// Arrête tout et ferme la sortie. Idempotent.
    pub async fn teardown(&mut self) -> AudioResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        info!("🛑 Arrêt du pipeline de sortie...");

        self.monitor_cancel.cancel();
        if let Some(task) = self.monitor_task.take() {
            if let Err(e) = task.await {
                warn!("⚠️  Boucle d'enveloppe terminée anormalement : {}", e);
            }
        }

        let stopped = self.scheduler.clear();
        self.stop_buffers(&stopped);
        self.monitor.reset();

        let result = self.sink.close().await;
        self.is_running = false;

        info!(
            scheduled = self.scheduler.stats().buffers_scheduled,
            interruptions = self.scheduler.stats().interruptions,
            "✅ Pipeline de sortie arrêté"
        );
        result
    }

    /// Abonnement à l'enveloppe de parole
    pub fn envelope(&self) -> watch::Receiver<EnvelopeSample> {
        self.monitor.subscribe()
    }

    pub fn monitor(&self) -> &EnvelopeMonitor {
        &self.monitor
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &PlaybackStats {
        self.scheduler.stats()
    }

    pub fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}

impl<P: PlaybackSink> Drop for OutputPipeline<P> {
    fn drop(&mut self) {
        if self.is_running && !self.torn_down {
            debug!("🧹 Nettoyage automatique du pipeline de sortie");
            self.monitor_cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use crate::pcm_mime_type;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    const EPS: f64 = 1e-9;

    /// Frame de `seconds` secondes à 24 kHz
    fn tone(seconds: f64) -> AudioFrame {
        let count = (seconds * 24000.0).round() as usize;
        AudioFrame::new(vec![0.25; count], 24000, 1, 0)
    }

    async fn running(sink: RecordingSink) -> (OutputPipeline<RecordingSink>, CancellationToken) {
        let cancel = CancellationToken::new();
        let mut pipeline = OutputPipeline::new(sink, AudioConfig::default(), EnvelopeConfig::default()).unwrap();
        pipeline.start(&cancel).await.unwrap();
        (pipeline, cancel)
    }

    #[tokio::test]
    async fn test_jittered_arrivals_are_queued() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;

        for (duration, arrival) in [(0.5, 0.0), (0.3, 0.6), (0.7, 0.65)] {
            sink.set_time(arrival);
            pipeline.enqueue(tone(duration)).unwrap();
        }

        let starts: Vec<f64> = sink.started_slots().iter().map(|s| s.start_time).collect();
        assert!((starts[0] - 0.05).abs() < EPS);
        assert!((starts[1] - 0.65).abs() < EPS);
        assert!((starts[2] - 0.95).abs() < EPS);
        assert!((pipeline.scheduler().next_start_time() - 1.65).abs() < EPS);
    }

    #[tokio::test]
    async fn test_interrupt_stops_buffers_in_flight() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;

        let a = pipeline.enqueue(tone(0.5)).unwrap();
        let b = pipeline.enqueue(tone(0.5)).unwrap();

        sink.set_time(0.3);
        assert_eq!(pipeline.interrupt(), 2);

        let record = sink.record();
        assert_eq!(record.stopped, vec![a.id, b.id]);
        assert_eq!(record.stop_all_calls, 1);
        assert_eq!(pipeline.scheduler().live_count(), 0);
        assert_eq!(pipeline.scheduler().next_start_time(), 0.0);
        assert_eq!(*pipeline.envelope().borrow(), EnvelopeSample::silent());

        let next = pipeline.enqueue(tone(0.2)).unwrap();
        assert!((next.start_time - 0.35).abs() < EPS);
    }

    #[tokio::test]
    async fn test_failed_stop_does_not_block_others() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;

        let a = pipeline.enqueue(tone(0.1)).unwrap();
        let b = pipeline.enqueue(tone(0.1)).unwrap();
        sink.fail_stop(a.id);

        assert_eq!(pipeline.interrupt(), 2);
        assert_eq!(sink.record().stopped, vec![b.id]);
        assert_eq!(pipeline.scheduler().live_count(), 0);
    }

    #[tokio::test]
    async fn test_natural_end_leaves_live_set() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;

        let slot = pipeline.enqueue(tone(0.1)).unwrap();
        sink.finish(slot.id);

        let id = pipeline.next_ended().await;
        assert_eq!(id, slot.id);
        assert!(pipeline.on_buffer_ended(id));
        assert_eq!(pipeline.scheduler().live_count(), 0);
        assert_eq!(pipeline.stats().buffers_completed, 1);
    }

    #[tokio::test]
    async fn test_encoded_chunk_is_decoded_and_scheduled() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;

        // 2400 échantillons à 24 kHz = 0.1 s
        let bytes = vec![0u8; 4800];
        let chunk = EncodedChunk::new(STANDARD.encode(&bytes), pcm_mime_type(24000));

        let slot = pipeline.enqueue_encoded(&chunk).unwrap();
        assert!((slot.duration - 0.1).abs() < EPS);
        assert_eq!(sink.record().started.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_chunk_leaves_state_intact() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;
        pipeline.enqueue(tone(0.2)).unwrap();
        let cursor = pipeline.scheduler().next_start_time();

        let bad_alphabet = EncodedChunk::new("@@@".to_string(), pcm_mime_type(24000));
        assert!(matches!(pipeline.enqueue_encoded(&bad_alphabet), Err(AudioError::DecodeError(_))));

        let odd = EncodedChunk::new(STANDARD.encode([1u8, 2, 3]), pcm_mime_type(24000));
        assert!(matches!(pipeline.enqueue_encoded(&odd), Err(AudioError::FormatError { .. })));

        assert_eq!(pipeline.scheduler().next_start_time(), cursor);
        assert_eq!(pipeline.scheduler().live_count(), 1);
    }

    #[tokio::test]
    async fn test_declared_rate_out_of_range_is_dropped() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;
        let first = pipeline.enqueue(tone(0.2)).unwrap();
        let cursor = pipeline.scheduler().next_start_time();

        let data = STANDARD.encode(vec![0u8; 4800]);
        for mime in ["audio/pcm;rate=0", "audio/pcm;rate=1", "audio/pcm;rate=4000000"] {
            let chunk = EncodedChunk::new(data.clone(), mime);
            let result = pipeline.enqueue_encoded(&chunk);
            assert!(matches!(result, Err(AudioError::UnsupportedSampleRate(_))), "{}", mime);
            assert!(result.unwrap_err().is_data_error());
        }

        assert_eq!(pipeline.scheduler().next_start_time(), cursor);
        assert_eq!(sink.record().started.len(), 1);

        // Le fragment valide suivant s'enchaîne sans chevauchement
        let next = pipeline.enqueue_encoded(&EncodedChunk::new(data, pcm_mime_type(24000))).unwrap();
        assert!((next.start_time - first.end_time()).abs() < EPS);
    }

    #[tokio::test]
    async fn test_rejected_buffer_is_not_scheduled() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;
        let first = pipeline.enqueue(tone(0.2)).unwrap();

        sink.fail_next_start();
        assert!(pipeline.enqueue(tone(0.5)).is_err());
        assert_eq!(pipeline.scheduler().live_count(), 1);
        assert!((pipeline.scheduler().next_start_time() - first.end_time()).abs() < EPS);
        assert_eq!(pipeline.stats().buffers_scheduled, 1);

        let next = pipeline.enqueue(tone(0.1)).unwrap();
        assert_eq!(next.id, first.id + 1);
        assert!((next.start_time - first.end_time()).abs() < EPS);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let sink = RecordingSink::new();
        let (mut pipeline, _cancel) = running(sink.clone()).await;
        pipeline.enqueue(tone(0.3)).unwrap();

        pipeline.teardown().await.unwrap();
        pipeline.teardown().await.unwrap();

        let record = sink.record();
        assert_eq!(record.close_calls, 1);
        assert!(!record.open);
        assert_eq!(record.stopped.len(), 1);
        assert!(!pipeline.is_running());

        // Plus de lecture possible après fermeture
        assert!(pipeline.enqueue(tone(0.1)).is_err());
    }
}
