//! Périphériques audio simulés
//!
//! Remplacent cpal dans les tests de session : la capture rejoue des frames
//! poussées par le test, la sortie enregistre ce qu'on lui demande de jouer
//! et expose une horloge pilotée à la main.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{
    AnalyserTap, AudioCapture, AudioError, AudioFrame, AudioResult, BufferId, InputLevel,
    PlaybackSink, ScheduledBuffer,
};

/// Capture alimentée par le test
///
/// Le test parle dans le micro via un [`ScriptedMic`]. Tant que le micro est
/// coupé, rien n'est produit, comme un périphérique en pause.
pub struct ScriptedCapture {
    frames: mpsc::Receiver<AudioFrame>,
    state: Arc<Mutex<CaptureState>>,
    level: watch::Sender<InputLevel>,
}

#[derive(Debug, Default, Clone)]
pub struct CaptureState {
    pub recording: bool,
    pub muted: bool,
    /// Transitions effectives coupé/actif du périphérique
    pub mute_switches: u32,
    pub stop_calls: u32,
    /// Le périphérique a été rendu (premier `stop` effectif)
    pub released: bool,
}

/// Côté test d'une [`ScriptedCapture`] déplacée dans la session
#[derive(Clone)]
pub struct ScriptedMic {
    sender: mpsc::Sender<AudioFrame>,
    state: Arc<Mutex<CaptureState>>,
}

impl ScriptedMic {
    /// Produit une frame si le micro est actif. Retourne `false` si elle a été jetée.
    pub async fn speak(&self, frame: AudioFrame) -> bool {
        {
            let state = lock(&self.state);
            if state.muted || !state.recording {
                return false;
            }
        }
        self.sender.send(frame).await.is_ok()
    }

    pub fn state(&self) -> CaptureState {
        lock(&self.state).clone()
    }

    /// Frames produites mais pas encore lues par la capture
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl ScriptedCapture {
    pub fn new(queue: usize) -> (Self, ScriptedMic) {
        let (sender, frames) = mpsc::channel(queue.max(1));
        let (level, _) = watch::channel(InputLevel::silent());
        let state = Arc::new(Mutex::new(CaptureState::default()));
        let mic = ScriptedMic { sender, state: Arc::clone(&state) };

        (Self { frames, state, level }, mic)
    }
}

#[async_trait]
impl AudioCapture for ScriptedCapture {
    async fn start(&mut self) -> AudioResult<()> {
        lock(&self.state).recording = true;
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        let mut state = lock(&self.state);
        state.stop_calls += 1;
        if state.recording {
            state.recording = false;
            state.released = true;
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        let frame = self.frames.recv().await.ok_or(AudioError::DeviceDisconnected)?;
        self.level.send_replace(InputLevel::from_frame(&frame));
        Ok(frame)
    }

    fn set_muted(&mut self, muted: bool) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if state.muted != muted {
            state.muted = muted;
            state.mute_switches += 1;
        }
        Ok(())
    }

    fn is_muted(&self) -> bool {
        lock(&self.state).muted
    }

    fn is_recording(&self) -> bool {
        lock(&self.state).recording
    }

    fn input_level(&self) -> watch::Receiver<InputLevel> {
        self.level.subscribe()
    }

    fn device_info(&self) -> String {
        "Micro simulé".to_string()
    }
}

/// Ce que la sortie simulée a reçu
#[derive(Debug, Default, Clone)]
pub struct SinkRecord {
    pub now: f64,
    pub open: bool,
    pub started: Vec<(ScheduledBuffer, AudioFrame)>,
    pub stopped: Vec<BufferId>,
    pub stop_all_calls: u32,
    pub close_calls: u32,
    /// Buffers dont l'arrêt échoue
    pub failing_stops: HashSet<BufferId>,
    /// Le prochain démarrage de buffer échoue
    pub fail_next_start: bool,
}

/// Sortie audio simulée, clonable : le test garde un clone pour observer
#[derive(Clone)]
pub struct RecordingSink {
    record: Arc<Mutex<SinkRecord>>,
    ended_sender: mpsc::UnboundedSender<BufferId>,
    ended_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<BufferId>>>>,
    tap: AnalyserTap,
}

impl RecordingSink {
    pub fn new() -> Self {
        let (ended_sender, ended_receiver) = mpsc::unbounded_channel();
        Self {
            record: Arc::new(Mutex::new(SinkRecord::default())),
            ended_sender,
            ended_receiver: Arc::new(Mutex::new(Some(ended_receiver))),
            tap: AnalyserTap::new(128),
        }
    }

    /// Avance l'horloge de sortie
    pub fn set_time(&self, now: f64) {
        lock(&self.record).now = now;
    }

    /// Simule la fin naturelle d'un buffer
    pub fn finish(&self, id: BufferId) {
        let _ = self.ended_sender.send(id);
    }

    /// Fait échouer l'arrêt d'un buffer
    pub fn fail_stop(&self, id: BufferId) {
        lock(&self.record).failing_stops.insert(id);
    }

    /// Fait échouer le prochain démarrage de buffer
    pub fn fail_next_start(&self) {
        lock(&self.record).fail_next_start = true;
    }

    pub fn record(&self) -> SinkRecord {
        lock(&self.record).clone()
    }

    /// Créneaux attribués, dans l'ordre de démarrage
    pub fn started_slots(&self) -> Vec<ScheduledBuffer> {
        lock(&self.record).started.iter().map(|(slot, _)| *slot).collect()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn start(&mut self) -> AudioResult<()> {
        lock(&self.record).open = true;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        lock(&self.record).now
    }

    fn start_buffer(&mut self, buffer: ScheduledBuffer, frame: AudioFrame) -> AudioResult<()> {
        let mut record = lock(&self.record);
        if !record.open {
            return Err(AudioError::InitializationError("Sortie simulée fermée".to_string()));
        }
        if std::mem::take(&mut record.fail_next_start) {
            return Err(AudioError::DeviceDisconnected);
        }
        record.started.push((buffer, frame));
        Ok(())
    }

    fn stop_buffer(&mut self, id: BufferId) -> AudioResult<()> {
        let mut record = lock(&self.record);
        if record.failing_stops.contains(&id) {
            return Err(AudioError::PlaybackStop(id));
        }
        record.stopped.push(id);
        Ok(())
    }

    fn stop_all(&mut self) {
        lock(&self.record).stop_all_calls += 1;
    }

    fn take_ended(&mut self) -> Option<mpsc::UnboundedReceiver<BufferId>> {
        lock(&self.ended_receiver).take()
    }

    fn analyser_tap(&self) -> AnalyserTap {
        self.tap.clone()
    }

    async fn close(&mut self) -> AudioResult<()> {
        let mut record = lock(&self.record);
        record.close_calls += 1;
        record.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.record).open
    }

    fn device_info(&self) -> String {
        "Sortie simulée".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
