//! Session d'entretien en direct
//!
//! Une [`LiveSession`] relie trois morceaux :
//! - la capture micro, dont chaque frame part vers le service
//! - le transport, qui apporte la voix de l'intervieweur et les interruptions
//! - le pipeline de sortie, qui joue cette voix sans trou et anime l'enveloppe
//!
//! ```text
//! micro → [Capture] → encode → [Transport] → service
//!                                   │
//! haut-parleurs ← [Sortie] ← décode ┘  (interruption : tout s'arrête)
//! ```
//!
//! Tout l'état mutable appartient à la tâche qui exécute [`LiveSession::run`].
//! La présentation pilote la session au travers d'un [`SessionHandle`].

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use audio::{
    AudioCapture, AudioCodec, AudioConfig, AudioFrame, EnvelopeConfig, EnvelopeSample, InputLevel,
    OutputPipeline, PcmCodec, PlaybackSink,
};
use crate::{
    InboundUnit, InterviewContext, NetworkError, NetworkResult, OutboundUnit, SessionConfig,
    SessionState, SessionStats, SessionTransport, TransportEvent,
};

/// Commandes envoyées par la présentation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleMute,
    SetMuted(bool),
    /// Fin demandée par l'utilisateur
    End,
}

/// Poignée clonable vers une session en cours
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    muted: watch::Receiver<bool>,
    envelope: watch::Receiver<EnvelopeSample>,
    input_level: watch::Receiver<InputLevel>,
}

impl SessionHandle {
    pub async fn toggle_mute(&self) -> NetworkResult<()> {
        self.send(SessionCommand::ToggleMute, "toggle_mute").await
    }

    pub async fn set_muted(&self, muted: bool) -> NetworkResult<()> {
        self.send(SessionCommand::SetMuted(muted), "set_muted").await
    }

    /// Demande la fin de la session. Sans effet si elle est déjà terminée.
    pub async fn end(&self) {
        let _ = self.commands.send(SessionCommand::End).await;
    }

    async fn send(&self, command: SessionCommand, operation: &str) -> NetworkResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| NetworkError::invalid_state(operation, "session terminée"))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Attend l'état demandé, ou l'état terminal s'il arrive avant
    pub async fn wait_for(&self, target: SessionState) -> SessionState {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| *s == target || s.is_terminal()).await {
            Ok(reached) => *reached,
            Err(_) => *self.state.borrow(),
        };
        reached
    }

    pub fn is_muted(&self) -> bool {
        *self.muted.borrow()
    }

    /// Enveloppe de parole de l'intervieweur (avatar)
    pub fn envelope(&self) -> watch::Receiver<EnvelopeSample> {
        self.envelope.clone()
    }

    /// Niveau du micro (visualiseur)
    pub fn input_level(&self) -> watch::Receiver<InputLevel> {
        self.input_level.clone()
    }
}

/// Session vocale entre le candidat et l'intervieweur
///
/// # Example
/// ```rust,no_run
/// use audio::{AudioConfig, CpalCapture, CpalPlayback};
/// use network::{InterviewContext, LiveSession, SessionConfig, WebSocketTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let audio = AudioConfig::default();
/// let config = SessionConfig::default().with_api_key("...");
///
/// let session = LiveSession::new(
///     InterviewContext::default(),
///     config.clone(),
///     audio.clone(),
///     CpalCapture::new(audio.clone())?,
///     CpalPlayback::new(audio)?,
///     WebSocketTransport::new(config)?,
/// )?;
/// let handle = session.handle();
///
/// let stats = session.run().await?;
/// # drop(handle);
/// println!("{}", stats.summary());
/// # Ok(())
/// # }
/// ```
pub struct LiveSession<C, P, T>
where
    C: AudioCapture + 'static,
    P: PlaybackSink + 'static,
    T: SessionTransport + 'static,
{
    context: InterviewContext,
    config: SessionConfig,

    capture: C,
    output: OutputPipeline<P>,
    transport: T,

    /// Encodeur des frames micro
    codec: PcmCodec,

    state: watch::Sender<SessionState>,
    muted: watch::Sender<bool>,

    commands: mpsc::Receiver<SessionCommand>,
    command_sender: mpsc::Sender<SessionCommand>,

    cancel: CancellationToken,
    stats: SessionStats,

    /// Identifiant pour corréler les logs
    session_id: u32,
    torn_down: bool,
}

impl<C, P, T> LiveSession<C, P, T>
where
    C: AudioCapture + 'static,
    P: PlaybackSink + 'static,
    T: SessionTransport + 'static,
{
    /// Assemble une session (rien n'est ouvert avant `run`)
    ///
    /// # Erreurs
    /// - `NetworkError::ConfigError` si une des configurations est invalide
    pub fn new(
        context: InterviewContext,
        config: SessionConfig,
        audio: AudioConfig,
        capture: C,
        sink: P,
        transport: T,
    ) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::ConfigError)?;
        audio.validate().map_err(NetworkError::ConfigError)?;

        let codec = PcmCodec::for_capture(&audio);
        let output = OutputPipeline::new(sink, audio, EnvelopeConfig::default())?;
        let (state, _) = watch::channel(SessionState::Connecting);
        let (muted, _) = watch::channel(capture.is_muted());
        let (command_sender, commands) = mpsc::channel(16);

        Ok(Self {
            context,
            config,
            capture,
            output,
            transport,
            codec,
            state,
            muted,
            commands,
            command_sender,
            cancel: CancellationToken::new(),
            stats: SessionStats::default(),
            session_id: fastrand::u32(..),
            torn_down: false,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.command_sender.clone(),
            state: self.state.subscribe(),
            muted: self.muted.subscribe(),
            envelope: self.output.envelope(),
            input_level: self.capture.input_level(),
        }
    }

    /// Jeton d'annulation : l'annuler termine la session comme `End`
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Exécute la session jusqu'à sa fin
    ///
    /// Une fin demandée (commande `End` ou annulation) laisse l'état tel quel
    /// et retourne les statistiques. Une erreur de liaison ou de
    /// périphérique fait passer la session en `Error`. Dans tous les cas,
    /// micro, sortie et transport sont fermés avant le retour.
    pub async fn run(mut self) -> NetworkResult<SessionStats> {
        info!(
            session_id = self.session_id,
            role = %self.context.role,
            company = %self.context.company_style,
            "🚀 Démarrage de la session d'entretien..."
        );

        let result = self.drive().await;
        if let Err(e) = &result {
            error!(session_id = self.session_id, "❌ Session interrompue : {}", e);
            self.set_state(SessionState::Error);
        }

        self.teardown().await;
        result.map(|()| self.stats.clone())
    }

    async fn drive(&mut self) -> NetworkResult<()> {
        self.output.start(&self.cancel).await?;

        let mut link = self.transport.connect(&self.context).await?;
        self.set_state(SessionState::Connected);

        // Le déclencheur passe avant toute frame micro
        link.outbound
            .send(OutboundUnit::ReadyTrigger(self.config.ready_text.clone()))
            .await
            .map_err(|_| NetworkError::ConnectionClosed("liaison fermée avant le démarrage".to_string()))?;

        self.capture.start().await?;
        info!("🎤 Micro ouvert ({}), l'entretien commence", self.capture.device_info());

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Session annulée");
                    return Ok(());
                }

                Some(command) = self.commands.recv() => {
                    if !self.on_command(command) {
                        return Ok(());
                    }
                }

                event = link.inbound.recv() => match event {
                    Some(event) => self.on_transport_event(event)?,
                    None => return Err(NetworkError::ConnectionClosed("liaison interrompue".to_string())),
                },

                id = self.output.next_ended() => {
                    self.output.on_buffer_ended(id);
                }

                frame = self.capture.next_frame() => match frame {
                    Ok(frame) => self.forward_frame(&link.outbound, frame)?,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => warn!("⚠️  Frame micro ignorée : {}", e),
                },
            }
        }
    }

    /// Retourne `false` quand la session doit s'arrêter
    fn on_command(&mut self, command: SessionCommand) -> bool {
        debug!("Commande reçue : {:?}", command);

        let result = match command {
            SessionCommand::End => {
                info!("👋 Fin de l'entretien demandée");
                return false;
            }
            SessionCommand::ToggleMute => self.capture.toggle_mute(),
            SessionCommand::SetMuted(muted) => self.capture.set_muted(muted).map(|()| muted),
        };

        match result {
            Ok(muted) => {
                if self.muted.send_replace(muted) != muted {
                    info!("{}", if muted { "🔇 Micro coupé" } else { "🎙️  Micro réactivé" });
                }
            }
            Err(e) => warn!("⚠️  Changement de sourdine impossible : {}", e),
        }
        true
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> NetworkResult<()> {
        match event {
            TransportEvent::Unit(unit) => self.on_unit(unit),
            TransportEvent::Malformed(reason) => {
                self.stats.malformed_payloads += 1;
                warn!("⚠️  Message du service ignoré : {}", reason);
                Ok(())
            }
            TransportEvent::Error(e) => Err(e),
            TransportEvent::Closed(reason) => Err(NetworkError::ConnectionClosed(reason)),
        }
    }

    fn on_unit(&mut self, unit: InboundUnit) -> NetworkResult<()> {
        match unit {
            InboundUnit::Audio(chunk) => {
                self.stats.audio_messages += 1;
                match self.output.enqueue_encoded(&chunk) {
                    Ok(_) => {}
                    Err(e) if e.is_data_error() => {
                        self.stats.malformed_payloads += 1;
                        warn!("⚠️  Fragment audio ignoré : {}", e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            InboundUnit::Interrupted => {
                self.stats.interruptions += 1;
                self.output.interrupt();
            }
            InboundUnit::TurnComplete => {
                self.stats.turns_completed += 1;
                debug!("Fin du tour de l'intervieweur");
            }
            InboundUnit::SetupComplete => debug!("Confirmation de configuration en double ignorée"),
            InboundUnit::ServiceError(message) => return Err(NetworkError::ConnectionFailed(message)),
        }
        Ok(())
    }

    /// Encode une frame micro et la confie au transport sans attendre
    fn forward_frame(&mut self, outbound: &mpsc::Sender<OutboundUnit>, frame: AudioFrame) -> NetworkResult<()> {
        let sequence = frame.sequence_number;
        let chunk = self.codec.encode(&frame);

        match outbound.try_send(OutboundUnit::Media(chunk)) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.frames_dropped += 1;
                warn!(sequence, dropped = self.stats.frames_dropped, "⚠️  File d'envoi pleine, frame micro perdue");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NetworkError::ConnectionClosed("file d'envoi fermée".to_string()))
            }
        }
    }

    fn set_state(&self, next: SessionState) {
        let current = *self.state.borrow();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!("⚠️  Transition refusée : {} → {}", current, next);
            return;
        }
        self.state.send_replace(next);
        info!(session_id = self.session_id, "📡 {} ({} → {})", next.description(), current, next);
    }

    /// Ferme micro, sortie et transport. Idempotent.
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        info!("🛑 Arrêt de la session...");
        self.cancel.cancel();

        if let Err(e) = self.capture.stop().await {
            warn!("⚠️  Arrêt du micro : {}", e);
        }
        if let Err(e) = self.output.teardown().await {
            warn!("⚠️  Arrêt de la sortie : {}", e);
        }
        if let Err(e) = self.transport.shutdown().await {
            warn!("⚠️  Arrêt du transport : {}", e);
        }

        self.stats.playback = self.output.stats().clone();
        info!(session_id = self.session_id, "✅ Session terminée : {}", self.stats.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimulatedPeer, SimulatedTransport, WebSocketTransport, READY_TEXT};
    use audio::mock::{RecordingSink, ScriptedCapture, ScriptedMic};
    use audio::{pcm_mime_type, EncodedChunk};
    use tokio::task::JoinHandle;
    use tokio::time::Duration;

    const EPS: f64 = 1e-9;

    struct Harness {
        handle: SessionHandle,
        mic: ScriptedMic,
        sink: RecordingSink,
        peer: SimulatedPeer,
        task: JoinHandle<NetworkResult<SessionStats>>,
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition jamais atteinte : {}", what);
    }

    fn spawn(config: SessionConfig) -> Harness {
        let (capture, mic) = ScriptedCapture::new(8);
        let sink = RecordingSink::new();
        let (transport, peer) = SimulatedTransport::new(config.clone());

        let session = LiveSession::new(
            InterviewContext::default(),
            config,
            AudioConfig::default(),
            capture,
            sink.clone(),
            transport,
        )
        .unwrap();
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        Harness { handle, mic, sink, peer, task }
    }

    /// Session connectée, micro ouvert
    async fn launch(config: SessionConfig) -> Harness {
        let harness = spawn(config);
        assert_eq!(harness.handle.wait_for(SessionState::Connected).await, SessionState::Connected);
        let mic = harness.mic.clone();
        eventually("micro ouvert", || mic.state().recording).await;
        harness
    }

    fn mic_frame(sequence: u64) -> AudioFrame {
        AudioFrame::new(vec![0.1; 2048], 16000, 1, sequence)
    }

    /// Voix de `seconds` secondes à 24 kHz
    fn voice(seconds: f64) -> Vec<f32> {
        vec![0.25; (seconds * 24000.0).round() as usize]
    }

    #[tokio::test]
    async fn test_ready_trigger_precedes_media() {
        let mut h = launch(SessionConfig::test_config()).await;

        for sequence in 0..3 {
            assert!(h.mic.speak(mic_frame(sequence)).await);
        }

        assert_eq!(
            h.peer.next_outbound().await,
            Some(OutboundUnit::ReadyTrigger(READY_TEXT.to_string()))
        );
        for _ in 0..3 {
            match h.peer.next_outbound().await {
                Some(OutboundUnit::Media(chunk)) => {
                    assert_eq!(chunk.mime_type, pcm_mime_type(16000));
                    let bytes = PcmCodec::new(16000).decode(&chunk).unwrap();
                    assert_eq!(bytes.len(), 4096);
                }
                other => panic!("frame micro attendue, reçu {:?}", other),
            }
        }

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(h.peer.context(), Some(InterviewContext::default()));
    }

    #[tokio::test]
    async fn test_inbound_audio_is_scheduled_gaplessly() {
        let h = launch(SessionConfig::test_config()).await;

        for (index, (duration, arrival)) in [(0.5, 0.0), (0.3, 0.6), (0.7, 0.65)].into_iter().enumerate() {
            h.sink.set_time(arrival);
            assert!(h.peer.send_audio(&voice(duration)).await);
            let sink = h.sink.clone();
            eventually("buffer planifié", || sink.record().started.len() == index + 1).await;
        }

        let starts: Vec<f64> = h.sink.started_slots().iter().map(|s| s.start_time).collect();
        assert!((starts[0] - 0.05).abs() < EPS);
        assert!((starts[1] - 0.65).abs() < EPS);
        assert!((starts[2] - 0.95).abs() < EPS);

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.audio_messages, 3);
        assert_eq!(stats.playback.buffers_scheduled, 3);
    }

    #[tokio::test]
    async fn test_interruption_stops_playback() {
        let h = launch(SessionConfig::test_config()).await;

        h.peer.send_audio(&voice(0.5)).await;
        h.peer.send_audio(&voice(0.5)).await;
        let sink = h.sink.clone();
        eventually("deux buffers en lecture", || sink.record().started.len() == 2).await;

        h.sink.set_time(0.3);
        h.peer.send_interrupted().await;
        eventually("buffers arrêtés", || sink.record().stopped.len() == 2).await;
        assert_eq!(*h.handle.envelope().borrow(), EnvelopeSample::silent());

        // Le curseur repart de l'horloge
        h.peer.send_audio(&voice(0.2)).await;
        eventually("reprise", || sink.record().started.len() == 3).await;
        assert!((h.sink.started_slots()[2].start_time - 0.35).abs() < EPS);

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.interruptions, 1);
        // Deux par l'interruption, le dernier à la fermeture
        assert_eq!(stats.playback.buffers_stopped, 3);
    }

    #[tokio::test]
    async fn test_audio_then_interruption_in_one_message() {
        let h = launch(SessionConfig::test_config()).await;

        let data = PcmCodec::new(24000).encode(&AudioFrame::silence(2400, 24000, 0)).data;
        let message = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{}"}}}}]}},"interrupted":true}}}}"#,
            data
        );
        assert!(h.peer.send_raw(&message).await);

        let sink = h.sink.clone();
        eventually("audio puis arrêt", || sink.record().stopped.len() == 1).await;
        let record = h.sink.record();
        assert_eq!(record.started.len(), 1);
        assert_eq!(record.stopped[0], record.started[0].0.id);

        h.handle.end().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_skipped() {
        let h = launch(SessionConfig::test_config()).await;

        h.peer.send_raw("{pas du json").await;
        h.peer.send_chunk(EncodedChunk::new("@@@".to_string(), pcm_mime_type(24000))).await;
        // 3 octets : pas un nombre entier d'échantillons
        h.peer.send_chunk(EncodedChunk::new("AQID".to_string(), pcm_mime_type(24000))).await;
        h.peer.send_audio(&voice(0.1)).await;

        let sink = h.sink.clone();
        eventually("audio valide planifié", || sink.record().started.len() == 1).await;
        assert_eq!(h.handle.state(), SessionState::Connected);

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.malformed_payloads, 3);
        assert_eq!(stats.audio_messages, 3);
    }

    #[tokio::test]
    async fn test_transport_error_moves_to_error_state() {
        let h = launch(SessionConfig::test_config()).await;
        h.peer.send_audio(&voice(0.5)).await;
        let sink = h.sink.clone();
        eventually("lecture en cours", || sink.record().started.len() == 1).await;

        h.peer.fail("connexion réinitialisée").await;

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert_eq!(h.handle.state(), SessionState::Error);

        // Plus rien ne part, tout est fermé
        assert!(!h.mic.speak(mic_frame(0)).await);
        assert!(h.mic.state().released);
        let record = h.sink.record();
        assert_eq!(record.close_calls, 1);
        assert_eq!(record.stopped.len(), 1);
        assert_eq!(h.peer.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_close_is_an_error() {
        let h = launch(SessionConfig::test_config()).await;
        h.peer.close("1011").await;

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(NetworkError::ConnectionClosed(reason)) if reason == "1011"));
        assert_eq!(h.handle.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_service_error_is_fatal() {
        let h = launch(SessionConfig::test_config()).await;
        h.peer.send_raw(r#"{"error":{"message":"quota dépassé"}}"#).await;

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert_eq!(h.handle.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_mute_toggle() {
        let mut h = launch(SessionConfig::test_config()).await;

        h.handle.toggle_mute().await.unwrap();
        let mic = h.mic.clone();
        eventually("micro coupé", || mic.state().muted).await;
        let handle = h.handle.clone();
        eventually("sourdine publiée", || handle.is_muted()).await;
        assert!(!h.mic.speak(mic_frame(0)).await);

        h.handle.toggle_mute().await.unwrap();
        eventually("micro réactivé", || !mic.state().muted).await;
        assert!(h.mic.speak(mic_frame(1)).await);
        eventually("frame lue", || mic.pending() == 0).await;

        // Déjà actif : aucun effet sur le périphérique
        h.handle.set_muted(false).await.unwrap();
        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();

        assert_eq!(h.mic.state().mute_switches, 2);
        assert_eq!(stats.frames_sent, 1);
        let sent: Vec<_> = h.peer.drain_outbound().into_iter().filter(|u| u.is_media()).collect();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_end_keeps_state_and_tears_down_once() {
        let h = launch(SessionConfig::test_config()).await;

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.frames_sent, 0);

        assert_eq!(h.handle.state(), SessionState::Connected);
        assert!(h.mic.state().released);
        assert_eq!(h.sink.record().close_calls, 1);
        assert_eq!(h.peer.shutdown_calls(), 1);

        // Session déjà terminée
        h.handle.end().await;
        assert!(h.handle.toggle_mute().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let h = spawn(SessionConfig::test_config());
        h.peer.fail_next_connect("dns");

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert_eq!(h.handle.state(), SessionState::Error);
        assert!(!h.mic.state().recording);
        assert_eq!(h.sink.record().close_calls, 1);
    }

    #[tokio::test]
    async fn test_missing_api_key_goes_to_error() {
        let (capture, mic) = ScriptedCapture::new(4);
        let sink = RecordingSink::new();
        let config = SessionConfig::default();
        let transport = WebSocketTransport::new(config.clone()).unwrap();

        let session = LiveSession::new(
            InterviewContext::default(),
            config,
            AudioConfig::default(),
            capture,
            sink,
            transport,
        )
        .unwrap();
        let handle = session.handle();

        let result = session.run().await;
        assert!(matches!(result, Err(NetworkError::MissingApiKey)));
        assert_eq!(handle.state(), SessionState::Error);
        assert_eq!(mic.state().stop_calls, 1);
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_frames() {
        let config = SessionConfig {
            outbound_queue_size: 2,
            ..SessionConfig::test_config()
        };
        let mut h = launch(config).await;

        // Le pair ne lit pas : le déclencheur et une frame remplissent la file
        for sequence in 0..4 {
            assert!(h.mic.speak(mic_frame(sequence)).await);
        }
        let mic = h.mic.clone();
        eventually("frames lues", || mic.pending() == 0).await;

        h.handle.end().await;
        let stats = h.task.await.unwrap().unwrap();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_dropped, 3);
        assert_eq!(h.peer.drain_outbound().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_ends_session() {
        let (capture, _mic) = ScriptedCapture::new(4);
        let config = SessionConfig::test_config();
        let (transport, _peer) = SimulatedTransport::new(config.clone());
        let session = LiveSession::new(
            InterviewContext::default(),
            config,
            AudioConfig::default(),
            capture,
            RecordingSink::new(),
            transport,
        )
        .unwrap();
        let handle = session.handle();
        let cancel = session.cancellation_token();

        let task = tokio::spawn(session.run());
        handle.wait_for(SessionState::Connected).await;
        cancel.cancel();

        assert!(task.await.unwrap().is_ok());
        assert_eq!(handle.state(), SessionState::Connected);
    }
}
