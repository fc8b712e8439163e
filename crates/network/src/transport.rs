//! Transports vers le service vocal
//!
//! Ce module fournit deux implémentations de [`SessionTransport`] :
//! - [`WebSocketTransport`] : connexion WebSocket (TLS) au service réel
//! - [`SimulatedTransport`] : service simulé, piloté depuis un [`SimulatedPeer`]
//!
//! Dans les deux cas, la liaison ouverte se présente comme deux files : les
//! unités sortantes de la session et les événements entrants.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use audio::{AudioCodec, AudioFrame, EncodedChunk, PcmCodec, Sample};
use crate::protocol::{parse_server_frame, parse_server_message, setup_message};
use crate::{
    InboundUnit, InterviewContext, NetworkError, NetworkResult, OutboundUnit, SessionConfig,
    SessionTransport, TransportEvent, TransportLink,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport WebSocket vers le service réel
///
/// # Architecture
/// - Ouverture, envoi de la configuration, attente de `setupComplete`
/// - Une tâche d'envoi : file sortante → trames texte JSON
/// - Une tâche de réception : trames → unités → file entrante
///
/// # Example
/// ```rust,no_run
/// use network::{InterviewContext, SessionConfig, SessionTransport, WebSocketTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = SessionConfig::default().with_api_key("...");
/// let mut transport = WebSocketTransport::new(config)?;
///
/// let link = transport.connect(&InterviewContext::default()).await?;
/// # drop(link);
/// # Ok(())
/// # }
/// ```
pub struct WebSocketTransport {
    config: SessionConfig,

    /// Arrête les deux tâches de la liaison
    cancel: CancellationToken,

    tasks: Vec<JoinHandle<()>>,

    /// Faux dès que la réception s'arrête
    active: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Crée un transport (pas encore connecté)
    ///
    /// # Erreurs
    /// - `NetworkError::ConfigError` si la configuration est invalide
    pub fn new(config: SessionConfig) -> NetworkResult<Self> {
        config.validate().map_err(NetworkError::ConfigError)?;

        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attend la confirmation de la configuration par le service
    async fn wait_for_setup(ws: &mut WsStream) -> NetworkResult<()> {
        while let Some(message) = ws.next().await {
            let units = match message? {
                Message::Text(text) => parse_server_message(text.as_str()),
                Message::Binary(bytes) => parse_server_frame(&bytes),
                Message::Close(frame) => return Err(NetworkError::ConnectionClosed(close_reason(frame))),
                _ => continue,
            };

            match units {
                Ok(units) => {
                    for unit in units {
                        match unit {
                            InboundUnit::SetupComplete => return Ok(()),
                            InboundUnit::ServiceError(message) => {
                                return Err(NetworkError::ConnectionFailed(message));
                            }
                            other => debug!("Message reçu avant la confirmation ignoré : {:?}", other),
                        }
                    }
                }
                Err(e) => warn!("⚠️  Message illisible pendant la configuration : {}", e),
            }
        }

        Err(NetworkError::ConnectionClosed("flux terminé avant confirmation".to_string()))
    }
}

#[async_trait]
impl SessionTransport for WebSocketTransport {
    async fn connect(&mut self, context: &InterviewContext) -> NetworkResult<TransportLink> {
        if self.is_active() {
            return Err(NetworkError::invalid_state("connect", "connecté"));
        }

        let url = self.config.url()?;
        // Sans effet si un fournisseur est déjà installé
        let _ = rustls::crypto::ring::default_provider().install_default();

        info!(endpoint = %self.config.endpoint, model = %self.config.model, "🔌 Connexion au service...");

        let setup_timeout = self.config.setup_timeout;
        let timeout_ms = setup_timeout.as_millis() as u64;

        let (mut ws, _response) = timeout(setup_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| NetworkError::SetupTimeout { timeout_ms })??;

        let setup = setup_message(&self.config, context)?;
        ws.send(Message::Text(setup.into())).await?;
        debug!("Configuration envoyée (voix {})", self.config.voice);

        timeout(setup_timeout, Self::wait_for_setup(&mut ws))
            .await
            .map_err(|_| NetworkError::SetupTimeout { timeout_ms })??;

        info!("✅ Configuration acceptée par le service");

        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundUnit>(self.config.outbound_queue_size);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(self.config.inbound_queue_size);

        self.cancel = CancellationToken::new();
        self.active.store(true, Ordering::SeqCst);

        // Envoi
        let cancel = self.cancel.clone();
        let events = events_tx.clone();
        let writer = tokio::spawn(async move {
            loop {
                let unit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    unit = outbound_rx.recv() => match unit {
                        Some(unit) => unit,
                        None => break,
                    },
                };

                let json = match unit.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("⚠️  Unité non sérialisable ignorée : {}", e);
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    let _ = events.send(TransportEvent::Error(e.into())).await;
                    break;
                }
            }

            let _ = sink.close().await;
            debug!("Tâche d'envoi terminée");
        });

        // Réception
        let cancel = self.cancel.clone();
        let active = Arc::clone(&self.active);
        let events = events_tx;
        let reader = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = stream.next() => message,
                };

                let parsed = match message {
                    Some(Ok(Message::Text(text))) => parse_server_message(text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => parse_server_frame(&bytes),
                    Some(Ok(Message::Close(frame))) => {
                        let _ = events.send(TransportEvent::Closed(close_reason(frame))).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.into())).await;
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed("flux terminé".to_string())).await;
                        break;
                    }
                };

                if !forward(&events, parsed).await {
                    break;
                }
            }

            active.store(false, Ordering::SeqCst);
            debug!("Tâche de réception terminée");
        });

        self.tasks = vec![writer, reader];

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: events_rx,
        })
    }

    async fn shutdown(&mut self) -> NetworkResult<()> {
        self.cancel.cancel();
        let had_tasks = !self.tasks.is_empty();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("⚠️  Tâche de transport terminée anormalement : {}", e);
            }
        }
        self.active.store(false, Ordering::SeqCst);

        if had_tasks {
            info!("🛑 Transport WebSocket fermé");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        format!("WebSocket {} ({})", self.config.endpoint, self.config.model)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            debug!("🧹 Nettoyage automatique du transport WebSocket");
            self.cancel.cancel();
        }
    }
}

/// Pousse les unités d'un message vers la session. `false` si elle est partie.
async fn forward(events: &mpsc::Sender<TransportEvent>, parsed: NetworkResult<Vec<InboundUnit>>) -> bool {
    match parsed {
        Ok(units) => {
            for unit in units {
                if events.send(TransportEvent::Unit(unit)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => events.send(TransportEvent::Malformed(e.to_string())).await.is_ok(),
    }
}

fn close_reason(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("{} (code {})", frame.reason.as_str(), u16::from(frame.code)),
        None => "sans motif".to_string(),
    }
}

/// État partagé entre le transport simulé et son pair
#[derive(Debug, Default)]
struct SimulationState {
    context: Option<InterviewContext>,
    connect_attempts: u32,
    shutdown_calls: u32,
    fail_connect: Option<String>,
    loss_rate: f32,
    lost_frames: u64,
}

/// Transport simulé pour les tests
///
/// Le côté service est tenu par le [`SimulatedPeer`] retourné à la création :
/// il lit ce que la session envoie et injecte audio, interruptions, erreurs.
pub struct SimulatedTransport {
    config: SessionConfig,

    /// Extrémités de la liaison, remises à la session au `connect`
    pending: Option<(mpsc::Sender<OutboundUnit>, mpsc::Receiver<TransportEvent>)>,

    state: Arc<Mutex<SimulationState>>,

    /// Délai d'ouverture simulé
    latency_ms: u32,

    is_active: bool,
}

/// Côté service d'un [`SimulatedTransport`]
pub struct SimulatedPeer {
    outbound: mpsc::Receiver<OutboundUnit>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<SimulationState>>,
    codec: PcmCodec,
}

impl SimulatedTransport {
    /// Crée un transport simulé et le pair qui joue le service
    pub fn new(config: SessionConfig) -> (Self, SimulatedPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_size.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.inbound_queue_size.max(1));
        let state = Arc::new(Mutex::new(SimulationState::default()));

        let peer = SimulatedPeer {
            outbound: outbound_rx,
            events: events_tx,
            state: Arc::clone(&state),
            codec: PcmCodec::new(24000),
        };

        let transport = Self {
            config,
            pending: Some((outbound_tx, events_rx)),
            state,
            latency_ms: 0,
            is_active: false,
        };
        (transport, peer)
    }

    /// Configure les paramètres de simulation
    ///
    /// `loss_rate` : proportion de frames micro perdues avant d'atteindre le pair.
    pub fn set_simulation_params(&mut self, latency_ms: u32, loss_rate: f32) {
        self.latency_ms = latency_ms;
        lock(&self.state).loss_rate = loss_rate.clamp(0.0, 1.0);
    }
}

#[async_trait]
impl SessionTransport for SimulatedTransport {
    async fn connect(&mut self, context: &InterviewContext) -> NetworkResult<TransportLink> {
        {
            let mut state = lock(&self.state);
            state.connect_attempts += 1;
            if let Some(reason) = state.fail_connect.take() {
                return Err(NetworkError::ConnectionFailed(reason));
            }
        }

        let (outbound, inbound) = self
            .pending
            .take()
            .ok_or_else(|| NetworkError::invalid_state("connect", "déjà connecté"))?;

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms as u64)).await;
        }

        lock(&self.state).context = Some(context.clone());
        self.is_active = true;
        info!(model = %self.config.model, "Transport simulé connecté");

        Ok(TransportLink { outbound, inbound })
    }

    async fn shutdown(&mut self) -> NetworkResult<()> {
        lock(&self.state).shutdown_calls += 1;
        if self.is_active {
            self.is_active = false;
            info!("Transport simulé arrêté");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn description(&self) -> String {
        "Service simulé".to_string()
    }
}

impl SimulatedPeer {
    /// Prochaine unité envoyée par la session, pertes simulées appliquées
    pub async fn next_outbound(&mut self) -> Option<OutboundUnit> {
        loop {
            let unit = self.outbound.recv().await?;
            if !self.is_lost(&unit) {
                return Some(unit);
            }
        }
    }

    /// Unités déjà en file, sans attendre
    pub fn drain_outbound(&mut self) -> Vec<OutboundUnit> {
        let mut units = Vec::new();
        while let Ok(unit) = self.outbound.try_recv() {
            if !self.is_lost(&unit) {
                units.push(unit);
            }
        }
        units
    }

    fn is_lost(&self, unit: &OutboundUnit) -> bool {
        let mut state = lock(&self.state);
        if unit.is_media() && state.loss_rate > 0.0 && fastrand::f32() < state.loss_rate {
            state.lost_frames += 1;
            return true;
        }
        false
    }

    /// Injecte une unité. `false` si la session ne lit plus.
    pub async fn send_unit(&self, unit: InboundUnit) -> bool {
        self.events.send(TransportEvent::Unit(unit)).await.is_ok()
    }

    /// Encode et envoie de la voix mono 24 kHz
    pub async fn send_audio(&self, samples: &[Sample]) -> bool {
        let frame = AudioFrame::new(samples.to_vec(), self.codec.sample_rate(), 1, 0);
        self.send_unit(InboundUnit::Audio(self.codec.encode(&frame))).await
    }

    pub async fn send_chunk(&self, chunk: EncodedChunk) -> bool {
        self.send_unit(InboundUnit::Audio(chunk)).await
    }

    pub async fn send_interrupted(&self) -> bool {
        self.send_unit(InboundUnit::Interrupted).await
    }

    pub async fn send_turn_complete(&self) -> bool {
        self.send_unit(InboundUnit::TurnComplete).await
    }

    /// Injecte un message JSON brut, décodé comme le ferait le transport réel
    pub async fn send_raw(&self, text: &str) -> bool {
        forward(&self.events, parse_server_message(text)).await
    }

    /// Simule une erreur de liaison
    pub async fn fail(&self, reason: &str) -> bool {
        let error = NetworkError::ConnectionFailed(reason.to_string());
        self.events.send(TransportEvent::Error(error)).await.is_ok()
    }

    /// Simule une fermeture par le service
    pub async fn close(&self, reason: &str) -> bool {
        self.events.send(TransportEvent::Closed(reason.to_string())).await.is_ok()
    }

    /// Fait échouer la prochaine tentative de connexion
    pub fn fail_next_connect(&self, reason: &str) {
        lock(&self.state).fail_connect = Some(reason.to_string());
    }

    /// Profil reçu à la connexion
    pub fn context(&self) -> Option<InterviewContext> {
        lock(&self.state).context.clone()
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.state).connect_attempts
    }

    pub fn shutdown_calls(&self) -> u32 {
        lock(&self.state).shutdown_calls
    }

    pub fn lost_frames(&self) -> u64 {
        lock(&self.state).lost_frames
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
