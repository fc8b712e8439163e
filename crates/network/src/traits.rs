//! Traits abstraits pour la liaison avec le service
//!
//! La session ne parle qu'à un [`SessionTransport`], ce qui permet de la
//! tester de bout en bout avec un transport simulé.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{InboundUnit, InterviewContext, NetworkError, NetworkResult, OutboundUnit};

/// Événement remonté par le transport vers la session
#[derive(Debug)]
pub enum TransportEvent {
    /// Unité décodée, à traiter dans l'ordre
    Unit(InboundUnit),

    /// Message illisible : ignoré par la session, qui continue
    Malformed(String),

    /// Erreur de liaison : la session passe en état `Error`
    Error(NetworkError),

    /// Le service a fermé la connexion
    Closed(String),
}

/// Canaux d'une liaison ouverte
///
/// Fermer (drop) `outbound` demande au transport de fermer la connexion.
pub struct TransportLink {
    pub outbound: mpsc::Sender<OutboundUnit>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Transport vers le service vocal
///
/// - WebSocketTransport : connexion réelle au service
/// - SimulatedTransport : service simulé piloté par les tests
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Ouvre la liaison et envoie la configuration de l'entretien
    ///
    /// Retourne une fois la configuration acceptée par le service.
    ///
    /// # Erreurs
    /// - `NetworkError::MissingApiKey` : aucune clé configurée
    /// - `NetworkError::ConnectionFailed` / `NetworkError::WebSocket` : ouverture impossible
    /// - `NetworkError::SetupTimeout` : configuration non confirmée à temps
    async fn connect(&mut self, context: &InterviewContext) -> NetworkResult<TransportLink>;

    /// Ferme la liaison et attend la fin des tâches internes. Idempotent.
    async fn shutdown(&mut self) -> NetworkResult<()>;

    fn is_active(&self) -> bool;

    /// Description pour les logs
    fn description(&self) -> String {
        "Transport inconnu".to_string()
    }
}
