//! Crate network - Liaison temps réel avec le service d'entretien vocal
//!
//! Ce crate relie la chaîne audio locale au service distant qui joue
//! l'intervieweur : la voix du candidat part en continu, celle de
//! l'intervieweur revient par fragments et peut être coupée à tout moment.
//!
//! # Architecture
//!
//! - `error` : Erreurs de liaison (fatales) et de données (ignorées)
//! - `types` : Profil d'entretien, états, configuration, statistiques
//! - `protocol` : Traduction entre unités de session et messages JSON du service
//! - `traits` : Trait de transport
//! - `transport` : Transports WebSocket (réel) et simulé
//! - `session` : Boucle de session et poignée de contrôle
//!
//! # Examples
//!
//! ## Session réelle
//!
//! ```rust,no_run
//! use audio::{AudioConfig, CpalCapture, CpalPlayback};
//! use network::{InterviewContext, LiveSession, SessionConfig, WebSocketTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let audio = AudioConfig::default();
//! let config = SessionConfig::default().with_api_key("...");
//! let context = InterviewContext::preset("faang-frontend").unwrap_or_default();
//!
//! let session = LiveSession::new(
//!     context,
//!     config.clone(),
//!     audio.clone(),
//!     CpalCapture::new(audio.clone())?,
//!     CpalPlayback::new(audio)?,
//!     WebSocketTransport::new(config)?,
//! )?;
//! let handle = session.handle();
//! let task = tokio::spawn(session.run());
//!
//! // Plus tard : couper le micro, puis terminer
//! handle.toggle_mute().await?;
//! handle.end().await;
//! let _stats = task.await??;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tests et simulation
//!
//! ```rust
//! use network::{InterviewContext, SessionConfig, SessionTransport, SimulatedTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut transport, peer) = SimulatedTransport::new(SessionConfig::test_config());
//! let _link = transport.connect(&InterviewContext::default()).await?;
//!
//! // Le pair joue le service : il lit ce que la session envoie
//! // et injecte audio, interruptions ou erreurs.
//! peer.send_interrupted().await;
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod types;
mod protocol;
mod traits;
mod transport;
mod session;

// Re-exports publics
pub use error::{NetworkError, NetworkResult};

pub use types::{
    Difficulty, InterviewContext, SessionConfig, SessionState, SessionStats,
    DEFAULT_ENDPOINT, DEFAULT_MODEL, READY_TEXT,
};

pub use protocol::{parse_server_frame, parse_server_message, setup_message, InboundUnit, OutboundUnit};

pub use traits::{SessionTransport, TransportEvent, TransportLink};

pub use transport::{SimulatedPeer, SimulatedTransport, WebSocketTransport};

pub use session::{LiveSession, SessionCommand, SessionHandle};

// Re-exports depuis le crate audio (pour simplicité d'utilisation)
pub use audio::{EncodedChunk, EnvelopeSample, InputLevel};

/// Version du crate network
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fonctions utilitaires pour l'utilisateur final
pub mod utils {
    /// Masque une clé d'API pour les logs
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    ///
    /// assert_eq!(utils::mask_api_key("AIzaSyA1234567890"), "AIza…7890");
    /// assert_eq!(utils::mask_api_key("court"), "…");
    /// ```
    pub fn mask_api_key(key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        if chars.len() < 12 {
            return "…".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    }

    /// Formate une durée de façon lisible
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    /// use std::time::Duration;
    ///
    /// assert_eq!(utils::format_duration(Duration::from_millis(1234)), "1.23s");
    /// assert_eq!(utils::format_duration(Duration::from_millis(56)), "56ms");
    /// ```
    pub fn format_duration(duration: std::time::Duration) -> String {
        let ms = duration.as_millis();

        if ms >= 1000 {
            format!("{:.2}s", ms as f64 / 1000.0)
        } else {
            format!("{}ms", ms)
        }
    }
}
