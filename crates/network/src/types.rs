//! Types de données pour la session d'entretien
//!
//! Ce module définit les structures principales de la session :
//! - InterviewContext : le profil d'entretien choisi avant la session
//! - SessionState : états de la liaison avec le service
//! - SessionConfig : configuration de la connexion
//! - SessionStats : statistiques de session

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use audio::PlaybackStats;
use crate::{NetworkError, NetworkResult};

/// Ton de l'intervieweur
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Friendly,
    #[default]
    Professional,
    Ruthless,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Friendly => "Friendly",
            Difficulty::Professional => "Professional",
            Difficulty::Ruthless => "Ruthless",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "friendly" => Ok(Difficulty::Friendly),
            "professional" => Ok(Difficulty::Professional),
            "ruthless" => Ok(Difficulty::Ruthless),
            other => Err(NetworkError::ConfigError(format!(
                "Difficulté inconnue: {} (Friendly, Professional ou Ruthless)", other
            ))),
        }
    }
}

/// Profil d'entretien, fixé avant la session et jamais modifié ensuite
///
/// Seuls le poste et le style d'entreprise sont indispensables à
/// l'instruction envoyée au service ; les autres champs la complètent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewContext {
    pub role: String,
    pub experience_level: String,
    pub resume_text: String,
    pub focus_area: String,
    pub difficulty: Difficulty,
    pub company_style: String,
    pub language: String,
}

impl Default for InterviewContext {
    fn default() -> Self {
        Self {
            role: "Senior Frontend Engineer".to_string(),
            experience_level: "Senior".to_string(),
            resume_text: String::new(),
            focus_area: "System Design & Behavioral".to_string(),
            difficulty: Difficulty::Professional,
            company_style: "Big Tech (FAANG)".to_string(),
            language: "English".to_string(),
        }
    }
}

/// Profils prêts à l'emploi : (nom, poste, entreprise, thèmes, difficulté)
const PRESETS: [(&str, &str, &str, &str, Difficulty); 4] = [
    ("faang-frontend", "Senior Frontend Engineer", "Big Tech (FAANG)", "System Design, React Internals, Performance", Difficulty::Professional),
    ("startup-pm", "Product Manager", "Series B Startup", "Product Sense, Prioritization, Metrics", Difficulty::Ruthless),
    ("hft-cpp", "Low Latency Engineer", "High Frequency Trading Firm", "Memory Management, Concurrency, Algorithms", Difficulty::Ruthless),
    ("enterprise-java", "Staff Software Engineer", "Fortune 500 Enterprise", "Microservices, Scalability, Leadership", Difficulty::Friendly),
];

impl InterviewContext {
    pub fn new(role: impl Into<String>, company_style: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            company_style: company_style.into(),
            ..Default::default()
        }
    }

    /// Noms des profils prêts à l'emploi
    pub fn preset_names() -> Vec<&'static str> {
        PRESETS.iter().map(|p| p.0).collect()
    }

    /// Profil prêt à l'emploi, `None` si le nom est inconnu
    ///
    /// # Example
    /// ```rust
    /// use network::{Difficulty, InterviewContext};
    ///
    /// let context = InterviewContext::preset("startup-pm").unwrap();
    /// assert_eq!(context.role, "Product Manager");
    /// assert_eq!(context.difficulty, Difficulty::Ruthless);
    /// ```
    pub fn preset(name: &str) -> Option<Self> {
        PRESETS
            .iter()
            .find(|p| p.0 == name)
            .map(|&(_, role, company, focus, difficulty)| Self {
                role: role.to_string(),
                company_style: company.to_string(),
                focus_area: focus.to_string(),
                difficulty,
                ..Default::default()
            })
    }

    /// Instruction système envoyée au service à l'ouverture
    pub fn system_instruction(&self) -> String {
        let mut instruction = String::from(
            "You are Marcus, a hiring manager.\n\
             The candidate is ready.\n\
             \n\
             IMMEDIATE ACTION:\n\
             1. Speak immediately. Do not wait.\n\
             2. Say \"Hello, I'm Marcus. Let's start the interview.\" and ask the first question.\n\
             3. Keep it short.\n\
             \n",
        );
        instruction.push_str(&format!("Context: {} at {}.\n", self.role, self.company_style));

        let extras = [
            ("Candidate experience level", self.experience_level.as_str()),
            ("Focus area", self.focus_area.as_str()),
            ("Interviewer tone", self.difficulty.as_str()),
            ("Conduct the interview in", self.language.as_str()),
        ];
        for (label, value) in extras {
            if !value.trim().is_empty() {
                instruction.push_str(&format!("{}: {}.\n", label, value.trim()));
            }
        }

        if !self.resume_text.trim().is_empty() {
            instruction.push_str("Candidate resume:\n");
            instruction.push_str(self.resume_text.trim());
            instruction.push('\n');
        }
        instruction
    }
}

/// État de la liaison avec le service
///
/// Les transitions sont à sens unique : `Connecting` → `Connected` → `Error`,
/// ou directement `Connecting` → `Error`. `Error` est terminal.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Connecting,
    Connected,
    Error,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error)
    }

    /// Vérifie qu'une transition respecte le sens unique
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Connecting, SessionState::Connected)
                | (SessionState::Connecting, SessionState::Error)
                | (SessionState::Connected, SessionState::Error)
        )
    }

    /// Description textuelle de l'état pour l'UI
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connexion au service...",
            SessionState::Connected => "Liaison vocale active",
            SessionState::Error => "Session interrompue",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point d'accès du service temps réel
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Modèle vocal natif utilisé par défaut
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Message qui déclenche la prise de parole de l'intervieweur
pub const READY_TEXT: &str = "I am ready. Start the interview.";

/// Configuration de la session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// URL WebSocket du service
    pub endpoint: String,

    pub model: String,

    /// Voix préenregistrée du service (défaut: Fenrir)
    pub voice: String,

    pub api_key: Option<String>,

    /// Délai max pour la confirmation de configuration (défaut: 15s)
    pub setup_timeout: Duration,

    /// Taille de la file d'envoi en messages (défaut: 256)
    pub outbound_queue_size: usize,

    /// Taille de la file de réception en événements (défaut: 256)
    pub inbound_queue_size: usize,

    pub ready_text: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: "Fenrir".to_string(),
            api_key: None,
            setup_timeout: Duration::from_secs(15),
            outbound_queue_size: 256, // ~30s de micro
            inbound_queue_size: 256,
            ready_text: READY_TEXT.to_string(),
        }
    }
}

impl SessionConfig {
    /// Configuration pour tests (files courtes, délais accélérés)
    pub fn test_config() -> Self {
        Self {
            api_key: Some("test-key".to_string()),
            setup_timeout: Duration::from_millis(500),
            outbound_queue_size: 16,
            inbound_queue_size: 16,
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// URL de connexion complète
    ///
    /// # Erreurs
    /// - `NetworkError::MissingApiKey` si aucune clé n'est configurée
    pub fn url(&self) -> NetworkResult<String> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(format!("{}?key={}", self.endpoint, key)),
            _ => Err(NetworkError::MissingApiKey),
        }
    }

    /// Identifiant du modèle au format attendu par le service
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// Vérifie que la configuration est valide
    pub fn validate(&self) -> Result<(), String> {
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(format!("Endpoint invalide: {} (ws:// ou wss:// attendu)", self.endpoint));
        }
        if self.model.trim().is_empty() {
            return Err("Modèle non renseigné".to_string());
        }
        if self.voice.trim().is_empty() {
            return Err("Voix non renseignée".to_string());
        }
        if self.setup_timeout.is_zero() {
            return Err("Timeout de configuration nul".to_string());
        }
        if self.outbound_queue_size == 0 || self.inbound_queue_size == 0 {
            return Err("Les files d'échange doivent contenir au moins un message".to_string());
        }
        Ok(())
    }
}

/// Statistiques de session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Frames micro envoyées au service
    pub frames_sent: u64,

    /// Frames micro perdues (file d'envoi pleine)
    pub frames_dropped: u64,

    /// Fragments audio reçus du service
    pub audio_messages: u64,

    /// Messages ou fragments invalides ignorés
    pub malformed_payloads: u64,

    pub interruptions: u64,

    pub turns_completed: u64,

    /// Statistiques de lecture à la fin de la session
    pub playback: PlaybackStats,
}

impl SessionStats {
    /// Résumé textuel pour les logs
    pub fn summary(&self) -> String {
        format!(
            "{} frames envoyées ({} perdues), {} fragments reçus, {} interruptions, {} invalides",
            self.frames_sent,
            self.frames_dropped,
            self.audio_messages,
            self.interruptions,
            self.malformed_payloads
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_parsing() {
        assert_eq!("ruthless".parse::<Difficulty>().unwrap(), Difficulty::Ruthless);
        assert_eq!(" Friendly ".parse::<Difficulty>().unwrap(), Difficulty::Friendly);
        assert!("cruel".parse::<Difficulty>().is_err());
        assert_eq!(Difficulty::default().to_string(), "Professional");
    }

    #[test]
    fn test_context_serde_field_names() {
        let context = InterviewContext::default();
        let json = serde_json::to_value(&context).unwrap();

        assert_eq!(json["companyStyle"], "Big Tech (FAANG)");
        assert_eq!(json["difficulty"], "Professional");
        assert!(json.get("resumeText").is_some());
    }

    #[test]
    fn test_system_instruction_context() {
        let mut context = InterviewContext::new("Product Manager", "Series B Startup");
        context.resume_text = "Ten years shipping B2B products.".to_string();
        context.focus_area = String::new();

        let instruction = context.system_instruction();
        assert!(instruction.starts_with("You are Marcus, a hiring manager."));
        assert!(instruction.contains("Context: Product Manager at Series B Startup."));
        assert!(instruction.contains("Interviewer tone: Professional."));
        assert!(instruction.contains("Ten years shipping B2B products."));
        assert!(!instruction.contains("Focus area"));
    }

    #[test]
    fn test_presets() {
        assert_eq!(InterviewContext::preset_names().len(), 4);

        let hft = InterviewContext::preset("hft-cpp").unwrap();
        assert_eq!(hft.company_style, "High Frequency Trading Firm");
        assert_eq!(hft.language, "English");

        assert!(InterviewContext::preset("inconnu").is_none());
    }

    #[test]
    fn test_state_is_one_directional() {
        use SessionState::*;

        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Error));
        assert!(Connected.can_transition_to(Error));

        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connecting));
        assert!(Error.is_terminal());
        assert_eq!(Connected.to_string(), "connected");
    }

    #[test]
    fn test_session_config_url() {
        let config = SessionConfig::default();
        assert!(matches!(config.url(), Err(NetworkError::MissingApiKey)));

        let blank = SessionConfig::default().with_api_key("   ");
        assert!(matches!(blank.url(), Err(NetworkError::MissingApiKey)));

        let config = SessionConfig::default().with_api_key("abc");
        let url = config.url().unwrap();
        assert!(url.starts_with("wss://"));
        assert!(url.ends_with("?key=abc"));
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());
        assert!(SessionConfig::test_config().validate().is_ok());

        let bad = SessionConfig {
            endpoint: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let config = SessionConfig::default();
        assert_eq!(config.model_path(), format!("models/{}", DEFAULT_MODEL));
        assert_eq!(config.voice, "Fenrir");
    }
}
