// Entretien simulé en direct depuis le terminal
//
// Ouvre le micro et les haut-parleurs par défaut, se connecte au service
// vocal et affiche l'enveloppe de l'intervieweur sous forme de barre.
//
// Commandes : `m` + Entrée coupe/réactive le micro, `q` + Entrée ou Ctrl+C termine.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use audio::{AudioConfig, CpalCapture, CpalPlayback};
use network::{
    utils, Difficulty, InterviewContext, LiveSession, SessionConfig, SessionHandle, SessionState,
    WebSocketTransport, DEFAULT_MODEL,
};

#[derive(Parser)]
#[command(author, version, about = "Entretien d'embauche simulé avec un intervieweur vocal")]
struct Cli {
    /// Clé d'API du service (sinon variable API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Profil prêt à l'emploi (voir --list-presets)
    #[arg(short, long)]
    preset: Option<String>,

    /// Poste visé
    #[arg(short, long)]
    role: Option<String>,

    /// Style d'entreprise
    #[arg(short, long)]
    company: Option<String>,

    #[arg(long)]
    experience: Option<String>,

    /// Thèmes abordés
    #[arg(long)]
    focus: Option<String>,

    /// Friendly, Professional ou Ruthless
    #[arg(short, long)]
    difficulty: Option<Difficulty>,

    #[arg(long)]
    language: Option<String>,

    /// Fichier texte contenant le CV
    #[arg(long)]
    resume: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value = "Fenrir")]
    voice: String,

    /// Marge de lecture réduite
    #[arg(long)]
    low_latency: bool,

    /// Affiche les profils disponibles et quitte
    #[arg(long)]
    list_presets: bool,
}

impl Cli {
    fn interview_context(&self) -> anyhow::Result<InterviewContext> {
        let mut context = match &self.preset {
            Some(name) => InterviewContext::preset(name)
                .with_context(|| format!("Profil inconnu : {} (voir --list-presets)", name))?,
            None => InterviewContext::default(),
        };

        if let Some(role) = &self.role {
            context.role = role.clone();
        }
        if let Some(company) = &self.company {
            context.company_style = company.clone();
        }
        if let Some(experience) = &self.experience {
            context.experience_level = experience.clone();
        }
        if let Some(focus) = &self.focus {
            context.focus_area = focus.clone();
        }
        if let Some(difficulty) = self.difficulty {
            context.difficulty = difficulty;
        }
        if let Some(language) = &self.language {
            context.language = language.clone();
        }
        if let Some(path) = &self.resume {
            context.resume_text = std::fs::read_to_string(path)
                .with_context(|| format!("Lecture du CV impossible : {}", path.display()))?;
        }

        Ok(context)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    if cli.list_presets {
        print_presets();
        return Ok(());
    }

    let context = cli.interview_context()?;
    let audio = if cli.low_latency { AudioConfig::low_latency() } else { AudioConfig::default() };
    let config = SessionConfig {
        model: cli.model.clone(),
        voice: cli.voice.clone(),
        api_key: cli.api_key.clone().or_else(|| std::env::var("API_KEY").ok()),
        ..Default::default()
    };

    println!("🎤 Entretien simulé");
    println!("===================");
    println!("   Poste      : {}", context.role);
    println!("   Entreprise : {}", context.company_style);
    println!("   Ton        : {}", context.difficulty);
    if let Some(key) = &config.api_key {
        println!("   Clé        : {}", utils::mask_api_key(key));
    }
    println!("\n📋 m + Entrée : micro on/off   •   q + Entrée ou Ctrl+C : terminer\n");

    let session = LiveSession::new(
        context,
        config.clone(),
        audio.clone(),
        CpalCapture::new(audio.clone())?,
        CpalPlayback::new(audio)?,
        WebSocketTransport::new(config)?,
    )?;
    let handle = session.handle();
    let mut task = tokio::spawn(session.run());

    let mut keys = spawn_keyboard();

    let started = std::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let outcome = loop {
        tokio::select! {
            result = &mut task => break result,
            _ = signal::ctrl_c() => handle.end().await,
            Some(line) = keys.recv() => on_key(&handle, line.trim()).await,
            _ = ticker.tick() => render(&handle),
        }
    };
    println!();

    match outcome.context("La tâche de session a paniqué")? {
        Ok(stats) => {
            println!("\n✅ Entretien terminé après {}", utils::format_duration(started.elapsed()));
            println!("   {}", stats.summary());
            println!(
                "   {} buffers joués, {:.1}s de voix",
                stats.playback.buffers_scheduled, stats.playback.scheduled_seconds
            );
            Ok(())
        }
        Err(e) => bail!("❌ Session interrompue : {}", e),
    }
}

/// Lit le clavier sur un thread dédié (lecture bloquante)
fn spawn_keyboard() -> mpsc::UnboundedReceiver<String> {
    let (sender, receiver) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

async fn on_key(handle: &SessionHandle, key: &str) {
    match key {
        "m" | "M" => {
            if let Err(e) = handle.toggle_mute().await {
                println!("\n⚠️  {}", e);
            }
        }
        "q" | "Q" => handle.end().await,
        "" => {}
        other => println!("\n❓ Commande inconnue : {}", other),
    }
}

fn render(handle: &SessionHandle) {
    let state = handle.state();
    let envelope = *handle.envelope().borrow();
    let level = *handle.input_level().borrow();

    let mouth = bar(envelope.openness, 20);
    let voice = if envelope.is_speaking { "🗣️ " } else { "  " };
    let mic = if handle.is_muted() {
        "🔇 coupé    ".to_string()
    } else {
        bar((level.rms * 4.0).min(1.0), 10)
    };

    let status = match state {
        SessionState::Connecting => "⏳",
        SessionState::Connected => "🟢",
        SessionState::Error => "🔴",
    };

    print!("\r{} {:<24} 👄 [{}] {} 🎤 [{}]", status, state.description(), mouth, voice, mic);
    let _ = io::stdout().flush();
}

fn bar(value: f32, width: usize) -> String {
    let filled = (value.clamp(0.0, 1.0) * width as f32).round() as usize;
    format!("{}{}", "█".repeat(filled), "·".repeat(width - filled))
}

fn print_presets() {
    println!("📋 Profils disponibles :");
    for name in InterviewContext::preset_names() {
        if let Some(context) = InterviewContext::preset(name) {
            println!(
                "   {:<16} {} @ {} ({}) - {}",
                name, context.role, context.company_style, context.difficulty, context.focus_area
            );
        }
    }
}
