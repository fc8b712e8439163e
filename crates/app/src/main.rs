// Diagnostic de la chaîne audio de l'entretien simulé
//
// Cette application vérifie chaque étage sans le service distant :
// - Configuration et périphériques
// - Codec PCM16/base64
// - Ordonnancement de la lecture
// - Lecture d'une tonalité et niveau micro (optionnels, matériel requis)

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use audio::{
    utils, AudioCapture, AudioCodec, AudioConfig, CpalCapture, CpalPlayback, EnvelopeConfig,
    OutputPipeline, PcmCodec, PlaybackScheduler,
};

#[derive(Parser)]
#[command(author, version, about = "Diagnostic audio de l'entretien simulé")]
struct Cli {
    /// Joue une tonalité de 440 Hz par la vraie chaîne de sortie
    #[arg(long)]
    tone: bool,

    /// Mesure le niveau du micro pendant N secondes
    #[arg(long, value_name = "SECONDES")]
    mic: Option<u64>,

    /// Utilise la configuration basse latence
    #[arg(long)]
    low_latency: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = if cli.low_latency { AudioConfig::low_latency() } else { AudioConfig::default() };

    println!("🎤 Diagnostic audio");
    println!("===================");

    println!("\n1️⃣  Configuration...");
    check_config(&config)?;

    println!("\n2️⃣  Périphériques audio...");
    check_devices();

    println!("\n3️⃣  Codec PCM16/base64...");
    check_codec(&config)?;

    println!("\n4️⃣  Ordonnancement de la lecture...");
    scheduler_demo(&config);

    if cli.tone {
        println!("\n5️⃣  Tonalité de test...");
        play_tone(&config).await?;
    }

    if let Some(seconds) = cli.mic {
        println!("\n6️⃣  Niveau micro pendant {}s...", seconds);
        measure_mic(&config, seconds).await?;
    }

    println!("\n👋 Diagnostic terminé");
    Ok(())
}

fn check_config(config: &AudioConfig) -> anyhow::Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;

    println!("   ✅ Capture : {} Hz, frames de {} échantillons ({}ms)",
        config.capture_sample_rate,
        config.capture_frame_size,
        config.capture_frame_duration().as_millis()
    );
    println!("   ✅ Lecture : {} Hz, marge {}ms, gain {}",
        config.playback_sample_rate, config.lookahead_ms, config.output_gain
    );
    println!("   ✅ Analyseur : FFT {} ({} bins), {} ticks/s",
        config.analyser_fft_size,
        config.analyser_bin_count(),
        config.envelope_tick_hz
    );
    Ok(())
}

fn check_devices() {
    let (inputs, outputs) = utils::list_devices();

    if inputs.is_empty() {
        println!("   ⚠️  Aucun micro détecté");
    }
    for name in &inputs {
        println!("   🎙️  {}", name);
    }

    if outputs.is_empty() {
        println!("   ⚠️  Aucune sortie détectée");
    }
    for name in &outputs {
        println!("   🔊 {}", name);
    }
}

fn check_codec(config: &AudioConfig) -> anyhow::Result<()> {
    let codec = PcmCodec::for_capture(config);
    let seconds = config.capture_frame_size as f64 / config.capture_sample_rate as f64;
    let frame = utils::sine_frame(440.0, 0.8, seconds, config.capture_sample_rate);

    let chunk = codec.encode(&frame);
    let bytes = codec.decode(&chunk)?;
    let decoded = codec.decode_audio_samples(&bytes, config.capture_sample_rate, 1)?;

    let max_error = frame
        .samples
        .iter()
        .zip(decoded.samples.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);

    println!("   ✅ {} échantillons → {} octets → {} caractères base64",
        frame.samples.len(), bytes.len(), chunk.data.len()
    );
    println!("   ✅ Type MIME : {}", chunk.mime_type);
    println!("   ✅ Erreur max après aller-retour : {:.6} (pas de quantification {:.6})",
        max_error, 1.0 / 32768.0
    );
    Ok(())
}

fn scheduler_demo(config: &AudioConfig) {
    let mut scheduler = PlaybackScheduler::from_config(config);

    // Fragments arrivant avec du jitter : (durée, instant d'arrivée)
    for (duration, arrival) in [(0.5, 0.0), (0.3, 0.6), (0.7, 0.65)] {
        let slot = scheduler.schedule(duration, arrival);
        println!("   📦 arrivé à {:.2}s, durée {:.2}s → démarre à {:.2}s, finit à {:.2}s",
            arrival, duration, slot.start_time, slot.end_time()
        );
    }

    let stopped = scheduler.interrupt();
    println!("   ✋ Interruption : {} buffers arrêtés, curseur {:.2}s",
        stopped.len(), scheduler.next_start_time()
    );

    let slot = scheduler.schedule(0.2, 0.3);
    println!("   📦 reprise à 0.30s → démarre à {:.2}s", slot.start_time);
}

async fn play_tone(config: &AudioConfig) -> anyhow::Result<()> {
    let sink = CpalPlayback::new(config.clone()).context("Ouverture de la sortie audio")?;
    let cancel = CancellationToken::new();
    let mut output = OutputPipeline::new(sink, config.clone(), EnvelopeConfig::default())?;
    output.start(&cancel).await?;

    let envelope = output.envelope();
    for _ in 0..3 {
        let frame = utils::sine_frame(440.0, 0.3, 0.4, config.playback_sample_rate);
        let slot = output.enqueue(frame)?;
        info!(id = slot.id, start = slot.start_time, "Tonalité planifiée");
    }

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let sample = *envelope.borrow();
        println!("   👄 ouverture {:.2} (énergie {:.0})", sample.openness, sample.average);
    }

    output.teardown().await?;
    cancel.cancel();

    let stats = output.stats();
    println!("   ✅ {} buffers joués ({:.1}s)", stats.buffers_scheduled, stats.scheduled_seconds);
    Ok(())
}

async fn measure_mic(config: &AudioConfig, seconds: u64) -> anyhow::Result<()> {
    let mut capture = CpalCapture::new(config.clone()).context("Ouverture du micro")?;
    println!("   🎙️  {}", capture.device_info());
    capture.start().await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0u64;
    let mut peak = 0.0f32;

    while let Ok(frame) = tokio::time::timeout_at(deadline, capture.next_frame()).await {
        let frame = frame?;
        frames += 1;
        peak = peak.max(frame.peak_level());
        if frames % 8 == 0 {
            println!("   📊 frame {} : RMS {:.3}, crête {:.3}", frame.sequence_number, frame.rms_level(), frame.peak_level());
        }
    }

    capture.stop().await?;
    println!("   ✅ {} frames reçues, crête max {:.3}", frames, peak);
    if capture.dropped_frames() > 0 {
        println!("   ⚠️  {} frames perdues (file pleine)", capture.dropped_frames());
    }
    Ok(())
}
