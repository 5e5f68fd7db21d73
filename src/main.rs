use anyhow::{Context, Result};
use chat_narrator::backends::{find_config_for, load_model};
use chat_narrator::chat::{ChatSource, RoomFilter, TcpChatSource, ThreadedLineSource};
use chat_narrator::config_loader::{Settings, SourceKind};
use chat_narrator::engine::SynthesisEngine;
use chat_narrator::orchestrator::VoiceSelection;
use chat_narrator::pipeline::Pipeline;
use chat_narrator::playback::{AudioSink, NullSink, RodioSink};
use chat_narrator::text::CleanerRegistry;
use chat_narrator::voice_config::VoiceConfig;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Reads live chat aloud with a neural voice
#[derive(Parser, Debug)]
#[command(name = "chat-narrator")]
#[command(version)]
#[command(about = "Reads live chat aloud with a neural voice, one message at a time", long_about = None)]
struct Cli {
    /// Voice model weights
    #[arg(short, long)]
    model_path: Option<PathBuf>,

    /// Voice config JSON (default: <model>.json or config.json next to the model)
    #[arg(short, long)]
    config_path: Option<PathBuf>,

    /// Only narrate chat tagged with this room
    #[arg(short, long)]
    room: Option<String>,

    /// Speaker name from the voice config
    #[arg(short, long)]
    speaker: Option<String>,

    /// Language tag, e.g. 简体中文, 日本語, English, Japanese, Mix
    #[arg(short, long)]
    language: Option<String>,

    /// Sampling noise (default 0.667)
    #[arg(long)]
    noise_scale: Option<f32>,

    /// Duration predictor noise (default 0.6)
    #[arg(long)]
    noise_scale_w: Option<f32>,

    /// Overall speech rate; 2.0 is twice as fast (default 1.0)
    #[arg(long)]
    length_scale: Option<f32>,

    /// Where chat comes from
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Listen address for --source tcp
    #[arg(long)]
    listen: Option<String>,

    /// Extra settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Synthesize but do not play
    #[arg(long)]
    no_audio: bool,

    /// Print the voice's speakers and exit
    #[arg(long)]
    list_speakers: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.model_path {
            settings.model_path = Some(path.clone());
        }
        if let Some(path) = &self.config_path {
            settings.config_path = Some(path.clone());
        }
        if let Some(room) = &self.room {
            settings.room = Some(room.clone());
        }
        if let Some(speaker) = &self.speaker {
            settings.speaker = Some(speaker.clone());
        }
        if let Some(language) = &self.language {
            settings.language = language.clone();
        }
        settings.noise_scale = self.noise_scale.or(settings.noise_scale);
        settings.noise_scale_w = self.noise_scale_w.or(settings.noise_scale_w);
        settings.length_scale = self.length_scale.or(settings.length_scale);
        if let Some(source) = self.source {
            settings.source = source;
        }
        if let Some(listen) = &self.listen {
            settings.listen_addr = listen.clone();
        }
        if self.no_audio {
            settings.enable_audio = false;
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.settings.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;
    info!(?settings, "starting chat-narrator");

    let model_path = settings
        .model_path
        .clone()
        .context("no voice model given (use --model-path or model_path)")?;
    let config_path = match settings.config_path.clone() {
        Some(path) => path,
        None => find_config_for(&model_path).with_context(|| {
            format!("no voice config found next to {}", model_path.display())
        })?,
    };
    let voice_config = Arc::new(VoiceConfig::load(&config_path)?);

    if cli.list_speakers {
        for (name, id) in voice_config.speakers().iter() {
            println!("{}\t{}", id, name);
        }
        return Ok(());
    }

    let speaker = match settings.speaker.clone() {
        Some(speaker) => speaker,
        None if voice_config.speakers().len() == 1 => voice_config
            .speakers()
            .iter()
            .map(|(name, _)| name.to_string())
            .next()
            .context("voice config has no speakers")?,
        None => anyhow::bail!("the voice has several speakers, pick one with --speaker"),
    };
    // Fail before loading the model rather than on the first chat message.
    voice_config.speaker_id(&speaker)?;
    voice_config.language_marks().marker(&settings.language)?;

    let model = load_model(&model_path)?;
    let engine = Arc::new(SynthesisEngine::new(
        model,
        voice_config.clone(),
        &CleanerRegistry::new(),
    )?);

    let voice = VoiceSelection {
        language: settings.language.clone(),
        speaker,
        params: settings.params_over(voice_config.default_params()),
        template: settings.utterance_template.clone(),
    };

    let sink: Arc<dyn AudioSink> = if settings.enable_audio {
        Arc::new(RodioSink::open(settings.playback_volume)?)
    } else {
        Arc::new(NullSink)
    };

    let filter = RoomFilter::new(settings.room.clone());
    let source: Box<dyn ChatSource> = match settings.source {
        SourceKind::Stdin => Box::new(ThreadedLineSource::stdin(filter)),
        SourceKind::Tcp => Box::new(TcpChatSource::bind(&settings.listen_addr, filter).await?),
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let report = Pipeline::new(engine, voice, sink).run(source, shutdown).await?;
    info!(
        handled = report.orchestrator.handled,
        dropped = report.orchestrator.dropped,
        played = report.played,
        "chat-narrator stopped"
    );
    Ok(())
}
