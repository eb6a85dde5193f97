#![deny(warnings)]

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::sync::Arc;
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;
use video_coach_core::audio::VoiceActivityDetector;
use video_coach_core::capture::{FrameSource, SyntheticFrameSource};
use video_coach_core::config::{
    resolve_optional_string, resolve_string_with_default, AppConfig, BackendUrl, Env,
    FrameCadence, FrameInput, SessionId, SessionIntent, StdEnv, VadTuning, DEFAULT_BACKEND_URL,
    DEFAULT_FRAME_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SPEECH_LANG, ENV_BACKEND_URL,
    ENV_SPEECH_LANG, ENV_WHISPER_MODEL, FRAME_HEIGHT, FRAME_WIDTH,
};
use video_coach_core::meet::MeetClient;
use video_coach_core::playback::AudioPlaybackSink;
use video_coach_core::session::{MeetingRuntime, SessionOptions};
use video_coach_core::speech::{
    SpeechConfig, SpeechEngine, SpeechErrorCallback, SpeechToText, TranscriptCallback,
};
use video_coach_core::stream::{MeetStream, ReconnectPolicy};
use video_coach_core::tts::BasicTtsClient;
use video_coach_core::voice::CoachVoice;

#[derive(Parser, Debug)]
#[command(name = "video-coach")]
#[command(about = "Real-time video coaching client (camera -> backend analysis -> feedback)")]
#[command(group(
    ArgGroup::new("meeting")
        .required(true)
        .multiple(false)
        .args(["create", "session"])
))]
struct Args {
    /// Create a new meeting on the backend
    #[arg(long)]
    create: bool,

    /// Join an existing meeting by session id
    #[arg(long)]
    session: Option<String>,

    #[arg(long, env = ENV_BACKEND_URL, default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Camera device index
    #[arg(long, default_value_t = 0)]
    camera: i32,

    /// Stream a synthetic test pattern instead of the camera
    #[arg(long)]
    synthetic: bool,

    #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL_MS)]
    frame_interval_ms: u64,

    /// Do not speak coaching feedback aloud
    #[arg(long)]
    mute: bool,

    /// Enable microphone voice-activity detection and speech-to-text
    #[arg(long)]
    listen: bool,

    #[arg(long, env = ENV_SPEECH_LANG, default_value = DEFAULT_SPEECH_LANG)]
    language: String,

    /// Path to a Whisper model for local speech-to-text
    #[arg(long, env = ENV_WHISPER_MODEL)]
    whisper_model: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        backend = %cfg.backend.as_url(),
        fps = cfg.cadence.frames_per_second(),
        "config loaded"
    );

    run_session(cfg).await
}

async fn run_session(cfg: AppConfig) -> anyhow::Result<()> {
    let meet = MeetClient::new(cfg.backend.clone())?;

    let (session_id, ws_url) = match &cfg.session {
        SessionIntent::Create => {
            let created = meet
                .create_meeting()
                .await
                .context("failed to create meeting")?;
            tracing::info!(
                meeting_link = %created.meeting_link,
                ws_endpoint = %created.ws_endpoint,
                "share this meeting link"
            );
            let session_id = SessionId::new(created.session_id)?;
            let ws_url = cfg.backend.ws_meet_url(&session_id)?;
            (session_id, ws_url)
        }
        SessionIntent::Join(session_id) => {
            let meta = meet
                .get_meeting(session_id)
                .await
                .with_context(|| format!("meeting {session_id} not found or expired"))?;
            tracing::info!(active = meta.active, "meeting verified");
            (session_id.clone(), cfg.backend.ws_meet_url(session_id)?)
        }
    };

    let frames = build_frame_source(&cfg)?;
    let (stream, events) = MeetStream::new(
        ws_url,
        ReconnectPolicy {
            delay: cfg.reconnect_delay(),
        },
    );
    let playback = AudioPlaybackSink::new()?;
    let voice = Arc::new(CoachVoice::new(
        Arc::new(BasicTtsClient::new()),
        Arc::new(playback),
        cfg.voice_enabled,
    ));

    let mut runtime = MeetingRuntime::new(
        SessionOptions {
            cadence: cfg.cadence,
        },
        stream,
        events,
        frames,
        voice,
    );

    if cfg.listen_enabled {
        let (vad_tx, vad_rx) = tokio::sync::mpsc::channel(16);
        let vad = VoiceActivityDetector::new(cfg.vad, vad_tx);
        let speech = build_speech(cfg.whisper_model.as_deref());
        let speech_config = SpeechConfig {
            language: cfg.speech_language.clone(),
            continuous: true,
            interim_results: true,
        };
        runtime = runtime.with_vad(vad, vad_rx).with_speech(speech, speech_config);
    }

    runtime.start().await.context("failed to start session")?;
    tracing::info!(session = %session_id, "session running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    runtime.stop().await;

    let view = runtime.snapshot();
    tracing::info!(
        frames_sent = view.frames_sent,
        analyses_received = view.analyses_received,
        feedback_items = view.feedback.len(),
        "session summary"
    );
    Ok(())
}

fn build_frame_source(cfg: &AppConfig) -> anyhow::Result<Box<dyn FrameSource>> {
    match cfg.input {
        FrameInput::Synthetic => Ok(Box::new(SyntheticFrameSource::new(
            FRAME_WIDTH,
            FRAME_HEIGHT,
        ))),
        #[cfg(feature = "camera")]
        FrameInput::Camera(index) => {
            let camera = video_coach_core::capture::CameraFrameSource::open(index)
                .context("camera unavailable")?;
            Ok(Box::new(camera))
        }
        #[cfg(not(feature = "camera"))]
        FrameInput::Camera(_) => {
            anyhow::bail!("built without camera support; run with --synthetic")
        }
    }
}

fn build_speech(whisper_model: Option<&str>) -> SpeechToText {
    let on_transcript: TranscriptCallback = Arc::new(|text, is_final| {
        if is_final {
            tracing::info!(transcript = %text, "transcript");
        } else {
            tracing::debug!(transcript = %text, "interim transcript");
        }
    });
    let on_error: SpeechErrorCallback =
        Arc::new(|message| tracing::warn!(message = %message, "speech recognition degraded"));

    SpeechToText::new(build_speech_engine(whisper_model), on_transcript, on_error)
}

#[cfg(feature = "whisper-rs")]
fn build_speech_engine(whisper_model: Option<&str>) -> Option<Arc<dyn SpeechEngine>> {
    match whisper_model {
        Some(path) => match video_coach_core::speech::WhisperSpeechEngine::new(path) {
            Ok(engine) => Some(Arc::new(engine)),
            Err(e) => {
                tracing::warn!(error = %e, "whisper engine unavailable");
                None
            }
        },
        None => {
            tracing::warn!("no whisper model configured; speech-to-text disabled");
            None
        }
    }
}

#[cfg(not(feature = "whisper-rs"))]
fn build_speech_engine(_whisper_model: Option<&str>) -> Option<Arc<dyn SpeechEngine>> {
    None
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let session = match (args.create, args.session) {
        (true, None) => SessionIntent::Create,
        (false, Some(s)) => SessionIntent::Join(SessionId::new(s)?),
        _ => anyhow::bail!("exactly one of --create or --session must be provided"),
    };

    let backend = BackendUrl::new(&resolve_string_with_default(
        Some(args.backend_url),
        ENV_BACKEND_URL,
        env,
        DEFAULT_BACKEND_URL,
    ))?;
    let cadence = FrameCadence::new(args.frame_interval_ms)?;
    let input = if args.synthetic {
        FrameInput::Synthetic
    } else {
        FrameInput::Camera(args.camera)
    };

    let speech_language = resolve_string_with_default(
        Some(args.language),
        ENV_SPEECH_LANG,
        env,
        DEFAULT_SPEECH_LANG,
    );
    let whisper_model = resolve_optional_string(args.whisper_model, ENV_WHISPER_MODEL, env);

    Ok(AppConfig {
        backend,
        session,
        input,
        cadence,
        vad: VadTuning::default(),
        speech_language,
        voice_enabled: !args.mute,
        listen_enabled: args.listen,
        whisper_model,
        reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        start_time: SystemTime::now(),
    })
}
