use thiserror::Error;

/// All errors produced by wavefeed-core.
#[derive(Debug, Error)]
pub enum WavefeedError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("synth engine failed to initialise: {0}")]
    EngineInit(String),

    #[error("producer did not report ready within {timeout_ms} ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, WavefeedError>;
