use thiserror::Error;

/// Unified error type for the entire Phonepilot workspace.
#[derive(Error, Debug)]
pub enum PilotError {
    // ── Agent / step executor errors ───────────────────────────
    #[error("agent error: {0}")]
    Agent(String),

    #[error("model endpoint error: {0}")]
    Model(String),

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    // ── Device errors ──────────────────────────────────────────
    #[error("device error: {0}")]
    Device(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PilotError>;
