use thiserror::Error;

/// Failures at the remote AI boundary. Everything the service does is a
/// thin layer over these calls, so every component taxonomy below wraps
/// one of these.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("remote error {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("malformed remote response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis response contained no text")]
    Empty,
    #[error("analysis response was not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("analysis call failed: {0}")]
    Unavailable(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("refinement call failed: {0}")]
    Unavailable(#[from] BackendError),
}

/// Remix failures always carry the primary (direct-transform) cause,
/// even when it was the fallback leg that gave up.
#[derive(Debug, Error)]
#[error("remix failed: {primary_cause}")]
pub struct RemixError {
    pub primary_cause: String,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat call failed: {0}")]
    Unavailable(#[from] BackendError),
}
