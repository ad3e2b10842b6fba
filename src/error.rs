use thiserror::Error;

/// Why a query could not be turned into playable tracks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("no matches found for: {0}")]
    NoMatches(String),

    #[error("could not load track: {0}")]
    Failed(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full (max {0} tracks)")]
    Full(usize),

    /// The session was removed; nothing can be queued on it anymore.
    #[error("session is closed")]
    Closed,
}

/// Failures raised while turning a track into audio frames.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("decoder error: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The decode thread went away without reporting why.
    #[error("decoder stopped: {0}")]
    Aborted(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
