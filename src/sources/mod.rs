//! Track resolution and decoding.
//!
//! The audio core only sees the [`TrackLoader`] trait: resolve a query into
//! tracks, and open a track as a stream of 20ms frames. [`SourceRouter`]
//! implements it on top of the concrete [`MusicSource`]s in this module.

pub mod decoder;
pub mod direct_url;
pub mod local;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::{
    audio::track::{SourceKind, Track},
    error::DecodeError,
};

pub use decoder::{DecodeThread, SymphoniaFrameSource};
pub use direct_url::DirectUrlSource;
pub use local::LocalFileSource;

/// Outcome of resolving a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    TrackLoaded(Track),
    PlaylistLoaded { name: String, tracks: Vec<Track> },
    NoMatches,
    LoadFailed(String),
}

/// Decoded audio of one track, pulled frame by frame.
#[async_trait]
pub trait FrameSource: Send {
    /// Next 20ms of 48kHz stereo f32 LE audio, `None` once the track is over.
    async fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError>;
}

/// What the audio core needs from the outside world to play anything.
#[async_trait]
pub trait TrackLoader: Send + Sync {
    async fn resolve(&self, query: &str) -> LoadResult;

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError>;
}

/// Trait común para todas las fuentes de música
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Verifica si la consulta es válida para esta fuente
    fn accepts(&self, query: &str) -> bool;

    async fn resolve(&self, query: &str) -> LoadResult;

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError>;

    fn kind(&self) -> SourceKind;

    fn source_name(&self) -> &'static str;
}

/// Routes each query to the first source that accepts it.
#[derive(Default)]
pub struct SourceRouter {
    sources: Vec<Box<dyn MusicSource>>,
}

impl SourceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl MusicSource + 'static) -> Self {
        info!("🔌 Fuente registrada: {}", source.source_name());
        self.sources.push(Box::new(source));
        self
    }
}

#[async_trait]
impl TrackLoader for SourceRouter {
    async fn resolve(&self, query: &str) -> LoadResult {
        let query = query.trim();
        if query.is_empty() {
            return LoadResult::NoMatches;
        }

        match self.sources.iter().find(|s| s.accepts(query)) {
            Some(source) => {
                debug!("🔍 Resolviendo '{}' con {}", query, source.source_name());
                source.resolve(query).await
            }
            None => {
                warn!("🔍 Ninguna fuente acepta la consulta: {}", query);
                LoadResult::NoMatches
            }
        }
    }

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.kind() == track.source())
            .ok_or_else(|| {
                DecodeError::Unsupported(format!(
                    "no source registered for {}",
                    track.source().as_str()
                ))
            })?;

        source.open(track).await
    }
}
