use std::{fmt, sync::Arc, time::Duration};

/// Where a track was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    LocalFile,
    DirectUrl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalFile => "local",
            SourceKind::DirectUrl => "http",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct TrackInfo {
    uri: String,
    title: String,
    author: Option<String>,
    duration: Option<Duration>,
    stream: bool,
    source: SourceKind,
}

/// A resolved, playable audio item.
///
/// Tracks are immutable once built by a loader; cloning only bumps a
/// reference count, so queues and the "now playing" slot can hold them freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    info: Arc<TrackInfo>,
}

impl Track {
    pub fn builder(uri: impl Into<String>, source: SourceKind) -> TrackBuilder {
        let uri = uri.into();
        TrackBuilder {
            title: uri.clone(),
            uri,
            author: None,
            duration: None,
            stream: false,
            source,
        }
    }

    pub fn uri(&self) -> &str {
        &self.info.uri
    }
    pub fn title(&self) -> &str {
        &self.info.title
    }
    pub fn author(&self) -> Option<&str> {
        self.info.author.as_deref()
    }
    /// `None` for live streams and for files whose length is not known up front.
    pub fn duration(&self) -> Option<Duration> {
        self.info.duration
    }
    pub fn source(&self) -> SourceKind {
        self.info.source
    }
    /// Live audio with no end, such as an internet radio.
    pub fn is_stream(&self) -> bool {
        self.info.stream
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.author() {
            Some(author) => write!(f, "{} - {}", author, self.title())?,
            None => write!(f, "{}", self.title())?,
        }
        match self.duration() {
            Some(duration) => write!(f, " ({})", format_duration(duration)),
            None if self.is_stream() => write!(f, " (stream)"),
            None => Ok(()),
        }
    }
}

pub struct TrackBuilder {
    uri: String,
    title: String,
    author: Option<String>,
    duration: Option<Duration>,
    stream: bool,
    source: SourceKind,
}

impl TrackBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn build(self) -> Track {
        Track {
            info: Arc::new(TrackInfo {
                uri: self.uri,
                title: self.title,
                author: self.author,
                duration: self.duration,
                stream: self.stream,
                source: self.source,
            }),
        }
    }
}

/// Formats as `m:ss`, or `h:mm:ss` for tracks longer than an hour.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
