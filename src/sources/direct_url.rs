use async_trait::async_trait;
use bytes::{Buf, Bytes};
use reqwest::{
    header::{self, HeaderMap},
    Client, Response,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    time::Duration,
};
use symphonia::core::io::MediaSource;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    decoder::{DecodeThread, SymphoniaFrameSource},
    FrameSource, LoadResult, MusicSource,
};
use crate::{
    audio::track::{SourceKind, Track},
    error::DecodeError,
};

/// Response chunks downloaded ahead of the decoder.
const BODY_LOOKAHEAD: usize = 16;

/// Plays audio files and radio streams served over plain HTTP(S).
pub struct DirectUrlSource {
    client: Client,
    timeout: Duration,
}

impl DirectUrlSource {
    /// `timeout` bounds connecting, the `HEAD` check and every wait for more
    /// body data. It does not bound the whole download, so streams keep playing.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!("guild-jukebox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    fn parse(query: &str) -> Option<Url> {
        let url = Url::parse(query).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }

    /// Último segmento no vacío del path, o el host
    fn title_for(url: &Url) -> String {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }

    fn extension_of(url: &Url) -> Option<String> {
        let last = url.path_segments()?.last()?;
        let (_, ext) = last.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }

    /// Builds the track from the `HEAD` response headers.
    ///
    /// Without a `Content-Length` the body has no end, so it is a stream.
    /// Shoutcast/Icecast servers also name the station in `icy-name`.
    fn track_for(url: &Url, headers: &HeaderMap) -> Track {
        let station = headers
            .get("icy-name")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let has_length = headers.contains_key(header::CONTENT_LENGTH);

        let mut builder = Track::builder(url.to_string(), SourceKind::DirectUrl)
            .title(station.map(str::to_string).unwrap_or_else(|| Self::title_for(url)));
        if station.is_some() || !has_length {
            builder = builder.stream();
        }
        builder.build()
    }
}

#[async_trait]
impl MusicSource for DirectUrlSource {
    fn accepts(&self, query: &str) -> bool {
        Self::parse(query).is_some()
    }

    async fn resolve(&self, query: &str) -> LoadResult {
        let Some(url) = Self::parse(query) else {
            return LoadResult::NoMatches;
        };

        let response = match self.client.head(url.clone()).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("❌ HEAD falló para {}: {}", url, e);
                return LoadResult::LoadFailed(e.to_string());
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return LoadResult::NoMatches;
        }
        if !status.is_success() {
            return LoadResult::LoadFailed(format!("server answered {}", status));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if content_type.starts_with("text/") {
            return LoadResult::LoadFailed(format!("not an audio resource ({})", content_type));
        }

        let track = Self::track_for(&url, response.headers());
        info!("🔗 URL directa resuelta: {} ({})", url, track);
        LoadResult::TrackLoaded(track)
    }

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError> {
        let url = Url::parse(track.uri())
            .map_err(|e| DecodeError::Unsupported(format!("invalid url {}: {}", track.uri(), e)))?;
        let extension = Self::extension_of(&url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let byte_len = response.content_length();

        let (tx, chunks) = flume::bounded(BODY_LOOKAHEAD);
        tokio::spawn(download(response, tx));

        let body = BodyReader {
            chunks,
            current: Bytes::new(),
            byte_len,
        };
        let source = DecodeThread::spawn(move || {
            SymphoniaFrameSource::new(Box::new(body), extension.as_deref())
        })?;

        Ok(Box::new(source))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::DirectUrl
    }

    fn source_name(&self) -> &'static str {
        "direct"
    }
}

/// Forwards the body chunk by chunk; stops as soon as the decoder goes away.
async fn download(mut response: Response, chunks: flume::Sender<io::Result<Bytes>>) {
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if chunks.send_async(Ok(chunk)).await.is_err() {
                    debug!("🛑 Descarga abandonada: {}", response.url());
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("❌ Error descargando {}: {}", response.url(), e);
                let _ = chunks.send_async(Err(io::Error::other(e))).await;
                return;
            }
        }
    }
}

/// Blocking view of a body being downloaded, for the decode thread.
struct BodyReader {
    chunks: flume::Receiver<io::Result<Bytes>>,
    current: Bytes,
    byte_len: Option<u64>,
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.current.is_empty() {
            match self.chunks.recv() {
                Ok(Ok(chunk)) => self.current = chunk,
                Ok(Err(e)) => return Err(e),
                // Descarga terminada
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

impl Seek for BodyReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "http bodies are read front to back",
        ))
    }
}

impl MediaSource for BodyReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::FRAME_BYTES, sources::testing::wav_bytes};
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn source() -> DirectUrlSource {
        DirectUrlSource::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_accepts_only_http_urls() {
        let source = source();
        assert!(source.accepts("https://cdn.example.com/song.mp3"));
        assert!(source.accepts("http://radio.example.com/live"));
        assert!(!source.accepts("ftp://example.com/song.mp3"));
        assert!(!source.accepts("/music/song.mp3"));
        assert!(!source.accepts("just a song name"));
    }

    #[test]
    fn test_title_and_extension_from_url() {
        let url = Url::parse("https://cdn.example.com/albums/Track%2001.FLAC?sig=1").unwrap();
        assert_eq!(DirectUrlSource::title_for(&url), "Track%2001.FLAC");
        assert_eq!(DirectUrlSource::extension_of(&url).as_deref(), Some("flac"));

        let bare = Url::parse("https://radio.example.com/").unwrap();
        assert_eq!(DirectUrlSource::title_for(&bare), "radio.example.com");
        assert_eq!(DirectUrlSource::extension_of(&bare), None);
    }

    #[test]
    fn test_files_and_streams_render_differently() {
        let file = Url::parse("https://cdn.example.com/music/song.mp3").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4812345"));
        let track = DirectUrlSource::track_for(&file, &headers);
        assert!(!track.is_stream());
        assert_eq!(track.to_string(), "song.mp3");

        let live = Url::parse("http://radio.example.com/live").unwrap();
        let track = DirectUrlSource::track_for(&live, &HeaderMap::new());
        assert!(track.is_stream());
        assert_eq!(track.to_string(), "live (stream)");

        let mut headers = HeaderMap::new();
        headers.insert("icy-name", HeaderValue::from_static("Radio Jukebox"));
        let track = DirectUrlSource::track_for(&live, &headers);
        assert_eq!(track.to_string(), "Radio Jukebox (stream)");
    }

    #[tokio::test]
    async fn test_non_url_query_has_no_matches() {
        assert_eq!(source().resolve("not a url").await, LoadResult::NoMatches);
    }

    /// Answers one request with a chunked WAV body that never ends.
    async fn serve_endless_wav(listener: TcpListener) {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;

        let head = "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nTransfer-Encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }

        // Cabecera que anuncia muchos más datos de los que llegan a tiempo
        let data_len: u32 = 0x7fff_0000;
        let mut header = wav_bytes(48_000, 2, 0);
        header[4..8].copy_from_slice(&(data_len + 36).to_le_bytes());
        header[40..44].copy_from_slice(&data_len.to_le_bytes());
        let pcm = wav_bytes(48_000, 2, 960).split_off(44);

        let mut chunk = header;
        loop {
            let mut out = format!("{:X}\r\n", chunk.len()).into_bytes();
            out.extend_from_slice(&chunk);
            out.extend_from_slice(b"\r\n");
            if socket.write_all(&out).await.is_err() {
                return;
            }
            chunk = pcm.clone();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_endless_stream_plays_while_downloading() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_endless_wav(listener));

        // Leer el stream dura más que el timeout: solo importan las pausas
        let source = DirectUrlSource::new(Duration::from_millis(200)).unwrap();
        let track = Track::builder(format!("http://{}/live.wav", addr), SourceKind::DirectUrl)
            .stream()
            .build();

        let mut frames = source.open(&track).await.unwrap();
        for _ in 0..60 {
            let frame = tokio::time::timeout(Duration::from_secs(2), frames.next_frame())
                .await
                .expect("stream stalled")
                .unwrap()
                .expect("stream ended early");
            assert_eq!(frame.len(), FRAME_BYTES);
        }
    }
}
