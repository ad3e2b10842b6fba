//! In-memory loader used by the audio tests.
//!
//! Queries select behaviour by prefix:
//! - `missing...` resolves to no matches, `badurl...` fails to load
//! - `playlist:a,b,c` resolves to a playlist of the listed tracks
//! - `slow:` delays resolution by 50ms
//! - track titles starting with `short` end after three frames, `broken`
//!   fails to open, `stall` never produces a frame, `hang` decodes a real
//!   WAV whose reads block past the first 4 KiB; anything else plays forever

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, Cursor, Read, Seek, SeekFrom},
    time::Duration,
};
use symphonia::core::io::MediaSource;

use super::{
    decoder::{DecodeThread, SymphoniaFrameSource},
    FrameSource, LoadResult, TrackLoader,
};
use crate::{
    audio::{
        track::{SourceKind, Track},
        FRAME_BYTES,
    },
    error::DecodeError,
};

#[derive(Default)]
pub(crate) struct FakeLoader;

pub(crate) fn track(title: &str) -> Track {
    Track::builder(format!("test://{}", title), SourceKind::LocalFile)
        .title(title)
        .duration(Duration::from_secs(60))
        .build()
}

#[async_trait]
impl TrackLoader for FakeLoader {
    async fn resolve(&self, query: &str) -> LoadResult {
        let query = match query.strip_prefix("slow:") {
            Some(rest) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                rest
            }
            None => query,
        };

        if query.starts_with("missing") {
            LoadResult::NoMatches
        } else if query.starts_with("badurl") {
            LoadResult::LoadFailed("unreachable host".to_string())
        } else if let Some(list) = query.strip_prefix("playlist:") {
            LoadResult::PlaylistLoaded {
                name: "mix".to_string(),
                tracks: list.split(',').map(track).collect(),
            }
        } else {
            LoadResult::TrackLoaded(track(query))
        }
    }

    async fn open(&self, track: &Track) -> Result<Box<dyn FrameSource>, DecodeError> {
        let title = track.title();
        if title.starts_with("broken") {
            return Err(DecodeError::Unsupported("corrupt header".to_string()));
        }
        if title.starts_with("hang") {
            let reader = StallingReader::new(
                wav_bytes(48_000, 2, 48_000),
                4096,
                Duration::from_millis(400),
            );
            let thread = DecodeThread::spawn(move || {
                SymphoniaFrameSource::new(Box::new(reader), Some("wav"))
            })?;
            return Ok(Box::new(thread));
        }

        Ok(Box::new(SilenceSource {
            remaining: title.starts_with("short").then_some(3),
            stall: title.starts_with("stall"),
        }))
    }
}

struct SilenceSource {
    remaining: Option<usize>,
    stall: bool,
}

#[async_trait]
impl FrameSource for SilenceSource {
    async fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        if self.stall {
            futures::future::pending::<()>().await;
        }

        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(Bytes::from(vec![0u8; FRAME_BYTES])))
            }
            None => {
                // Ritmo aproximado de tiempo real para no saturar el buffer en los tests
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(Some(Bytes::from(vec![0u8; FRAME_BYTES])))
            }
        }
    }
}

/// Minimal 16-bit PCM WAV with `frames` samples per channel.
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let block_align = channels * 2;
    let data_len = (frames * block_align as usize) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames * channels as usize {
        let sample = ((i % 64) as i16 - 32) * 256;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// In-memory media that serves `fast_bytes` immediately and then sleeps
/// before every read, like a file on a hung network mount.
pub(crate) struct StallingReader {
    inner: Cursor<Vec<u8>>,
    fast_bytes: u64,
    delay: Duration,
}

impl StallingReader {
    pub(crate) fn new(data: Vec<u8>, fast_bytes: u64, delay: Duration) -> Self {
        Self {
            inner: Cursor::new(data),
            fast_bytes,
            delay,
        }
    }
}

impl Read for StallingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.inner.position();
        if position >= self.fast_bytes {
            std::thread::sleep(self.delay);
            return self.inner.read(buf);
        }
        let limit = buf.len().min((self.fast_bytes - position) as usize);
        self.inner.read(&mut buf[..limit])
    }
}

impl Seek for StallingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl MediaSource for StallingReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.inner.get_ref().len() as u64)
    }
}
