//! Voice transport glue.
//!
//! Songbird mixes and encodes audio on its own thread, pulling raw samples
//! through a [`MediaSource`]. [`BridgeReader`] is that source for a guild: it
//! reads frames out of the session's [`FrameBridge`] and fills the gaps with
//! silence, so the transport never waits on decoding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{Input, RawAdapter},
    tracks::TrackHandle,
    Songbird,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::io::MediaSource;
use tracing::{debug, info};

use crate::audio::{bridge::FrameBridge, CHANNELS, FRAME_BYTES, SAMPLE_RATE};

/// Connects guilds to voice and plugs their frame bridge into the call.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        bridge: Arc<FrameBridge>,
    ) -> Result<()>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<()>;
}

struct Attached {
    handle: TrackHandle,
    bridge: Arc<FrameBridge>,
}

pub struct SongbirdConnector {
    songbird: Arc<Songbird>,
    attached: DashMap<GuildId, Attached>,
}

impl SongbirdConnector {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self {
            songbird,
            attached: DashMap::new(),
        }
    }

    fn detach(&self, guild_id: GuildId) {
        if let Some((_, attached)) = self.attached.remove(&guild_id) {
            if let Err(e) = attached.handle.stop() {
                debug!("Track de voz ya estaba detenido: {}", e);
            }
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        bridge: Arc<FrameBridge>,
    ) -> Result<()> {
        let call = self
            .songbird
            .join(guild_id, channel_id)
            .await
            .with_context(|| format!("Failed to join voice channel {}", channel_id))?;

        let already_attached = self
            .attached
            .get(&guild_id)
            .is_some_and(|attached| Arc::ptr_eq(&attached.bridge, &bridge));
        if already_attached {
            return Ok(());
        }
        self.detach(guild_id);

        let input: Input =
            RawAdapter::new(BridgeReader::new(Arc::clone(&bridge)), SAMPLE_RATE, CHANNELS as u32)
                .into();
        let handle = {
            let mut handler = call.lock().await;
            handler.play_input(input)
        };

        info!(
            "🔊 Conectado al canal de voz {} en guild {} (buffer de {} frames)",
            channel_id,
            guild_id,
            bridge.capacity()
        );
        self.attached.insert(guild_id, Attached { handle, bridge });
        Ok(())
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<()> {
        self.detach(guild_id);

        if self.songbird.get(guild_id).is_none() {
            return Ok(());
        }
        self.songbird
            .remove(guild_id)
            .await
            .with_context(|| format!("Failed to leave voice in guild {}", guild_id))?;

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

/// Blocking-free byte stream over a [`FrameBridge`].
///
/// Yields silence whenever no frame is ready and ends once the bridge is
/// closed.
pub struct BridgeReader {
    bridge: Arc<FrameBridge>,
    current: Bytes,
    silence: Bytes,
}

impl BridgeReader {
    pub fn new(bridge: Arc<FrameBridge>) -> Self {
        Self {
            bridge,
            current: Bytes::new(),
            silence: Bytes::from(vec![0u8; FRAME_BYTES]),
        }
    }
}

impl Read for BridgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if !self.current.has_remaining() {
            if self.bridge.is_closed() {
                return Ok(0);
            }
            self.current = match self.bridge.next_frame() {
                Some(frame) => frame,
                None => self.silence.clone(),
            };
        }

        let n = buf.len().min(self.current.remaining());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

impl Seek for BridgeReader {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live audio cannot be seeked",
        ))
    }
}

impl MediaSource for BridgeReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
