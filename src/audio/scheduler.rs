//! Per-guild playback state machine.
//!
//! [`TrackScheduler`] owns the queue and the "now playing" slot and is the
//! only code that changes either. Everything that can move playback forward
//! (user commands and player lifecycle events) ends up in one of its methods,
//! and the owning session calls them while holding its lock, so transitions
//! never interleave.

use std::{fmt::Write as _, time::Duration};
use tracing::{debug, info, warn};

use super::{queue::TrackQueue, track::Track};
use crate::error::QueueError;

const SNAPSHOT_MAX_ENTRIES: usize = 10;

/// The seam between the scheduler and whatever actually produces audio.
#[cfg_attr(test, mockall::automock)]
pub trait PlaybackDriver: Send {
    /// Starts decoding `track`, abandoning any previous playback.
    ///
    /// Returns the generation that tags this playback's frames and events.
    fn start(&mut self, track: &Track) -> u64;

    /// Abandons the current playback, if any, and discards its buffered audio.
    fn halt(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Lifecycle events reported by the player for one playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEventKind {
    /// The decoder reached the end of the track.
    TrackEnded,
    /// The decoder failed; the message is meant for logs and users.
    TrackException(String),
    /// No audio was produced for longer than the threshold.
    TrackStuck(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub generation: u64,
    pub kind: PlayerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// The session was idle and the track started right away.
    Started,
    /// Appended behind the current track; 1-based position in the queue.
    Queued { position: usize },
}

/// Result of moving on from the current track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    pub previous: Track,
    pub next: Option<Track>,
}

#[derive(Debug)]
struct NowPlaying {
    track: Track,
    generation: u64,
}

pub struct TrackScheduler<D> {
    driver: D,
    queue: TrackQueue,
    current: Option<NowPlaying>,
}

impl<D: PlaybackDriver> TrackScheduler<D> {
    pub fn new(driver: D, max_queue_size: usize) -> Self {
        Self {
            driver,
            queue: TrackQueue::new(max_queue_size),
            current: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.current.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref().map(|now| &now.track)
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|now| now.generation)
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    /// Plays `track` now if idle, otherwise appends it to the queue.
    pub fn enqueue(&mut self, track: Track) -> Result<Enqueued, QueueError> {
        if self.current.is_none() {
            self.play(track);
            return Ok(Enqueued::Started);
        }

        let position = self.queue.push(track)?;
        Ok(Enqueued::Queued { position })
    }

    /// Same as calling [`enqueue`](Self::enqueue) for every track in order.
    ///
    /// Tracks that do not fit in the queue are dropped; returns how many
    /// were accepted, counting one that started playing immediately.
    pub fn enqueue_playlist(&mut self, tracks: Vec<Track>) -> usize {
        let mut tracks = tracks.into_iter();
        let mut accepted = 0;

        if self.current.is_none() {
            match tracks.next() {
                Some(first) => {
                    self.play(first);
                    accepted += 1;
                }
                None => return 0,
            }
        }

        accepted + self.queue.extend(tracks)
    }

    /// Single transition routine for player lifecycle events.
    ///
    /// Events from a playback that is no longer current are ignored and
    /// return `None`.
    pub fn handle_event(&mut self, event: PlayerEvent) -> Option<Advance> {
        if self.current_generation() != Some(event.generation) {
            debug!(
                "Ignorando evento obsoleto (generación {}): {:?}",
                event.generation, event.kind
            );
            return None;
        }

        match &event.kind {
            PlayerEventKind::TrackEnded => {
                debug!("🏁 Track terminado normalmente");
            }
            PlayerEventKind::TrackException(reason) => {
                warn!(
                    "❌ Error reproduciendo {}: {}",
                    self.current().map(Track::title).unwrap_or_default(),
                    reason
                );
            }
            PlayerEventKind::TrackStuck(threshold) => {
                warn!(
                    "⏳ Track atascado por más de {}ms: {}",
                    threshold.as_millis(),
                    self.current().map(Track::title).unwrap_or_default()
                );
            }
        }

        self.advance()
    }

    /// Abandons the current track and moves to the next one, or to idle.
    pub fn skip(&mut self) -> Option<Advance> {
        let advance = self.advance();
        if let Some(advance) = &advance {
            info!("⏭️ Saltado: {}", advance.previous.title());
        }
        advance
    }

    /// Clears the queue and abandons the current track.
    pub fn stop(&mut self) {
        let dropped = self.queue.clear();
        let had_current = self.current.take().is_some();
        self.driver.halt();

        if had_current || dropped > 0 {
            info!("⏹️ Reproducción detenida, {} tracks descartados", dropped);
        }
    }

    /// Renders the current track and the pending queue.
    pub fn queue_snapshot(&self) -> String {
        let Some(now) = &self.current else {
            return "📭 Nothing is playing and the queue is empty.".to_string();
        };

        let mut out = format!("🎵 Now playing: **{}**\n", now.track);

        if self.queue.is_empty() {
            out.push_str("📋 Queue is empty.");
            return out;
        }

        let _ = writeln!(
            out,
            "📋 Queue ({} tracks, {}):",
            self.queue.len(),
            humantime::format_duration(self.queue.total_duration())
        );
        for (i, track) in self.queue.iter().take(SNAPSHOT_MAX_ENTRIES).enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, track);
        }
        if self.queue.len() > SNAPSHOT_MAX_ENTRIES {
            let _ = writeln!(out, "... and {} more", self.queue.len() - SNAPSHOT_MAX_ENTRIES);
        }

        out.trim_end().to_string()
    }

    fn play(&mut self, track: Track) {
        let generation = self.driver.start(&track);
        info!("🎵 Reproduciendo: {}", track.title());
        self.current = Some(NowPlaying { track, generation });
    }

    fn advance(&mut self) -> Option<Advance> {
        let previous = self.current.take()?.track;

        let next = self.queue.pop_next();
        match &next {
            Some(track) => self.play(track.clone()),
            None => {
                self.driver.halt();
                info!("📭 Cola terminada, sesión inactiva");
            }
        }

        Some(Advance { previous, next })
    }
}
