use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::track::Track;
use crate::error::QueueError;

/// Pending tracks of one guild, in playback order.
///
/// Strict FIFO: no shuffle, no priorities, no deduplication.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final de la cola
    pub fn push(&mut self, track: Track) -> Result<usize, QueueError> {
        if self.items.len() >= self.max_size {
            return Err(QueueError::Full(self.max_size));
        }

        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);

        Ok(self.items.len())
    }

    /// Agrega tantos tracks como quepan, en orden; devuelve cuántos entraron
    pub fn extend<I>(&mut self, tracks: I) -> usize
    where
        I: IntoIterator<Item = Track>,
    {
        let available = self.max_size.saturating_sub(self.items.len());
        let before = self.items.len();
        self.items.extend(tracks.into_iter().take(available));

        let added = self.items.len() - before;
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn pop_next(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.title()),
            None => debug!("📭 Cola vacía"),
        }
        next
    }

    /// Limpia la cola, devolviendo cuántos tracks se descartaron
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        if dropped > 0 {
            info!("🗑️ Cola limpiada ({} tracks)", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    /// Sum of known durations; streams count as zero.
    pub fn total_duration(&self) -> Duration {
        self.items.iter().filter_map(Track::duration).sum()
    }
}
