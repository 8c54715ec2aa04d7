//! Background raster decoding
//!
//! Image and signature payloads are decoded off the editing thread. Each
//! distinct payload is decoded once: the first request spawns a worker,
//! later requests for the same content just register interest in the page.
//! Workers report on a channel; [`RasterCache::poll`] drains it without
//! blocking and returns the pages that need to be projected again.

use crate::annotation::{RasterKey, RasterPayload};
use crate::projection::{RasterSource, RasterState};
use image::RgbaImage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Callback run on the worker thread once a decode finishes
pub type RedrawHook = Arc<dyn Fn(RasterKey) + Send + Sync>;

struct DecodeCompletion {
    key: RasterKey,
    result: Result<RgbaImage, String>,
}

#[derive(Debug)]
enum Slot {
    /// Decode in flight; pages waiting on it
    Pending { pages: BTreeSet<u32> },
    Ready(Arc<RgbaImage>),
    Failed(String),
}

/// Decoded rasters keyed by payload content
pub struct RasterCache {
    slots: HashMap<RasterKey, Slot>,
    sender: Sender<DecodeCompletion>,
    receiver: Receiver<DecodeCompletion>,
    redraw_hook: Option<RedrawHook>,
}

impl RasterCache {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { slots: HashMap::new(), sender, receiver, redraw_hook: None }
    }

    /// Install a callback fired from the worker when a decode completes
    ///
    /// Lets a UI event loop wake up and call [`RasterCache::poll`].
    pub fn with_redraw_hook(mut self, hook: RedrawHook) -> Self {
        self.redraw_hook = Some(hook);
        self
    }

    /// Ensure `payload` is decoded, starting a worker if needed
    ///
    /// `page` is reported by a later [`RasterCache::poll`] once the decode
    /// completes. Requests are idempotent and never cancelled.
    pub fn request(&mut self, payload: &RasterPayload, page: u32) -> RasterState {
        let key = payload.key();

        if let Some(slot) = self.slots.get_mut(&key) {
            return match slot {
                Slot::Pending { pages } => {
                    pages.insert(page);
                    RasterState::Pending
                }
                Slot::Ready(image) => RasterState::Ready { width: image.width(), height: image.height() },
                Slot::Failed(_) => RasterState::Failed,
            };
        }

        self.slots.insert(key, Slot::Pending { pages: BTreeSet::from([page]) });

        let bytes = payload.bytes.clone();
        let sender = self.sender.clone();
        let hook = self.redraw_hook.clone();
        debug!(?key, mime = %payload.mime, len = bytes.len(), "raster decode started");

        std::thread::spawn(move || {
            let result = image::load_from_memory(&bytes)
                .map(|decoded| decoded.to_rgba8())
                .map_err(|error| error.to_string());

            // The cache may already be gone; nothing to report to then
            if sender.send(DecodeCompletion { key, result }).is_ok() {
                if let Some(hook) = hook {
                    hook(key);
                }
            }
        });

        RasterState::Pending
    }

    /// Apply finished decodes and return the pages waiting on them
    ///
    /// Never blocks.
    pub fn poll(&mut self) -> BTreeSet<u32> {
        let mut pages = BTreeSet::new();
        while let Ok(completion) = self.receiver.try_recv() {
            pages.extend(self.complete(completion));
        }
        pages
    }

    /// Like [`RasterCache::poll`], but waits up to `timeout` for outstanding decodes
    pub fn poll_blocking(&mut self, timeout: Duration) -> BTreeSet<u32> {
        let deadline = Instant::now() + timeout;
        let mut pages = self.poll();

        while self.pending_count() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => pages.extend(self.complete(completion)),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        pages
    }

    /// Decoded pixels, if available
    pub fn get(&self, key: RasterKey) -> Option<Arc<RgbaImage>> {
        match self.slots.get(&key) {
            Some(Slot::Ready(image)) => Some(Arc::clone(image)),
            _ => None,
        }
    }

    /// Decode failure message, if the payload could not be decoded
    pub fn failure(&self, key: RasterKey) -> Option<&str> {
        match self.slots.get(&key) {
            Some(Slot::Failed(message)) => Some(message.as_str()),
            _ => None,
        }
    }

    /// Store pixels decoded elsewhere
    pub fn insert_decoded(&mut self, key: RasterKey, image: RgbaImage) {
        self.slots.insert(key, Slot::Ready(Arc::new(image)));
    }

    pub fn pending_count(&self) -> usize {
        self.slots.values().filter(|slot| matches!(slot, Slot::Pending { .. })).count()
    }

    /// Number of cached, failed or in-flight rasters
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every entry whose key is not in `keep`; returns how many went
    ///
    /// Decodes still in flight for a dropped key are discarded on completion.
    pub fn retain_keys(&mut self, keep: &HashSet<RasterKey>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| keep.contains(key));

        let evicted = before - self.slots.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.slots.len(), "raster cache trimmed");
        }
        evicted
    }

    fn complete(&mut self, completion: DecodeCompletion) -> BTreeSet<u32> {
        let DecodeCompletion { key, result } = completion;
        let Some(slot) = self.slots.get_mut(&key) else {
            debug!(?key, "decode finished for an evicted raster, dropped");
            return BTreeSet::new();
        };

        let next = match result {
            Ok(image) => {
                debug!(?key, width = image.width(), height = image.height(), "raster decoded");
                Slot::Ready(Arc::new(image))
            }
            Err(message) => {
                warn!(?key, error = %message, "raster decode failed");
                Slot::Failed(message)
            }
        };

        match std::mem::replace(slot, next) {
            Slot::Pending { pages } => pages,
            _ => BTreeSet::new(),
        }
    }
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RasterCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterCache")
            .field("slots", &self.slots.len())
            .field("pending", &self.pending_count())
            .field("redraw_hook", &self.redraw_hook.is_some())
            .finish()
    }
}

impl RasterSource for RasterCache {
    fn raster_state(&self, key: RasterKey) -> RasterState {
        match self.slots.get(&key) {
            Some(Slot::Ready(image)) => RasterState::Ready { width: image.width(), height: image.height() },
            Some(Slot::Failed(_)) => RasterState::Failed,
            Some(Slot::Pending { .. }) | None => RasterState::Pending,
        }
    }
}
