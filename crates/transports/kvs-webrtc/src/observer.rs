//! Observer slots and the inbound media aggregate

use crate::negotiation::EngineState;
use crate::transport::{ConnectionState, InboundTrack, MediaKind};
use crate::Error;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Callback receiving the inbound media aggregate
pub type RemoteMediaCallback = Arc<dyn Fn(Arc<RemoteMedia>) + Send + Sync>;

/// Callback receiving transport connection state changes
pub type ConnectionStateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Callback receiving fatal errors
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback receiving engine lifecycle transitions
pub type EngineStateCallback = Arc<dyn Fn(EngineState) + Send + Sync>;

/// All inbound tracks of one connection attempt
///
/// Tracks are appended as they arrive; every `on_remote_media` call for an
/// attempt hands out the same aggregate.
#[derive(Debug, Default)]
pub struct RemoteMedia {
    tracks: RwLock<Vec<InboundTrack>>,
}

impl RemoteMedia {
    /// Empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, track: InboundTrack) {
        self.tracks.write().push(track);
    }

    /// Snapshot of the tracks received so far
    pub fn tracks(&self) -> Vec<InboundTrack> {
        self.tracks.read().clone()
    }

    /// Number of tracks received so far
    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    /// True until the first track arrives
    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    /// Tracks of one media kind
    pub fn tracks_of(&self, kind: MediaKind) -> Vec<InboundTrack> {
        self.tracks
            .read()
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect()
    }
}

/// One slot per event category; registering again replaces the slot
#[derive(Default)]
pub(crate) struct Observers {
    on_remote_media: Mutex<Option<RemoteMediaCallback>>,
    on_connection_state: Mutex<Option<ConnectionStateCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    on_state_change: Mutex<Option<EngineStateCallback>>,
}

impl Observers {
    pub(crate) fn set_remote_media(&self, callback: RemoteMediaCallback) {
        *self.on_remote_media.lock() = Some(callback);
    }

    pub(crate) fn set_connection_state(&self, callback: ConnectionStateCallback) {
        *self.on_connection_state.lock() = Some(callback);
    }

    pub(crate) fn set_error(&self, callback: ErrorCallback) {
        *self.on_error.lock() = Some(callback);
    }

    pub(crate) fn set_state_change(&self, callback: EngineStateCallback) {
        *self.on_state_change.lock() = Some(callback);
    }

    // Callbacks are cloned out so they never run under the slot lock

    pub(crate) fn remote_media(&self, media: Arc<RemoteMedia>) {
        let callback = self.on_remote_media.lock().clone();
        if let Some(callback) = callback {
            callback(media);
        }
    }

    pub(crate) fn connection_state(&self, state: ConnectionState) {
        let callback = self.on_connection_state.lock().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    pub(crate) fn error(&self, error: &Error) {
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub(crate) fn state_change(&self, state: EngineState) {
        let callback = self.on_state_change.lock().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }
}
