//! Scripted collaborators for exercising the client side without a media
//! stack.
//!
//! Available with the `test-utils` feature. DO NOT use in production.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::media::{CaptureDevice, LocalMedia, MediaConfig, MediaError, MediaResult, TrackKind};
use crate::mesh::{
    NegotiationError, NegotiationResult, PeerConnection, PeerConnectionFactory, SdpKind,
};
use crate::protocol::MemberId;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture device that opens instantly or fails with a fixed error.
#[derive(Debug, Default)]
pub struct FakeCaptureDevice {
    fail_with: Option<MediaError>,
    opens: AtomicUsize,
    stops: AtomicUsize,
    toggles: Mutex<Vec<(TrackKind, bool)>>,
}

impl FakeCaptureDevice {
    /// A device that always opens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that always fails with `error`.
    #[must_use]
    pub fn failing(error: MediaError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    /// Number of successful opens.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of stops.
    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Track toggles in call order.
    #[must_use]
    pub fn toggles(&self) -> Vec<(TrackKind, bool)> {
        lock(&self.toggles).clone()
    }
}

#[async_trait]
impl CaptureDevice for FakeCaptureDevice {
    async fn open(&self, _config: &MediaConfig) -> MediaResult<String> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake-stream-{n}"))
    }

    fn set_enabled(&self, _stream_id: &str, kind: TrackKind, enabled: bool) {
        lock(&self.toggles).push((kind, enabled));
    }

    async fn stop(&self, _stream_id: &str) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct EngineLog {
    created: Mutex<Vec<MemberId>>,
    closed: Mutex<HashMap<MemberId, usize>>,
    remote_descriptions: Mutex<HashMap<MemberId, Vec<(SdpKind, String)>>>,
    candidates: Mutex<HashMap<MemberId, Vec<Value>>>,
    reject_from: Mutex<HashSet<MemberId>>,
    stall_offers_for: Mutex<HashSet<MemberId>>,
}

/// Peer-connection engine that negotiates instantly and records every call.
///
/// Offers are `"offer-to-<remote>"` and answers `"answer-to-<remote>"`.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    log: Arc<EngineLog>,
}

impl ScriptedEngine {
    /// Creates an engine that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every remote description from `remote` fail.
    pub fn reject_remote_descriptions_from(&self, remote: &MemberId) {
        lock(&self.log.reject_from).insert(remote.clone());
    }

    /// Makes offers towards `remote` never complete.
    pub fn stall_offers_for(&self, remote: &MemberId) {
        lock(&self.log.stall_offers_for).insert(remote.clone());
    }

    /// Remotes a connection was created for, in order.
    #[must_use]
    pub fn created(&self) -> Vec<MemberId> {
        lock(&self.log.created).clone()
    }

    /// How many connections towards `remote` were closed.
    #[must_use]
    pub fn closed_count(&self, remote: &MemberId) -> usize {
        lock(&self.log.closed).get(remote).copied().unwrap_or(0)
    }

    /// Remote descriptions applied for `remote`.
    #[must_use]
    pub fn remote_descriptions(&self, remote: &MemberId) -> Vec<(SdpKind, String)> {
        lock(&self.log.remote_descriptions)
            .get(remote)
            .cloned()
            .unwrap_or_default()
    }

    /// Candidates applied for `remote`, in order.
    #[must_use]
    pub fn applied_candidates(&self, remote: &MemberId) -> Vec<Value> {
        lock(&self.log.candidates)
            .get(remote)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PeerConnectionFactory for ScriptedEngine {
    async fn create(
        &self,
        remote: &MemberId,
        _media: &LocalMedia,
    ) -> NegotiationResult<Box<dyn PeerConnection>> {
        lock(&self.log.created).push(remote.clone());
        Ok(Box::new(ScriptedPeer {
            remote: remote.clone(),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedPeer {
    remote: MemberId,
    log: Arc<EngineLog>,
}

#[async_trait]
impl PeerConnection for ScriptedPeer {
    async fn create_offer(&self) -> NegotiationResult<String> {
        let stalled = lock(&self.log.stall_offers_for).contains(&self.remote);
        if stalled {
            futures::future::pending::<()>().await;
        }
        Ok(format!("offer-to-{}", self.remote))
    }

    async fn create_answer(&self) -> NegotiationResult<String> {
        Ok(format!("answer-to-{}", self.remote))
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> NegotiationResult<()> {
        if lock(&self.log.reject_from).contains(&self.remote) {
            return Err(NegotiationError::RemoteDescriptionRejected(format!(
                "scripted rejection of {sdp}"
            )));
        }
        lock(&self.log.remote_descriptions)
            .entry(self.remote.clone())
            .or_default()
            .push((kind, sdp.to_string()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: Value) -> NegotiationResult<()> {
        lock(&self.log.candidates)
            .entry(self.remote.clone())
            .or_default()
            .push(candidate);
        Ok(())
    }

    async fn close(&self) {
        *lock(&self.log.closed).entry(self.remote.clone()).or_default() += 1;
    }
}
