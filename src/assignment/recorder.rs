//! Per-recorder poll state.
//!
//! Tracks each recorder's poll tick, its view of the last issued work, and a
//! liveness timestamp used to exclude dead recorders from work issuance.

use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::RecorderIdentity;
use crate::wire::{self, WorkState};

/// The outcome of applying a recorder poll to its tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReceipt {
    /// The poll was accepted and the recorder state updated.
    Accepted {
        /// True when the poll also refreshed the recorder's liveness.
        liveness_refreshed: bool,
    },
    /// The poll carried a tick older than one already seen and was ignored.
    Stale,
}

#[derive(Default)]
struct RecorderState {
    last_reported_tick: u64,
    last_reported_at: Option<Instant>,
    last_work_response: Option<wire::WorkResponse>,
}

/// The tracked state of a single recorder instance.
pub struct RecorderDetail {
    identity: RecorderIdentity,
    defunct_threshold: Duration,
    state: Mutex<RecorderState>,
}

impl RecorderDetail {
    /// Track a newly seen recorder.
    ///
    /// It counts as defunct until its first positive-tick poll; the tick-0
    /// reset sentinel carries no trustworthy time signal, so a recorder that
    /// has only ever reset must not be handed work.
    pub fn new(identity: RecorderIdentity, defunct_threshold: Duration) -> Self {
        Self {
            identity,
            defunct_threshold,
            state: Mutex::new(RecorderState {
                last_reported_tick: 0,
                last_reported_at: None,
                last_work_response: None,
            }),
        }
    }

    pub fn identity(&self) -> &RecorderIdentity {
        &self.identity
    }

    /// Apply a poll to the recorder's state.
    ///
    /// Ticks are monotonic: a tick lower than the last seen one marks a
    /// delayed duplicate and is ignored. The zero tick is the reset sentinel a
    /// restarted recorder opens with; it is accepted but does not refresh
    /// liveness.
    pub fn receive_poll(&self, tick: u64, work_last_issued: wire::WorkResponse) -> PollReceipt {
        let mut state = self.state.lock().expect("recorder state lock poisoned");
        if tick == 0 {
            state.last_reported_tick = 0;
            state.last_work_response = Some(work_last_issued);
            return PollReceipt::Accepted { liveness_refreshed: false };
        }
        if tick < state.last_reported_tick {
            return PollReceipt::Stale;
        }
        state.last_reported_tick = tick;
        state.last_reported_at = Some(Instant::now());
        state.last_work_response = Some(work_last_issued);
        PollReceipt::Accepted { liveness_refreshed: true }
    }

    /// Check if the recorder has gone silent past its defunct threshold.
    pub fn is_defunct(&self) -> bool {
        let state = self.state.lock().expect("recorder state lock poisoned");
        match state.last_reported_at {
            Some(at) => at.elapsed() > self.defunct_threshold,
            None => true,
        }
    }

    /// Check if new work may be issued to this recorder.
    ///
    /// Requires the recorder to be live and its last issued work, if any, to
    /// have run to completion.
    pub fn can_accept_work(&self) -> bool {
        if self.is_defunct() {
            return false;
        }
        let state = self.state.lock().expect("recorder state lock poisoned");
        match &state.last_work_response {
            None => true,
            Some(work) => work.work_id == 0 || work.work_state == WorkState::Complete as i32,
        }
    }

    #[allow(dead_code)]
    pub fn last_reported_tick(&self) -> u64 {
        self.state.lock().expect("recorder state lock poisoned").last_reported_tick
    }

    #[allow(dead_code)]
    pub fn last_work_response(&self) -> Option<wire::WorkResponse> {
        self.state.lock().expect("recorder state lock poisoned").last_work_response.clone()
    }
}

impl PartialEq for RecorderDetail {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for RecorderDetail {}

impl Hash for RecorderDetail {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.identity.hash(hasher);
    }
}
