//! Per-process-group aggregation window planning.
//!
//! Each process group cycles through fixed-length aggregation windows. A fresh
//! recording policy is fetched before a window opens, at most one work
//! assignment is issued per window, and the window closes once its span and
//! tolerance have elapsed. All transitions are driven externally, from the
//! poll path and the periodic sweeper.

use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::assignment::slot::{SlotReservation, WorkSlotPool};
use crate::config::Config;
use crate::models::ProcessGroup;
use crate::utils;
use crate::wire;

/// Timing parameters governing window planning.
#[derive(Clone, Debug)]
pub struct PlannerSettings {
    /// The span of one aggregation window.
    pub window_duration: Duration,
    /// Extra time past window end granted to in-flight work before closing.
    pub window_end_tolerance: Duration,
    /// Minimum spacing between two policy fetches for the same group.
    pub policy_refresh_offset: Duration,
    /// How far ahead of the next window a policy fetch may begin.
    pub scheduling_buffer: Duration,
    /// Upper bound on the start delay handed to recorders.
    pub max_work_assignment_delay: Duration,
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_duration: Duration::from_secs(config.window_duration_mins * 60),
            window_end_tolerance: Duration::from_secs(config.window_end_tolerance_secs),
            policy_refresh_offset: Duration::from_secs(config.policy_refresh_offset_secs),
            scheduling_buffer: Duration::from_secs(config.scheduling_buffer_secs),
            max_work_assignment_delay: Duration::from_secs(config.max_work_assignment_delay_secs),
        }
    }
}

/// Mints cluster-unique work ids for this backend.
///
/// The backend id occupies the high half of every minted id, so no two
/// backends can ever mint the same id. Sequencing starts at 1 to keep the
/// zero "no assignment" sentinel unmintable.
pub struct WorkIdSource {
    backend_id: u32,
    seq: AtomicU32,
}

impl WorkIdSource {
    pub fn new(backend_id: u32) -> Arc<Self> {
        Arc::new(Self { backend_id, seq: AtomicU32::new(1) })
    }

    pub fn next(&self) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        utils::pack_work_id(self.backend_id, seq)
    }
}

/// An open aggregation window.
#[derive(Debug)]
pub struct Window {
    pub started_at: OffsetDateTime,
    pub ends_at: Instant,
    pub policy: wire::RecordingPolicy,
}

/// How an aggregation window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The issued work ran to completion.
    Completed,
    /// Work was issued but never reported complete in time.
    TimedOut,
    /// The window elapsed without any work being issued.
    NoWorkIssued,
}

/// A closed aggregation window, handed to the window sink.
#[derive(Debug)]
pub struct ClosedWindow {
    pub process_group: ProcessGroup,
    pub started_at: OffsetDateTime,
    pub work_id: Option<u64>,
    pub outcome: WindowOutcome,
    pub policy: wire::RecordingPolicy,
}

enum PlannerState {
    /// No window activity; the planner waits for the next window to come due.
    Idle,
    /// A policy fetch is in flight for the next window.
    PolicyRequested,
    /// A window is open and work may be issued into it.
    WindowOpen { window: Window },
    /// Work has been issued and its slot reservation is held.
    WorkIssued {
        window: Window,
        work_id: u64,
        issued_at: Instant,
        _reservation: SlotReservation,
    },
    /// The issued work completed; the window runs out its span.
    WorkComplete { window: Window, work_id: u64 },
    /// The issued work overran its bounds and was written off.
    WorkTimedOut { window: Window, work_id: u64 },
}

/// The window planning state machine for one process group.
pub struct WindowPlanner {
    process_group: ProcessGroup,
    settings: PlannerSettings,
    ids: Arc<WorkIdSource>,
    slots: Arc<WorkSlotPool>,
    state: PlannerState,
    last_policy_fetch: Option<Instant>,
    last_window_opened: Option<Instant>,
}

impl WindowPlanner {
    pub fn new(process_group: ProcessGroup, settings: PlannerSettings, ids: Arc<WorkIdSource>, slots: Arc<WorkSlotPool>) -> Self {
        Self {
            process_group,
            settings,
            ids,
            slots,
            state: PlannerState::Idle,
            last_policy_fetch: None,
            last_window_opened: None,
        }
    }

    /// Check if a policy fetch should begin for the next window.
    pub fn needs_policy(&self, now: Instant) -> bool {
        if !matches!(self.state, PlannerState::Idle) {
            return false;
        }
        let window_due = match self.last_window_opened {
            None => true,
            Some(opened) => now + self.settings.scheduling_buffer >= opened + self.settings.window_duration,
        };
        if !window_due {
            return false;
        }
        match self.last_policy_fetch {
            None => true,
            Some(at) => now.duration_since(at) >= self.settings.policy_refresh_offset,
        }
    }

    /// Mark a policy fetch as in flight.
    pub fn begin_policy_fetch(&mut self) {
        if matches!(self.state, PlannerState::Idle) {
            self.state = PlannerState::PolicyRequested;
        }
    }

    /// Roll back an in-flight policy fetch which failed or timed out.
    ///
    /// The fetch timestamp is deliberately left untouched so the next caller
    /// retries immediately.
    pub fn abort_policy_fetch(&mut self) {
        if matches!(self.state, PlannerState::PolicyRequested) {
            self.state = PlannerState::Idle;
        }
    }

    /// Open a new window under the freshly fetched policy.
    pub fn open_window(&mut self, policy: wire::RecordingPolicy, now: Instant) {
        if !matches!(self.state, PlannerState::PolicyRequested) {
            return;
        }
        self.last_policy_fetch = Some(now);
        self.last_window_opened = Some(now);
        self.state = PlannerState::WindowOpen {
            window: Window {
                started_at: OffsetDateTime::now_utc(),
                ends_at: now + self.settings.window_duration,
                policy,
            },
        };
    }

    /// Issue work into the open window, if a slot can be reserved.
    ///
    /// Returns `None` when no window is open, work was already issued, or the
    /// slot pool is exhausted.
    pub fn try_issue_work(&mut self, now: Instant) -> Option<wire::WorkAssignment> {
        let state = mem::replace(&mut self.state, PlannerState::Idle);
        match state {
            PlannerState::WindowOpen { window } => match self.slots.try_acquire(1) {
                Some(reservation) => {
                    let work_id = self.ids.next();
                    let remaining = window.ends_at.saturating_duration_since(now);
                    let delay = self.settings.max_work_assignment_delay.min(remaining);
                    let assignment = wire::WorkAssignment {
                        work_id,
                        delay_secs: delay.as_secs() as u32,
                        duration_secs: window.policy.duration_secs,
                        coverage_pct: window.policy.coverage_pct,
                        description: window.policy.description.clone(),
                    };
                    self.state = PlannerState::WorkIssued { window, work_id, issued_at: now, _reservation: reservation };
                    Some(assignment)
                }
                None => {
                    self.state = PlannerState::WindowOpen { window };
                    None
                }
            },
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Record that the issued work ran to completion, releasing its slot.
    pub fn work_completed(&mut self, completed_work_id: u64) {
        let state = mem::replace(&mut self.state, PlannerState::Idle);
        match state {
            PlannerState::WorkIssued { window, work_id, .. } if work_id == completed_work_id => {
                self.state = PlannerState::WorkComplete { window, work_id };
            }
            other => self.state = other,
        }
    }

    /// Advance the state machine against the clock.
    ///
    /// Times out overrunning work and closes elapsed windows; a closed window
    /// is returned exactly once, for delivery to the window sink.
    pub fn advance(&mut self, now: Instant) -> Option<ClosedWindow> {
        let work_timed_out = match &self.state {
            PlannerState::WorkIssued { window, issued_at, .. } => {
                let work_bound = self.settings.max_work_assignment_delay
                    + Duration::from_secs(window.policy.duration_secs as u64)
                    + self.settings.window_end_tolerance;
                now.saturating_duration_since(*issued_at) > work_bound
            }
            _ => false,
        };
        if work_timed_out {
            let state = mem::replace(&mut self.state, PlannerState::Idle);
            if let PlannerState::WorkIssued { window, work_id, .. } = state {
                self.state = PlannerState::WorkTimedOut { window, work_id };
            }
        }

        // The close point is window end + tolerance regardless of how the
        // window's work fared.
        let close_deadline = match &self.state {
            PlannerState::WindowOpen { window }
            | PlannerState::WorkIssued { window, .. }
            | PlannerState::WorkComplete { window, .. }
            | PlannerState::WorkTimedOut { window, .. } => Some(window.ends_at + self.settings.window_end_tolerance),
            PlannerState::Idle | PlannerState::PolicyRequested => None,
        };
        if !matches!(close_deadline, Some(deadline) if now >= deadline) {
            return None;
        }

        let state = mem::replace(&mut self.state, PlannerState::Idle);
        let closed = match state {
            PlannerState::WindowOpen { window } => self.close(window, None, WindowOutcome::NoWorkIssued),
            PlannerState::WorkIssued { window, work_id, .. } => self.close(window, Some(work_id), WindowOutcome::TimedOut),
            PlannerState::WorkComplete { window, work_id } => self.close(window, Some(work_id), WindowOutcome::Completed),
            PlannerState::WorkTimedOut { window, work_id } => self.close(window, Some(work_id), WindowOutcome::TimedOut),
            other => {
                self.state = other;
                return None;
            }
        };
        Some(closed)
    }

    fn close(&self, window: Window, work_id: Option<u64>, outcome: WindowOutcome) -> ClosedWindow {
        ClosedWindow {
            process_group: self.process_group.clone(),
            started_at: window.started_at,
            work_id,
            outcome,
            policy: window.policy,
        }
    }

    /// The id of the currently issued, still outstanding work.
    #[allow(dead_code)]
    pub fn outstanding_work_id(&self) -> Option<u64> {
        match &self.state {
            PlannerState::WorkIssued { work_id, .. } => Some(*work_id),
            _ => None,
        }
    }

    #[allow(dead_code)]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, PlannerState::Idle)
    }

    #[allow(dead_code)]
    pub fn has_open_window(&self) -> bool {
        !matches!(self.state, PlannerState::Idle | PlannerState::PolicyRequested)
    }
}
