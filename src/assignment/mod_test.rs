use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::assignment::planner::WindowOutcome;
use crate::assignment::{diff_assignments, AssignmentChange, WindowSweeper};
use crate::error::AppError;
use crate::fixtures;
use crate::wire::{self, WorkState};

fn no_work() -> wire::WorkResponse {
    wire::WorkResponse { work_id: 0, work_state: WorkState::None as i32 }
}

#[test]
fn test_diff_assignments_reports_additions_and_removals() {
    let current: HashSet<_> = [fixtures::process_group(1), fixtures::process_group(2)].into_iter().collect();
    let target: HashSet<_> = [fixtures::process_group(2), fixtures::process_group(3)].into_iter().collect();

    let changes = diff_assignments(&current, &target);
    assert_eq!(changes.len(), 2, "got {} changes expected {}", changes.len(), 2);
    assert!(
        changes.contains(&AssignmentChange::Added(fixtures::process_group(3))),
        "group 3 must be reported as added, got {:?}",
        changes
    );
    assert!(
        changes.contains(&AssignmentChange::Removed(fixtures::process_group(1))),
        "group 1 must be reported as removed, got {:?}",
        changes
    );
}

#[test]
fn test_diff_assignments_is_empty_for_identical_sets() {
    let current: HashSet<_> = [fixtures::process_group(1)].into_iter().collect();
    let changes = diff_assignments(&current, &current.clone());
    assert!(changes.is_empty(), "identical sets must produce no changes, got {:?}", changes);
}

#[tokio::test]
async fn test_poll_against_an_unassigned_group_is_rejected() {
    let store = fixtures::planner_store(4, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let identity = fixtures::recorder_identity(&fixtures::process_group(1), 1);

    let outcome = store.handle_poll(identity, 1, no_work()).await;
    assert!(matches!(outcome, Err(AppError::InvalidInput(_))), "an unassigned group must be rejected as invalid input");
}

#[tokio::test]
async fn test_poll_issues_work_once_per_window() -> Result<()> {
    let store = fixtures::planner_store(4, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());

    let identity = fixtures::recorder_identity(&group, 1);
    let assignment = store.handle_poll(identity.clone(), 1, no_work()).await?;
    assert_ne!(assignment.work_id, 0, "the first poll of a due window must be issued work");
    assert_eq!(
        assignment.duration_secs,
        fixtures::recording_policy().duration_secs,
        "got {} expected {}",
        assignment.duration_secs,
        fixtures::recording_policy().duration_secs
    );

    let repeat = store
        .handle_poll(identity, 2, wire::WorkResponse { work_id: assignment.work_id, work_state: WorkState::Ongoing as i32 })
        .await?;
    assert_eq!(repeat.work_id, 0, "a window must never issue a second assignment, got {}", repeat.work_id);
    Ok(())
}

#[tokio::test]
async fn test_stale_poll_is_ignored() -> Result<()> {
    let store = fixtures::planner_store(4, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());

    let identity = fixtures::recorder_identity(&group, 1);
    let assignment = store.handle_poll(identity.clone(), 5, no_work()).await?;
    assert_ne!(assignment.work_id, 0, "the first poll must be issued work");

    let stale = store
        .handle_poll(identity, 3, wire::WorkResponse { work_id: assignment.work_id, work_state: WorkState::Complete as i32 })
        .await?;
    assert_eq!(stale.work_id, 0, "a stale poll must be answered with the zero assignment, got {}", stale.work_id);
    Ok(())
}

#[tokio::test]
async fn test_busy_recorders_are_not_reissued_work() -> Result<()> {
    let store = fixtures::planner_store(4, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());

    let identity = fixtures::recorder_identity(&group, 1);
    let busy = store
        .handle_poll(identity, 1, wire::WorkResponse { work_id: 99, work_state: WorkState::Ongoing as i32 })
        .await?;
    assert_eq!(busy.work_id, 0, "a recorder with ongoing work must not be issued more, got {}", busy.work_id);
    Ok(())
}

#[tokio::test]
async fn test_slot_capacity_bounds_issuance_across_groups() -> Result<()> {
    let store = fixtures::planner_store(1, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let group_a = fixtures::process_group(1);
    let group_b = fixtures::process_group(2);
    store.associate_if_absent(group_a.clone());
    store.associate_if_absent(group_b.clone());

    let first = store.handle_poll(fixtures::recorder_identity(&group_a, 1), 1, no_work()).await?;
    let second = store.handle_poll(fixtures::recorder_identity(&group_b, 1), 1, no_work()).await?;
    assert_ne!(first.work_id, 0, "the first group must be issued work");
    assert_eq!(second.work_id, 0, "a single slot must not be issued twice, got {}", second.work_id);
    Ok(())
}

#[tokio::test]
async fn test_policy_fetch_failure_yields_no_work() -> Result<()> {
    let store = fixtures::planner_store(4, Arc::new(fixtures::FailingPolicySource), Arc::new(fixtures::NullWindowSink));
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());

    let identity = fixtures::recorder_identity(&group, 1);
    let assignment = store.handle_poll(identity.clone(), 1, no_work()).await?;
    assert_eq!(assignment.work_id, 0, "a failed policy fetch must yield the zero assignment, got {}", assignment.work_id);

    // The fetch failure must not wedge the planner.
    let retry = store.handle_poll(identity, 2, no_work()).await?;
    assert_eq!(retry.work_id, 0, "got {} expected {}", retry.work_id, 0);
    Ok(())
}

#[tokio::test]
async fn test_deassociation_rejects_later_polls() -> Result<()> {
    let store = fixtures::planner_store(4, Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())), Arc::new(fixtures::NullWindowSink));
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());
    store.handle_poll(fixtures::recorder_identity(&group, 1), 1, no_work()).await?;

    store.deassociate(&group);
    assert!(store.assigned_process_groups().is_empty(), "deassociation must remove the group from the planned set");
    let outcome = store.handle_poll(fixtures::recorder_identity(&group, 1), 2, no_work()).await;
    assert!(matches!(outcome, Err(AppError::InvalidInput(_))), "polls after deassociation must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_sweeper_closes_windows_of_quiet_groups() -> Result<()> {
    let sink = Arc::new(fixtures::CollectingWindowSink::default());
    let store = {
        use crate::assignment::planner::{PlannerSettings, WorkIdSource};
        use crate::assignment::slot::WorkSlotPool;
        use crate::assignment::PlannerStore;
        PlannerStore::with_parts(
            PlannerSettings {
                window_duration: Duration::from_millis(50),
                window_end_tolerance: Duration::from_millis(10),
                policy_refresh_offset: Duration::from_millis(10),
                scheduling_buffer: Duration::from_millis(10),
                max_work_assignment_delay: Duration::from_millis(10),
            },
            Duration::from_secs(60),
            Duration::from_secs(2),
            WorkIdSource::new(7),
            WorkSlotPool::new(4),
            Arc::new(fixtures::StaticPolicySource(fixtures::recording_policy())),
            sink.clone(),
        )
    };
    let group = fixtures::process_group(1);
    store.associate_if_absent(group.clone());

    // Open a window through a poll, then go quiet and let the sweeper close it.
    let assignment = store.handle_poll(fixtures::recorder_identity(&group, 1), 1, no_work()).await?;
    assert_ne!(assignment.work_id, 0, "the poll must be issued work");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = WindowSweeper::new(store.clone(), Duration::from_millis(10), shutdown_rx).spawn();

    let mut closed_seen = false;
    for _ in 0..100 {
        if !sink.closed.lock().await.is_empty() {
            closed_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let _ = shutdown_tx.send(());
    handle.await??;

    assert!(closed_seen, "the sweeper must close the elapsed window");
    let closed = sink.closed.lock().await;
    assert_eq!(closed[0].process_group, group, "got {:?} expected {:?}", closed[0].process_group, group);
    assert_eq!(
        closed[0].outcome,
        WindowOutcome::TimedOut,
        "unanswered work must close as timed out, got {:?}",
        closed[0].outcome
    );
    Ok(())
}
