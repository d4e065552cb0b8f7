//! Integration tests for batch user and group imports

use muster::config::MusterConfig;
use muster::editor::{BatchKind, BatchOutcome, BatchReport};
use muster::error::DirectoryError;
use muster::manager::DirectoryManager;
use muster::records::{GroupRecord, RecordList};
use muster::types::RecordKind;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{
    authed_manager, authed_manager_over, seeded_directory, user, MutationHook, TappedDirectory,
    ADMIN_NAME, ADMIN_PASSWORD,
};

fn user_list(names: &[&str]) -> RecordList {
    RecordList::from_users(names.iter().map(|n| user(n)).collect())
}

/// Start an import and wait for its report, collecting per-item progress.
async fn run_import(
    manager: &DirectoryManager,
    list: RecordList,
    preset: Option<String>,
) -> (Vec<(String, f64)>, BatchReport) {
    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_user_list(
        list,
        preset,
        Some(Arc::new(move |name: &str, percent: f64| {
            seen.lock().push((name.to_string(), percent));
        })),
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = rx.await.unwrap();
    let progress = progress.lock().clone();
    (progress, report)
}

#[tokio::test]
async fn progress_climbs_monotonically_to_one_hundred_percent() {
    let manager = authed_manager(seeded_directory()).await;

    let (progress, report) = run_import(
        &manager,
        user_list(&["amy", "ben", "cal", "dee"]),
        None,
    )
    .await;

    assert_eq!(
        progress,
        vec![
            ("amy".to_string(), 25.0),
            ("ben".to_string(), 50.0),
            ("cal".to_string(), 75.0),
            ("dee".to_string(), 100.0),
        ]
    );
    assert_eq!(report.kind, BatchKind::Import);
    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.processed, 4);
    assert_eq!(report.total, 4);
    assert!(report.error().is_none());

    assert_eq!(
        manager.user_names().await.unwrap(),
        vec!["amy", "ben", "cal", "dee"]
    );
    manager.close().await;
}

#[tokio::test]
async fn filtered_names_are_excluded_before_the_batch_starts() {
    let manager = authed_manager(seeded_directory()).await;

    let list = user_list(&["amy", "bob", "cal"]).with_filter(vec!["bob".to_string()]);
    let (progress, report) = run_import(&manager, list, None).await;

    // The filtered name never counts against the total.
    assert_eq!(report.total, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(
        progress,
        vec![("amy".to_string(), 50.0), ("cal".to_string(), 100.0)]
    );
    assert!(!manager.record_exists(RecordKind::User, "bob").await.unwrap());

    manager.close().await;
}

#[tokio::test]
async fn per_item_failures_continue_by_default() {
    let manager = authed_manager(seeded_directory()).await;
    manager.add_user(&user("bob"), None).await.unwrap();

    let (progress, report) = run_import(&manager, user_list(&["amy", "bob", "cal"]), None).await;

    // The duplicate fails but still gets a progress event; the batch runs on.
    assert_eq!(progress.len(), 3);
    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.processed, 3);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::UserAlreadyExists(_))
    ));
    assert!(manager.record_exists(RecordKind::User, "cal").await.unwrap());

    manager.close().await;
}

#[tokio::test]
async fn stop_on_first_error_halts_at_the_failing_item() {
    let mut config = MusterConfig::default();
    config.batch.continue_on_error = false;

    let manager = DirectoryManager::new(seeded_directory(), config);
    manager
        .authenticate(ADMIN_NAME, ADMIN_PASSWORD)
        .await
        .unwrap();
    manager.add_user(&user("bob"), None).await.unwrap();

    let (progress, report) = run_import(&manager, user_list(&["amy", "bob", "cal"]), None).await;

    assert_eq!(progress.len(), 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped(), 1);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::UserAlreadyExists(_))
    ));
    assert!(!manager.record_exists(RecordKind::User, "cal").await.unwrap());

    manager.close().await;
}

#[tokio::test]
async fn a_preset_named_at_submission_applies_to_every_user() {
    let manager = authed_manager(seeded_directory()).await;

    let (_, report) = run_import(
        &manager,
        user_list(&["amy", "ben"]),
        Some("lab".to_string()),
    )
    .await;
    assert!(report.error().is_none());

    for name in ["amy", "ben"] {
        let fetched = manager.get_user(name).await.unwrap();
        assert_eq!(fetched.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(fetched.preset_name.as_deref(), Some("lab"));
    }
    manager.close().await;
}

#[tokio::test]
async fn a_missing_preset_refuses_the_whole_batch() {
    let manager = authed_manager(seeded_directory()).await;

    let (progress, report) = run_import(
        &manager,
        user_list(&["amy", "ben"]),
        Some("ghost".to_string()),
    )
    .await;

    assert!(progress.is_empty());
    assert_eq!(report.processed, 0);
    assert_eq!(report.total, 2);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::NoPresetRecord(_))
    ));
    assert!(!manager.record_exists(RecordKind::User, "amy").await.unwrap());

    manager.close().await;
}

#[tokio::test]
async fn unauthenticated_batches_fail_fast_with_a_report() {
    let manager = DirectoryManager::with_defaults(seeded_directory());

    let (progress, report) = run_import(&manager, user_list(&["amy", "ben"]), None).await;

    assert!(progress.is_empty());
    assert_eq!(report.processed, 0);
    assert_eq!(report.total, 2);
    assert_eq!(report.skipped(), 2);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::SessionError(_))
    ));

    manager.close().await;
}

#[tokio::test]
async fn an_empty_list_completes_immediately() {
    let manager = authed_manager(seeded_directory()).await;

    let (progress, report) = run_import(&manager, RecordList::default(), None).await;

    assert!(progress.is_empty());
    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.total, 0);
    assert_eq!(report.processed, 0);
    assert!(report.error().is_none());

    manager.close().await;
}

#[tokio::test]
async fn cancellation_stops_at_the_next_item_boundary() {
    let tap = Arc::new(TappedDirectory::new(seeded_directory()));
    let manager = Arc::new(authed_manager_over(tap.clone()).await);

    // Request cancellation from inside the second item's mutation; the
    // third item never starts.
    let canceller = manager.clone();
    let hook: MutationHook = Arc::new(move |count| {
        let manager = canceller.clone();
        Box::pin(async move {
            if count == 2 {
                manager.cancel_import();
            }
        })
    });
    tap.set_hook(hook);

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_user_list(
        user_list(&["u1", "u2", "u3", "u4", "u5"]),
        None,
        Some(Arc::new(move |name: &str, _| {
            seen.lock().push(name.to_string());
        })),
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );

    let report = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("batch report")
        .unwrap();

    assert!(report.is_cancelled());
    assert_eq!(report.processed, 2);
    assert_eq!(report.total, 5);
    assert_eq!(report.skipped(), 3);
    assert!(report.error().is_none());
    assert_eq!(*progress.lock(), vec!["u1", "u2"]);
    assert_eq!(tap.mutation_count(), 2);

    tap.clear_hook();
    let manager = Arc::try_unwrap(manager).ok().unwrap();
    assert_eq!(manager.user_names().await.unwrap(), vec!["u1", "u2"]);
    manager.close().await;
}

#[tokio::test]
async fn cancellation_does_not_leak_into_the_next_batch() {
    let manager = authed_manager(seeded_directory()).await;

    // No import is running; this request must not taint the one below.
    manager.cancel_import();

    let (_, report) = run_import(&manager, user_list(&["amy", "ben"]), None).await;
    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.processed, 2);

    manager.close().await;
}

#[tokio::test]
async fn a_node_refresh_mid_import_stops_the_batch() {
    let tap = Arc::new(TappedDirectory::new(seeded_directory()));
    let manager = Arc::new(authed_manager_over(tap.clone()).await);

    // Refreshing re-resolves the node, superseding the handle the batch
    // captured at start; the next item fails and the batch stops.
    let refresher = manager.clone();
    let hook: MutationHook = Arc::new(move |count| {
        let manager = refresher.clone();
        Box::pin(async move {
            if count == 2 {
                assert!(manager.refresh_node().await);
            }
        })
    });
    tap.set_hook(hook);

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_user_list(
        user_list(&["u1", "u2", "u3", "u4", "u5"]),
        None,
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = rx.await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::Completed);
    assert_eq!(report.processed, 3);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::SessionError(_))
    ));

    tap.clear_hook();
    let manager = Arc::try_unwrap(manager).ok().unwrap();
    assert_eq!(manager.user_names().await.unwrap(), vec!["u1", "u2"]);
    manager.close().await;
}

#[tokio::test]
async fn group_lists_import_through_the_same_lane() {
    let manager = authed_manager(seeded_directory()).await;

    let list = RecordList::from_groups(vec![
        GroupRecord::new("science"),
        GroupRecord::new("admins"),
    ]);
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_group_list(
        list,
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = rx.await.unwrap();

    assert_eq!(report.kind, BatchKind::Import);
    assert_eq!(report.processed, 2);
    assert!(report.error().is_none());
    // Seeded "staff" plus the two imports, in directory order.
    assert_eq!(
        manager.group_names().await.unwrap(),
        vec!["admins", "science", "staff"]
    );

    manager.close().await;
}

#[tokio::test]
async fn same_lane_batches_run_in_submission_order() {
    let manager = authed_manager(seeded_directory()).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    manager.set_add_progress_observer(Some(Arc::new(move |name: &str, _| {
        seen.lock().push(name.to_string());
    })));

    let (utx, urx) = tokio::sync::oneshot::channel();
    manager.add_user_list(
        user_list(&["u1", "u2", "u3"]),
        None,
        None,
        Some(Box::new(move |report| {
            let _ = utx.send(report);
        })),
    );
    let (gtx, grx) = tokio::sync::oneshot::channel();
    manager.add_group_list(
        RecordList::from_groups(vec![GroupRecord::new("g1"), GroupRecord::new("g2")]),
        None,
        Some(Box::new(move |report| {
            let _ = gtx.send(report);
        })),
    );

    assert_eq!(urx.await.unwrap().processed, 3);
    assert_eq!(grx.await.unwrap().processed, 2);

    // The second batch waited for the lane; its items trail every item of
    // the first.
    assert_eq!(*order.lock(), vec!["u1", "u2", "u3", "g1", "g2"]);

    manager.close().await;
}
