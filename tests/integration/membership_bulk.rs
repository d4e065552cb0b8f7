//! Integration tests for bulk group membership changes

use muster::editor::{BatchKind, BatchReport};
use muster::error::DirectoryError;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::integration::{authed_manager, seeded_directory, user};
use muster::manager::DirectoryManager;

async fn manager_with_members(members: &[&str]) -> DirectoryManager {
    let dir = seeded_directory();
    dir.seed_user(&user("jdoe"));
    dir.seed_user(&user("mia"));
    let manager = authed_manager(dir).await;
    for member in members {
        manager.add_user_to_group(member, "staff").await.unwrap();
    }
    manager
}

async fn await_report(rx: tokio::sync::oneshot::Receiver<BatchReport>) -> BatchReport {
    rx.await.unwrap()
}

#[tokio::test]
async fn bulk_adds_report_through_the_add_channel() {
    let manager = manager_with_members(&[]).await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_users_to_group(
        vec!["jdoe".to_string(), "mia".to_string()],
        "staff",
        Some(Arc::new(move |name: &str, percent: f64| {
            seen.lock().push((name.to_string(), percent));
        })),
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    assert_eq!(report.kind, BatchKind::Import);
    assert_eq!(report.processed, 2);
    assert!(report.error().is_none());
    assert_eq!(
        *progress.lock(),
        vec![("jdoe".to_string(), 50.0), ("mia".to_string(), 100.0)]
    );
    // Membership keeps append order.
    assert_eq!(
        manager.group_members("staff").await.unwrap(),
        vec!["jdoe", "mia"]
    );

    manager.close().await;
}

#[tokio::test]
async fn bulk_removals_carry_the_group_in_their_progress() {
    let manager = manager_with_members(&["jdoe", "mia"]).await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let seen = progress.clone();
    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.remove_users_from_group(
        vec!["jdoe".to_string()],
        "staff",
        Some(Arc::new(move |name: &str, group: Option<&str>, percent| {
            seen.lock()
                .push((name.to_string(), group.map(str::to_string), percent));
        })),
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    assert_eq!(report.kind, BatchKind::Removal);
    assert_eq!(report.processed, 1);
    assert_eq!(
        *progress.lock(),
        vec![("jdoe".to_string(), Some("staff".to_string()), 100.0)]
    );
    assert_eq!(manager.group_members("staff").await.unwrap(), vec!["mia"]);

    manager.close().await;
}

#[tokio::test]
async fn adding_an_existing_member_is_idempotent() {
    let manager = manager_with_members(&["jdoe"]).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_users_to_group(
        vec!["jdoe".to_string(), "mia".to_string()],
        "staff",
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    // The duplicate is skipped, not failed, and not appended twice.
    assert_eq!(report.processed, 2);
    assert!(report.error().is_none());
    assert_eq!(
        manager.group_members("staff").await.unwrap(),
        vec!["jdoe", "mia"]
    );

    manager.close().await;
}

#[tokio::test]
async fn removing_a_non_member_is_idempotent() {
    let manager = manager_with_members(&["jdoe"]).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.remove_users_from_group(
        vec!["mia".to_string()],
        "staff",
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    assert_eq!(report.processed, 1);
    assert!(report.error().is_none());
    assert_eq!(manager.group_members("staff").await.unwrap(), vec!["jdoe"]);

    manager.close().await;
}

#[tokio::test]
async fn unknown_users_fail_per_item_and_the_rest_proceed() {
    let manager = manager_with_members(&[]).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_users_to_group(
        vec!["ghost".to_string(), "mia".to_string()],
        "staff",
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    assert_eq!(report.processed, 2);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::NoUserRecord(_))
    ));
    assert_eq!(manager.group_members("staff").await.unwrap(), vec!["mia"]);

    manager.close().await;
}

#[tokio::test]
async fn an_unknown_group_fails_each_membership_item() {
    let manager = manager_with_members(&[]).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    manager.add_users_to_group(
        vec!["jdoe".to_string()],
        "ghost",
        None,
        Some(Box::new(move |report| {
            let _ = tx.send(report);
        })),
    );
    let report = await_report(rx).await;

    assert_eq!(report.processed, 1);
    assert!(matches!(
        report.error(),
        Some(DirectoryError::NoGroupRecord(_))
    ));

    manager.close().await;
}

#[tokio::test]
async fn remove_all_clears_the_membership_in_one_operation() {
    let manager = manager_with_members(&["jdoe", "mia"]).await;

    manager.remove_all_users_from_group("staff").await.unwrap();
    assert!(manager.group_members("staff").await.unwrap().is_empty());
    assert!(!manager.is_member("jdoe", "staff").await.unwrap());

    assert!(matches!(
        manager.remove_all_users_from_group("ghost").await,
        Err(DirectoryError::NoGroupRecord(_))
    ));

    manager.close().await;
}
