//! Architectural Contract Test: Shutdown Determinism
//!
//! This test verifies that shutdown is deterministic and complete.
//!
//! Constraints verified:
//! - The controller terminates when the shared token is cancelled
//! - All workers exit, even one stuck inside a catalog call
//! - No worker keeps collaborators alive after `run` returns
//! - Cancelling repeatedly, or before start, is safe
//!
//! If this test fails, someone has added:
//! - Detached background tasks
//! - Workers that ignore cancellation

mod common;

use common::*;
use dyncat_core::{CatalogBackend, Controller, ControllerEvent, ControllerConfig, ResourceSource};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn controller(
    backend: &Arc<RecordingBackend>,
    source: &Arc<ScriptedSource>,
    config: ControllerConfig,
) -> (Controller<TestDb>, tokio::sync::mpsc::Receiver<ControllerEvent>) {
    Controller::<TestDb>::new(
        Arc::clone(source) as Arc<dyn ResourceSource<Resource = TestDb>>,
        Arc::new(TestDbMapper),
        Arc::clone(backend) as Arc<dyn CatalogBackend>,
        config,
    )
    .expect("controller construction succeeds")
}

#[tokio::test]
async fn cancellation_terminates_controller() {
    let backend = Arc::new(RecordingBackend::new());
    let source = Arc::new(ScriptedSource::new(vec![db("db-1", "10.0.0.1", 5432)]));
    let (controller, mut events) = controller(&backend, &source, minimal_config());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.run(cancel.clone()));

    next_pass(&mut events).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "Controller should terminate within 5 seconds");
    result.unwrap().unwrap().expect("clean shutdown");

    let reason = next_event(&mut events, |event| match event {
        ControllerEvent::Stopped { reason } => Some(reason),
        _ => None,
    })
    .await;
    assert_eq!(reason, "Shutdown signal");
}

#[tokio::test]
async fn shutdown_interrupts_stuck_write() {
    let backend = Arc::new(RecordingBackend::new());
    backend.hang_writes();
    let source = Arc::new(ScriptedSource::new(vec![db("db-1", "10.0.0.1", 5432)]));

    let mut config = minimal_config();
    config.writer.write_timeout_secs = 3600;
    let (controller, _events) = controller(&backend, &source, config);

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.run(cancel.clone()));

    // Wait until the writer is blocked inside the catalog call
    while backend.writes().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "A stuck write must not block shutdown");
}

#[tokio::test]
async fn workers_release_collaborators_after_shutdown() {
    let backend = Arc::new(RecordingBackend::new());
    let source = Arc::new(ScriptedSource::new(vec![db("db-1", "10.0.0.1", 5432)]));
    let (controller, mut events) = controller(&backend, &source, minimal_config());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.run(cancel.clone()));
    next_pass(&mut events).await;

    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(Arc::strong_count(&backend), 1, "backend still referenced by a worker");
    assert_eq!(Arc::strong_count(&source), 1, "source still referenced by a worker");
}

#[tokio::test]
async fn multiple_cancellations_are_safe() {
    let backend = Arc::new(RecordingBackend::new());
    let source = Arc::new(ScriptedSource::new(vec![]));
    let (controller, _events) = controller(&backend, &source, minimal_config());

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn cancelled_before_start_returns_immediately() {
    let backend = Arc::new(RecordingBackend::new());
    let source = Arc::new(ScriptedSource::new(vec![db("db-1", "10.0.0.1", 5432)]));
    let (controller, _events) = controller(&backend, &source, minimal_config());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), controller.run(cancel)).await;
    assert!(result.is_ok());
    assert!(result.unwrap().is_ok());
}
