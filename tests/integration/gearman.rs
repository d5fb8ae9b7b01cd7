//! Gearman worker against a mock job server

use std::time::Duration;

use nagflow::{
    gearman::{Decrypter, GearmanSettings, GearmanWorkerHandle},
    pause::PauseState,
};
use tokio_test::assert_ok;

use crate::helpers::*;

fn settings(address: String, secret: &str) -> GearmanSettings {
    GearmanSettings {
        address,
        queue: "perfdata".to_string(),
        secret: secret.to_string(),
        secret_file: None,
    }
}

async fn completed(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
    count: usize,
) -> Vec<String> {
    let mut handles = Vec::new();
    while handles.len() < count {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(handle)) => handles.push(handle),
            _ => break,
        }
    }
    handles
}

#[tokio::test]
async fn test_encrypted_jobs_are_processed() {
    let encrypter = Decrypter::from_secret("should_be_changed").unwrap();
    let payloads = vec![
        encrypter.encrypt(SERVICE_LINE.as_bytes()),
        encrypter.encrypt(HOST_LINE.as_bytes()),
    ];
    let (address, mut done) = mock_gearmand(payloads).await;

    let (pipeline, rx) = single_target_pipeline(16);
    let worker = GearmanWorkerHandle::spawn(
        0,
        settings(address, "should_be_changed"),
        pipeline,
        PauseState::new(),
    )
    .unwrap();

    assert_eq!(completed(&mut done, 2).await, vec!["H:mock:0", "H:mock:1"]);
    assert!(wait_for(Duration::from_secs(5), || rx.len() == 4).await);

    assert_ok!(worker.shutdown().await);
}

#[tokio::test]
async fn test_plain_jobs_without_secret() {
    let (address, mut done) = mock_gearmand(vec![SERVICE_LINE.to_string()]).await;

    let (pipeline, rx) = single_target_pipeline(16);
    let worker = GearmanWorkerHandle::spawn(0, settings(address, ""), pipeline, PauseState::new())
        .unwrap();

    assert_eq!(completed(&mut done, 1).await.len(), 1);
    assert!(wait_for(Duration::from_secs(5), || rx.len() == 2).await);

    assert_ok!(worker.shutdown().await);
}

#[tokio::test]
async fn test_undecryptable_job_is_still_completed() {
    let (address, mut done) = mock_gearmand(vec!["this is not encrypted".to_string()]).await;

    let (pipeline, rx) = single_target_pipeline(16);
    let worker =
        GearmanWorkerHandle::spawn(0, settings(address, "secret"), pipeline, PauseState::new())
            .unwrap();

    assert_eq!(completed(&mut done, 1).await.len(), 1);
    assert!(rx.is_empty());

    assert_ok!(worker.shutdown().await);
}

#[tokio::test]
async fn test_worker_stops_while_server_is_unreachable() {
    let (pipeline, _rx) = single_target_pipeline(16);
    let worker = GearmanWorkerHandle::spawn(
        0,
        settings("127.0.0.1:1".to_string(), ""),
        pipeline,
        PauseState::new(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stopped = tokio::time::timeout(Duration::from_secs(2), worker.shutdown()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
}
