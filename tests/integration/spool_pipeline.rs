//! Spool folder to target queue, end to end

use std::time::Duration;

use nagflow::{
    Stoppable,
    filter::LineFilter,
    pause::PauseState,
    pipeline::PerfdataPipeline,
    printable::{Printable, RenderOptions},
    queue::TargetQueues,
    routing::RoutingFilter,
    spoolfile::{SpoolCollectorHandle, SpoolSettings},
};

use crate::helpers::*;

fn settings(folder: &std::path::Path, workers: usize) -> SpoolSettings {
    SpoolSettings {
        min_file_age: Duration::ZERO,
        scan_interval: Duration::from_secs(3600),
        ..SpoolSettings::new(folder, workers)
    }
}

#[tokio::test]
async fn test_spool_file_is_processed_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("perfdata.1441791000");
    std::fs::write(&file, format!("{SERVICE_LINE}\n{HOST_LINE}\n")).unwrap();

    let (pipeline, rx) = single_target_pipeline(16);
    let collector = SpoolCollectorHandle::spawn(settings(dir.path(), 2), pipeline, PauseState::new());

    assert!(wait_for(Duration::from_secs(5), || !file.exists()).await);
    assert!(wait_for(Duration::from_secs(5), || rx.len() == 4).await);

    let opts = RenderOptions::default();
    let lines: Vec<String> = rx
        .drain()
        .filter_map(|event| event.print_for_influxdb("1.8", &opts))
        .collect();

    assert!(lines.contains(
        &r"metrics,host=xxx,service=range,command=check_ranges,performanceLabel=a\ used value=4.0 1441791000000"
            .to_string()
    ));
    assert!(lines.iter().any(|line| line.starts_with(
        "metrics,host=dev_host_098,service=hostcheck,command=check-host-alive,performanceLabel=rta,crit-fill=none,warn-fill=none,unit=ms "
    )));

    collector.stop().await.unwrap();
}

#[tokio::test]
async fn test_directories_are_counted_but_not_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let (pipeline, _rx) = single_target_pipeline(16);
    let collector = SpoolCollectorHandle::spawn(settings(dir.path(), 1), pipeline, PauseState::new());

    let report = collector.scan_now().await.unwrap();
    assert_eq!(report.files_total, 1);
    assert_eq!(report.dispatched, 0);
    assert!(dir.path().join("subdir").exists());

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_spool_lines_are_routed_by_target_directive() {
    let dir = tempfile::tempdir().unwrap();
    let routed = SERVICE_LINE.replace("HOSTNAME::", "NAGFLUX:TARGET::elastic\tHOSTNAME::");
    std::fs::write(dir.path().join("routed"), routed).unwrap();

    let mut queues = TargetQueues::new();
    let influx = queues.register(influx_target("influx"), 16);
    let elastic = queues.register(elastic_target("elastic"), 16);
    let pipeline = PerfdataPipeline::new(queues, LineFilter::default(), RoutingFilter::all());

    let collector = SpoolCollectorHandle::spawn(settings(dir.path(), 1), pipeline, PauseState::new());

    assert!(wait_for(Duration::from_secs(5), || elastic.len() == 2).await);
    assert!(influx.is_empty());

    let event = elastic.recv_async().await.unwrap();
    let bulk = event
        .print_for_elasticsearch("7.0", "nagflow", &RenderOptions::default())
        .unwrap();
    assert!(bulk.contains(r#""_index":"nagflow-2015.09""#), "{bulk}");

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_line_filter_keeps_matching_lines() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mixed"), format!("{SERVICE_LINE}\n{HOST_LINE}\n")).unwrap();

    let mut queues = TargetQueues::new();
    let rx = queues.register(influx_target("influx"), 16);
    let filter = LineFilter::new(&["check-host-alive".to_string()]);
    let pipeline = PerfdataPipeline::new(queues, filter, RoutingFilter::all());

    let collector = SpoolCollectorHandle::spawn(settings(dir.path(), 1), pipeline, PauseState::new());

    assert!(wait_for(Duration::from_secs(5), || !dir.path().join("mixed").exists()).await);
    assert!(wait_for(Duration::from_secs(5), || rx.len() == 2).await);
    assert!(rx.drain().all(|event| {
        event
            .print_for_influxdb("1.8", &RenderOptions::default())
            .is_some_and(|line| line.contains("host=dev_host_098"))
    }));

    collector.shutdown().await.unwrap();
}
