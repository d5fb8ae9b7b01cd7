//! Cache builder and collector against a mock livestatus server

use std::time::Duration;

use nagflow::{
    filter::LineFilter,
    livestatus::{
        CacheBuilderHandle, ConnectionType, Connector, Flavor, LivestatusCollectorHandle,
        collector::{CollectorSettings, QueryFilters},
    },
    printable::{Printable, RenderOptions},
    queue::TargetQueues,
};
use tokio_test::assert_ok;

use crate::helpers::*;

fn downtime_server_responses() -> Vec<(&'static str, String)> {
    vec![
        (
            "Columns: id start_time entry_time",
            "1;0;1\n2;2;3\n3;0;1\n4;1;2\n5;2;1\n".to_string(),
        ),
        ("GET hosts", "3,4;host1\n5;host2\n".to_string()),
        ("GET services", "1,2;host1;service1\n".to_string()),
    ]
}

fn connector(server: &MockLivestatus) -> Connector {
    Connector::new(server.address.clone(), ConnectionType::Tcp)
        .with_read_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn test_cache_builder_builds_index() {
    let server = MockLivestatus::start(downtime_server_responses()).await;
    let cache = CacheBuilderHandle::spawn_with_interval(connector(&server), Duration::from_secs(3600));

    let hosts = cache.refresh_now().await.unwrap();
    assert_eq!(hosts, 2);

    assert!(cache.is_in_downtime("host1", "service1", "1"));
    assert!(cache.is_in_downtime("host1", "", "5"));
    assert!(cache.is_in_downtime("host2", "", "2"));
    assert!(!cache.is_in_downtime("host2", "", "1"));
    assert!(!cache.is_in_downtime("host3", "", "10"));

    assert_ok!(cache.shutdown().await);
}

#[tokio::test]
async fn test_downtime_tag_on_samples() {
    let server = MockLivestatus::start(vec![
        ("Columns: id start_time entry_time", "7;1441790000;1441790000\n".to_string()),
        ("GET services", "7;xxx;range\n".to_string()),
    ])
    .await;
    let cache = CacheBuilderHandle::spawn_with_interval(connector(&server), Duration::from_secs(3600));
    assert_eq!(cache.refresh_now().await.unwrap(), 1);

    let (pipeline, rx) = single_target_pipeline(16);
    let pipeline = pipeline.with_downtime_cache(cache.cache());

    assert_eq!(pipeline.process_line(SERVICE_LINE).await, 2);
    let event = rx.recv_async().await.unwrap();
    let line = event
        .print_for_influxdb("1.8", &RenderOptions::default())
        .unwrap();
    assert!(line.contains(",downtime=true"), "{line}");

    assert_ok!(cache.shutdown().await);
}

#[tokio::test]
async fn test_unreachable_livestatus_gives_empty_index() {
    let cache = CacheBuilderHandle::spawn_with_interval(
        Connector::new("127.0.0.1:1", ConnectionType::Tcp),
        Duration::from_secs(3600),
    );
    assert_eq!(cache.refresh_now().await.unwrap(), 0);
    assert_ok!(cache.shutdown().await);
}

#[tokio::test]
async fn test_collector_delivers_events() {
    let server = MockLivestatus::start(vec![
        (
            "GET log",
            "SERVICE NOTIFICATION;1500000000;admin;x;web01;http;CRITICAL;notify;connection refused\n"
                .to_string(),
        ),
        (
            "GET comments",
            "web01;http;looking into it;1500000000;admin;1\n".to_string(),
        ),
        (
            "Columns: host_name service_display_name comment entry_time author end_time",
            "web01;;maintenance;1500000000;admin;1500003600\nbroken row\n".to_string(),
        ),
    ])
    .await;

    let mut queues = TargetQueues::new();
    let rx = queues.register(influx_target("influx"), 64);
    let settings = CollectorSettings {
        flavor: Some(Flavor::Naemon),
        ..CollectorSettings::default()
    };
    let collector = LivestatusCollectorHandle::spawn(connector(&server), queues, settings);

    let events = collector.query_now().await.unwrap();
    assert_eq!(events, 3);
    assert!(rx.len() >= 3);

    let queries = server.queries.lock().clone();
    assert!(queries.iter().all(|query| !query.contains("%d")));
    assert!(queries.iter().any(|query| query.contains("Filter: time > ")));

    assert_ok!(collector.shutdown().await);
}

#[tokio::test]
async fn test_collector_applies_filters() {
    let server = MockLivestatus::start(vec![(
        "GET comments",
        "web01;http;keep me;1500000000;admin;1\ndb01;mysql;drop me;1500000000;admin;1\n"
            .to_string(),
    )])
    .await;

    let mut queues = TargetQueues::new();
    let _rx = queues.register(influx_target("influx"), 64);
    let settings = CollectorSettings {
        flavor: Some(Flavor::Icinga2),
        filters: QueryFilters {
            comments: vec!["Filter: author = admin".to_string()],
            ..QueryFilters::default()
        },
        line_filter: LineFilter::new(&["web01".to_string()]),
        ..CollectorSettings::default()
    };
    let collector = LivestatusCollectorHandle::spawn(connector(&server), queues, settings);

    assert_eq!(collector.query_now().await.unwrap(), 1);

    let queries = server.queries.lock().clone();
    assert!(queries
        .iter()
        .any(|query| query.starts_with("GET comments") && query.contains("Filter: author = admin")));
    assert!(queries
        .iter()
        .any(|query| query.starts_with("GET log") && query.contains("Negate:")));

    assert_ok!(collector.shutdown().await);
}

#[tokio::test]
async fn test_collector_detects_flavor() {
    let server = MockLivestatus::start(vec![
        ("GET status", "r2.10.2-1\n".to_string()),
    ])
    .await;

    let queues = TargetQueues::new();
    let collector =
        LivestatusCollectorHandle::spawn(connector(&server), queues, CollectorSettings::default());

    let mut detected = false;
    for _ in 0..100 {
        if collector.query_now().await.is_ok() {
            detected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(detected);

    let queries = server.queries.lock().clone();
    assert!(queries.iter().any(|query| query.contains("Negate:")));

    assert_ok!(collector.shutdown().await);
}
