//! Fan-out to several targets and backpressure on full queues

use std::time::Duration;

use nagflow::{
    filter::LineFilter,
    pipeline::PerfdataPipeline,
    printable::{Printable, RenderOptions},
    queue::TargetQueues,
    routing::RoutingFilter,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_every_target_renders_its_own_format() {
    let mut queues = TargetQueues::new();
    let influx = queues.register(influx_target("influx"), 8);
    let elastic = queues.register(elastic_target("elastic"), 8);
    let pipeline = PerfdataPipeline::new(queues, LineFilter::default(), RoutingFilter::all());

    assert_eq!(pipeline.process_line(HOST_LINE).await, 2);
    assert_eq!(influx.len(), 2);
    assert_eq!(elastic.len(), 2);

    let opts = RenderOptions::default();
    let from_influx = influx.recv_async().await.unwrap();
    let from_elastic = elastic.recv_async().await.unwrap();
    assert!(from_influx.print_for_influxdb("1.8", &opts).is_some());
    assert!(from_elastic
        .print_for_elasticsearch("7.0", "nagflow", &opts)
        .is_some_and(|bulk| bulk.lines().count() == 2));
}

#[tokio::test]
async fn test_default_target_restricts_routing() {
    let mut queues = TargetQueues::new();
    let influx = queues.register(influx_target("influx"), 8);
    let elastic = queues.register(elastic_target("elastic"), 8);
    let pipeline =
        PerfdataPipeline::new(queues, LineFilter::default(), RoutingFilter::new("influx"));

    assert_eq!(pipeline.process_line(SERVICE_LINE).await, 2);
    assert_eq!(influx.len(), 2);
    assert!(elastic.is_empty());
}

#[tokio::test]
async fn test_full_queue_drops_only_for_that_target() {
    let mut queues = TargetQueues::new();
    let slow = queues.register(influx_target("slow"), 1);
    let fast = queues.register(influx_target("fast"), 8);
    let pipeline = PerfdataPipeline::new(queues, LineFilter::default(), RoutingFilter::all())
        .with_delivery_timeout(Duration::from_millis(20));

    assert_eq!(pipeline.process_line(SERVICE_LINE).await, 2);
    assert_eq!(slow.len(), 1);
    assert_eq!(fast.len(), 2);
    assert_eq!(pipeline.queues().max_load(), 1.0);
}

#[tokio::test]
async fn test_blank_and_garbage_lines_yield_nothing() {
    let (pipeline, rx) = single_target_pipeline(8);
    assert_eq!(pipeline.process_line("").await, 0);
    assert_eq!(pipeline.process_line("   \r\n").await, 0);
    assert_eq!(pipeline.process_line("no separators at all").await, 0);
    assert!(rx.is_empty());
}
