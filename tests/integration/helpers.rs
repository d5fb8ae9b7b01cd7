//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use nagflow::{
    filter::LineFilter,
    gearman::{Packet, PacketType},
    pipeline::PerfdataPipeline,
    printable::{Datatype, Event, Target},
    queue::TargetQueues,
    routing::RoutingFilter,
};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const SERVICE_LINE: &str = "DATATYPE::SERVICEPERFDATA\tTIMET::1441791000\tHOSTNAME::xxx\tSERVICEDESC::range\tSERVICEPERFDATA::a used=4 b=5%;80;90\tSERVICECHECKCOMMAND::check_ranges!-w 3\tSERVICESTATE::0";

pub const HOST_LINE: &str = "DATATYPE::HOSTPERFDATA\tTIMET::1749111379\tHOSTNAME::dev_host_098\tHOSTPERFDATA::rta=0.014ms;3000.000;5000.000;0; pl=0%;80;100;0;100\tHOSTCHECKCOMMAND::check-host-alive\tHOSTSTATE::UP";

pub fn influx_target(name: &str) -> Target {
    Target::new(name, Datatype::InfluxDb, "1.8")
}

pub fn elastic_target(name: &str) -> Target {
    Target::new(name, Datatype::Elasticsearch, "7.0").with_index("nagflow")
}

/// Pipeline feeding a single influx target
pub fn single_target_pipeline(capacity: usize) -> (PerfdataPipeline, flume::Receiver<Event>) {
    let mut queues = TargetQueues::new();
    let rx = queues.register(influx_target("influx"), capacity);
    let pipeline = PerfdataPipeline::new(queues, LineFilter::default(), RoutingFilter::all())
        .with_delivery_timeout(Duration::from_millis(100));
    (pipeline, rx)
}

/// Wait until `check` holds, polling every 10ms
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A livestatus server answering queries by substring.
///
/// The first response whose pattern is contained in the query is written
/// back, unknown queries get an empty answer.
pub struct MockLivestatus {
    pub address: String,
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl MockLivestatus {
    pub async fn start(responses: Vec<(&'static str, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let queries = Arc::new(Mutex::new(Vec::new()));
        let responses = Arc::new(responses);

        let seen = queries.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let responses = responses.clone();
                let seen = seen.clone();

                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream);
                    let mut query = String::new();
                    loop {
                        let mut line = String::new();
                        match reader.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) if line == "\n" => break,
                            Ok(_) => query.push_str(&line),
                        }
                    }

                    let answer = responses
                        .iter()
                        .find(|(pattern, _)| query.contains(pattern))
                        .map(|(_, answer)| answer.clone())
                        .unwrap_or_default();
                    seen.lock().push(query);

                    let mut stream = reader.into_inner();
                    let _ = stream.write_all(answer.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { address, queries }
    }
}

/// A gearman job server that hands out the given payloads once.
///
/// The handles of completed jobs are reported on the returned receiver.
pub async fn mock_gearmand(payloads: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let (completed_tx, completed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut jobs = payloads.into_iter().enumerate();

        while let Ok(packet) = Packet::read_from(&mut stream).await {
            let reply = match packet.kind {
                PacketType::GrabJob => Some(match jobs.next() {
                    Some((i, payload)) => Packet::response(
                        PacketType::JobAssign,
                        vec![
                            format!("H:mock:{i}").into_bytes(),
                            b"perfdata".to_vec(),
                            payload.into_bytes(),
                        ],
                    ),
                    None => Packet::response(PacketType::NoJob, Vec::new()),
                }),
                PacketType::WorkComplete => {
                    let _ =
                        completed_tx.send(String::from_utf8_lossy(packet.arg(0)).to_string());
                    None
                }
                _ => None,
            };

            if let Some(reply) = reply {
                if reply.write_to(&mut stream).await.is_err() {
                    break;
                }
            }
        }
    });

    (address, completed_rx)
}
