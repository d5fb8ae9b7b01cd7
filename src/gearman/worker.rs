//! Gearman worker
//!
//! ```text
//!                 ┌──────────── throttle (load, pause) ────────────┐
//!                 ▼                                                │
//! gearmand → GRAB_JOB → JOB_ASSIGN → decrypt → pipeline → WORK_COMPLETE
//!     ↑
//!     └─── reconnect after 10s on any connection failure
//! ```
//!
//! The actor owns two throttle checks. One locks job intake while any target
//! queue is above 90% of its capacity, the other follows the global pause
//! state. The session task only grabs a job while neither lock is held.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::{debug, info, instrument, trace, warn};

use super::GearmanError;
use super::protocol::{Packet, PacketType};
use super::secret::{Decrypter, get_secret};
use crate::Stoppable;
use crate::messages::WorkerCommand;
use crate::pause::SharedPauseState;
use crate::pipeline::PerfdataPipeline;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Queue fill level above which job intake is locked
pub const LOAD_LIMIT: f64 = 0.9;

pub const LOAD_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Re-check interval while locked because of load
pub const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const PAUSE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct GearmanSettings {
    pub address: String,
    pub queue: String,
    pub secret: String,
    pub secret_file: Option<PathBuf>,
}

/// Decrypts a job and runs it through the pipeline
#[derive(Debug, Clone)]
pub struct JobHandler {
    decrypter: Option<Arc<Decrypter>>,
    pipeline: PerfdataPipeline,
}

impl JobHandler {
    pub fn new(decrypter: Option<Decrypter>, pipeline: PerfdataPipeline) -> Self {
        Self {
            decrypter: decrypter.map(Arc::new),
            pipeline,
        }
    }

    /// Process one job payload, returns the number of samples.
    ///
    /// Payloads that fail to decrypt are logged and dropped.
    pub async fn handle_job(&self, payload: &[u8]) -> usize {
        let plain = match &self.decrypter {
            Some(decrypter) => match decrypter.decrypt(payload) {
                Ok(plain) => plain,
                Err(e) => {
                    warn!(
                        "could not decrypt gearman job: {e}, data: {}",
                        String::from_utf8_lossy(payload)
                    );
                    return 0;
                }
            },
            None => payload.to_vec(),
        };

        let text = String::from_utf8_lossy(&plain);
        debug!("gearman job: {text}");

        let mut samples = 0;
        for line in text.lines() {
            samples += self.pipeline.process_line(line).await;
        }
        samples
    }
}

/// Reasons job intake is held back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throttle {
    pub load: bool,
    pub pause: bool,
}

impl Throttle {
    pub fn is_locked(&self) -> bool {
        self.load || self.pause
    }
}

/// One connection: register, then grab jobs until something fails
async fn session(
    settings: &GearmanSettings,
    handler: &JobHandler,
    throttle: &mut watch::Receiver<Throttle>,
) -> Result<(), GearmanError> {
    let stream = TcpStream::connect(&settings.address)
        .await
        .map_err(|source| GearmanError::Connect {
            address: settings.address.clone(),
            source,
        })?;
    let mut stream = BufReader::new(stream);

    Packet::can_do(&settings.queue)
        .write_to(&mut stream)
        .await?;
    info!("gearman worker ready");

    let grab_job = Packet::request(PacketType::GrabJob, Vec::new());
    let pre_sleep = Packet::request(PacketType::PreSleep, Vec::new());

    loop {
        if throttle.borrow().is_locked() {
            debug!("job intake locked");
            if throttle.wait_for(|t| !t.is_locked()).await.is_err() {
                return Ok(());
            }
            debug!("job intake unlocked");
        }

        grab_job.write_to(&mut stream).await?;
        let packet = Packet::read_from(&mut stream).await?;

        match packet.kind {
            PacketType::JobAssign => {
                let handle = packet.arg(0);
                let payload = packet.arg(2);
                trace!(handle = %String::from_utf8_lossy(handle), "job assigned");

                handler.handle_job(payload).await;
                Packet::work_complete(handle, payload)
                    .write_to(&mut stream)
                    .await?;
            }
            PacketType::NoJob => {
                pre_sleep.write_to(&mut stream).await?;
                loop {
                    let wakeup = Packet::read_from(&mut stream).await?;
                    if wakeup.kind == PacketType::Noop {
                        break;
                    }
                    trace!(kind = ?wakeup.kind, "ignoring packet while sleeping");
                }
            }
            PacketType::Noop => {}
            PacketType::Error => {
                return Err(GearmanError::Server {
                    code: String::from_utf8_lossy(packet.arg(0)).to_string(),
                    message: String::from_utf8_lossy(packet.arg(1)).to_string(),
                });
            }
            other => {
                return Err(GearmanError::Protocol(format!(
                    "unexpected {other:?} packet"
                )));
            }
        }
    }
}

/// Keep a session alive, reconnecting after failures, until stopped
async fn work_loop(
    settings: GearmanSettings,
    handler: JobHandler,
    mut throttle: watch::Receiver<Throttle>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let result = tokio::select! {
            result = session(&settings, &handler, &mut throttle) => result,
            _ = stop.changed() => break,
        };
        if let Err(e) = result {
            warn!(address = %settings.address, "gearman worker failed: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = stop.changed() => break,
        }
    }
}

pub struct GearmanWorkerActor {
    id: usize,
    settings: GearmanSettings,
    handler: JobHandler,
    pause: SharedPauseState,
    command_rx: mpsc::Receiver<WorkerCommand>,
}

impl GearmanWorkerActor {
    #[instrument(skip(self), fields(worker = self.id, queue = %self.settings.queue))]
    pub async fn run(mut self) {
        debug!("starting gearman worker");

        let (throttle_tx, throttle_rx) = watch::channel(Throttle::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let session = tokio::spawn(work_loop(
            self.settings.clone(),
            self.handler.clone(),
            throttle_rx,
            stop_rx,
        ));

        let mut load_ticker = interval(LOAD_CHECK_INTERVAL);
        let mut pause_ticker = interval(PAUSE_CHECK_INTERVAL);

        let shutdown_ack = loop {
            tokio::select! {
                _ = load_ticker.tick() => {
                    let overloaded = self.handler.pipeline.queues().max_load() > LOAD_LIMIT;
                    if overloaded != throttle_tx.borrow().load {
                        debug!(overloaded, "target queue load changed");
                        throttle_tx.send_modify(|t| t.load = overloaded);
                        load_ticker = interval(if overloaded {
                            LOAD_POLL_INTERVAL
                        } else {
                            LOAD_CHECK_INTERVAL
                        });
                    }
                }

                _ = pause_ticker.tick() => {
                    let paused = self.pause.is_any_target_paused();
                    if paused != throttle_tx.borrow().pause {
                        info!(paused, "gearman worker pause changed");
                        throttle_tx.send_modify(|t| t.pause = paused);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WorkerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            break Some(respond_to);
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break None;
                }
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = session.await {
            warn!("gearman session task failed: {e}");
        }
        if let Some(respond_to) = shutdown_ack {
            let _ = respond_to.send(());
        }

        debug!("gearman worker stopped");
    }
}

#[derive(Clone)]
pub struct GearmanWorkerHandle {
    sender: mpsc::Sender<WorkerCommand>,
    pub id: usize,
    pub address: String,
}

impl GearmanWorkerHandle {
    /// Spawn one worker. Fails if the secret cannot be read or used.
    pub fn spawn(
        id: usize,
        settings: GearmanSettings,
        pipeline: PerfdataPipeline,
        pause: SharedPauseState,
    ) -> Result<Self> {
        let secret = get_secret(&settings.secret, settings.secret_file.as_deref())
            .context("failed to read mod_gearman secret file")?;
        let decrypter = if secret.is_empty() {
            None
        } else {
            Some(Decrypter::from_secret(&secret).context("invalid mod_gearman secret")?)
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let address = settings.address.clone();

        let actor = GearmanWorkerActor {
            id,
            settings,
            handler: JobHandler::new(decrypter, pipeline),
            pause,
            command_rx: cmd_rx,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            id,
            address,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await
            .context("gearman worker did not acknowledge shutdown")
    }
}

#[async_trait]
impl Stoppable for GearmanWorkerHandle {
    fn name(&self) -> &str {
        "gearman worker"
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown().await
    }
}
