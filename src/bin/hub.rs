use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use nagflow::{
    Stoppable,
    config::{Config, read_config_file},
    filter::LineFilter,
    gearman::{GearmanSettings, GearmanWorkerHandle},
    livestatus::{
        CacheBuilderHandle, Connector, Flavor, LivestatusCollectorHandle,
        collector::{CollectorSettings, QueryFilters},
    },
    pause::{PauseState, SharedPauseState},
    pipeline::PerfdataPipeline,
    printable::{Event, RenderOptions, Target},
    queue::TargetQueues,
    routing::RoutingFilter,
    spoolfile::{SpoolCollectorHandle, SpoolSettings},
};
use tokio::{spawn, task::JoinHandle};
use tracing::{debug, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long the drains get to empty their queues on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("nagflow", level),
        ("nagflow_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn log_level(severity: &str) -> LevelFilter {
    severity.parse().unwrap_or(LevelFilter::INFO)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to load config from {}", args.file))?;
    init(log_level(&config.log.min_severity));
    trace!("started with args: {args:?}");

    config.validate().context("invalid configuration")?;

    let pause = PauseState::new();
    let (queues, drains) = dispatch_targets(&config, &pause);

    let components = start_collectors(&config, &queues, &pause)?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received interrupt, shutting down");

    for component in components.iter().rev() {
        debug!("stopping {}", component.name());
        if let Err(e) = component.stop().await {
            warn!("failed to stop {}: {e:#}", component.name());
        }
    }

    for queue in queues.queues() {
        info!(target_name = %queue.target, remaining = queue.len(), "target queue");
    }

    drop(components);
    drop(queues);
    if tokio::time::timeout(DRAIN_TIMEOUT, join_all(drains))
        .await
        .is_err()
    {
        warn!("target drains did not finish within {DRAIN_TIMEOUT:?}");
    }

    info!("stopped");
    Ok(())
}

/// Create one queue and one stdout drain per enabled target
fn dispatch_targets(
    config: &Config,
    pause: &SharedPauseState,
) -> (TargetQueues, Vec<JoinHandle<()>>) {
    let opts = config.render_options();
    let mut queues = TargetQueues::new();
    let mut drains = vec![];

    for target in config.enabled_targets() {
        pause.register(&target.name);
        let rx = queues.register(target.clone(), config.main.buffer_size);
        drains.push(spawn(drain_target(target, rx, opts.clone())));
    }

    (queues, drains)
}

#[instrument(skip_all, fields(target_name = %target))]
async fn drain_target(target: Target, rx: flume::Receiver<Event>, opts: RenderOptions) {
    debug!("starting target drain");

    while let Ok(event) = rx.recv_async().await {
        match event.render(&target, &opts) {
            Some(text) => println!("{text}"),
            None => trace!("event has no rendering for {}", target.version),
        }
    }

    debug!("target queue closed");
}

fn start_collectors(
    config: &Config,
    queues: &TargetQueues,
    pause: &SharedPauseState,
) -> anyhow::Result<Vec<Box<dyn Stoppable>>> {
    let mut components: Vec<Box<dyn Stoppable>> = vec![];
    let mut collectors = 0;

    let line_filter = LineFilter::with_fields(
        &config.filter.spool_file_line_terms,
        &config.filter.field_filter,
    );
    let mut pipeline = PerfdataPipeline::new(
        queues.clone(),
        line_filter,
        RoutingFilter::new(config.main.default_target.clone()),
    );

    if config.livestatus.enabled {
        let connector = Connector::new(
            config.livestatus.address.clone(),
            config.livestatus.connection_type,
        );

        let cache = CacheBuilderHandle::spawn(connector.clone());
        pipeline = pipeline.with_downtime_cache(cache.cache());
        components.push(Box::new(cache));

        let flavor = config
            .livestatus
            .version
            .as_deref()
            .filter(|version| !version.is_empty())
            .map(str::parse::<Flavor>)
            .transpose()
            .map_err(anyhow::Error::msg)?;

        let settings = CollectorSettings {
            flavor,
            minutes_to_wait: config.livestatus.minutes_to_wait,
            filters: QueryFilters {
                notifications: config.filter.livestatus_notifications_filter.clone(),
                comments: config.filter.livestatus_comments_filter.clone(),
                downtimes: config.filter.livestatus_downtimes_filter.clone(),
            },
            line_filter: LineFilter::new(&config.filter.livestatus_line_terms),
            field_separator: config.main.field_separator.clone(),
            ..CollectorSettings::default()
        };
        components.push(Box::new(LivestatusCollectorHandle::spawn(
            connector,
            queues.clone(),
            settings,
        )));
        collectors += 1;
        info!(address = %config.livestatus.address, "livestatus collector started");
    }

    if config.nagios_spoolfile.enabled {
        if let (Some(folder), Some(worker_count)) =
            (config.spool_folder(), config.spool_worker_count())
        {
            info!(folder = %folder.display(), worker_count, "spool file collector started");
            let settings = SpoolSettings::new(folder, worker_count);
            components.push(Box::new(SpoolCollectorHandle::spawn(
                settings,
                pipeline.clone(),
                pause.clone(),
            )));
            collectors += 1;
        }
    }

    let mut gearman_names: Vec<_> = config
        .mod_gearman
        .iter()
        .filter(|(_, gearman)| gearman.enabled)
        .collect();
    gearman_names.sort_by(|a, b| a.0.cmp(b.0));

    for (name, gearman) in gearman_names {
        let settings = GearmanSettings {
            address: gearman.address.clone(),
            queue: gearman.queue.clone(),
            secret: gearman.secret.clone(),
            secret_file: gearman.secret_file.clone(),
        };
        for id in 0..gearman.worker {
            let worker =
                GearmanWorkerHandle::spawn(id, settings.clone(), pipeline.clone(), pause.clone())
                    .with_context(|| format!("failed to start gearman worker {name}"))?;
            components.push(Box::new(worker));
            collectors += 1;
        }
        info!(name, address = %gearman.address, workers = gearman.worker, "gearman workers started");
    }

    if collectors == 0 {
        anyhow::bail!("no collector is enabled");
    }

    Ok(components)
}
