//! blipsub – drives a queue with a mix of consuming, browsing and system
//! subscriptions, or validates a config file.
//
//  $ blipsub simulate --messages 1000 --consumers 3 --browsers 1
//  $ blipsub check-config --config blipsub.toml
use blipsub::config::{load_config, Config};
use blipsub::core::consumer::{ClientOptions, Consumer, Selector, SystemConsumer};
use blipsub::core::cursor::SubscriptionType;
use blipsub::core::message::new_message;
use blipsub::core::ownership::OwnershipToken;
use blipsub::logging::init_logging_with;
use blipsub::{Queue, QueueSettings, Session};

use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "blipsub", version, about = "BlipMQ subscription core simulator")]
struct Cli {
    /// Path to config TOML (env BLIPSUB_CONFIG overrides)
    #[arg(short, long, default_value = "blipsub.toml", global = true)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Publish messages to an in-memory queue and deliver them to subscribers.
    Simulate {
        /// Number of messages to publish
        #[arg(short, long, default_value_t = 100)]
        messages: usize,
        /// Consuming subscriptions
        #[arg(long, default_value_t = 2)]
        consumers: usize,
        /// Browsing subscriptions
        #[arg(long, default_value_t = 1)]
        browsers: usize,
        /// Header selector (key=value) applied to consuming subscriptions
        #[arg(long)]
        selector: Option<Selector>,
        /// Attach an uncounted system subscription that mirrors every message
        #[arg(long)]
        mirror: bool,
    },
    /// Load the config file and print the resolved values.
    CheckConfig,
}

fn resolve_config(path: &str) -> anyhow::Result<Config> {
    let path = std::env::var("BLIPSUB_CONFIG").unwrap_or_else(|_| path.to_string());
    let mut cfg = match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("⚠️  {e:#}; using defaults");
            Config::default()
        }
    };
    cfg.apply_env_overrides()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;
    init_logging_with(&cfg.logging.level)?;

    match cli.cmd {
        Command::CheckConfig => {
            println!("{cfg:#?}");
        }
        Command::Simulate {
            messages,
            consumers,
            browsers,
            selector,
            mirror,
        } => simulate(&cfg, messages, consumers, browsers, selector, mirror).await?,
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────
async fn simulate(
    cfg: &Config,
    messages: usize,
    consumers: usize,
    browsers: usize,
    selector: Option<Selector>,
    mirror: bool,
) -> anyhow::Result<()> {
    let queue = Arc::new(Queue::new("simulation", QueueSettings::from(&cfg.queues)));
    let session = Arc::new(Session::with_prefix(&cfg.consumers.name_prefix));

    let mut names = Vec::new();
    for _ in 0..consumers {
        let mut options = ClientOptions::consume().with_capacity(cfg.consumers.delivery_capacity);
        if let Some(selector) = &selector {
            options = options.with_selector(selector.clone());
        }
        names.push(session.subscribe(&queue, options)?.name().to_string());
    }
    for _ in 0..browsers {
        let options = ClientOptions::browse().with_capacity(cfg.consumers.delivery_capacity);
        names.push(session.subscribe(&queue, options)?.name().to_string());
    }

    let mirrored = Arc::new(AtomicU64::new(0));
    let mirror_consumer: Option<Arc<dyn Consumer>> = if mirror {
        let counter = Arc::clone(&mirrored);
        let system: Arc<dyn Consumer> = Arc::new(
            SystemConsumer::new(
                format!("{}-mirror", cfg.consumers.name_prefix),
                SubscriptionType::Browser,
                OwnershipToken::new(),
                move |_, _| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    true
                },
            )
            .replicating(),
        );
        queue.consume(&system, false)?;
        Some(system)
    } else {
        None
    };

    // Pumps: one per subscription, parked until notified.
    let pumps: Vec<_> = names
        .iter()
        .cloned()
        .map(|name| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.serve(&name).await })
        })
        .collect();

    // Readers drain each delivery channel until it stays idle.
    let readers: Vec<_> = names
        .iter()
        .filter_map(|name| session.subscription(name))
        .map(|client| {
            tokio::spawn(async move {
                let mut received = 0usize;
                while let Ok(Some(_)) =
                    tokio::time::timeout(Duration::from_millis(250), client.recv_async()).await
                {
                    received += 1;
                }
                (client.name().to_string(), received)
            })
        })
        .collect();

    for i in 0..messages {
        let region = if i % 2 == 0 { "eu" } else { "us" };
        let msg = new_message(format!("message-{i}")).with_header("region", region);
        if let Err(e) = queue.enqueue(msg) {
            warn!(target: "blipsub::simulate", error = %e, "enqueue failed");
        }
    }
    if let Some(system) = &mirror_consumer {
        queue.drain(system)?;
    }

    for outcome in join_all(readers).await {
        let (name, received) = outcome?;
        println!("{name}: received {received}");
    }

    let mut acked = 0;
    for name in session.subscription_names() {
        for id in session.tracker().outstanding_for(&name) {
            if session.acknowledge(id).is_ok() {
                acked += 1;
            }
        }
    }

    let token = session.token();
    for name in session.subscription_names() {
        session.cancel(&name, &token)?;
    }
    for pump in join_all(pumps).await {
        pump??;
    }

    let stats = queue.stats();
    info!(target: "blipsub::simulate", ?stats, acked, "simulation finished");
    println!(
        "enqueued={} delivered={} acquired={} dequeued={} remaining={} mirrored={}",
        stats.enqueued,
        stats.delivered,
        stats.acquired,
        stats.dequeued,
        queue.depth(),
        mirrored.load(Ordering::Relaxed)
    );

    for notice in queue.delete() {
        if let Some(error) = notice.error {
            println!("{}: {error}", notice.consumer);
        }
    }
    Ok(())
}
