//! nlsql application binary - composition root.
//!
//! Wires the notification pipeline together over the in-process broker:
//! 1. Load configuration from TOML
//! 2. Subscribe the answer repository and the trigger consumer
//! 3. Build the notify flow with its presenters
//! 4. Run one of the subcommands (`init-config`, `notify`, `replay`)
//!
//! `notify` feeds the broker itself: answers arrive as JSON lines on stdin and
//! triggers are published on a timer.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use nlsql_core::{NlsqlConfig, NonSqlAnswer, NotifyFlow, NotifyReport, QueryFlowListener};
use nlsql_notify::{JsonLinesPresenter, LogPresenter, NonSqlNotifyFlow};
use nlsql_pubsub::{
    KafkaAsRepo, MemoryBroker, MemoryConsumer, NonSqlNotifyTriggerConsumer, PubSubError,
    Publisher, QueryFlowEventProducer,
};

use cli::{CliArgs, Command};

type TriggerConsumer = NonSqlNotifyTriggerConsumer<MemoryConsumer>;

/// Build the repository, flow and trigger consumer on top of `broker`.
fn build_notify_service(
    config: &NlsqlConfig,
    broker: &MemoryBroker,
) -> Result<TriggerConsumer, PubSubError> {
    let answers = broker.consumer(
        &config.repo.consumer_name,
        &[config.pubsub.non_sql_topic.as_str()],
    )?;
    let repo = KafkaAsRepo::new(answers, &config.repo);

    let mut flow = NonSqlNotifyFlow::new(Arc::new(repo), &config.notify);
    flow.add_presenter(Arc::new(LogPresenter));
    if let Some(ref path) = config.notify.jsonl_path {
        tracing::info!(path = %path, "JSON-lines presenter enabled");
        flow.add_presenter(Arc::new(JsonLinesPresenter::new(path)));
    }

    let triggers = broker.consumer(
        &config.pubsub.trigger_consumer_name,
        &[config.pubsub.trigger_topic.as_str()],
    )?;
    Ok(NonSqlNotifyTriggerConsumer::new(
        triggers,
        Arc::new(flow) as Arc<dyn NotifyFlow>,
        config.pubsub.poll_interval(),
    ))
}

/// Decode one JSON-lines answer. Blank lines yield nothing; undecodable ones
/// are logged and skipped.
fn decode_answer(line_no: usize, line: &str) -> Option<NonSqlAnswer> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<NonSqlAnswer>(line) {
        Ok(answer) => Some(answer),
        Err(e) => {
            tracing::warn!(line = line_no, error = %e, "Skipping undecodable answer");
            None
        }
    }
}

fn read_answers(path: &Path) -> std::io::Result<Vec<NonSqlAnswer>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| decode_answer(idx + 1, line))
        .collect())
}

/// Forward stdin lines from a plain thread, so a pending read never holds up
/// runtime shutdown.
fn spawn_stdin_reader(tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read answers from stdin");
                    break;
                }
            }
        }
    });
}

/// Publish every decodable answer line until the sender side closes.
/// Returns how many answers were published.
async fn pump_answers<P: Publisher>(
    mut lines: mpsc::Receiver<String>,
    producer: QueryFlowEventProducer<P>,
) -> usize {
    let mut line_no = 0;
    let mut published = 0;
    while let Some(line) = lines.recv().await {
        line_no += 1;
        if let Some(answer) = decode_answer(line_no, &line) {
            producer.on_no_sql(&answer).await;
            published += 1;
        }
    }
    published
}

/// Publish an empty trigger every `every` until the broker refuses one.
async fn publish_triggers(broker: MemoryBroker, topic: String, every: Duration) {
    let mut ticks = tokio::time::interval(every);
    // The first tick completes immediately
    ticks.tick().await;
    loop {
        ticks.tick().await;
        if let Err(e) = broker.publish(&topic, "{}").await {
            tracing::info!(error = %e, "Trigger timer stopped");
            break;
        }
        tracing::debug!(topic = %topic, "Trigger published");
    }
}

/// Trigger interval: the CLI flag wins over the config, zero disables.
fn trigger_interval(flag: Option<u64>, config: &NlsqlConfig) -> Option<Duration> {
    match flag {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.notify.trigger_every(),
    }
}

fn log_report(report: &NotifyReport) {
    if let Some(ref e) = report.repo_error {
        tracing::error!(error = %e, "Notification cycle failed to fetch answers");
        return;
    }
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) => tracing::info!(presenter = %outcome.presenter, "Presenter succeeded"),
            Err(e) => tracing::warn!(presenter = %outcome.presenter, error = %e, "Presenter failed"),
        }
    }
    tracing::info!(
        fetched = report.fetched,
        failed_presenters = report.failed_presenters(),
        "Notification cycle finished"
    );
}

fn init_config(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists, pass --force to overwrite",
            path.display()
        )
        .into());
    }
    NlsqlConfig::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn run_notify(
    config: &NlsqlConfig,
    trigger_every: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = MemoryBroker::new();
    let trigger = Arc::new(build_notify_service(config, &broker)?);

    let runner = Arc::clone(&trigger);
    let handle = tokio::spawn(async move { runner.listen().await });

    let (tx, rx) = mpsc::channel(256);
    spawn_stdin_reader(tx);
    let producer = QueryFlowEventProducer::new(broker.clone(), &config.pubsub);
    let pump = tokio::spawn(async move {
        let published = pump_answers(rx, producer).await;
        tracing::info!(published, "Answer input ended");
    });

    let timer = match trigger_interval(trigger_every, config) {
        Some(every) => {
            tracing::info!(every_secs = every.as_secs(), "Publishing triggers on a timer");
            Some(tokio::spawn(publish_triggers(
                broker.clone(),
                config.pubsub.trigger_topic.clone(),
                every,
            )))
        }
        None => {
            tracing::info!(topic = %config.pubsub.trigger_topic, "Self-triggering disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    trigger.stop_consuming();
    broker.close();
    pump.abort();
    if let Some(timer) = timer {
        timer.abort();
    }
    handle.await?;
    Ok(())
}

async fn run_replay(config: &NlsqlConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let answers = read_answers(file)?;
    tracing::info!(path = %file.display(), count = answers.len(), "Replaying answers");

    let broker = MemoryBroker::new();
    let trigger = build_notify_service(config, &broker)?;

    let producer = QueryFlowEventProducer::new(broker.clone(), &config.pubsub);
    for answer in &answers {
        producer.on_no_sql(answer).await;
    }
    broker.publish(&config.pubsub.trigger_topic, "{}").await?;

    match trigger.consume(config.pubsub.poll_interval()).await {
        Some(report) => {
            log_report(&report);
            println!(
                "Presented {} answer(s) to {} presenter(s), {} failed",
                report.fetched,
                report.outcomes.len(),
                report.failed_presenters()
            );
        }
        None => println!("No trigger received"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let config = NlsqlConfig::load_or_default(&config_file);

    // Tracing.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting nlsql v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), found = config_exists, "Configuration resolved");

    match args.command {
        Command::InitConfig { force } => init_config(&config_file, force),
        Command::Notify { trigger_every } => run_notify(&config, trigger_every).await,
        Command::Replay { file } => run_replay(&config, &file).await,
    }
}
