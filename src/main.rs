mod checks;
mod client;
mod config;
mod http;
mod manager;
mod metrics;
mod score;

use axum::serve;
use clap::{Parser, Subcommand};
use client::{ClientError, ControlClient};
use config::ConfigTree;
use http::ControlState;
use manager::{SharedManager, TestManager};
use metrics::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:9118";

#[derive(Parser, Debug)]
#[command(name = "healthcheckd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./healthcheck.yaml")]
    config: String,
    /// Debug-level logging unless RUST_LOG is set
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a request to a running daemon
    Ctl {
        #[arg(long, default_value = DEFAULT_CONTROL_ADDR)]
        addr: String,
        #[command(subcommand)]
        action: CtlAction,
    },
}

#[derive(Subcommand, Debug)]
enum CtlAction {
    RunAll,
    RunCheck { name: String },
    RunNeeded,
    Score,
    GetConfig {
        #[arg(default_value = "")]
        path: String,
    },
    /// VALUE is parsed as YAML, so `5`, `true` or `[a, b]` keep their type
    SetConfig { path: String, value: String },
    Quit,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if cli.print_default_config {
        println!("{}", ConfigTree::example_yaml());
        return;
    }

    if let Some(Command::Ctl { addr, action }) = cli.command {
        if let Err(err) = run_ctl(&addr, action).await {
            error!(error = %err, "запрос к демону завершился ошибкой");
            std::process::exit(1);
        }
        return;
    }

    let tree = match ConfigTree::load_or_init(&cli.config) {
        Ok(tree) => tree,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    let manager = match TestManager::new(tree) {
        Ok(manager) => manager,
        Err(err) => {
            error!(error = %err, "некорректная конфигурация проверок");
            std::process::exit(1);
        }
    };
    let listen = manager.settings().daemon.listen.clone();
    let poll_interval = manager.settings().poll_interval();
    info!(
        config = %cli.config,
        listen = %listen,
        poll_interval_ms = poll_interval.as_millis() as u64,
        "запуск healthcheckd"
    );

    let published = manager.subscribe();
    let manager = manager.shared();
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&listen).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %listen, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let http_task = {
        let app = http::build_router(ControlState {
            metrics: metrics.clone(),
            manager: manager.clone(),
            published,
            shutdown: shutdown_tx.clone(),
        });
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let poll_task = tokio::spawn(poll_loop(
        manager.clone(),
        metrics.clone(),
        poll_interval,
        shutdown_rx.clone(),
    ));

    let mut quit_rx = shutdown_rx.clone();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "не удалось дождаться Ctrl+C");
            }
            info!("получен Ctrl+C, выполняется остановка");
        }
        _ = quit_rx.changed() => {
            info!("получена команда quit, выполняется остановка");
        }
    }

    shutdown_tx.send_replace(true);

    let _ = poll_task.await;
    let _ = http_task.await;
    info!("healthcheckd остановлен");
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// A pass in progress is always finished before the loop exits.
async fn poll_loop(
    manager: SharedManager,
    metrics: Arc<Metrics>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    {
        let mut guard = manager.lock().await;
        let now = Instant::now();
        if let Err(err) = guard.run_all(now).await {
            warn!(error = %err, "первый полный прогон завершился без оценки");
        }
        metrics.update_from_snapshot(&guard.snapshot(now));
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("получен сигнал остановки планировщика");
                break;
            }
            _ = ticker.tick() => {
                let mut guard = manager.lock().await;
                let now = Instant::now();
                match guard.run_needed(now).await {
                    Ok(_) => metrics.update_from_snapshot(&guard.snapshot(now)),
                    Err(err) => debug!(error = %err, "плановый прогон пропущен"),
                }
            }
        }
    }
}

async fn run_ctl(addr: &str, action: CtlAction) -> Result<(), ClientError> {
    let client = ControlClient::new(addr)?;
    let reply = match action {
        CtlAction::RunAll => client.run_all().await?,
        CtlAction::RunCheck { name } => client.run_check(&name).await?,
        CtlAction::RunNeeded => client.run_needed().await?,
        CtlAction::Score => client.score().await?,
        CtlAction::GetConfig { path } => client.get_config(&path).await?,
        CtlAction::SetConfig { path, value } => {
            let value = serde_yaml::from_str(&value)
                .unwrap_or(serde_yaml::Value::String(value));
            client.set_config(&path, value).await?;
            serde_json::Value::Null
        }
        CtlAction::Quit => client.quit().await?,
    };

    if !reply.is_null() {
        match serde_json::to_string_pretty(&reply) {
            Ok(text) => println!("{text}"),
            Err(err) => warn!(error = %err, "не удалось отформатировать ответ"),
        }
    }
    Ok(())
}
