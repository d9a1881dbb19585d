//! Async forecast service
//!
//! Runs a `ForecastEngine` on its own tokio task and talks to it over
//! channels:
//! - Rounds and queries arrive on an mpsc command channel
//! - Ingestion is applied as soon as the command is received
//! - Forecasts are deferred, and only run when no command is waiting
//! - Issued forecasts are published on a broadcast channel
//!
//! The engine is handed back from the join handle once the service stops.

use crate::config::ServiceConfig;
use crate::engine::{ForecastEngine, IngestOutcome, TableStats, TableStatus};
use crate::error::{ForecastError, Result};
use crate::history::HistorySummary;
use crate::ledger::Prediction;
use crate::types::{Outcome, RoundEvent, Session};
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the published-forecast channel
const FORECAST_CHANNEL_SIZE: usize = 256;

/// Forecast published by the service
#[derive(Debug, Clone)]
pub struct ForecastEvent {
    pub table: String,
    pub prediction: Prediction,
}

#[derive(Debug)]
enum Command {
    Ingest {
        table: String,
        event: RoundEvent,
        reply: oneshot::Sender<Result<IngestOutcome>>,
    },
    Resolve {
        table: String,
        id: u64,
        actual: Outcome,
        reply: oneshot::Sender<bool>,
    },
    Forecast {
        table: String,
        reply: oneshot::Sender<Result<Prediction>>,
    },
    Latest {
        table: String,
        reply: oneshot::Sender<Option<Prediction>>,
    },
    History {
        table: String,
        limit: Option<usize>,
        reply: oneshot::Sender<Vec<Session>>,
    },
    Stats {
        table: String,
        reply: oneshot::Sender<TableStats>,
    },
    Summary {
        table: String,
        reply: oneshot::Sender<HistorySummary>,
    },
    Status {
        table: String,
        reply: oneshot::Sender<TableStatus>,
    },
    Flush {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to a running service
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: broadcast::Sender<()>,
    forecast_tx: broadcast::Sender<ForecastEvent>,
}

pub struct ForecastService;

impl ForecastService {
    /// Spawn the service task. Must be called inside a tokio runtime.
    pub fn spawn(engine: ForecastEngine, config: &ServiceConfig) -> (ServiceHandle, JoinHandle<ForecastEngine>) {
        let (command_tx, command_rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let (forecast_tx, _) = broadcast::channel(FORECAST_CHANNEL_SIZE);

        let shutdown_rx = shutdown_tx.subscribe();
        let events = forecast_tx.clone();
        let task = tokio::spawn(async move { service_loop(engine, command_rx, shutdown_rx, events).await });

        let handle = ServiceHandle {
            command_tx,
            shutdown_tx,
            forecast_tx,
        };
        (handle, task)
    }
}

impl ServiceHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| ForecastError::ServiceClosed)?;
        rx.await.map_err(|_| ForecastError::ServiceClosed)
    }

    /// Ingest one round; the follow-up forecast is scheduled, not awaited
    pub async fn ingest(&self, table: &str, event: RoundEvent) -> Result<IngestOutcome> {
        let table = table.to_string();
        self.request(|reply| Command::Ingest { table, event, reply }).await?
    }

    pub async fn resolve(&self, table: &str, id: u64, actual: Outcome) -> Result<bool> {
        let table = table.to_string();
        self.request(|reply| Command::Resolve { table, id, actual, reply }).await
    }

    /// Fresh forecast, computed immediately
    pub async fn forecast(&self, table: &str) -> Result<Prediction> {
        let table = table.to_string();
        self.request(|reply| Command::Forecast { table, reply }).await?
    }

    pub async fn latest_forecast(&self, table: &str) -> Result<Option<Prediction>> {
        let table = table.to_string();
        self.request(|reply| Command::Latest { table, reply }).await
    }

    pub async fn history(&self, table: &str, limit: Option<usize>) -> Result<Vec<Session>> {
        let table = table.to_string();
        self.request(|reply| Command::History { table, limit, reply }).await
    }

    pub async fn stats(&self, table: &str) -> Result<TableStats> {
        let table = table.to_string();
        self.request(|reply| Command::Stats { table, reply }).await
    }

    pub async fn summary(&self, table: &str) -> Result<HistorySummary> {
        let table = table.to_string();
        self.request(|reply| Command::Summary { table, reply }).await
    }

    pub async fn status(&self, table: &str) -> Result<TableStatus> {
        let table = table.to_string();
        self.request(|reply| Command::Status { table, reply }).await
    }

    /// Run every scheduled forecast now; returns how many ran
    pub async fn flush(&self) -> Result<usize> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Receive forecasts as they are issued
    pub fn subscribe(&self) -> broadcast::Receiver<ForecastEvent> {
        self.forecast_tx.subscribe()
    }

    /// Stop the service; scheduled forecasts are still run first
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Tables waiting for a forecast, each queued at most once
#[derive(Debug, Default)]
struct DueQueue {
    tables: VecDeque<String>,
}

impl DueQueue {
    fn push(&mut self, table: String) {
        if !self.tables.contains(&table) {
            self.tables.push_back(table);
        }
    }

    fn pop(&mut self) -> Option<String> {
        self.tables.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

async fn service_loop(
    mut engine: ForecastEngine,
    mut command_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: broadcast::Receiver<()>,
    forecast_tx: broadcast::Sender<ForecastEvent>,
) -> ForecastEngine {
    let mut due = DueQueue::default();
    info!("forecast service started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                info!("forecast service shutdown requested");
                break;
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&mut engine, cmd, &mut due, &forecast_tx),
                    None => {
                        debug!("all service handles dropped");
                        break;
                    }
                }
            }

            // Only reached when no command is ready
            _ = std::future::ready(()), if !due.is_empty() => {
                if let Some(table) = due.pop() {
                    run_forecast(&mut engine, &table, &forecast_tx);
                }
            }
        }
    }

    let flushed = drain(&mut engine, &mut due, &forecast_tx);
    info!(flushed, "forecast service stopped");
    engine
}

fn handle_command(
    engine: &mut ForecastEngine,
    cmd: Command,
    due: &mut DueQueue,
    forecast_tx: &broadcast::Sender<ForecastEvent>,
) {
    match cmd {
        Command::Ingest { table, event, reply } => {
            let result = event
                .into_session()
                .map(|session| engine.ingest_session(&table, session));
            if let Ok(outcome) = &result {
                if outcome.forecast_due {
                    due.push(table);
                }
            }
            let _ = reply.send(result);
        }
        Command::Resolve { table, id, actual, reply } => {
            let _ = reply.send(engine.resolve(&table, id, actual));
        }
        Command::Forecast { table, reply } => {
            let result = engine.forecast(&table);
            if let Ok(prediction) = &result {
                publish(forecast_tx, &table, prediction);
            }
            let _ = reply.send(result);
        }
        Command::Latest { table, reply } => {
            let _ = reply.send(engine.latest_forecast(&table).cloned());
        }
        Command::History { table, limit, reply } => {
            let _ = reply.send(engine.history(&table, limit).to_vec());
        }
        Command::Stats { table, reply } => {
            let _ = reply.send(engine.stats(&table));
        }
        Command::Summary { table, reply } => {
            let _ = reply.send(engine.summary(&table));
        }
        Command::Status { table, reply } => {
            let _ = reply.send(engine.status(&table));
        }
        Command::Flush { reply } => {
            let _ = reply.send(drain(engine, due, forecast_tx));
        }
    }
}

fn run_forecast(engine: &mut ForecastEngine, table: &str, forecast_tx: &broadcast::Sender<ForecastEvent>) -> bool {
    match engine.forecast_due(table) {
        Some(prediction) => {
            publish(forecast_tx, table, &prediction);
            true
        }
        None => false,
    }
}

fn drain(engine: &mut ForecastEngine, due: &mut DueQueue, forecast_tx: &broadcast::Sender<ForecastEvent>) -> usize {
    let mut ran = 0;
    while let Some(table) = due.pop() {
        if run_forecast(engine, &table, forecast_tx) {
            ran += 1;
        }
    }
    ran
}

fn publish(forecast_tx: &broadcast::Sender<ForecastEvent>, table: &str, prediction: &Prediction) {
    // No subscribers is fine
    let _ = forecast_tx.send(ForecastEvent {
        table: table.to_string(),
        prediction: prediction.clone(),
    });
}
