//! Long-running graph maintenance.
//!
//! One task owns the [`SynapseGraph`]; everything else talks to it through
//! [`GraphCommand`]s on an mpsc channel. A ticker sends a decay pass followed
//! by a prune pass on every interval, and with `--stdin` each input line is
//! applied as a co-activation pattern between ticks.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use engram_core::{GraphStats, NeuronId, PatternOutcome, SynapseGraph};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::input::parse_pattern;

const COMMAND_BUFFER: usize = 64;

pub enum GraphCommand {
    Pattern {
        active: Vec<(NeuronId, f32)>,
        reply: oneshot::Sender<PatternOutcome>,
    },
    Decay {
        factor: f32,
        reply: oneshot::Sender<usize>,
    },
    Prune {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<GraphStats>,
    },
}

/// Handle to the task that owns the graph.
pub struct GraphActor {
    tx: mpsc::Sender<GraphCommand>,
    handle: JoinHandle<SynapseGraph>,
}

impl GraphActor {
    pub fn spawn(graph: SynapseGraph) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = tokio::spawn(run_actor(graph, rx));
        Self { tx, handle }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> GraphCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("graph task stopped"))?;
        rx.await.context("graph task dropped the reply")
    }

    pub async fn pattern(&self, active: Vec<(NeuronId, f32)>) -> Result<PatternOutcome> {
        self.request(|reply| GraphCommand::Pattern { active, reply })
            .await
    }

    pub async fn decay(&self, factor: f32) -> Result<usize> {
        self.request(|reply| GraphCommand::Decay { factor, reply })
            .await
    }

    pub async fn prune(&self) -> Result<usize> {
        self.request(|reply| GraphCommand::Prune { reply }).await
    }

    pub async fn stats(&self) -> Result<GraphStats> {
        self.request(|reply| GraphCommand::Stats { reply }).await
    }

    /// Close the channel and take the graph back once queued commands drain.
    pub async fn shutdown(self) -> Result<SynapseGraph> {
        drop(self.tx);
        self.handle.await.context("graph task panicked")
    }
}

async fn run_actor(mut graph: SynapseGraph, mut rx: mpsc::Receiver<GraphCommand>) -> SynapseGraph {
    while let Some(command) = rx.recv().await {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            GraphCommand::Pattern { active, reply } => {
                let _ = reply.send(graph.record_coactivation_pattern(&active));
            }
            GraphCommand::Decay { factor, reply } => {
                let _ = reply.send(graph.apply_decay(factor));
            }
            GraphCommand::Prune { reply } => {
                let _ = reply.send(graph.prune_weak_synapses());
            }
            GraphCommand::Stats { reply } => {
                let _ = reply.send(graph.stats());
            }
        }
    }
    tracing::debug!(edges = graph.edge_count(), "graph task finished");
    graph
}

pub struct MaintenanceOptions {
    pub decay_factor: f32,
    pub interval: Duration,
    /// Stop after this many passes; `None` runs until ctrl-c.
    pub ticks: Option<u64>,
    pub read_stdin: bool,
}

#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub ticks: u64,
    pub decayed: usize,
    pub pruned: usize,
    pub patterns: usize,
    pub created: usize,
    pub updated: usize,
    pub stats: GraphStats,
}

pub async fn run(
    graph: SynapseGraph,
    options: MaintenanceOptions,
) -> Result<(SynapseGraph, MaintenanceReport)> {
    let actor = GraphActor::spawn(graph);
    let mut report = MaintenanceReport::default();

    let mut ticker = tokio::time::interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut lines = options
        .read_stdin
        .then(|| BufReader::new(tokio::io::stdin()).lines());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        if options.ticks.is_some_and(|limit| report.ticks >= limit) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                report.decayed += actor.decay(options.decay_factor).await?;
                report.pruned += actor.prune().await?;
                report.ticks += 1;
                tracing::info!(tick = report.ticks, "maintenance pass");
            }
            line = next_line(&mut lines) => {
                match line.context("failed to read stdin")? {
                    Some(line) => apply_line(&actor, &line, &mut report).await?,
                    None => {
                        tracing::debug!("stdin closed");
                        lines = None;
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("interrupted, saving graph");
                break;
            }
        }
    }

    report.stats = actor.stats().await?;
    let graph = actor.shutdown().await?;
    Ok((graph, report))
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

async fn apply_line(actor: &GraphActor, line: &str, report: &mut MaintenanceReport) -> Result<()> {
    let active = match parse_pattern(line.split_whitespace()) {
        Ok(active) => active,
        Err(e) => {
            tracing::warn!("skipping pattern line: {e:#}");
            return Ok(());
        }
    };
    if active.len() < 2 {
        return Ok(());
    }
    let outcome = actor.pattern(active).await?;
    report.patterns += 1;
    report.created += outcome.created;
    report.updated += outcome.updated;
    Ok(())
}
