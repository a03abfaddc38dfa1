//! Fidelis Federation Node Daemon
//!
//! Runs an in-process federation of validator nodes connected by a local
//! hub, drives it with a synthetic workload of witnessed events and resource
//! transactions, and logs the events the federation publishes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use fidelis_consensus::ValidatorSet;
use fidelis_core::{FederationConfig, FederationEvent, FederationNode, LedgerRequest};
use fidelis_identity::{Entity, EntityId, EntityKeyPair, EntityKind, EntityRegistry, SocietyId};
use fidelis_net::{LocalHub, DEFAULT_INBOX_CAPACITY};
use fidelis_reputation::{ActionDescriptor, Attestation, CapabilityTier, ContextId, Outcome, WitnessedEvent};

/// Fidelis Federation Node
///
/// A trust-weighted federation running reputation, consensus and resource
/// economy monitoring.
#[derive(Parser, Debug)]
#[command(name = "fidelis-node")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "FIDELIS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of validator nodes in the simulated federation
    #[arg(short, long, env = "FIDELIS_NODES", default_value = "4")]
    nodes: usize,

    /// Number of simulated members submitting events
    #[arg(short, long, env = "FIDELIS_MEMBERS", default_value = "12")]
    members: usize,

    /// Interval between synthetic events in milliseconds
    #[arg(long, env = "FIDELIS_EVENT_INTERVAL_MS", default_value = "500")]
    event_interval_ms: u64,

    /// Node tick interval in milliseconds (overrides the configuration file)
    #[arg(long, env = "FIDELIS_TICK_INTERVAL_MS")]
    tick_interval_ms: Option<u64>,

    /// Stop after this many seconds (runs until Ctrl+C when unset)
    #[arg(long, env = "FIDELIS_DURATION_SECS")]
    duration_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FIDELIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "FIDELIS_LOG_FORMAT", default_value = "plain")]
    log_format: String,
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

/// Load the configuration file, if any, and apply CLI overrides.
fn build_config(args: &Args) -> Result<FederationConfig> {
    let mut config = match &args.config {
        Some(path) => FederationConfig::from_file(path).context("Failed to load configuration")?,
        None => FederationConfig::default(),
    };
    if let Some(ms) = args.tick_interval_ms {
        config.node.tick_interval_ms = ms;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

// =============================================================================
// Simulated federation
// =============================================================================

struct Member {
    key: EntityKeyPair,
    society: usize,
}

struct Federation {
    nodes: Vec<Arc<FederationNode>>,
    members: Vec<Member>,
    societies: usize,
}

/// Start `count` validator nodes sharing one hub, each running its own loop.
fn launch(
    config: &FederationConfig,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> Result<(Vec<Arc<FederationNode>>, Vec<JoinHandle<()>>)> {
    let keys: Vec<Arc<EntityKeyPair>> = (0..count).map(|_| Arc::new(EntityKeyPair::generate())).collect();
    let validators = ValidatorSet::new(keys.iter().map(|k| k.id())).context("Failed to build validator set")?;
    let hub = LocalHub::new();
    let now = Utc::now();

    let mut nodes = Vec::with_capacity(count);
    let mut handles = Vec::with_capacity(count);
    for key in &keys {
        let registry = EntityRegistry::shared();
        for (i, validator) in keys.iter().enumerate() {
            registry
                .write()
                .register(Entity::new(
                    *validator.public_key(),
                    EntityKind::Organization,
                    SocietyId::new(format!("validators-{i}"))?,
                    now,
                ))
                .context("Failed to register validator")?;
        }
        let inbox = hub.connect(key.id(), DEFAULT_INBOX_CAPACITY);
        let node = Arc::new(
            FederationNode::new(config.clone(), key.clone(), registry, validators.clone(), Arc::new(hub.clone()))
                .context("Failed to create node")?,
        );
        for peer in &keys {
            if peer.id() != key.id() {
                node.add_peer(peer.id());
            }
        }
        let runner = node.clone();
        let stop = shutdown.clone();
        handles.push(tokio::spawn(async move { runner.run(inbox, stop).await }));
        nodes.push(node);
    }
    Ok((nodes, handles))
}

impl Federation {
    /// Register `members` agents, spread over enough societies to satisfy
    /// the witness policy, and bond them on every node.
    fn populate(nodes: Vec<Arc<FederationNode>>, config: &FederationConfig, members: usize) -> Result<Self> {
        let societies = config.witness.min_attestations.max(config.witness.min_distinct_societies) + 1;
        let members = members.max(societies * 2);
        let stake = config.stake.required_for(CapabilityTier::Normal);
        let now = Utc::now();

        let mut roster = Vec::with_capacity(members);
        for i in 0..members {
            let key = EntityKeyPair::generate();
            let society = i % societies;
            for node in &nodes {
                node.register_entity(
                    *key.public_key(),
                    EntityKind::SoftwareAgent,
                    SocietyId::new(format!("guild-{society}"))?,
                    now,
                )?;
                node.deposit_stake(key.id(), CapabilityTier::Normal, stake, now)?;
            }
            roster.push(Member { key, society });
        }
        info!(members, societies, stake, "Federation populated");
        Ok(Self {
            nodes,
            members: roster,
            societies,
        })
    }

    /// Submit one witnessed event and one resource transaction.
    fn step(&self, rng: &mut StdRng, sequences: &mut HashMap<EntityId, u64>, context: &ContextId) -> Result<()> {
        let Some(subject) = self.members.choose(rng) else {
            return Ok(());
        };
        let witnesses: Vec<&Member> = (0..self.societies)
            .filter(|s| *s != subject.society)
            .filter_map(|s| {
                let candidates: Vec<&Member> = self.members.iter().filter(|m| m.society == s).collect();
                candidates.choose(rng).copied()
            })
            .collect();

        let now = Utc::now();
        let sequence = sequences.entry(subject.key.id()).or_insert(0);
        *sequence += 1;
        let outcome = if rng.gen_bool(0.85) { Outcome::Success } else { Outcome::Failure };
        let mut event = WitnessedEvent::new(
            &subject.key,
            context.clone(),
            ActionDescriptor::new("simulate:task")?,
            outcome,
            now,
            *sequence,
        )?;
        for w in &witnesses {
            event.add_witness(&w.key)?;
        }
        let attestations = witnesses
            .iter()
            .map(|w| Attestation::sign(&w.key, &event, now))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some(node) = self.nodes.choose(rng) else {
            return Ok(());
        };
        match node.submit_event(event, attestations, now) {
            Ok(delta) => debug!(
                node = %node.id(),
                subject = %delta.subject,
                aggregate = delta.aggregate_after,
                "Event accepted"
            ),
            Err(e) => warn!(node = %node.id(), class = %e.class(), error = %e, "Event rejected"),
        }

        let request = LedgerRequest::Earn {
            owner: subject.key.id(),
            amount: rng.gen_range(1..=20),
        };
        if let Err(e) = node.record_transaction(request, now) {
            warn!(node = %node.id(), class = %e.class(), error = %e, "Transaction rejected");
        }
        Ok(())
    }
}

/// Log every event published by `node`.
fn watch_events(node: &FederationNode) -> JoinHandle<()> {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let class = event.class().map(|c| c.to_string()).unwrap_or_default();
                    match &event {
                        FederationEvent::PhaseTransition(t) => {
                            warn!(%class, from = %t.from, to = %t.to, severity = t.severity, "Phase transition")
                        }
                        FederationEvent::ConsensusDecision(d) => {
                            info!(%class, proposal = %d.id(), outcome = ?d.outcome, "Consensus decision")
                        }
                        FederationEvent::EvasionPenalty(p) => {
                            warn!(%class, entity = %p.entity, strike = p.strike, "Evasion penalty")
                        }
                        FederationEvent::EconomicAnomaly(s) => {
                            warn!(%class, crisis_risk = s.crisis_risk, gamma = s.gamma, "Economic anomaly")
                        }
                        FederationEvent::ValidatorSlashed { validator, amount, .. } => {
                            warn!(%class, validator = %validator, amount, "Validator slashed")
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, &args.log_format)?;

    let config = build_config(&args)?;
    if args.nodes == 0 {
        anyhow::bail!("at least one node is required");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        nodes = args.nodes,
        members = args.members,
        tick_interval_ms = config.node.tick_interval_ms,
        "Starting Fidelis federation"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (nodes, handles) = launch(&config, args.nodes, &shutdown_rx)?;
    let federation = Federation::populate(nodes, &config, args.members)?;
    let watcher = watch_events(&federation.nodes[0]);

    let workload = {
        let mut stop = shutdown_rx.clone();
        let interval_ms = args.event_interval_ms.max(1);
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut sequences = HashMap::new();
            let context = match ContextId::new("role:worker") {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Invalid workload context");
                    return;
                }
            };
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = federation.step(&mut rng, &mut sequences, &context) {
                            warn!(error = %e, "Workload step failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        })
    };

    info!("Federation running, press Ctrl+C to stop");
    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!(secs, "Run duration elapsed"),
            }
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down Fidelis federation...");
    shutdown_tx.send(true).context("Failed to signal shutdown")?;
    if let Err(e) = workload.await {
        warn!(error = %e, "Workload task failed");
    }
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Node task failed");
        }
    }
    watcher.abort();

    info!("Fidelis federation stopped");
    Ok(())
}
