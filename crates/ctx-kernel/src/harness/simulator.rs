//! Save/restore simulator
//!
//! Drives random message exchanges on one engine, saves each message, and
//! restores it on a second engine deployed from the same metadata. After
//! every restore the simulator checks that structure, properties and
//! handler data survived, that nothing was duplicated, and that
//! correlation keys were re-registered where the exchange pattern asks for
//! it. A fraction of records is corrupted on purpose and must be rejected.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use ctx_deploy::Flow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::config::EngineConfig;
use crate::context::ConfigurationContext;
use crate::error::SnapshotError;
use crate::harness::fixtures::{demo_registry, StampHandler, ACCOUNT_SERVICE, AUDIT_SERVICE, DEMO_TRANSPORT};
use crate::id::NodeId;
use crate::options::{EndpointReference, Options};
use crate::snapshot::{restore_message, write_message};

/// Simulator settings
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Exchanges to run
    pub exchanges: u64,
    /// Share of records restored a second time
    pub replay_rate: f64,
    /// Share of records corrupted before restore
    pub corruption_rate: f64,
    /// Stop at the first violation
    pub stop_on_first_violation: bool,
    /// Engine settings for both sides
    pub engine: EngineConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            exchanges: 1_000,
            replay_rate: 0.10,
            corruption_rate: 0.05,
            stop_on_first_violation: false,
            engine: EngineConfig::default(),
        }
    }
}

/// Kind of simulated exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Exchange {
    /// Inbound request on a session-scoped service
    Transfer,
    /// Fire-and-forget outbound message
    Notify,
    /// Outbound request waiting for its response
    Query,
    /// Inbound one-way message on an application-scoped service
    Audit,
}

impl Exchange {
    fn pick(rng: &mut StdRng) -> Self {
        match rng.gen_range(0..4) {
            0 => Self::Transfer,
            1 => Self::Notify,
            2 => Self::Query,
            _ => Self::Audit,
        }
    }

    fn service(self) -> &'static str {
        match self {
            Self::Audit => AUDIT_SERVICE,
            _ => ACCOUNT_SERVICE,
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Notify => "notify",
            Self::Query => "query",
            Self::Audit => "record",
        }
    }

    fn flow(self) -> Flow {
        match self {
            Self::Transfer | Self::Audit => Flow::In,
            Self::Notify | Self::Query => Flow::Out,
        }
    }

    fn correlated(self) -> bool {
        matches!(self, Self::Notify | Self::Query)
    }
}

/// A check that failed
#[derive(Debug, Clone)]
pub struct Violation {
    /// Exchange index
    pub exchange: u64,
    /// Kind of exchange
    pub kind: Exchange,
    /// Failed check
    pub check: &'static str,
    /// What was observed
    pub details: String,
}

/// Counters collected while simulating
#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    /// Exchanges run
    pub exchanges: u64,
    /// Records restored and verified
    pub restored: u64,
    /// Records restored a second time
    pub replayed: u64,
    /// Corrupted records rejected as expected
    pub rejected: u64,
    /// Bytes written
    pub bytes_written: u64,
    /// Exchanges per kind
    pub by_kind: BTreeMap<String, u64>,
}

/// Final simulator report
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Settings used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Failed checks
    pub violations: Vec<Violation>,
    /// Live nodes on the saving engine
    pub source_nodes: usize,
    /// Live nodes on the restoring engine
    pub target_nodes: usize,
}

impl SimulatorReport {
    /// Whether every check passed
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Context Snapshot Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Exchanges: {}\n", self.stats.exchanges));
        report.push_str(&format!("Restored: {}\n", self.stats.restored));
        report.push_str(&format!("Replayed: {}\n", self.stats.replayed));
        report.push_str(&format!("Rejected (corrupted): {}\n", self.stats.rejected));
        report.push_str(&format!("Bytes written: {}\n", self.stats.bytes_written));
        report.push_str(&format!("Source nodes: {}\n", self.source_nodes));
        report.push_str(&format!("Target nodes: {}\n", self.target_nodes));

        if !self.stats.by_kind.is_empty() {
            report.push_str("\n=== Exchanges ===\n");
            for (kind, count) in &self.stats.by_kind {
                report.push_str(&format!("{kind}: {count}\n"));
            }
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!(
                    "{}. exchange {} ({:?}) {}: {}\n",
                    i + 1,
                    v.exchange,
                    v.kind,
                    v.check,
                    v.details
                ));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

struct Sent {
    message: NodeId,
    message_id: String,
    stamp: String,
    key: Option<String>,
}

fn engine(config: &EngineConfig) -> Result<ConfigurationContext, SnapshotError> {
    let registry = demo_registry().map_err(crate::error::ContextError::from)?;
    Ok(ConfigurationContext::new(Arc::new(registry)).with_config(config.clone()))
}

fn run_exchange(
    source: &ConfigurationContext,
    kind: Exchange,
    index: u64,
    rng: &mut StdRng,
) -> Result<Sent, SnapshotError> {
    let registry = Arc::clone(source.registry());
    let service = registry
        .service(kind.service())
        .cloned()
        .ok_or_else(|| crate::error::ContextError::UnknownService(kind.service().to_string()))?;
    let flow = kind.flow();

    let message = source.create_message_context(flow);
    let message_id = format!("urn:sim:{index}");
    let stamp = format!("stamp-{}", rng.gen::<u32>());
    let chain = registry.flow(flow).phases().to_vec();
    let stamper = StampHandler::new("sim");
    source.with_message_mut(message, |body| {
        body.service = Some(service);
        body.options = Options::default()
            .with_message_id(message_id.clone())
            .with_action(format!("urn:demo:bank/{}", kind.operation()))
            .with_to(EndpointReference::new("http://peer.example/bank"));
        body.flags.server_side = flow == Flow::In;
        body.envelope = Some(Bytes::from(format!("<env id=\"{index}\"/>")));
        body.execution_chain = chain;
        body.current_handler_index = 1;
        stamper.stamp(&mut body.self_managed, &stamp);
        body.transport_in = registry.transport_in(DEMO_TRANSPORT).cloned();
        body.transport_out = registry.transport_out(DEMO_TRANSPORT).cloned();
    })?;

    let service_context = source.fill_service_and_group_context(message)?;
    let operation = source.create_operation_context(service_context, kind.operation())?;
    source.add_message_context(operation, message)?;

    source.set_property(message, "attempt", json!(rng.gen_range(1..4)))?;
    source.set_property(operation, "exchange", json!(index))?;
    source.set_property(service_context, "lastExchange", json!(index))?;

    let key = if kind.correlated() {
        source.register_operation_context(&message_id, operation, false)?;
        Some(message_id.clone())
    } else {
        None
    };

    Ok(Sent {
        message,
        message_id,
        stamp,
        key,
    })
}

fn verify(
    source: &ConfigurationContext,
    target: &ConfigurationContext,
    sent: &Sent,
    restored: NodeId,
) -> Vec<(&'static str, String)> {
    let mut failures = Vec::new();

    let (op, slots, message_id) = match target.with_message(restored, |body| {
        (body.operation_context, body.self_managed.clone(), body.message_id().map(str::to_string))
    }) {
        Ok(found) => found,
        Err(err) => return vec![("restored message", err.to_string())],
    };

    if message_id.as_deref() != Some(sent.message_id.as_str()) {
        failures.push(("message id", format!("{message_id:?}")));
    }

    let source_props = source.properties(sent.message).map(|bag| bag.snapshot()).unwrap_or_default();
    let target_props = target.properties(restored).map(|bag| bag.snapshot()).unwrap_or_default();
    if source_props != target_props {
        failures.push(("message properties", format!("{source_props:?} != {target_props:?}")));
    }

    if StampHandler::stamp_of(&slots).as_deref() != Some(sent.stamp.as_str()) {
        failures.push(("handler data", format!("{:?}", StampHandler::stamp_of(&slots))));
    }
    if !StampHandler::transient_restored(&slots) {
        failures.push(("handler transient state", "not rebuilt".to_string()));
    }

    let Some(op) = op else {
        failures.push(("operation context", "missing".to_string()));
        return failures;
    };
    match target.message_contexts(op) {
        Ok(held) => {
            let hits = held.iter().filter(|(_, id)| *id == restored).count();
            if hits != 1 {
                failures.push(("message placement", format!("{hits} entries in {held:?}")));
            }
        }
        Err(err) => failures.push(("operation context", err.to_string())),
    }

    if let Some(key) = &sent.key {
        if target.operation_context(key) != Some(op) {
            failures.push(("correlation", format!("{key} -> {:?}", target.operation_context(key))));
        }
    }

    failures
}

fn corrupt(bytes: &Bytes, rng: &mut StdRng) -> Bytes {
    let mut damaged = BytesMut::from(&bytes[..]);
    // header bytes are the only ones guaranteed to be validated
    let at = rng.gen_range(0..damaged.len().min(12));
    damaged[at] ^= 0xff;
    damaged.freeze()
}

/// Run the simulator
///
/// # Errors
/// Returns an error only if the demo deployment cannot be built
pub fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SnapshotError> {
    let source = engine(&config.engine)?;
    let target = engine(&config.engine)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let replay_rate = config.replay_rate.clamp(0.0, 1.0);
    let corruption_rate = config.corruption_rate.clamp(0.0, 1.0);

    for index in 0..config.exchanges {
        let kind = Exchange::pick(&mut rng);
        stats.exchanges += 1;
        *stats.by_kind.entry(format!("{kind:?}")).or_insert(0) += 1;

        let outcome = run_exchange(&source, kind, index, &mut rng)
            .and_then(|sent| write_message(&source, sent.message).map(|bytes| (sent, bytes)));
        let (sent, bytes) = match outcome {
            Ok(done) => done,
            Err(err) => {
                violations.push(Violation {
                    exchange: index,
                    kind,
                    check: "save",
                    details: err.to_string(),
                });
                if config.stop_on_first_violation {
                    break;
                }
                continue;
            }
        };
        stats.bytes_written += bytes.len() as u64;

        if rng.gen_bool(corruption_rate) {
            match restore_message(&target, corrupt(&bytes, &mut rng)) {
                Err(err) if err.is_fatal() => stats.rejected += 1,
                other => violations.push(Violation {
                    exchange: index,
                    kind,
                    check: "corrupted record rejected",
                    details: format!("{other:?}"),
                }),
            }
            continue;
        }

        let mut failures = match restore_message(&target, bytes.clone()) {
            Ok(restored) => {
                stats.restored += 1;
                verify(&source, &target, &sent, restored)
            }
            Err(err) => vec![("restore", err.to_string())],
        };

        if rng.gen_bool(replay_rate) {
            stats.replayed += 1;
            match restore_message(&target, bytes) {
                Ok(again) => failures.extend(verify(&source, &target, &sent, again)),
                Err(err) => failures.push(("replay", err.to_string())),
            }
        }

        let failed = !failures.is_empty();
        violations.extend(failures.into_iter().map(|(check, details)| Violation {
            exchange: index,
            kind,
            check,
            details,
        }));
        if failed && config.stop_on_first_violation {
            break;
        }
    }

    tracing::info!(
        exchanges = stats.exchanges,
        restored = stats.restored,
        violations = violations.len(),
        "simulation finished"
    );

    Ok(SimulatorReport {
        source_nodes: source.node_count(),
        target_nodes: target.node_count(),
        config,
        stats,
        violations,
    })
}
