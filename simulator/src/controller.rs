//! Simulation controller.
//!
//! Runs scenarios and random route days against in-memory ledgers, then
//! replays every party's history to check the ledger's properties.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::RwLock;
use tracing::{info, warn};

use depot_common::{
    BatchId, ContainerType, DepotError, Folio, MovementKind, PartyId, PerContainer, VendorId,
};
use depot_ledger::store::{MemoryBalanceStore, MemoryWarehouseStore};
use depot_ledger::{
    transition, Aggregated, AppliedMovement, BalanceScope, BalanceStrategy, Denormalized, Ledger,
    LedgerConfig, MovementRecord, MovementRequest, Position,
};

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, LedgerKind, Scenario, ScenarioStep};

/// One planned stop of a vendor's route.
#[derive(Debug, Clone)]
struct Stop {
    client: PartyId,
    kind: MovementKind,
    quantities: PerContainer<u32>,
}

/// A vendor's whole day: load at the warehouse, visit clients, unload.
#[derive(Debug, Clone)]
struct RoutePlan {
    vendor: VendorId,
    load: PerContainer<u32>,
    stops: Vec<Stop>,
    unload: PerContainer<u32>,
}

/// Outcome of the post-run property checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verification {
    /// Parties whose history was replayed.
    pub parties_checked: usize,
    /// Movement rows replayed.
    pub movements_replayed: usize,
}

/// Controls the simulation.
pub struct SimulationController {
    /// Number of clients.
    client_count: usize,
    /// Number of vendors.
    vendor_count: usize,
    /// Random number generator.
    rng: Arc<RwLock<StdRng>>,
    /// Client store, kept for fault injection.
    client_store: MemoryBalanceStore,
    /// Warehouse store, kept for fault injection.
    warehouse_store: MemoryWarehouseStore,
    /// Client↔vendor ledger.
    clients: Arc<Ledger<Denormalized>>,
    /// Vendor↔warehouse ledger.
    warehouse: Arc<Ledger<Aggregated>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(client_count: usize, vendor_count: usize, seed: Option<u64>, config: LedgerConfig) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let client_store = MemoryBalanceStore::new();
        let warehouse_store = MemoryWarehouseStore::new();
        let clients = Ledger::new(Denormalized::new(Arc::new(client_store.clone())), config.clone());
        let warehouse = Ledger::new(Aggregated::new(Arc::new(warehouse_store.clone())), config);

        Self {
            client_count,
            vendor_count,
            rng: Arc::new(RwLock::new(rng)),
            client_store,
            warehouse_store,
            clients: Arc::new(clients),
            warehouse: Arc::new(warehouse),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Register the simulated parties.
    pub fn initialize(&self, latency: Duration) {
        info!(
            clients = self.client_count,
            vendors = self.vendor_count,
            "Initializing simulation"
        );

        for id in 1..=self.client_count as i64 {
            self.client_store.add_party(PartyId::new(id));
        }
        for id in 1..=self.vendor_count as i64 {
            self.warehouse_store.add_party(PartyId::new(id));
        }

        self.client_store.set_latency(latency);
        self.warehouse_store.set_latency(latency);
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);

        for step in &scenario.steps {
            self.execute_step(step).await?;
        }

        Ok(())
    }

    /// Run a random route day: every vendor drives its route concurrently.
    pub async fn run_route_day(&self, rounds: usize) -> anyhow::Result<()> {
        if self.client_count == 0 || self.vendor_count == 0 {
            return Err(anyhow::anyhow!("A route day needs at least one client and one vendor"));
        }

        let plans = self.plan_routes(rounds).await;
        info!(vendors = plans.len(), rounds, "Running route day");

        let handles: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let clients = Arc::clone(&self.clients);
                let warehouse = Arc::clone(&self.warehouse);
                let metrics = Arc::clone(&self.metrics);
                tokio::spawn(drive_route(plan, clients, warehouse, metrics))
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            joined?;
        }

        Ok(())
    }

    async fn plan_routes(&self, rounds: usize) -> Vec<RoutePlan> {
        let mut rng = self.rng.write().await;
        let stops_per_vendor = (rounds / self.vendor_count).max(1);

        (1..=self.vendor_count as i64)
            .map(|vendor| {
                let load = PerContainer::from_fn(|_| rng.gen_range(20..80));
                let stops = (0..stops_per_vendor)
                    .map(|_| Stop {
                        client: PartyId::new(rng.gen_range(1..=self.client_count as i64)),
                        kind: if rng.gen_bool(0.55) {
                            MovementKind::Loan
                        } else {
                            MovementKind::Collection
                        },
                        // Some stops carry nothing and are rejected.
                        quantities: PerContainer::from_fn(|_| rng.gen_range(0..6)),
                    })
                    .collect();
                let unload = load.map(|_, qty| rng.gen_range(0..=*qty));

                RoutePlan {
                    vendor: VendorId::new(vendor),
                    load,
                    stops,
                    unload,
                }
            })
            .collect()
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Apply {
                ledger,
                party,
                kind,
                container,
                quantity,
                expect_failure,
            } => {
                let request = MovementRequest::single(PartyId::new(*party), *container, *kind, *quantity);
                let outcome = match ledger {
                    LedgerKind::Client => timed(&self.metrics, self.clients.apply(&request)).await,
                    LedgerKind::Warehouse => timed(&self.metrics, self.warehouse.apply(&request)).await,
                };

                match (outcome, *expect_failure) {
                    (Ok(applied), false) => {
                        info!(
                            party,
                            %kind,
                            %container,
                            quantity,
                            folio = applied.folio.map(|f| f.get()),
                            "Movement applied"
                        );
                    }
                    (Err(e), true) => info!(party, error = %e, "Movement failed as expected"),
                    (Ok(_), true) => {
                        return Err(anyhow::anyhow!("Movement for party {} should have failed", party));
                    }
                    (Err(e), false) => return Err(e.into()),
                }
            }
            ScenarioStep::Concurrent {
                party,
                kind,
                container,
                quantity,
                tasks,
            } => {
                info!(party, tasks, "Applying concurrent movements");
                let handles: Vec<_> = (0..*tasks)
                    .map(|_| {
                        let ledger = Arc::clone(&self.clients);
                        let metrics = Arc::clone(&self.metrics);
                        let request = MovementRequest::single(PartyId::new(*party), *container, *kind, *quantity);
                        tokio::spawn(async move { timed(&metrics, ledger.apply(&request)).await })
                    })
                    .collect();

                for joined in futures::future::join_all(handles).await {
                    joined??;
                }
            }
            ScenarioStep::InjectFault {
                ledger,
                point,
                transient,
            } => {
                info!(?ledger, ?point, transient, "Injecting fault");
                match ledger {
                    LedgerKind::Client => self.client_store.inject_fault(*point, *transient),
                    LedgerKind::Warehouse => self.warehouse_store.inject_fault(*point, *transient),
                }
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition).await?;
                info!(?condition, "Assertion passed");
            }
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals {
                party,
                container,
                debt,
                credit,
            } => {
                let balance = self.clients.balance(PartyId::new(*party)).await?;
                let actual = balance.position(*container);
                let expected = Position::new(*debt, *credit);
                if actual != expected {
                    return Err(anyhow::anyhow!(
                        "Party {} {}: expected {:?}, found {:?}",
                        party,
                        container,
                        expected,
                        actual
                    ));
                }
            }
            AssertCondition::FolioEquals { party, folio } => {
                let balance = self.clients.balance(PartyId::new(*party)).await?;
                if balance.folio != Some(Folio::new(*folio)) {
                    return Err(anyhow::anyhow!(
                        "Party {}: expected folio {}, found {:?}",
                        party,
                        folio,
                        balance.folio
                    ));
                }
            }
            AssertCondition::FifoRemaining {
                ledger,
                party,
                remaining,
            } => {
                let party = PartyId::new(*party);
                let detail = match ledger {
                    LedgerKind::Client => self.clients.fifo_detail(party).await?,
                    LedgerKind::Warehouse => self.warehouse.fifo_detail(party).await?,
                };
                let actual: Vec<u64> = detail
                    .pending_loan_batches
                    .iter()
                    .map(|b| b.remaining_quantity)
                    .collect();
                if &actual != remaining {
                    return Err(anyhow::anyhow!(
                        "Party {}: expected open batches {:?}, found {:?}",
                        party,
                        remaining,
                        actual
                    ));
                }
            }
            AssertCondition::WarehouseDebt {
                party,
                container,
                debt,
            } => {
                let agg = self
                    .warehouse
                    .compute_balance(PartyId::new(*party), *container, BalanceScope::AllTime)
                    .await?;
                if agg.debt != *debt {
                    return Err(anyhow::anyhow!(
                        "Vendor {} {}: expected debt {}, found {}",
                        party,
                        container,
                        debt,
                        agg.debt
                    ));
                }
            }
            AssertCondition::ClientMovementCount { count } => {
                let actual = self.client_store.movement_count();
                if actual != *count {
                    return Err(anyhow::anyhow!(
                        "Expected {} client movements, found {}",
                        count,
                        actual
                    ));
                }
            }
        }

        Ok(())
    }

    /// Replay every party's history and check it against the stored balances.
    pub async fn verify(&self) -> anyhow::Result<Verification> {
        let mut report = Verification::default();

        for id in 1..=self.client_count as i64 {
            let party = PartyId::new(id);
            let balance = self.clients.balance(party).await?;
            let history = self.clients.strategy().history(party).await?;

            let replayed = replay(&history)?;
            for ct in ContainerType::ALL {
                if replayed.positions[ct] != balance.position(ct) {
                    return Err(anyhow::anyhow!(
                        "Client {} {}: replay gives {:?}, balance row holds {:?}",
                        party,
                        ct,
                        replayed.positions[ct],
                        balance.position(ct)
                    ));
                }
            }

            // Receipt numbers are dense: one per accepted request.
            let expected: BTreeSet<i64> = (1..=replayed.folios.len() as i64).collect();
            if replayed.folios != expected
                || balance.folio.map(|f| f.get()) != Some(replayed.folios.len() as i64)
            {
                return Err(anyhow::anyhow!(
                    "Client {}: folio {:?} does not match {} accepted requests",
                    party,
                    balance.folio,
                    replayed.folios.len()
                ));
            }

            let detail = self.clients.fifo_detail(party).await?;
            for ct in ContainerType::ALL {
                if !replayed.credit_seen[ct] && detail.per_container_totals[ct].outstanding != balance.debt[ct] {
                    return Err(anyhow::anyhow!(
                        "Client {} {}: open batches {} differ from debt {}",
                        party,
                        ct,
                        detail.per_container_totals[ct].outstanding,
                        balance.debt[ct]
                    ));
                }
            }

            report.parties_checked += 1;
            report.movements_replayed += history.len();
        }

        for id in 1..=self.vendor_count as i64 {
            let party = PartyId::new(id);
            let history = self.warehouse.strategy().history(party).await?;
            let all = self.warehouse.compute_all(party, BalanceScope::AllTime).await?;

            for ct in ContainerType::ALL {
                let (loaned, collected) = history
                    .iter()
                    .filter(|m| m.container_type == ct)
                    .fold((0u64, 0u64), |(l, c), m| match m.kind {
                        MovementKind::Loan => (l + u64::from(m.applied_qty), c),
                        MovementKind::Collection => (l, c + u64::from(m.applied_qty)),
                    });
                if Position::from_totals(loaned, collected) != Position::new(all[ct].debt, all[ct].credit) {
                    return Err(anyhow::anyhow!("Vendor {} {}: aggregate mismatch", party, ct));
                }
            }

            report.parties_checked += 1;
            report.movements_replayed += history.len();
        }

        info!(
            parties = report.parties_checked,
            movements = report.movements_replayed,
            "Ledger properties hold"
        );
        Ok(report)
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Get the ledgers' own counters.
    pub fn ledger_counters(&self) -> (depot_ledger::MetricsSnapshot, depot_ledger::MetricsSnapshot) {
        (self.clients.metrics(), self.warehouse.metrics())
    }
}

/// Drive one vendor's route.
async fn drive_route(
    plan: RoutePlan,
    clients: Arc<Ledger<Denormalized>>,
    warehouse: Arc<Ledger<Aggregated>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
) {
    let vendor = plan.vendor.as_party();
    let batch = BatchId::new(plan.vendor.get());

    let load = MovementRequest::new(vendor, MovementKind::Loan, plan.load).with_batch(batch);
    if let Err(e) = timed(&metrics, warehouse.apply(&load)).await {
        warn!(vendor = %plan.vendor, error = %e, "Load rejected");
    }

    for stop in plan.stops {
        let request = MovementRequest::new(stop.client, stop.kind, stop.quantities).with_actor(plan.vendor);
        if let Err(e) = timed(&metrics, clients.apply(&request)).await {
            warn!(vendor = %plan.vendor, client = %stop.client, error = %e, "Stop rejected");
        }
    }

    let unload = MovementRequest::new(vendor, MovementKind::Collection, plan.unload).with_batch(batch);
    if let Err(e) = timed(&metrics, warehouse.apply(&unload)).await {
        warn!(vendor = %plan.vendor, error = %e, "Unload rejected");
    }
}

/// Apply through a ledger and record the outcome.
async fn timed(
    metrics: &RwLock<SimulationMetrics>,
    apply: impl std::future::Future<Output = Result<AppliedMovement, DepotError>>,
) -> Result<AppliedMovement, DepotError> {
    let start = Instant::now();
    let outcome = apply.await;
    let latency = start.elapsed().as_millis() as u64;

    let mut metrics = metrics.write().await;
    match &outcome {
        Ok(applied) => metrics.record_applied(latency, applied),
        Err(e) => metrics.record_error(e),
    }
    outcome
}

struct Replay {
    positions: PerContainer<Position>,
    folios: BTreeSet<i64>,
    credit_seen: PerContainer<bool>,
}

/// Re-run the balance transition over a client's history, checking each
/// row's audit snapshot on the way.
fn replay(history: &[MovementRecord]) -> anyhow::Result<Replay> {
    let mut ordered: Vec<&MovementRecord> = history.iter().collect();
    ordered.sort_by_key(|m| (m.created_at, m.id));

    let mut replay = Replay {
        positions: PerContainer::default(),
        folios: BTreeSet::new(),
        credit_seen: PerContainer::default(),
    };

    for movement in ordered {
        let ct = movement.container_type;
        let step = transition::apply(movement.kind, movement.requested_qty, replay.positions[ct]);

        if let Some(audit) = movement.audit {
            if audit.before != step.before || audit.after != step.after {
                return Err(anyhow::anyhow!(
                    "Movement {}: audit {:?} -> {:?} disagrees with replay {:?} -> {:?}",
                    movement.id,
                    audit.before,
                    audit.after,
                    step.before,
                    step.after
                ));
            }
            replay.folios.insert(audit.folio.get());
        }

        replay.positions[ct] = step.after;
        if step.after.credit > 0 {
            replay.credit_seen[ct] = true;
        }
    }

    Ok(replay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(clients: usize, vendors: usize) -> SimulationController {
        let config = LedgerConfig {
            retry_backoff: Duration::from_millis(1),
            ..LedgerConfig::default()
        };
        let controller = SimulationController::new(clients, vendors, Some(7), config);
        controller.initialize(Duration::ZERO);
        controller
    }

    #[tokio::test]
    async fn test_named_scenarios_pass() {
        for name in Scenario::NAMES {
            let controller = controller(5, 2);
            controller.run_scenario(Scenario::load(name).unwrap()).await.unwrap();
            controller.verify().await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_route_day_keeps_properties() {
        let controller = controller(6, 3);
        controller.run_route_day(60).await.unwrap();

        let report = controller.verify().await.unwrap();
        assert_eq!(report.parties_checked, 9);

        let metrics = controller.metrics().await;
        assert!(metrics.accepted_movements > 0);
        assert_eq!(metrics.total_movements, 60 + 3 * 2);
        assert_eq!(
            metrics.accepted_movements + metrics.rejected_movements + metrics.failed_movements,
            metrics.total_movements
        );
        assert!(metrics.loaned_units > 0);
    }

    #[tokio::test]
    async fn test_failed_assertion_reported() {
        let controller = controller(2, 1);
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "expects a debt that was never loaned".to_string(),
            steps: vec![ScenarioStep::Assert {
                condition: AssertCondition::BalanceEquals {
                    party: 1,
                    container: ContainerType::Bucket,
                    debt: 1,
                    credit: 0,
                },
            }],
        };
        assert!(controller.run_scenario(scenario).await.is_err());
    }
}
