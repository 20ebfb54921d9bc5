//! Simulation scenarios.

use depot_common::{ContainerType, MovementKind};
use depot_ledger::store::FaultPoint;

/// Which ledger a step targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    /// Client↔vendor ledger.
    Client,
    /// Vendor↔warehouse ledger.
    Warehouse,
}

/// A simulation scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone)]
pub enum ScenarioStep {
    /// Apply one movement line.
    Apply {
        ledger: LedgerKind,
        party: i64,
        kind: MovementKind,
        container: ContainerType,
        quantity: u32,
        /// Whether the ledger should reject or fail the movement.
        expect_failure: bool,
    },
    /// Apply the same client movement from several tasks at once.
    Concurrent {
        party: i64,
        kind: MovementKind,
        container: ContainerType,
        quantity: u32,
        tasks: usize,
    },
    /// Arm a one-shot failure in a store.
    InjectFault {
        ledger: LedgerKind,
        point: FaultPoint,
        transient: bool,
    },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertCondition {
    /// Client balance for one container type.
    BalanceEquals {
        party: i64,
        container: ContainerType,
        debt: u64,
        credit: u64,
    },
    /// Client receipt number.
    FolioEquals { party: i64, folio: i64 },
    /// Remaining quantities of the open loan batches, oldest first.
    FifoRemaining { ledger: LedgerKind, party: i64, remaining: Vec<u64> },
    /// Aggregated warehouse debt for one container type.
    WarehouseDebt { party: i64, container: ContainerType, debt: u64 },
    /// Number of committed client movement rows.
    ClientMovementCount { count: usize },
}

fn client(party: i64, kind: MovementKind, container: ContainerType, quantity: u32) -> ScenarioStep {
    ScenarioStep::Apply {
        ledger: LedgerKind::Client,
        party,
        kind,
        container,
        quantity,
        expect_failure: false,
    }
}

fn warehouse(party: i64, kind: MovementKind, container: ContainerType, quantity: u32) -> ScenarioStep {
    ScenarioStep::Apply {
        ledger: LedgerKind::Warehouse,
        party,
        kind,
        container,
        quantity,
        expect_failure: false,
    }
}

fn balance(party: i64, container: ContainerType, debt: u64, credit: u64) -> ScenarioStep {
    ScenarioStep::Assert {
        condition: AssertCondition::BalanceEquals {
            party,
            container,
            debt,
            credit,
        },
    }
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 5] = [
        "loan-collect-loan",
        "fifo-partial",
        "concurrent-collections",
        "fault-recovery",
        "warehouse-load",
    ];

    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "loan-collect-loan" => Ok(Self::loan_collect_loan()),
            "fifo-partial" => Ok(Self::fifo_partial()),
            "concurrent-collections" => Ok(Self::concurrent_collections()),
            "fault-recovery" => Ok(Self::fault_recovery()),
            "warehouse-load" => Ok(Self::warehouse_load()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (known: {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Over-collection turns into credit and later loans do not consume it.
    fn loan_collect_loan() -> Self {
        use ContainerType::SmallCrate;
        Self {
            name: "loan-collect-loan".to_string(),
            description: "Loan 5, collect 8, loan 2 small crates".to_string(),
            steps: vec![
                client(1, MovementKind::Loan, SmallCrate, 5),
                balance(1, SmallCrate, 5, 0),
                ScenarioStep::Assert {
                    condition: AssertCondition::FolioEquals { party: 1, folio: 1 },
                },
                client(1, MovementKind::Collection, SmallCrate, 8),
                balance(1, SmallCrate, 0, 3),
                ScenarioStep::Assert {
                    condition: AssertCondition::FolioEquals { party: 1, folio: 2 },
                },
                client(1, MovementKind::Loan, SmallCrate, 2),
                balance(1, SmallCrate, 2, 3),
            ],
        }
    }

    /// Collections consume the oldest loan first.
    fn fifo_partial() -> Self {
        use ContainerType::LargeCrate;
        Self {
            name: "fifo-partial".to_string(),
            description: "Loan 3, loan 4, collect 5 and inspect open batches".to_string(),
            steps: vec![
                client(2, MovementKind::Loan, LargeCrate, 3),
                client(2, MovementKind::Loan, LargeCrate, 4),
                ScenarioStep::Assert {
                    condition: AssertCondition::FifoRemaining {
                        ledger: LedgerKind::Client,
                        party: 2,
                        remaining: vec![3, 4],
                    },
                },
                client(2, MovementKind::Collection, LargeCrate, 5),
                ScenarioStep::Assert {
                    condition: AssertCondition::FifoRemaining {
                        ledger: LedgerKind::Client,
                        party: 2,
                        remaining: vec![2],
                    },
                },
                balance(2, LargeCrate, 2, 0),
            ],
        }
    }

    /// Two collections racing on one balance row.
    fn concurrent_collections() -> Self {
        use ContainerType::Bucket;
        Self {
            name: "concurrent-collections".to_string(),
            description: "Two concurrent collections of 4 against a debt of 5".to_string(),
            steps: vec![
                client(3, MovementKind::Loan, Bucket, 5),
                ScenarioStep::Concurrent {
                    party: 3,
                    kind: MovementKind::Collection,
                    container: Bucket,
                    quantity: 4,
                    tasks: 2,
                },
                balance(3, Bucket, 0, 3),
                ScenarioStep::Assert {
                    condition: AssertCondition::FolioEquals { party: 3, folio: 3 },
                },
            ],
        }
    }

    /// Failed movements leave nothing behind; transient ones are retried.
    fn fault_recovery() -> Self {
        use ContainerType::SmallCrate;
        Self {
            name: "fault-recovery".to_string(),
            description: "Fail a movement mid-transaction, then recover from a conflict".to_string(),
            steps: vec![
                client(4, MovementKind::Loan, SmallCrate, 6),
                ScenarioStep::InjectFault {
                    ledger: LedgerKind::Client,
                    point: FaultPoint::MovementInsert,
                    transient: false,
                },
                ScenarioStep::Apply {
                    ledger: LedgerKind::Client,
                    party: 4,
                    kind: MovementKind::Collection,
                    container: SmallCrate,
                    quantity: 2,
                    expect_failure: true,
                },
                balance(4, SmallCrate, 6, 0),
                ScenarioStep::Assert {
                    condition: AssertCondition::FolioEquals { party: 4, folio: 1 },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::ClientMovementCount { count: 1 },
                },
                ScenarioStep::InjectFault {
                    ledger: LedgerKind::Client,
                    point: FaultPoint::Commit,
                    transient: true,
                },
                client(4, MovementKind::Collection, SmallCrate, 2),
                balance(4, SmallCrate, 4, 0),
                ScenarioStep::Assert {
                    condition: AssertCondition::FolioEquals { party: 4, folio: 2 },
                },
            ],
        }
    }

    /// A vendor loads at the warehouse and returns part of the load.
    fn warehouse_load() -> Self {
        use ContainerType::{Bucket, SmallCrate};
        Self {
            name: "warehouse-load".to_string(),
            description: "Vendor loads crates and buckets, then unloads".to_string(),
            steps: vec![
                warehouse(1, MovementKind::Loan, SmallCrate, 40),
                warehouse(1, MovementKind::Loan, Bucket, 12),
                warehouse(1, MovementKind::Collection, SmallCrate, 25),
                ScenarioStep::Assert {
                    condition: AssertCondition::WarehouseDebt {
                        party: 1,
                        container: SmallCrate,
                        debt: 15,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::FifoRemaining {
                        ledger: LedgerKind::Warehouse,
                        party: 1,
                        remaining: vec![15, 12],
                    },
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_named_scenario_loads() {
        for name in Scenario::NAMES {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("bank-run").is_err());
    }
}
