//! Transfer scenarios.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use simplebank_common::MinorUnits;

/// Sizing knobs shared by every scenario.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioParams {
    /// Number of provisioned accounts.
    pub accounts: usize,
    /// Number of transfers to run.
    pub transfers: usize,
    /// Amount per transfer, or the upper bound for random amounts.
    pub amount: MinorUnits,
}

/// One transfer to run, by index into the provisioned accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedTransfer {
    pub from: usize,
    pub to: usize,
    pub amount: MinorUnits,
}

/// Transfer scenario.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Transfers, all launched at once.
    pub transfers: Vec<PlannedTransfer>,
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 4] = [
        "same-direction",
        "reversed-pairs",
        "disjoint-pairs",
        "random-mesh",
    ];

    /// Build a scenario by name.
    pub fn load(name: &str, params: &ScenarioParams, rng: &mut StdRng) -> Result<Self> {
        if params.accounts < 2 {
            bail!("scenarios need at least 2 accounts, got {}", params.accounts);
        }
        if params.amount <= 0 {
            bail!("transfer amount must be positive, got {}", params.amount);
        }

        match name {
            "same-direction" => Ok(Self::same_direction(params)),
            "reversed-pairs" => Ok(Self::reversed_pairs(params)),
            "disjoint-pairs" => Ok(Self::disjoint_pairs(params)),
            "random-mesh" => Ok(Self::random_mesh(params, rng)),
            _ => bail!(
                "Unknown scenario: {} (expected one of {})",
                name,
                Self::NAMES.join(", ")
            ),
        }
    }

    /// Every transfer moves funds from the first account to the second.
    fn same_direction(params: &ScenarioParams) -> Self {
        let transfers = (0..params.transfers)
            .map(|_| PlannedTransfer {
                from: 0,
                to: 1,
                amount: params.amount,
            })
            .collect();

        Self {
            name: "same-direction".to_string(),
            description: "Concurrent transfers from one account to another".to_string(),
            transfers,
        }
    }

    /// Alternate directions over the same two accounts.
    fn reversed_pairs(params: &ScenarioParams) -> Self {
        let transfers = (0..params.transfers)
            .map(|i| {
                let (from, to) = if i % 2 == 0 { (0, 1) } else { (1, 0) };
                PlannedTransfer {
                    from,
                    to,
                    amount: params.amount,
                }
            })
            .collect();

        Self {
            name: "reversed-pairs".to_string(),
            description: "Opposite-direction transfers over one account pair".to_string(),
            transfers,
        }
    }

    /// Round-robin over account pairs (0,1), (2,3), ... that share nothing.
    fn disjoint_pairs(params: &ScenarioParams) -> Self {
        let pairs = params.accounts / 2;
        let transfers = (0..params.transfers)
            .map(|i| {
                let pair = i % pairs;
                PlannedTransfer {
                    from: pair * 2,
                    to: pair * 2 + 1,
                    amount: params.amount,
                }
            })
            .collect();

        Self {
            name: "disjoint-pairs".to_string(),
            description: "Transfers over account pairs with no overlap".to_string(),
            transfers,
        }
    }

    /// Random distinct pairs with random amounts in `1..=amount`.
    fn random_mesh(params: &ScenarioParams, rng: &mut StdRng) -> Self {
        let transfers = (0..params.transfers)
            .map(|_| {
                let from = rng.gen_range(0..params.accounts);
                // Skip over `from` so the pair is always distinct.
                let mut to = rng.gen_range(0..params.accounts - 1);
                if to >= from {
                    to += 1;
                }
                PlannedTransfer {
                    from,
                    to,
                    amount: rng.gen_range(1..=params.amount),
                }
            })
            .collect();

        Self {
            name: "random-mesh".to_string(),
            description: "Seeded random transfers across all accounts".to_string(),
            transfers,
        }
    }

    /// Net balance change per account index.
    pub fn expected_deltas(&self, accounts: usize) -> Vec<i128> {
        let mut deltas = vec![0i128; accounts];
        for planned in &self.transfers {
            deltas[planned.from] -= planned.amount as i128;
            deltas[planned.to] += planned.amount as i128;
        }
        deltas
    }
}
