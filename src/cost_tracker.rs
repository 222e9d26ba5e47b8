// Cost and token bookkeeping
//
// Monotonic counters updated once per iteration. When an adapter reports a
// cost directly it is used as-is; otherwise cost is computed from token
// counts and the adapter's pricing table. Missing token counts contribute
// zero and are recorded as warnings, never errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{AgentKind, AgentResponse};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// Pricing consulted when an adapter does not report cost itself.
/// Exactly one table per adapter kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingTable {
    rates: BTreeMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    pub fn with_rate(mut self, agent: AgentKind, pricing: ModelPricing) -> Self {
        self.rates.insert(agent.as_str().to_string(), pricing);
        self
    }

    pub fn rate_for(&self, agent: AgentKind) -> Option<ModelPricing> {
        self.rates.get(agent.as_str()).copied()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        PricingTable::empty()
            .with_rate(
                AgentKind::Claude,
                ModelPricing {
                    input_per_mtok: 3.0,
                    output_per_mtok: 15.0,
                },
            )
            .with_rate(
                AgentKind::Gemini,
                ModelPricing {
                    input_per_mtok: 1.25,
                    output_per_mtok: 10.0,
                },
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub iterations_with_cost: u32,
    pub warnings: Vec<String>,
}

pub struct CostTracker {
    pricing: PricingTable,
    tokens_in: u64,
    tokens_out: u64,
    total_cost: f64,
    iterations_with_cost: u32,
    warnings: Vec<String>,
}

impl CostTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            tokens_in: 0,
            tokens_out: 0,
            total_cost: 0.0,
            iterations_with_cost: 0,
            warnings: Vec::new(),
        }
    }

    /// Record one iteration's response. Returns the cost attributed to it.
    pub fn record(&mut self, sequence: u32, agent: AgentKind, response: &AgentResponse) -> f64 {
        let tokens_in = response.tokens_in.unwrap_or(0);
        let tokens_out = response.tokens_out.unwrap_or(0);
        self.tokens_in += tokens_in;
        self.tokens_out += tokens_out;

        let cost = match response.cost {
            Some(reported) => reported,
            None => match self.pricing.rate_for(agent) {
                Some(rate) => {
                    if response.tokens_in.is_none() || response.tokens_out.is_none() {
                        self.warnings.push(format!(
                            "iteration {}: missing token counts, cost partially estimated",
                            sequence
                        ));
                    }
                    (tokens_in as f64 * rate.input_per_mtok
                        + tokens_out as f64 * rate.output_per_mtok)
                        / 1_000_000.0
                }
                None => {
                    self.warnings.push(format!(
                        "iteration {}: no pricing for agent '{}', cost recorded as zero",
                        sequence, agent
                    ));
                    0.0
                }
            },
        };

        self.total_cost += cost;
        if cost > 0.0 {
            self.iterations_with_cost += 1;
        }
        cost
    }

    /// Cumulative cost so far; non-decreasing across the run.
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn tokens_in(&self) -> u64 {
        self.tokens_in
    }

    pub fn tokens_out(&self) -> u64 {
        self.tokens_out
    }

    pub fn summary(&self) -> CostSummary {
        CostSummary {
            total_cost_usd: self.total_cost,
            total_tokens_in: self.tokens_in,
            total_tokens_out: self.tokens_out,
            iterations_with_cost: self.iterations_with_cost,
            warnings: self.warnings.clone(),
        }
    }
}
