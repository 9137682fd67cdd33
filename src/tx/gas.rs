//! Gas sizing helpers for account-chain submissions

use ethers::types::U256;

/// Applies safety buffers on top of node-reported gas figures.
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g. 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
            gas_price_buffer_percent: 10,
        }
    }

    /// Pad an estimate so minor state drift between estimate and
    /// inclusion does not starve the call.
    pub fn buffered_limit(&self, estimated: U256) -> U256 {
        estimated + estimated * self.gas_limit_buffer_percent / 100
    }

    pub fn buffered_price(&self, node_price: U256) -> U256 {
        node_price + node_price * self.gas_price_buffer_percent / 100
    }

    /// Total cost ceiling in the chain's base unit.
    pub fn calculate_cost(gas_limit: U256, gas_price: U256) -> U256 {
        gas_limit * gas_price
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20)
    }
}
