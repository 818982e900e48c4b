// Ledger adapters for the two HTLC contracts

pub mod cosmos_ledger;
pub mod evm_ledger;
pub mod htlc_simulator;
pub mod interface;

pub use cosmos_ledger::CosmosCliLedger;
pub use evm_ledger::EvmLedger;
pub use htlc_simulator::SimulatedLedger;
pub use interface::{CounterLock, CounterSwapRequest, HtlcState, LedgerAdapter, LockDetails};

use crate::clock::Clock;
use crate::config::{LedgerMode, SystemConfig};
use crate::data_structures::Chain;
use crate::error::LedgerError;
use std::sync::Arc;

/// Operator accounts used by the simulated ledgers.
pub const SIMULATED_ETHEREUM_OPERATOR: &str = "0x00000000000000000000000000000000000000c0";
pub const SIMULATED_COSMOS_OPERATOR: &str = "cosmos1operator0000000000000000000000000000";

/// One adapter per chain.
#[derive(Clone)]
pub struct Ledgers {
    ethereum: Arc<dyn LedgerAdapter>,
    cosmos: Arc<dyn LedgerAdapter>,
}

impl Ledgers {
    pub fn new(
        ethereum: Arc<dyn LedgerAdapter>,
        cosmos: Arc<dyn LedgerAdapter>,
    ) -> Result<Self, LedgerError> {
        for (expected, adapter) in [(Chain::Ethereum, &ethereum), (Chain::Cosmos, &cosmos)] {
            if adapter.chain() != expected {
                return Err(LedgerError::Config {
                    chain: expected,
                    reason: format!("adapter serves {} instead", adapter.chain()),
                });
            }
        }
        Ok(Ledgers { ethereum, cosmos })
    }

    pub fn from_config(config: &SystemConfig, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        match config.ledger_mode {
            LedgerMode::Live => Self::new(
                Arc::new(EvmLedger::new(&config.ethereum, &config.coordinator)?),
                Arc::new(CosmosCliLedger::new(&config.cosmos, &config.coordinator)?),
            ),
            LedgerMode::Simulated => {
                let (ethereum, cosmos) = simulated_pair(config, clock);
                Self::new(Arc::new(ethereum), Arc::new(cosmos))
            }
        }
    }

    pub fn get(&self, chain: Chain) -> &Arc<dyn LedgerAdapter> {
        match chain {
            Chain::Ethereum => &self.ethereum,
            Chain::Cosmos => &self.cosmos,
        }
    }
}

/// Simulated ethereum and cosmos ledgers sharing one clock.
pub fn simulated_pair(config: &SystemConfig, clock: Arc<dyn Clock>) -> (SimulatedLedger, SimulatedLedger) {
    let ethereum = SimulatedLedger::new(
        Chain::Ethereum,
        Arc::clone(&clock),
        &config.timelock,
        config.ethereum.tokens.clone(),
        SIMULATED_ETHEREUM_OPERATOR,
    );
    let cosmos = SimulatedLedger::new(
        Chain::Cosmos,
        clock,
        &config.timelock,
        config.cosmos.tokens.clone(),
        SIMULATED_COSMOS_OPERATOR,
    );
    (ethereum, cosmos)
}
