// In-memory HTLC ledger used by the simulated mode and the test suite

use crate::clock::Clock;
use crate::config::{find_token, TimelockPolicy};
use crate::data_structures::{Chain, Hashlock, Secret, SwapId, TokenInfo, TxRef};
use crate::error::LedgerError;
use crate::onchain::interface::{CounterLock, CounterSwapRequest, HtlcState, LedgerAdapter, LockDetails};
use crate::validation::parse_amount;
use async_trait::async_trait;
use ethers::types::U256;
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Event emitted by the simulated contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtlcEvent {
    SwapInitiated {
        swap_id: SwapId,
        hashlock: Hashlock,
        sender: String,
        receiver: String,
        amount: U256,
        timelock: u64,
    },
    SwapWithdrawn {
        swap_id: SwapId,
        preimage: Secret,
    },
    SwapRefunded {
        swap_id: SwapId,
    },
}

// One transaction per block
#[derive(Clone, Debug)]
pub struct Block {
    pub block_number: u64,
    pub timestamp: u64,
    pub tx_ref: TxRef,
    pub event: HtlcEvent,
}

#[derive(Clone, Debug)]
struct HtlcEntry {
    lock: LockDetails,
    withdrawn: bool,
    refunded: bool,
    preimage: Option<Secret>,
}

impl HtlcEntry {
    fn state(&self) -> HtlcState {
        if self.withdrawn {
            HtlcState::Withdrawn {
                lock: self.lock.clone(),
                preimage: self.preimage,
            }
        } else if self.refunded {
            HtlcState::Refunded(self.lock.clone())
        } else {
            HtlcState::Locked(self.lock.clone())
        }
    }
}

/// Number of state-changing calls made against the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub initiate: u32,
    pub withdraw: u32,
    pub refund: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<SwapId, HtlcEntry>,
    blocks: Vec<Block>,
    nonce: u64,
    failing_requests: u32,
    calls: CallCounts,
}

impl LedgerState {
    fn take_injected_failure(&mut self) -> bool {
        if self.failing_requests > 0 {
            self.failing_requests -= 1;
            true
        } else {
            false
        }
    }
}

/// HTLC contract semantics enforced against an injected clock. Clones share
/// the same ledger.
#[derive(Clone, Debug)]
pub struct SimulatedLedger {
    chain: Chain,
    clock: Arc<dyn Clock>,
    min_duration: u64,
    max_duration: u64,
    operator: String,
    tokens: Vec<TokenInfo>,
    state: Arc<Mutex<LedgerState>>,
}

impl SimulatedLedger {
    pub fn new(
        chain: Chain,
        clock: Arc<dyn Clock>,
        policy: &TimelockPolicy,
        tokens: Vec<TokenInfo>,
        operator: &str,
    ) -> Self {
        SimulatedLedger {
            chain,
            clock,
            min_duration: policy.min_duration.as_secs(),
            max_duration: policy.max_duration.as_secs(),
            operator: operator.to_string(),
            tokens,
            state: Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // A panic while holding the lock leaves the maps consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn derive_swap_id(&self, seed: &str) -> SwapId {
        let digest = hex::encode(Sha256::digest(seed.as_bytes()));
        match self.chain {
            Chain::Ethereum => format!("0x{}", digest),
            Chain::Cosmos => digest,
        }
    }

    fn record_block(&self, state: &mut LedgerState, event: HtlcEvent) -> TxRef {
        let block_number = state.blocks.len() as u64 + 1;
        let tx_ref = format!(
            "0x{}",
            hex::encode(Sha256::digest(
                format!("{}:tx:{}:{:?}", self.chain, block_number, event).as_bytes()
            ))
        );
        state.blocks.push(Block {
            block_number,
            timestamp: self.clock.now(),
            tx_ref: tx_ref.clone(),
            event,
        });
        tx_ref
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Contract `initiate`: locks `amount` base units under `hashlock` until `timelock`.
    pub fn initiate(
        &self,
        sender: &str,
        hashlock: Hashlock,
        timelock: u64,
        receiver: &str,
        token: &str,
        amount: U256,
    ) -> Result<CounterLock, LedgerError> {
        let now = self.clock.now();
        if amount.is_zero() {
            return Err(LedgerError::Rejected {
                chain: self.chain,
                reason: "amount must be greater than zero".into(),
            });
        }
        if timelock < now + self.min_duration {
            return Err(LedgerError::TimelockTooShort {
                chain: self.chain,
                reason: format!("timelock {} is earlier than now + {}s", timelock, self.min_duration),
            });
        }
        if timelock > now + self.max_duration {
            return Err(LedgerError::Rejected {
                chain: self.chain,
                reason: format!("timelock {} is later than now + {}s", timelock, self.max_duration),
            });
        }

        let mut state = self.state();
        state.calls.initiate += 1;
        state.nonce += 1;
        let swap_id = self.derive_swap_id(&format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            sender, receiver, token, amount, hashlock, timelock, now, state.nonce
        ));
        let lock = LockDetails {
            hashlock,
            timelock,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            token: token.to_string(),
            amount,
        };
        state.entries.insert(
            swap_id.clone(),
            HtlcEntry {
                lock,
                withdrawn: false,
                refunded: false,
                preimage: None,
            },
        );
        let tx_ref = self.record_block(
            &mut state,
            HtlcEvent::SwapInitiated {
                swap_id: swap_id.clone(),
                hashlock,
                sender: sender.to_string(),
                receiver: receiver.to_string(),
                amount,
                timelock,
            },
        );
        info!("[SimLedger {}] Swap {} initiated, expires at {}", self.chain, swap_id, timelock);
        Ok(CounterLock { swap_id, tx_ref })
    }

    /// Same as [`initiate`](Self::initiate) with a decimal amount of a listed token.
    pub fn lock_funds(
        &self,
        sender: &str,
        hashlock: Hashlock,
        timelock: u64,
        receiver: &str,
        token: &str,
        amount: &str,
    ) -> Result<CounterLock, LedgerError> {
        let units = self.base_units(token, amount)?;
        self.initiate(sender, hashlock, timelock, receiver, token, units)
    }

    fn base_units(&self, token: &str, amount: &str) -> Result<U256, LedgerError> {
        let info = find_token(&self.tokens, token).ok_or_else(|| LedgerError::Rejected {
            chain: self.chain,
            reason: format!("unknown token {}", token),
        })?;
        parse_amount(amount, info.decimals).map_err(|e| LedgerError::Rejected {
            chain: self.chain,
            reason: e.to_string(),
        })
    }

    pub fn withdraw_with(&self, swap_id: &str, preimage: &Secret) -> Result<TxRef, LedgerError> {
        let now = self.clock.now();
        let chain = self.chain;
        let mut state = self.state();
        state.calls.withdraw += 1;
        let entry = state
            .entries
            .get_mut(swap_id)
            .ok_or_else(|| LedgerError::NotFound { chain, swap_id: swap_id.to_string() })?;
        if entry.withdrawn {
            return Err(LedgerError::AlreadyWithdrawn { chain, swap_id: swap_id.to_string() });
        }
        if entry.refunded {
            return Err(LedgerError::AlreadyRefunded { chain, swap_id: swap_id.to_string() });
        }
        if now >= entry.lock.timelock {
            return Err(LedgerError::NotWithdrawable { chain, swap_id: swap_id.to_string() });
        }
        if !preimage.matches(&entry.lock.hashlock) {
            return Err(LedgerError::InvalidPreimage { chain, swap_id: swap_id.to_string() });
        }
        entry.withdrawn = true;
        entry.preimage = Some(*preimage);
        let tx_ref = self.record_block(
            &mut state,
            HtlcEvent::SwapWithdrawn {
                swap_id: swap_id.to_string(),
                preimage: *preimage,
            },
        );
        info!("[SimLedger {}] Swap {} withdrawn", chain, swap_id);
        Ok(tx_ref)
    }

    pub fn refund_now(&self, swap_id: &str) -> Result<TxRef, LedgerError> {
        let now = self.clock.now();
        let chain = self.chain;
        let mut state = self.state();
        state.calls.refund += 1;
        let entry = state
            .entries
            .get_mut(swap_id)
            .ok_or_else(|| LedgerError::NotFound { chain, swap_id: swap_id.to_string() })?;
        if entry.withdrawn {
            return Err(LedgerError::AlreadyWithdrawn { chain, swap_id: swap_id.to_string() });
        }
        if entry.refunded {
            return Err(LedgerError::AlreadyRefunded { chain, swap_id: swap_id.to_string() });
        }
        if now < entry.lock.timelock {
            return Err(LedgerError::NotRefundable { chain, swap_id: swap_id.to_string() });
        }
        entry.refunded = true;
        let tx_ref = self.record_block(
            &mut state,
            HtlcEvent::SwapRefunded {
                swap_id: swap_id.to_string(),
            },
        );
        info!("[SimLedger {}] Swap {} refunded", chain, swap_id);
        Ok(tx_ref)
    }

    pub fn swap_state(&self, swap_id: &str) -> HtlcState {
        self.state()
            .entries
            .get(swap_id)
            .map(HtlcEntry::state)
            .unwrap_or(HtlcState::Absent)
    }

    /// The next `count` adapter calls fail with a transient error.
    pub fn fail_next_requests(&self, count: u32) {
        self.state().failing_requests = count;
    }

    pub fn call_counts(&self) -> CallCounts {
        self.state().calls
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.state().blocks.clone()
    }

    pub fn swap_ids(&self) -> Vec<SwapId> {
        self.state().entries.keys().cloned().collect()
    }

    fn injected_failure(&self, what: &str) -> Result<(), LedgerError> {
        if self.state().take_injected_failure() {
            debug!("[SimLedger {}] Injected failure for {}", self.chain, what);
            return Err(LedgerError::Query {
                chain: self.chain,
                reason: format!("simulated outage during {}", what),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerAdapter for SimulatedLedger {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn get_swap_status(&self, swap_id: &str) -> Result<HtlcState, LedgerError> {
        self.injected_failure("get_swap_status")?;
        Ok(self.swap_state(swap_id))
    }

    async fn initiate_counter_swap(
        &self,
        request: &CounterSwapRequest,
    ) -> Result<CounterLock, LedgerError> {
        self.injected_failure("initiate_counter_swap")?;
        let operator = self.operator.clone();
        self.lock_funds(
            &operator,
            request.hashlock,
            request.timelock,
            &request.receiver,
            &request.token,
            &request.amount,
        )
    }

    async fn withdraw(&self, swap_id: &str, preimage: &Secret) -> Result<TxRef, LedgerError> {
        self.injected_failure("withdraw")?;
        self.withdraw_with(swap_id, preimage)
    }

    async fn refund(&self, swap_id: &str) -> Result<TxRef, LedgerError> {
        self.injected_failure("refund")?;
        self.refund_now(swap_id)
    }

    async fn is_withdrawable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        self.injected_failure("is_withdrawable")?;
        Ok(self.swap_state(swap_id).is_withdrawable_at(self.clock.now()))
    }

    async fn is_refundable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        self.injected_failure("is_refundable")?;
        Ok(self.swap_state(swap_id).is_refundable_at(self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SystemConfig;
    use crate::crypto::generate_secret;

    const T0: u64 = 1_700_000_000;

    fn ledger(clock: &ManualClock) -> SimulatedLedger {
        let config = SystemConfig::default();
        SimulatedLedger::new(
            Chain::Cosmos,
            Arc::new(clock.clone()),
            &config.timelock,
            config.cosmos.tokens.clone(),
            "cosmos1operator",
        )
    }

    #[test]
    fn test_rejects_short_timelock() {
        let clock = ManualClock::new(T0);
        let ledger = ledger(&clock);
        let secret = generate_secret();
        let result = ledger.lock_funds("alice", secret.hashlock(), T0 + 1800, "bob", "ATOM", "1");
        assert!(matches!(result, Err(LedgerError::TimelockTooShort { .. })));
        assert_eq!(ledger.call_counts().initiate, 0);
    }

    #[test]
    fn test_withdraw_once_with_valid_preimage() {
        let clock = ManualClock::new(T0);
        let ledger = ledger(&clock);
        let secret = generate_secret();
        let lock = ledger
            .lock_funds("alice", secret.hashlock(), T0 + 7200, "bob", "ATOM", "2.5")
            .unwrap();
        assert_eq!(lock.swap_id.len(), 64);
        assert_eq!(
            ledger.swap_state(&lock.swap_id).amount(),
            Some(U256::from(2_500_000u64))
        );

        let wrong = generate_secret();
        assert!(matches!(
            ledger.withdraw_with(&lock.swap_id, &wrong),
            Err(LedgerError::InvalidPreimage { .. })
        ));
        ledger.withdraw_with(&lock.swap_id, &secret).unwrap();
        assert!(matches!(
            ledger.withdraw_with(&lock.swap_id, &secret),
            Err(LedgerError::AlreadyWithdrawn { .. })
        ));
        assert_eq!(
            ledger.swap_state(&lock.swap_id).revealed_preimage(),
            Some(&secret)
        );
        // Withdrawn HTLCs can never be refunded.
        clock.advance(10_000);
        assert!(matches!(
            ledger.refund_now(&lock.swap_id),
            Err(LedgerError::AlreadyWithdrawn { .. })
        ));
    }

    #[test]
    fn test_expiry_boundaries() {
        let clock = ManualClock::new(T0);
        let ledger = ledger(&clock);
        let secret = generate_secret();
        let lock = ledger
            .lock_funds("alice", secret.hashlock(), T0 + 3600, "bob", "ATOM", "1")
            .unwrap();

        assert!(matches!(
            ledger.refund_now(&lock.swap_id),
            Err(LedgerError::NotRefundable { .. })
        ));
        clock.set(T0 + 3600);
        assert!(matches!(
            ledger.withdraw_with(&lock.swap_id, &secret),
            Err(LedgerError::NotWithdrawable { .. })
        ));
        ledger.refund_now(&lock.swap_id).unwrap();
        assert!(ledger.swap_state(&lock.swap_id).is_refunded());
        assert_eq!(ledger.blocks().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_swap_is_absent() {
        let clock = ManualClock::new(T0);
        let ledger = ledger(&clock);
        assert_eq!(ledger.get_swap_status("nope").await, Ok(HtlcState::Absent));
        assert!(matches!(
            ledger.refund("nope").await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let clock = ManualClock::new(T0);
        let ledger = ledger(&clock);
        ledger.fail_next_requests(1);
        assert!(ledger.get_swap_status("x").await.unwrap_err().is_transient());
        assert!(ledger.get_swap_status("x").await.is_ok());
    }
}
