use crate::data_structures::{Chain, Hashlock, Secret, SwapId, SwapRecord, TxRef};
use crate::error::LedgerError;
use async_trait::async_trait;
use ethers::types::U256;
use std::future::Future;
use std::time::Duration;

/// Terms of an HTLC as stored by the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockDetails {
    pub hashlock: Hashlock,
    pub timelock: u64,
    pub sender: String,
    pub receiver: String,
    pub token: String,
    /// Base units of `token`.
    pub amount: U256,
}

/// On-chain state of one HTLC. Exactly one variant holds at any time, so an
/// HTLC can never be both withdrawn and refunded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HtlcState {
    Absent,
    Locked(LockDetails),
    Withdrawn {
        lock: LockDetails,
        /// Preimage revealed by the withdrawal, if the contract stores it.
        preimage: Option<Secret>,
    },
    Refunded(LockDetails),
}

impl HtlcState {
    pub fn exists(&self) -> bool {
        !matches!(self, HtlcState::Absent)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, HtlcState::Locked(_))
    }

    pub fn is_withdrawn(&self) -> bool {
        matches!(self, HtlcState::Withdrawn { .. })
    }

    pub fn is_refunded(&self) -> bool {
        matches!(self, HtlcState::Refunded(_))
    }

    pub fn lock(&self) -> Option<&LockDetails> {
        match self {
            HtlcState::Absent => None,
            HtlcState::Locked(lock)
            | HtlcState::Withdrawn { lock, .. }
            | HtlcState::Refunded(lock) => Some(lock),
        }
    }

    pub fn timelock(&self) -> Option<u64> {
        self.lock().map(|l| l.timelock)
    }

    pub fn amount(&self) -> Option<U256> {
        self.lock().map(|l| l.amount)
    }

    pub fn revealed_preimage(&self) -> Option<&Secret> {
        match self {
            HtlcState::Withdrawn { preimage, .. } => preimage.as_ref(),
            _ => None,
        }
    }

    pub fn is_withdrawable_at(&self, now: u64) -> bool {
        matches!(self, HtlcState::Locked(lock) if now < lock.timelock)
    }

    pub fn is_refundable_at(&self, now: u64) -> bool {
        matches!(self, HtlcState::Locked(lock) if now >= lock.timelock)
    }
}

/// Parameters of the HTLC the coordinator opens on the destination chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterSwapRequest {
    pub source_swap_id: SwapId,
    pub hashlock: Hashlock,
    pub timelock: u64,
    pub receiver: String,
    /// Token symbol on the destination chain.
    pub token: String,
    /// Decimal amount in whole token units.
    pub amount: String,
}

impl CounterSwapRequest {
    pub fn for_swap(record: &SwapRecord, counter_timelock: u64) -> Self {
        CounterSwapRequest {
            source_swap_id: record.swap_id.clone(),
            hashlock: record.hashlock,
            timelock: counter_timelock,
            receiver: record.receiver_address.clone(),
            token: record.to_token.clone(),
            amount: record.to_amount.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterLock {
    pub swap_id: SwapId,
    pub tx_ref: TxRef,
}

/// Uniform view of the HTLC contract on one chain.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    fn chain(&self) -> Chain;

    /// Never fails for an unknown id; that is [`HtlcState::Absent`].
    async fn get_swap_status(&self, swap_id: &str) -> Result<HtlcState, LedgerError>;

    /// Locks the operator's funds under the source hashlock.
    async fn initiate_counter_swap(
        &self,
        request: &CounterSwapRequest,
    ) -> Result<CounterLock, LedgerError>;

    async fn withdraw(&self, swap_id: &str, preimage: &Secret) -> Result<TxRef, LedgerError>;

    async fn refund(&self, swap_id: &str) -> Result<TxRef, LedgerError>;

    async fn is_withdrawable(&self, swap_id: &str) -> Result<bool, LedgerError>;

    async fn is_refundable(&self, swap_id: &str) -> Result<bool, LedgerError>;
}

/// Bounds a ledger call so a hung node cannot stall a pass.
pub async fn with_timeout<T, F>(chain: Chain, timeout: Duration, future: F) -> Result<T, LedgerError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| LedgerError::Timeout { chain, timeout })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(timelock: u64) -> LockDetails {
        LockDetails {
            hashlock: Hashlock::from_bytes([1u8; 32]),
            timelock,
            sender: "a".into(),
            receiver: "b".into(),
            token: "ETH".into(),
            amount: U256::from(10u64),
        }
    }

    #[test]
    fn test_withdrawable_and_refundable_windows() {
        let state = HtlcState::Locked(lock(100));
        assert!(state.is_withdrawable_at(99));
        assert!(!state.is_withdrawable_at(100));
        assert!(!state.is_refundable_at(99));
        assert!(state.is_refundable_at(100));

        let withdrawn = HtlcState::Withdrawn {
            lock: lock(100),
            preimage: None,
        };
        assert!(!withdrawn.is_refundable_at(200));
        assert_eq!(withdrawn.timelock(), Some(100));
        assert!(!HtlcState::Absent.exists());
    }

    #[tokio::test]
    async fn test_with_timeout_reports_chain() {
        let result = with_timeout(
            Chain::Cosmos,
            Duration::from_millis(5),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(matches!(
            result,
            Err(LedgerError::Timeout { chain: Chain::Cosmos, .. })
        ));
    }
}
