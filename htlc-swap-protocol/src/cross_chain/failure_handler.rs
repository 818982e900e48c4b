// Refunds for swaps that ran past their timelock

use crate::cross_chain::retry::RetryPolicy;
use crate::cross_chain::types::{LegOutcome, Settlement};
use crate::data_structures::{Chain, SwapRecord, TxRef};
use crate::error::LedgerError;
use crate::onchain::{HtlcState, LedgerAdapter, Ledgers};
use log::{info, warn};

/// Outcome of both legs of an expired swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureReport {
    pub source: LegOutcome,
    pub destination: LegOutcome,
}

impl FailureReport {
    pub fn settlement(&self) -> Settlement {
        use LegOutcome::*;
        match (&self.source, &self.destination) {
            (Pending(_), _) | (_, Pending(_)) => Settlement::Unsettled,
            (Withdrawn, Withdrawn) => Settlement::Completed,
            (Withdrawn, _) | (_, Withdrawn) => Settlement::Failed,
            (Refunded(_), _) | (_, Refunded(_)) => Settlement::Refunded,
            (NothingLocked, NothingLocked) => Settlement::Failed,
        }
    }

    /// Refund transactions sent during this run.
    pub fn refund_tx_refs(&self) -> Vec<TxRef> {
        [&self.source, &self.destination]
            .into_iter()
            .filter_map(|leg| match leg {
                LegOutcome::Refunded(Some(tx)) => Some(tx.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!("source: {}, destination: {}", describe(&self.source), describe(&self.destination))
    }
}

fn describe(leg: &LegOutcome) -> String {
    match leg {
        LegOutcome::NothingLocked => "nothing locked".to_string(),
        LegOutcome::Withdrawn => "withdrawn".to_string(),
        LegOutcome::Refunded(_) => "refunded".to_string(),
        LegOutcome::Pending(reason) => format!("pending ({})", reason),
    }
}

/// Refunds every leg of a swap that is still locked. A leg is only touched
/// after its status query shows it locked, so absent legs never get a refund
/// transaction.
#[derive(Clone)]
pub struct FailureHandler {
    ledgers: Ledgers,
    retry: RetryPolicy,
}

impl FailureHandler {
    pub fn new(ledgers: Ledgers, retry: RetryPolicy) -> Self {
        FailureHandler { ledgers, retry }
    }

    pub async fn settle(&self, record: &SwapRecord) -> FailureReport {
        let source = self.settle_leg(record.from_chain, Some(record.swap_id.as_str()));
        let destination = self.settle_leg(record.to_chain, record.counter_swap_id.as_deref());
        let (source, destination) = futures::join!(source, destination);
        FailureReport { source, destination }
    }

    async fn settle_leg(&self, chain: Chain, swap_id: Option<&str>) -> LegOutcome {
        let Some(swap_id) = swap_id else {
            return LegOutcome::NothingLocked;
        };
        let adapter = self.ledgers.get(chain);
        let state = match self
            .retry
            .retry("query lock before refund", || adapter.get_swap_status(swap_id))
            .await
        {
            Ok(state) => state,
            Err(err) => return LegOutcome::Pending(err.to_string()),
        };

        match state {
            HtlcState::Absent => LegOutcome::NothingLocked,
            HtlcState::Withdrawn { .. } => LegOutcome::Withdrawn,
            HtlcState::Refunded(_) => LegOutcome::Refunded(None),
            HtlcState::Locked(_) => self.refund_locked(adapter.as_ref(), swap_id).await,
        }
    }

    async fn refund_locked(&self, adapter: &dyn LedgerAdapter, swap_id: &str) -> LegOutcome {
        let chain = adapter.chain();
        // The chain's block time decides, not ours.
        match self
            .retry
            .retry("check refundability", || adapter.is_refundable(swap_id))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return LegOutcome::Pending(format!("{} lock {} not refundable yet", chain, swap_id))
            }
            Err(err) => return LegOutcome::Pending(err.to_string()),
        }

        match self.retry.retry("refund", || adapter.refund(swap_id)).await {
            Ok(tx_ref) => {
                info!("[FailureHandler] Refunded {} lock {} in {}", chain, swap_id, tx_ref);
                LegOutcome::Refunded(Some(tx_ref))
            }
            Err(LedgerError::AlreadyRefunded { .. }) => LegOutcome::Refunded(None),
            Err(LedgerError::AlreadyWithdrawn { .. }) => LegOutcome::Withdrawn,
            Err(err) => {
                warn!("[FailureHandler] Refund of {} lock {} failed: {}", chain, swap_id, err);
                LegOutcome::Pending(err.to_string())
            }
        }
    }
}
