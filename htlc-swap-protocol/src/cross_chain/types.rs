// Types shared by the coordinator, failure handler and supervisor

use crate::data_structures::{Secret, SwapId, SwapStatus, TxRef};
use crate::error::SwapError;
use serde::Serialize;

// Next step for a swap, derived from its record and both ledger states
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    // Source timelock reached: hand the swap to the failure handler
    Expire,
    // Source locked and nothing on the destination yet
    InitiateCounter { counter_timelock: u64 },
    // Secret known and counter lock still open
    CompleteWithdrawal { preimage: Secret },
    // Ledgers show progress the record has not caught up with
    Observe { status: SwapStatus, message: String },
    // Irrecoverable mismatch between the record and the ledgers
    Fail(String),
    // Nothing to do this pass
    Wait(String),
}

/// What a single coordinator pass did to a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassAction {
    Waiting,
    Observed,
    CounterInitiated,
    Completed,
    Expired,
    Refunded,
    Failed,
    AlreadyFinal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    pub action: PassAction,
    pub status: SwapStatus,
    pub message: String,
}

impl PassOutcome {
    pub fn new(action: PassAction, status: SwapStatus, message: impl Into<String>) -> Self {
        PassOutcome {
            action,
            status,
            message: message.into(),
        }
    }
}

/// Per-swap entry of a process-pending run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub swap_id: SwapId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PassOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    pub fn new(swap_id: SwapId, result: Result<PassOutcome, SwapError>) -> Self {
        match result {
            Ok(outcome) => PassReport {
                swap_id,
                result: Some(outcome),
                error: None,
            },
            Err(err) => PassReport {
                swap_id,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// How one HTLC leg ended up after the failure handler looked at it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LegOutcome {
    NothingLocked,
    Withdrawn,
    // Tx ref is absent when the refund happened in an earlier pass
    Refunded(Option<TxRef>),
    // Still locked; retried on the next pass
    Pending(String),
}

/// Final status implied by the two legs of an expired swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Refunded,
    Failed,
    Unsettled,
}
