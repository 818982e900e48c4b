use crate::data_structures::{Chain, SwapId, SwapStatus};
use std::time::Duration;
use thiserror::Error;

/// Rejections of caller supplied input. Never retried, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("source and destination chain must differ")]
    SameChain,
    #[error("invalid {chain} address: {address}")]
    InvalidAddress { chain: Chain, address: String },
    #[error("invalid {chain} swap id: {swap_id}")]
    InvalidSwapId { chain: Chain, swap_id: String },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("token {token} is not supported on {chain}")]
    UnsupportedToken { chain: Chain, token: String },
    #[error("invalid hashlock: expected 32 bytes of hex")]
    InvalidHashlock,
    #[error("invalid secret: expected 32 bytes of hex")]
    InvalidSecret,
    #[error("secret does not match hashlock")]
    SecretMismatch,
    #[error("timelock {timelock} must be after {earliest} and no later than {latest}")]
    TimelockOutOfBounds {
        timelock: u64,
        earliest: u64,
        latest: u64,
    },
    #[error("unknown swap status: {0}")]
    UnknownStatus(String),
}

/// Failures reported by a ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{chain} request failed: {reason}")]
    Query { chain: Chain, reason: String },
    #[error("{chain} request timed out after {timeout:?}")]
    Timeout { chain: Chain, timeout: Duration },
    #[error("swap {swap_id} does not exist on {chain}")]
    NotFound { chain: Chain, swap_id: String },
    #[error("invalid preimage for swap {swap_id} on {chain}")]
    InvalidPreimage { chain: Chain, swap_id: String },
    #[error("swap {swap_id} is not withdrawable on {chain}")]
    NotWithdrawable { chain: Chain, swap_id: String },
    #[error("swap {swap_id} is not refundable on {chain}")]
    NotRefundable { chain: Chain, swap_id: String },
    #[error("swap {swap_id} already withdrawn on {chain}")]
    AlreadyWithdrawn { chain: Chain, swap_id: String },
    #[error("swap {swap_id} already refunded on {chain}")]
    AlreadyRefunded { chain: Chain, swap_id: String },
    #[error("timelock rejected by {chain}: {reason}")]
    TimelockTooShort { chain: Chain, reason: String },
    #[error("{chain} rejected the transaction: {reason}")]
    Rejected { chain: Chain, reason: String },
    #[error("{chain} ledger is misconfigured: {reason}")]
    Config { chain: Chain, reason: String },
}

impl LedgerError {
    /// Transient errors are retried with backoff; everything else ends the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Query { .. } | LedgerError::Timeout { .. })
    }

    pub fn chain(&self) -> Chain {
        match self {
            LedgerError::Query { chain, .. }
            | LedgerError::Timeout { chain, .. }
            | LedgerError::NotFound { chain, .. }
            | LedgerError::InvalidPreimage { chain, .. }
            | LedgerError::NotWithdrawable { chain, .. }
            | LedgerError::NotRefundable { chain, .. }
            | LedgerError::AlreadyWithdrawn { chain, .. }
            | LedgerError::AlreadyRefunded { chain, .. }
            | LedgerError::TimelockTooShort { chain, .. }
            | LedgerError::Rejected { chain, .. }
            | LedgerError::Config { chain, .. } => *chain,
        }
    }

    /// Maps a contract revert or node error message onto a typed error.
    /// Unrecognised messages are treated as transient query failures.
    pub fn classify(chain: Chain, swap_id: &str, message: &str) -> Self {
        let lowered = message.to_lowercase();
        let swap_id = swap_id.to_string();
        let has = |needle: &str| lowered.contains(needle);

        if has("invalid preimage") {
            LedgerError::InvalidPreimage { chain, swap_id }
        } else if has("already withdrawn") {
            LedgerError::AlreadyWithdrawn { chain, swap_id }
        } else if has("already refunded") {
            LedgerError::AlreadyRefunded { chain, swap_id }
        } else if has("not withdrawable") || has("timelock expired") {
            LedgerError::NotWithdrawable { chain, swap_id }
        } else if has("not refundable") || has("timelock not expired") {
            LedgerError::NotRefundable { chain, swap_id }
        } else if has("timelock too short") || has("invalid timelock") {
            LedgerError::TimelockTooShort {
                chain,
                reason: message.trim().to_string(),
            }
        } else if has("does not exist") || has("not found") {
            LedgerError::NotFound { chain, swap_id }
        } else if has("revert") {
            LedgerError::Rejected {
                chain,
                reason: message.trim().to_string(),
            }
        } else {
            LedgerError::Query {
                chain,
                reason: message.trim().to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("swap {0} not found")]
    NotFound(SwapId),
    #[error("swap {0} already exists")]
    AlreadyExists(SwapId),
    #[error("cannot move swap {swap_id} from {from} to {to}")]
    InvalidTransition {
        swap_id: SwapId,
        from: SwapStatus,
        to: SwapStatus,
    },
    #[error("hashlock of swap {0} cannot change")]
    HashlockChanged(SwapId),
    #[error("swap {swap_id} expired at {timelock}")]
    Expired { swap_id: SwapId, timelock: u64 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_contract_messages() {
        let classify = |msg| LedgerError::classify(Chain::Ethereum, "0xabc", msg);
        assert!(matches!(
            classify("execution reverted: Invalid preimage"),
            LedgerError::InvalidPreimage { .. }
        ));
        assert!(matches!(
            classify("Swap already withdrawn"),
            LedgerError::AlreadyWithdrawn { .. }
        ));
        assert!(matches!(
            classify("Timelock not expired"),
            LedgerError::NotRefundable { .. }
        ));
        assert!(matches!(
            classify("Timelock expired"),
            LedgerError::NotWithdrawable { .. }
        ));
        assert!(matches!(
            classify("Swap does not exist"),
            LedgerError::NotFound { .. }
        ));
        assert!(matches!(
            classify("execution reverted"),
            LedgerError::Rejected { .. }
        ));
    }

    #[test]
    fn test_unknown_messages_are_transient() {
        let err = LedgerError::classify(Chain::Cosmos, "abc", "connection refused");
        assert!(err.is_transient());
        assert_eq!(err.chain(), Chain::Cosmos);
        assert!(!LedgerError::classify(Chain::Cosmos, "abc", "already refunded").is_transient());
    }
}
