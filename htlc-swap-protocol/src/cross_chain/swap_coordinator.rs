// Drives each swap from the source lock to completion or refund

use crate::clock::Clock;
use crate::config::{SystemConfig, TimelockPolicy};
use crate::cross_chain::failure_handler::FailureHandler;
use crate::cross_chain::retry::RetryPolicy;
use crate::cross_chain::types::{Decision, PassAction, PassOutcome, PassReport, Settlement};
use crate::data_structures::{Secret, SwapRecord, SwapStatus, TxRef};
use crate::error::{LedgerError, SwapError};
use crate::onchain::{CounterSwapRequest, HtlcState, Ledgers};
use crate::registry::SwapRegistry;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Picks the next step for a swap. Pure: all inputs are passed in.
pub fn decide(
    record: &SwapRecord,
    source: &HtlcState,
    destination: &HtlcState,
    now: u64,
    policy: &TimelockPolicy,
) -> Decision {
    if now >= record.timelock {
        return Decision::Expire;
    }
    if let Some(lock) = source.lock() {
        if lock.hashlock != record.hashlock {
            return Decision::Fail(format!(
                "source lock hashlock {} does not match swap hashlock {}",
                lock.hashlock, record.hashlock
            ));
        }
    }

    match (source, destination) {
        (HtlcState::Absent, _) => Decision::Wait("waiting for the source lock".into()),
        (HtlcState::Refunded(_), _) => Decision::Expire,
        (HtlcState::Locked(lock), HtlcState::Absent) => {
            if record.counter_swap_id.is_some() {
                return Decision::Wait("counter lock not visible yet".into());
            }
            match policy.counter_timelock(lock.timelock.min(record.timelock), now) {
                Some(counter_timelock) => Decision::InitiateCounter { counter_timelock },
                None => Decision::Wait("too little time left for a counter lock".into()),
            }
        }
        (HtlcState::Locked(_), HtlcState::Locked(_)) => Decision::Observe {
            status: SwapStatus::CounterInitiated,
            message: "waiting for the secret to be revealed on the source chain".into(),
        },
        (HtlcState::Locked(_), _) => {
            Decision::Wait("counter lock settled while the source lock is open".into())
        }
        (HtlcState::Withdrawn { .. }, HtlcState::Locked(counter)) if now >= counter.timelock => {
            Decision::Wait("counter lock expired, left to the refund path".into())
        }
        (HtlcState::Withdrawn { .. }, HtlcState::Locked(_)) => {
            let revealed = source
                .revealed_preimage()
                .copied()
                .filter(|p| p.matches(&record.hashlock));
            let preimage = revealed.or_else(|| Some(record.secret).filter(|s| s.matches(&record.hashlock)));
            match preimage {
                Some(preimage) => Decision::CompleteWithdrawal { preimage },
                None => Decision::Fail("no preimage matching the hashlock is known".into()),
            }
        }
        (HtlcState::Withdrawn { .. }, HtlcState::Withdrawn { .. }) => Decision::Observe {
            status: SwapStatus::Completed,
            message: "both legs withdrawn".into(),
        },
        (HtlcState::Withdrawn { .. }, HtlcState::Absent) => {
            if record.counter_swap_id.is_some() {
                Decision::Wait("counter lock not visible yet".into())
            } else {
                Decision::Observe {
                    status: SwapStatus::Withdrawn,
                    message: "source withdrawn before a counter lock existed".into(),
                }
            }
        }
        (HtlcState::Withdrawn { .. }, HtlcState::Refunded(_)) => {
            Decision::Fail("counter lock was refunded after the source withdrawal".into())
        }
    }
}

fn check_expiry(record: &SwapRecord, now: u64) -> Result<(), SwapError> {
    if now >= record.timelock {
        return Err(SwapError::Expired {
            swap_id: record.swap_id.clone(),
            timelock: record.timelock,
        });
    }
    Ok(())
}

fn merge_refunds(record: &mut SwapRecord, refunds: &[TxRef]) {
    for tx in refunds {
        if !record.refund_tx_refs.contains(tx) {
            record.refund_tx_refs.push(tx.clone());
        }
    }
}

pub struct SwapCoordinator {
    registry: Arc<SwapRegistry>,
    ledgers: Ledgers,
    clock: Arc<dyn Clock>,
    policy: TimelockPolicy,
    retry: RetryPolicy,
    failure_handler: FailureHandler,
}

impl SwapCoordinator {
    pub fn new(
        registry: Arc<SwapRegistry>,
        ledgers: Ledgers,
        clock: Arc<dyn Clock>,
        config: &SystemConfig,
    ) -> Self {
        let retry = config.coordinator.retry.clone();
        SwapCoordinator {
            registry,
            failure_handler: FailureHandler::new(ledgers.clone(), retry.clone()),
            ledgers,
            clock,
            policy: config.timelock.clone(),
            retry,
        }
    }

    pub fn registry(&self) -> &Arc<SwapRegistry> {
        &self.registry
    }

    /// One pass over one swap: read, decide, act, write, all under the
    /// swap's lock.
    pub async fn process_swap(&self, swap_id: &str) -> Result<PassOutcome, SwapError> {
        let _guard = self.registry.lock_swap(swap_id).await;
        let record = self
            .registry
            .get_internal(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(PassOutcome::new(
                PassAction::AlreadyFinal,
                record.status,
                "swap already finished",
            ));
        }

        let now = self.clock.now();
        if let Err(expired) = check_expiry(&record, now) {
            warn!("[Coordinator] {}", expired);
            return self.expire(record).await;
        }

        let (source, destination) = match self.observe(&record).await {
            Ok(states) => states,
            Err(err) => return self.defer(&record, &err),
        };

        let record = if source.exists() && record.status == SwapStatus::Pending {
            info!("[Coordinator] Source lock for {} observed on {}", record.swap_id, record.from_chain);
            self.advance(&record.swap_id, SwapStatus::Initiated, |_| {})?
        } else {
            record
        };

        let decision = decide(&record, &source, &destination, now, &self.policy);
        debug!("[Coordinator] Swap {} ({}): {:?}", record.swap_id, record.status, decision);
        match decision {
            Decision::Expire => self.expire(record).await,
            Decision::InitiateCounter { counter_timelock } => {
                self.initiate_counter(record, counter_timelock).await
            }
            Decision::CompleteWithdrawal { preimage } => self.complete_withdrawal(record, preimage).await,
            Decision::Observe { status, message } => {
                let updated = self.advance(&record.swap_id, status, |_| {})?;
                let action = if updated.status != record.status {
                    info!("[Coordinator] Swap {} is now {}", updated.swap_id, updated.status);
                    PassAction::Observed
                } else {
                    PassAction::Waiting
                };
                Ok(PassOutcome::new(action, updated.status, message))
            }
            Decision::Fail(reason) => {
                error!("[Coordinator] Swap {} failed: {}", record.swap_id, reason);
                let updated = self.advance(&record.swap_id, SwapStatus::Failed, |r| {
                    r.last_error = Some(reason.clone())
                })?;
                Ok(PassOutcome::new(PassAction::Failed, updated.status, reason))
            }
            Decision::Wait(message) => Ok(PassOutcome::new(PassAction::Waiting, record.status, message)),
        }
    }

    /// Runs one pass over every non-terminal swap concurrently. A failing
    /// swap only shows up in its own report.
    pub async fn process_pending(&self) -> Vec<PassReport> {
        let ids = self.registry.non_terminal_ids();
        join_all(ids.into_iter().map(|id| async move {
            let result = self.process_swap(&id).await;
            PassReport::new(id, result)
        }))
        .await
    }

    async fn observe(&self, record: &SwapRecord) -> Result<(HtlcState, HtlcState), LedgerError> {
        let source = self.ledgers.get(record.from_chain);
        let destination = self.ledgers.get(record.to_chain);

        let source_query = self
            .retry
            .retry("query source lock", || source.get_swap_status(&record.swap_id));
        let destination_query = async {
            match &record.counter_swap_id {
                Some(counter_id) => {
                    self.retry
                        .retry("query counter lock", || destination.get_swap_status(counter_id))
                        .await
                }
                None => Ok(HtlcState::Absent),
            }
        };
        let (source_state, destination_state) = futures::join!(source_query, destination_query);
        Ok((source_state?, destination_state?))
    }

    fn advance<F>(&self, swap_id: &str, target: SwapStatus, mutate: F) -> Result<SwapRecord, SwapError>
    where
        F: FnOnce(&mut SwapRecord),
    {
        self.registry.update(swap_id, |record| {
            if record.status.can_transition_to(target) {
                record.status = target;
            }
            mutate(record);
        })
    }

    // Keeps the swap where it is and records why.
    fn defer(&self, record: &SwapRecord, err: &LedgerError) -> Result<PassOutcome, SwapError> {
        warn!("[Coordinator] Swap {} deferred: {}", record.swap_id, err);
        let message = err.to_string();
        let updated = self
            .registry
            .update(&record.swap_id, |r| r.last_error = Some(message.clone()))?;
        Ok(PassOutcome::new(PassAction::Waiting, updated.status, message))
    }

    async fn initiate_counter(
        &self,
        record: SwapRecord,
        counter_timelock: u64,
    ) -> Result<PassOutcome, SwapError> {
        let destination = self.ledgers.get(record.to_chain);
        let request = CounterSwapRequest::for_swap(&record, counter_timelock);
        info!(
            "[Coordinator] Locking {} {} on {} for {} until {}",
            request.amount, request.token, record.to_chain, record.swap_id, counter_timelock
        );

        // Not retried: a broadcast that timed out may still be mined.
        match destination.initiate_counter_swap(&request).await {
            Ok(lock) => {
                let updated = self.advance(&record.swap_id, SwapStatus::CounterInitiated, |r| {
                    r.counter_swap_id = Some(lock.swap_id.clone());
                    r.counter_timelock = Some(counter_timelock);
                    r.counter_tx_ref = Some(lock.tx_ref.clone());
                    r.last_error = None;
                })?;
                Ok(PassOutcome::new(
                    PassAction::CounterInitiated,
                    updated.status,
                    format!("counter swap {} locked on {}", lock.swap_id, record.to_chain),
                ))
            }
            Err(err) => self.defer(&record, &err),
        }
    }

    async fn complete_withdrawal(
        &self,
        record: SwapRecord,
        preimage: Secret,
    ) -> Result<PassOutcome, SwapError> {
        let Some(counter_id) = record.counter_swap_id.clone() else {
            return Ok(PassOutcome::new(
                PassAction::Waiting,
                record.status,
                "no counter lock recorded",
            ));
        };
        let record = self.advance(&record.swap_id, SwapStatus::Withdrawn, |_| {})?;
        let destination = self.ledgers.get(record.to_chain);

        let withdrawal = self
            .retry
            .retry("withdraw counter lock", || destination.withdraw(&counter_id, &preimage))
            .await;
        let withdraw_tx_ref = match withdrawal {
            Ok(tx_ref) => Some(tx_ref),
            Err(LedgerError::AlreadyWithdrawn { .. }) => None,
            Err(err) => return self.defer(&record, &err),
        };

        let updated = self.advance(&record.swap_id, SwapStatus::Completed, |r| {
            if withdraw_tx_ref.is_some() {
                r.withdraw_tx_ref = withdraw_tx_ref.clone();
            }
            r.last_error = None;
        })?;
        info!("[Coordinator] Swap {} completed on {}", updated.swap_id, updated.to_chain);
        Ok(PassOutcome::new(
            PassAction::Completed,
            updated.status,
            format!("counter swap {} withdrawn", counter_id),
        ))
    }

    async fn expire(&self, record: SwapRecord) -> Result<PassOutcome, SwapError> {
        let report = self.failure_handler.settle(&record).await;
        let refunds = report.refund_tx_refs();
        let summary = report.summary();
        let id = record.swap_id.as_str();

        match report.settlement() {
            Settlement::Completed if record.status != SwapStatus::Expired => {
                let updated = self.advance(id, SwapStatus::Completed, |r| r.last_error = None)?;
                Ok(PassOutcome::new(PassAction::Completed, updated.status, summary))
            }
            Settlement::Refunded => {
                self.advance(id, SwapStatus::Expired, |r| merge_refunds(r, &refunds))?;
                let updated = self.advance(id, SwapStatus::Refunded, |r| r.last_error = None)?;
                info!("[Coordinator] Swap {} refunded ({})", id, summary);
                Ok(PassOutcome::new(PassAction::Refunded, updated.status, summary))
            }
            Settlement::Completed | Settlement::Failed => {
                self.advance(id, SwapStatus::Expired, |r| merge_refunds(r, &refunds))?;
                let updated = self.advance(id, SwapStatus::Failed, |r| {
                    r.last_error = Some(format!("expired with asymmetric settlement: {}", summary))
                })?;
                error!("[Coordinator] Swap {} failed after expiry ({})", id, summary);
                Ok(PassOutcome::new(PassAction::Failed, updated.status, summary))
            }
            Settlement::Unsettled => {
                let updated = self.advance(id, SwapStatus::Expired, |r| {
                    merge_refunds(r, &refunds);
                    r.last_error = Some(summary.clone());
                })?;
                Ok(PassOutcome::new(PassAction::Expired, updated.status, summary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Hashlock;
    use crate::onchain::LockDetails;
    use crate::test_utils::sample_record;
    use ethers::types::U256;

    const NOW: u64 = 1_700_000_000;

    fn lock_for(record: &SwapRecord, timelock: u64) -> LockDetails {
        LockDetails {
            hashlock: record.hashlock,
            timelock,
            sender: record.sender_address.clone(),
            receiver: record.receiver_address.clone(),
            token: record.from_token.clone(),
            amount: U256::from(1u64),
        }
    }

    fn record() -> SwapRecord {
        let mut record = sample_record(1);
        record.timelock = NOW + 4 * 3600;
        record
    }

    #[test]
    fn test_source_lock_leads_to_shorter_counter_lock() {
        let record = record();
        let source = HtlcState::Locked(lock_for(&record, record.timelock));
        let decision = decide(&record, &source, &HtlcState::Absent, NOW, &TimelockPolicy::default());
        match decision {
            Decision::InitiateCounter { counter_timelock } => {
                assert!(counter_timelock < record.timelock);
                assert_eq!(counter_timelock, NOW + 2 * 3600);
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_known_counter_id_is_never_reinitiated() {
        let mut record = record();
        record.counter_swap_id = Some("ab".repeat(32));
        let source = HtlcState::Locked(lock_for(&record, record.timelock));
        assert!(matches!(
            decide(&record, &source, &HtlcState::Absent, NOW, &TimelockPolicy::default()),
            Decision::Wait(_)
        ));
    }

    #[test]
    fn test_expired_counter_lock_is_not_withdrawn() {
        let record = record();
        let source = HtlcState::Withdrawn {
            lock: lock_for(&record, record.timelock),
            preimage: Some(record.secret),
        };
        let destination = HtlcState::Locked(lock_for(&record, NOW - 1));
        assert!(matches!(
            decide(&record, &source, &destination, NOW, &TimelockPolicy::default()),
            Decision::Wait(_)
        ));
    }

    #[test]
    fn test_revealed_preimage_is_preferred() {
        let record = record();
        let source = HtlcState::Withdrawn {
            lock: lock_for(&record, record.timelock),
            preimage: Some(record.secret),
        };
        let destination = HtlcState::Locked(lock_for(&record, NOW + 3600));
        assert_eq!(
            decide(&record, &source, &destination, NOW, &TimelockPolicy::default()),
            Decision::CompleteWithdrawal {
                preimage: record.secret
            }
        );

        // Without a revealed preimage the stored secret is used.
        let source = HtlcState::Withdrawn {
            lock: lock_for(&record, record.timelock),
            preimage: None,
        };
        assert_eq!(
            decide(&record, &source, &destination, NOW, &TimelockPolicy::default()),
            Decision::CompleteWithdrawal {
                preimage: record.secret
            }
        );
    }

    #[test]
    fn test_foreign_source_lock_fails_swap() {
        let record = record();
        let mut foreign = lock_for(&record, record.timelock);
        foreign.hashlock = Hashlock::from_bytes([3u8; 32]);
        assert!(matches!(
            decide(&record, &HtlcState::Locked(foreign), &HtlcState::Absent, NOW, &TimelockPolicy::default()),
            Decision::Fail(_)
        ));
    }

    #[test]
    fn test_expiry_wins_over_everything() {
        let record = record();
        let source = HtlcState::Locked(lock_for(&record, record.timelock));
        assert_eq!(
            decide(&record, &source, &HtlcState::Absent, record.timelock, &TimelockPolicy::default()),
            Decision::Expire
        );
    }

    #[test]
    fn test_missing_source_lock_waits() {
        let record = record();
        assert!(matches!(
            decide(&record, &HtlcState::Absent, &HtlcState::Absent, NOW, &TimelockPolicy::default()),
            Decision::Wait(_)
        ));
    }
}
