// End-to-end swap flows against the simulated ethereum and cosmos ledgers.

use htlc_swap_protocol::{
    clock::{Clock, ManualClock},
    cross_chain::{PassAction, SwapSupervisor},
    data_structures::{Chain, SwapStatus},
    onchain::{simulated_pair, HtlcState},
    test_utils::{test_config, SwapHarness, HOUR, T0},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn wait_for_status(harness: &SwapHarness, swap_id: &str, status: SwapStatus) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while harness.status(swap_id) != status {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    if deadline.await.is_err() {
        panic!("swap {} stuck at {}, expected {}", swap_id, harness.status(swap_id), status);
    }
}

#[tokio::test]
async fn test_ethereum_to_cosmos_happy_path() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    assert_eq!(harness.status(&swap.swap_id), SwapStatus::Pending);

    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::CounterInitiated);
    assert_eq!(outcome.status, SwapStatus::CounterInitiated);

    let record = harness.registry.get_internal(&swap.swap_id).unwrap();
    let counter_id = record.counter_swap_id.clone().expect("counter lock recorded");
    assert_eq!(record.counter_timelock, Some(T0 + 2 * HOUR));
    assert!(record.counter_tx_ref.is_some());
    match harness.cosmos.swap_state(&counter_id) {
        HtlcState::Locked(lock) => {
            assert_eq!(lock.hashlock, swap.secret.hashlock());
            assert!(lock.timelock < swap.timelock);
            assert_eq!(lock.receiver, record.receiver_address);
        }
        other => panic!("counter lock not found: {:?}", other),
    }

    // Nothing new happens until the secret shows up on the source chain.
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Waiting);
    assert_eq!(harness.cosmos.call_counts().initiate, 1);

    harness.clock.advance(600);
    harness.ethereum.withdraw_with(&swap.swap_id, &swap.secret).unwrap();

    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Completed);
    assert!(harness.cosmos.swap_state(&counter_id).is_withdrawn());

    let view = harness.registry.get(&swap.swap_id).unwrap();
    assert_eq!(view.status, SwapStatus::Completed);
    assert!(view.withdraw_tx_ref.is_some());
    assert!(view.refund_tx_refs.is_empty());

    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::AlreadyFinal);
    assert_eq!(harness.cosmos.call_counts().withdraw, 1);
}

#[tokio::test]
async fn test_cosmos_to_ethereum_happy_path() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Cosmos, 6 * HOUR);

    harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    let record = harness.registry.get_internal(&swap.swap_id).unwrap();
    let counter_id = record.counter_swap_id.clone().unwrap();
    assert!(counter_id.starts_with("0x"));
    assert_eq!(record.counter_timelock, Some(T0 + 3 * HOUR));
    assert!(harness.ethereum.swap_state(&counter_id).is_locked());

    harness.cosmos.withdraw_with(&swap.swap_id, &swap.secret).unwrap();
    harness.coordinator.process_swap(&swap.swap_id).await.unwrap();

    assert_eq!(harness.status(&swap.swap_id), SwapStatus::Completed);
    assert_eq!(
        harness.ethereum.swap_state(&counter_id).revealed_preimage(),
        Some(&swap.secret)
    );
}

#[tokio::test]
async fn test_expired_swap_refunds_both_legs() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    let counter_id = harness
        .registry
        .get_internal(&swap.swap_id)
        .and_then(|r| r.counter_swap_id)
        .unwrap();

    harness.clock.set(swap.timelock + 1);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Refunded);

    let view = harness.registry.get(&swap.swap_id).unwrap();
    assert_eq!(view.status, SwapStatus::Refunded);
    assert_eq!(view.refund_tx_refs.len(), 2);
    assert!(harness.ethereum.swap_state(&swap.swap_id).is_refunded());
    assert!(harness.cosmos.swap_state(&counter_id).is_refunded());
}

#[tokio::test]
async fn test_expiry_without_counter_lock_refunds_only_the_source() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 2 * HOUR);

    harness.clock.set(swap.timelock);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.status, SwapStatus::Refunded);

    assert_eq!(harness.cosmos.call_counts().refund, 0);
    assert_eq!(harness.cosmos.call_counts().initiate, 0);
    assert_eq!(harness.ethereum.call_counts().refund, 1);
    assert_eq!(harness.registry.get(&swap.swap_id).unwrap().refund_tx_refs.len(), 1);
}

#[tokio::test]
async fn test_swap_waits_for_source_lock() {
    let harness = SwapHarness::new();
    let opened = harness.lock_source(Chain::Ethereum, 4 * HOUR);

    // Terms refer to a lock id the ledger has never seen.
    let mut terms = opened.terms.clone();
    terms.swap_id = Some(format!("0x{}", "cd".repeat(32)));
    let service = harness.service();
    let stored = service.store_swap(terms).unwrap();

    let outcome = harness.coordinator.process_swap(&stored.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Waiting);
    assert_eq!(harness.status(&stored.swap_id), SwapStatus::Pending);
    assert_eq!(harness.cosmos.call_counts().initiate, 0);

    // Expiring with nothing locked anywhere is a failure, not a refund.
    harness.clock.set(opened.timelock);
    let outcome = harness.coordinator.process_swap(&stored.swap_id).await.unwrap();
    assert_eq!(outcome.status, SwapStatus::Failed);
    assert_eq!(harness.ethereum.call_counts().refund, 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_then_deferred() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);

    // Two failures fit inside the three attempts of one pass.
    harness.ethereum.fail_next_requests(2);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.status, SwapStatus::CounterInitiated);

    let second = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    harness.ethereum.fail_next_requests(5);
    let outcome = harness.coordinator.process_swap(&second.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Waiting);
    let view = harness.registry.get(&second.swap_id).unwrap();
    assert_eq!(view.status, SwapStatus::Pending);
    assert!(view.last_error.unwrap().contains("simulated outage"));

    let outcome = harness.coordinator.process_swap(&second.swap_id).await.unwrap();
    assert_eq!(outcome.status, SwapStatus::CounterInitiated);
    assert!(harness.registry.get(&second.swap_id).unwrap().last_error.is_none());
}

#[tokio::test]
async fn test_failed_counter_initiation_is_not_retried_within_a_pass() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);

    harness.cosmos.fail_next_requests(1);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Waiting);
    assert_eq!(outcome.status, SwapStatus::Initiated);
    assert!(harness.cosmos.swap_ids().is_empty());

    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::CounterInitiated);
    assert_eq!(harness.cosmos.swap_ids().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_passes_lock_the_counter_leg_once() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);

    let passes = (0..8).map(|_| {
        let coordinator = Arc::clone(&harness.coordinator);
        let id = swap.swap_id.clone();
        tokio::spawn(async move { coordinator.process_swap(&id).await })
    });
    for pass in futures::future::join_all(passes).await {
        pass.unwrap().unwrap();
    }

    assert_eq!(harness.cosmos.call_counts().initiate, 1);
    assert_eq!(harness.cosmos.swap_ids().len(), 1);
    assert_eq!(harness.status(&swap.swap_id), SwapStatus::CounterInitiated);
}

#[tokio::test]
async fn test_short_source_window_skips_counter_lock() {
    let harness = SwapHarness::new();
    // Half of 90 minutes is below the one hour counter minimum.
    let swap = harness.open_swap(Chain::Ethereum, 90 * 60);

    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Waiting);
    assert_eq!(outcome.status, SwapStatus::Initiated);
    assert_eq!(harness.cosmos.call_counts().initiate, 0);
}

#[tokio::test]
async fn test_lagging_destination_clock_keeps_swap_expired_until_refundable() {
    let config = test_config();
    let clock = ManualClock::new(T0);
    let cosmos_clock = ManualClock::new(T0);
    let (ethereum, _) = simulated_pair(&config, Arc::new(clock.clone()));
    let (_, cosmos) = simulated_pair(&config, Arc::new(cosmos_clock.clone()));
    let harness = SwapHarness::with_ledgers(clock, config, ethereum, cosmos);

    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    let counter_id = harness
        .registry
        .get_internal(&swap.swap_id)
        .and_then(|r| r.counter_swap_id)
        .unwrap();

    // Cosmos block time has not reached the counter timelock yet.
    harness.clock.set(swap.timelock + 1);
    cosmos_clock.set(T0 + 2 * HOUR - 60);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Expired);
    let view = harness.registry.get(&swap.swap_id).unwrap();
    assert_eq!(view.status, SwapStatus::Expired);
    assert_eq!(view.refund_tx_refs.len(), 1);
    assert!(view.last_error.is_some());
    assert!(harness.cosmos.swap_state(&counter_id).is_locked());

    cosmos_clock.set(T0 + 2 * HOUR);
    let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    assert_eq!(outcome.action, PassAction::Refunded);
    let view = harness.registry.get(&swap.swap_id).unwrap();
    assert_eq!(view.status, SwapStatus::Refunded);
    assert_eq!(view.refund_tx_refs.len(), 2);
    assert_eq!(harness.ethereum.call_counts().refund, 1);
}

#[tokio::test]
async fn test_process_pending_covers_every_open_swap() {
    let harness = SwapHarness::new();
    let first = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    let second = harness.open_swap(Chain::Cosmos, 4 * HOUR);

    let reports = harness.coordinator.process_pending().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.error.is_none()));
    assert_eq!(harness.status(&first.swap_id), SwapStatus::CounterInitiated);
    assert_eq!(harness.status(&second.swap_id), SwapStatus::CounterInitiated);

    harness.ethereum.withdraw_with(&first.swap_id, &first.secret).unwrap();
    harness.coordinator.process_pending().await;
    assert_eq!(harness.status(&first.swap_id), SwapStatus::Completed);

    // Completed swaps drop out of later runs.
    let reports = harness.coordinator.process_pending().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].swap_id, second.swap_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supervisor_drives_swaps_until_shutdown() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = SwapSupervisor::new(
        Arc::clone(&harness.coordinator),
        harness.config.coordinator.poll_interval,
    );
    let handle = tokio::spawn(supervisor.run(shutdown_rx));

    wait_for_status(&harness, &swap.swap_id, SwapStatus::CounterInitiated).await;
    harness.ethereum.withdraw_with(&swap.swap_id, &swap.secret).unwrap();
    wait_for_status(&harness, &swap.swap_id, SwapStatus::Completed).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor stops on shutdown")
        .unwrap();
    assert_eq!(harness.cosmos.call_counts().initiate, 1);
    assert_eq!(harness.clock.now(), T0);
}

#[tokio::test]
async fn test_expired_counter_lock_is_left_for_refund() {
    let harness = SwapHarness::new();
    let swap = harness.open_swap(Chain::Ethereum, 4 * HOUR);
    harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
    let counter_id = harness
        .registry
        .get_internal(&swap.swap_id)
        .and_then(|r| r.counter_swap_id)
        .unwrap();

    harness.clock.advance(HOUR);
    harness.ethereum.withdraw_with(&swap.swap_id, &swap.secret).unwrap();
    // Counter lock runs out before the coordinator sees the withdrawal.
    harness.clock.set(T0 + 2 * HOUR + 1);

    for _ in 0..3 {
        let outcome = harness.coordinator.process_swap(&swap.swap_id).await.unwrap();
        assert_eq!(outcome.action, PassAction::Waiting);
    }
    assert_eq!(harness.cosmos.call_counts().withdraw, 0);
    assert!(harness.cosmos.swap_state(&counter_id).is_locked());
}
