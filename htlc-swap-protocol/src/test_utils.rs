// Shared helpers for unit and integration tests

use crate::api::SwapService;
use crate::clock::{Clock, ManualClock};
use crate::config::SystemConfig;
use crate::cross_chain::{RetryPolicy, SwapCoordinator};
use crate::crypto::generate_secret;
use crate::data_structures::{Chain, Secret, SwapId, SwapRecord, SwapStatus, SwapTerms};
use crate::onchain::{simulated_pair, Ledgers, SimulatedLedger};
use crate::registry::SwapRegistry;
use crate::validation::SwapValidator;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const T0: u64 = 1_700_000_000;
pub const HOUR: u64 = 3600;

/// Lowercase EVM address unique per `n`.
pub fn eth_address(n: u32) -> String {
    format!("0xab{:038x}", n)
}

/// Bech32-shaped cosmos address unique per `n`.
pub fn cosmos_address(n: u32) -> String {
    format!("cosmos1{:0>38}", n)
}

pub fn address_on(chain: Chain, n: u32) -> String {
    match chain {
        Chain::Ethereum => eth_address(n),
        Chain::Cosmos => cosmos_address(n),
    }
}

fn token_on(chain: Chain) -> &'static str {
    match chain {
        Chain::Ethereum => "ETH",
        Chain::Cosmos => "ATOM",
    }
}

/// Pending ethereum -> cosmos record with a fresh secret.
pub fn sample_record(n: u32) -> SwapRecord {
    let secret = generate_secret();
    let created_at = Utc
        .timestamp_opt(T0 as i64 + n as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);
    SwapRecord {
        swap_id: format!("0x{:064x}", n),
        hashlock: secret.hashlock(),
        secret,
        timelock: T0 + 4 * HOUR,
        from_chain: Chain::Ethereum,
        to_chain: Chain::Cosmos,
        from_token: "ETH".into(),
        to_token: "ATOM".into(),
        amount: "1".into(),
        to_amount: "250".into(),
        sender_address: eth_address(n),
        receiver_address: cosmos_address(n),
        status: SwapStatus::Pending,
        initiate_tx_ref: None,
        withdraw_tx_ref: None,
        counter_swap_id: None,
        counter_timelock: None,
        counter_tx_ref: None,
        refund_tx_refs: Vec::new(),
        last_error: None,
        participants: Vec::new(),
        created_at,
        updated_at: created_at,
    }
}

/// Config with short retry delays.
pub fn test_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.ledger_mode = crate::config::LedgerMode::Simulated;
    config.coordinator.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    };
    config.coordinator.poll_interval = Duration::from_millis(20);
    config
}

/// A swap whose source lock exists on the simulated ledger.
#[derive(Clone, Debug)]
pub struct OpenedSwap {
    pub swap_id: SwapId,
    pub secret: Secret,
    pub timelock: u64,
    pub terms: SwapTerms,
}

/// Coordinator wired to two simulated ledgers and a manual clock.
pub struct SwapHarness {
    pub clock: ManualClock,
    pub config: SystemConfig,
    pub ethereum: SimulatedLedger,
    pub cosmos: SimulatedLedger,
    pub registry: Arc<SwapRegistry>,
    pub coordinator: Arc<SwapCoordinator>,
    next_account: std::sync::atomic::AtomicU32,
}

impl SwapHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SystemConfig) -> Self {
        let clock = ManualClock::new(T0);
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let (ethereum, cosmos) = simulated_pair(&config, Arc::clone(&shared));
        Self::assemble(clock, config, ethereum, cosmos)
    }

    /// Ledgers may run on their own clocks, e.g. a cosmos chain lagging behind.
    pub fn with_ledgers(
        clock: ManualClock,
        config: SystemConfig,
        ethereum: SimulatedLedger,
        cosmos: SimulatedLedger,
    ) -> Self {
        Self::assemble(clock, config, ethereum, cosmos)
    }

    fn assemble(
        clock: ManualClock,
        config: SystemConfig,
        ethereum: SimulatedLedger,
        cosmos: SimulatedLedger,
    ) -> Self {
        let registry = Arc::new(SwapRegistry::in_memory());
        let ledgers = Ledgers::new(Arc::new(ethereum.clone()), Arc::new(cosmos.clone()))
            .expect("simulated ledgers serve their own chains");
        let coordinator = Arc::new(SwapCoordinator::new(
            Arc::clone(&registry),
            ledgers,
            Arc::new(clock.clone()),
            &config,
        ));
        SwapHarness {
            clock,
            config,
            ethereum,
            cosmos,
            registry,
            coordinator,
            next_account: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn ledger(&self, chain: Chain) -> &SimulatedLedger {
        match chain {
            Chain::Ethereum => &self.ethereum,
            Chain::Cosmos => &self.cosmos,
        }
    }

    pub fn service(&self) -> Arc<SwapService> {
        Arc::new(SwapService::new(
            Arc::clone(&self.coordinator),
            Arc::new(self.clock.clone()),
            &self.config,
        ))
    }

    /// Locks funds on `from` for `lifetime` seconds and returns the terms a
    /// client would submit for it, without storing them.
    pub fn lock_source(&self, from: Chain, lifetime: u64) -> OpenedSwap {
        let n = self
            .next_account
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let to = from.counterpart();
        let secret = generate_secret();
        let timelock = self.clock.now() + lifetime;
        let sender = address_on(from, n);
        let receiver = address_on(to, n);
        let operator = address_on(from, 9_999);
        let lock = self
            .ledger(from)
            .lock_funds(&sender, secret.hashlock(), timelock, &operator, token_on(from), "1")
            .expect("source lock accepted");

        let terms = SwapTerms {
            swap_id: Some(lock.swap_id.clone()),
            secret: Some(secret.to_hex()),
            hashlock: Some(secret.hashlock().to_hex()),
            timelock: Some(timelock),
            from_chain: Some(from.to_string()),
            to_chain: Some(to.to_string()),
            from_token: Some(token_on(from).into()),
            to_token: Some(token_on(to).into()),
            amount: Some("1".into()),
            to_amount: Some("2".into()),
            sender_address: Some(sender),
            receiver_address: Some(receiver),
            eth_account: None,
            cosmos_account: None,
        };
        OpenedSwap {
            swap_id: lock.swap_id,
            secret,
            timelock,
            terms,
        }
    }

    /// Locks on the source chain and stores the swap in the registry.
    pub fn open_swap(&self, from: Chain, lifetime: u64) -> OpenedSwap {
        let opened = self.lock_source(from, lifetime);
        let record = SwapValidator::new(&self.config)
            .validate(&opened.terms, self.clock.now(), Utc::now())
            .expect("valid swap terms");
        self.registry.insert(record).expect("new swap id");
        opened
    }

    pub fn status(&self, swap_id: &str) -> SwapStatus {
        self.registry
            .get(swap_id)
            .map(|view| view.status)
            .expect("swap is registered")
    }
}

impl Default for SwapHarness {
    fn default() -> Self {
        Self::new()
    }
}
