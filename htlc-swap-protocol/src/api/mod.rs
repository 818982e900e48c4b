// Request/response surface of the swap service

pub mod problem;
pub mod routes;

use crate::clock::Clock;
use crate::config::{LedgerMode, SystemConfig};
use crate::cross_chain::{PassReport, SwapCoordinator};
use crate::crypto;
use crate::data_structures::{SwapId, SwapStatus, SwapTerms, SwapView, TransactionSummary};
use crate::error::{SwapError, ValidationError};
use crate::registry::SwapRegistry;
use crate::validation::SwapValidator;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    pub secret: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HashlockRequest {
    pub secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashlockResponse {
    pub hashlock: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSwapResponse {
    pub success: bool,
    pub swap_id: SwapId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub eth_account: Option<String>,
    pub cosmos_account: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default, alias = "txRef")]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessPendingResponse {
    pub processed: usize,
    pub results: Vec<PassReport>,
}

#[derive(Debug, Serialize)]
pub struct ServicesInfo {
    pub ethereum: &'static str,
    pub cosmos: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub swaps: usize,
    pub services: ServicesInfo,
}

/// Operations behind the HTTP routes.
pub struct SwapService {
    registry: Arc<SwapRegistry>,
    coordinator: Arc<SwapCoordinator>,
    validator: SwapValidator,
    clock: Arc<dyn Clock>,
    ledger_mode: LedgerMode,
    started_at: DateTime<Utc>,
}

impl SwapService {
    pub fn new(
        coordinator: Arc<SwapCoordinator>,
        clock: Arc<dyn Clock>,
        config: &SystemConfig,
    ) -> Self {
        SwapService {
            registry: Arc::clone(coordinator.registry()),
            coordinator,
            validator: SwapValidator::new(config),
            clock,
            ledger_mode: config.ledger_mode,
            started_at: Utc::now(),
        }
    }

    pub fn generate_secret(&self) -> SecretResponse {
        SecretResponse {
            secret: crypto::generate_secret().to_hex(),
        }
    }

    pub fn generate_hashlock(&self, request: HashlockRequest) -> Result<HashlockResponse, SwapError> {
        let secret = request
            .secret
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingField("secret"))?;
        Ok(HashlockResponse {
            hashlock: crypto::hashlock_for_input(&secret).to_hex(),
        })
    }

    pub fn store_swap(&self, terms: SwapTerms) -> Result<StoreSwapResponse, SwapError> {
        let record = self.validator.validate(&terms, self.clock.now(), Utc::now())?;
        let view = self.registry.insert(record)?;
        Ok(StoreSwapResponse {
            success: true,
            swap_id: view.swap_id,
        })
    }

    pub fn get_swap(&self, swap_id: &str) -> Result<SwapView, SwapError> {
        self.registry
            .get(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    /// Swaps of either account, de-duplicated, newest first.
    pub fn get_transactions(&self, query: &TransactionsQuery) -> Vec<TransactionSummary> {
        let mut seen = HashSet::new();
        let mut views: Vec<SwapView> = [&query.eth_account, &query.cosmos_account]
            .into_iter()
            .flatten()
            .filter(|account| !account.is_empty())
            .flat_map(|account| self.registry.swaps_for_participant(account))
            .filter(|view| seen.insert(view.swap_id.clone()))
            .collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views.iter().map(TransactionSummary::from).collect()
    }

    /// Client-reported status. Backward moves are rejected, and so is
    /// `completed` once the timelock has passed. With `completed` the tx hash
    /// is taken as the withdrawal, otherwise as the initiation.
    pub async fn update_swap_status(
        &self,
        swap_id: &str,
        request: StatusUpdateRequest,
    ) -> Result<SuccessResponse, SwapError> {
        let status: SwapStatus = request.status.parse()?;
        if self.registry.get(swap_id).is_none() {
            return Err(SwapError::NotFound(swap_id.to_string()));
        }
        let _guard = self.registry.lock_swap(swap_id).await;
        let record = self
            .registry
            .get_internal(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;
        // Past the timelock only the failure handler may settle the swap.
        if status == SwapStatus::Completed && self.clock.now() >= record.timelock {
            return Err(SwapError::Expired {
                swap_id: record.swap_id,
                timelock: record.timelock,
            });
        }
        self.registry.update(swap_id, |record| {
            record.status = status;
            if let Some(tx_hash) = request.tx_hash.clone() {
                if status == SwapStatus::Completed {
                    record.withdraw_tx_ref = Some(tx_hash);
                } else {
                    record.initiate_tx_ref = Some(tx_hash);
                }
            }
        })?;
        info!("[SwapService] Swap {} reported as {}", swap_id, status);
        Ok(SuccessResponse { success: true })
    }

    pub async fn process_pending(&self) -> ProcessPendingResponse {
        let results = self.coordinator.process_pending().await;
        ProcessPendingResponse {
            processed: results.len(),
            results,
        }
    }

    pub fn health(&self) -> HealthResponse {
        let now = Utc::now();
        let mode = self.ledger_mode.as_str();
        HealthResponse {
            status: "OK",
            timestamp: now,
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: (now - self.started_at).num_seconds(),
            swaps: self.registry.len(),
            services: ServicesInfo {
                ethereum: mode,
                cosmos: mode,
            },
        }
    }
}
