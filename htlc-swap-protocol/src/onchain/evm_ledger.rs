use crate::config::{find_token, CoordinatorConfig, EthereumConfig};
use crate::data_structures::{Chain, Hashlock, Secret, TokenInfo, TxRef};
use crate::error::LedgerError;
use crate::onchain::interface::{
    with_timeout, CounterLock, CounterSwapRequest, HtlcState, LedgerAdapter, LockDetails,
};
use crate::validation::parse_amount;
use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{abigen, parse_log, ContractCall, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, U256, U64};
use ethers::utils::to_checksum;
use log::{debug, info, warn};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

abigen!(
    HashedTimelock,
    r#"[
        function initiateSwap(bytes32 hashlock, uint256 timelock, address receiver, address token, uint256 amount) external payable returns (bytes32)
        function withdraw(bytes32 swapId, bytes32 preimage) external
        function refund(bytes32 swapId) external
        function getSwap(bytes32 swapId) external view returns (bytes32, uint256, address, address, address, uint256, bool, bool, bytes32)
        function isWithdrawable(bytes32 swapId) external view returns (bool)
        function isRefundable(bytes32 swapId) external view returns (bool)
        event SwapInitiated(bytes32 indexed swapId, bytes32 indexed hashlock, address indexed sender, address receiver, address token, uint256 amount, uint256 timelock)
        event SwapWithdrawn(bytes32 indexed swapId, bytes32 preimage, address indexed receiver)
        event SwapRefunded(bytes32 indexed swapId, address indexed sender)
    ]"#
);

type EvmClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// HashedTimelock contract on an EVM chain, signed by the operator key.
#[derive(Debug, Clone)]
pub struct EvmLedger {
    contract: HashedTimelock<EvmClient>,
    tokens: Vec<TokenInfo>,
    confirmations: usize,
    request_timeout: Duration,
    confirmation_timeout: Duration,
}

fn config_error(reason: impl Into<String>) -> LedgerError {
    LedgerError::Config {
        chain: Chain::Ethereum,
        reason: reason.into(),
    }
}

fn parse_swap_id(swap_id: &str) -> Result<[u8; 32], LedgerError> {
    Hashlock::from_hex(swap_id)
        .map(Hashlock::to_bytes)
        .map_err(|_| LedgerError::Rejected {
            chain: Chain::Ethereum,
            reason: format!("malformed swap id {}", swap_id),
        })
}

impl EvmLedger {
    pub fn new(config: &EthereumConfig, timeouts: &CoordinatorConfig) -> Result<Self, LedgerError> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| config_error(format!("invalid rpc url {}: {}", config.rpc_url, e)))?;
        let key = config
            .private_key
            .as_deref()
            .ok_or_else(|| config_error("missing operator private key"))?;
        let wallet = LocalWallet::from_str(key.trim_start_matches("0x"))
            .map_err(|e| config_error(format!("invalid operator private key: {}", e)))?
            .with_chain_id(config.chain_id);
        let contract_address = config
            .contract_address
            .as_deref()
            .ok_or_else(|| config_error("missing HTLC contract address"))?;
        let address = Address::from_str(contract_address)
            .map_err(|e| config_error(format!("invalid contract address {}: {}", contract_address, e)))?;

        info!(
            "[EvmLedger] Using contract {} on chain {} as {:?}",
            contract_address,
            config.chain_id,
            wallet.address()
        );
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(EvmLedger {
            contract: HashedTimelock::new(address, client),
            tokens: config.tokens.clone(),
            confirmations: config.confirmations,
            request_timeout: timeouts.request_timeout,
            confirmation_timeout: timeouts.confirmation_timeout,
        })
    }

    fn classify(&self, swap_id: &str, err: ContractError<EvmClient>) -> LedgerError {
        let message = err
            .decode_revert::<String>()
            .unwrap_or_else(|| err.to_string());
        LedgerError::classify(Chain::Ethereum, swap_id, &message)
    }

    /// Sends the call and waits for a successful receipt.
    async fn send_and_confirm<D: Detokenize>(
        &self,
        call: ContractCall<EvmClient, D>,
        swap_id: &str,
        what: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let pending = with_timeout(Chain::Ethereum, self.request_timeout, call.send())
            .await?
            .map_err(|e| self.classify(swap_id, e))?;
        let tx_hash = *pending;
        debug!("[EvmLedger] {} for {} submitted as {:#x}", what, swap_id, tx_hash);

        let receipt = with_timeout(
            Chain::Ethereum,
            self.confirmation_timeout,
            pending.confirmations(self.confirmations),
        )
        .await?
        .map_err(|e| LedgerError::Query {
            chain: Chain::Ethereum,
            reason: format!("waiting for {:#x}: {}", tx_hash, e),
        })?
        .ok_or_else(|| LedgerError::Query {
            chain: Chain::Ethereum,
            reason: format!("transaction {:#x} dropped from mempool", tx_hash),
        })?;

        if receipt.status != Some(U64::from(1)) {
            warn!("[EvmLedger] {} for {} reverted in {:#x}", what, swap_id, tx_hash);
            return Err(LedgerError::Rejected {
                chain: Chain::Ethereum,
                reason: format!("{} reverted in transaction {:#x}", what, tx_hash),
            });
        }
        Ok(receipt)
    }

    fn token(&self, symbol: &str) -> Result<&TokenInfo, LedgerError> {
        find_token(&self.tokens, symbol)
            .ok_or_else(|| config_error(format!("token {} is not configured", symbol)))
    }
}

#[async_trait]
impl LedgerAdapter for EvmLedger {
    fn chain(&self) -> Chain {
        Chain::Ethereum
    }

    async fn get_swap_status(&self, swap_id: &str) -> Result<HtlcState, LedgerError> {
        let id = parse_swap_id(swap_id)?;
        let call = self.contract.get_swap(id);
        let result = with_timeout(Chain::Ethereum, self.request_timeout, call.call()).await?;
        let (hashlock, timelock, sender, receiver, token, amount, withdrawn, refunded, preimage) =
            match result {
                Ok(fields) => fields,
                Err(e) => {
                    return match self.classify(swap_id, e) {
                        LedgerError::NotFound { .. } => Ok(HtlcState::Absent),
                        LedgerError::Query { reason, .. } | LedgerError::Rejected { reason, .. } => {
                            Err(LedgerError::Query {
                                chain: Chain::Ethereum,
                                reason,
                            })
                        }
                        other => Err(other),
                    };
                }
            };

        // Unknown ids come back zeroed.
        if hashlock == [0u8; 32] {
            return Ok(HtlcState::Absent);
        }
        let lock = LockDetails {
            hashlock: Hashlock::from_bytes(hashlock),
            timelock: timelock.low_u64(),
            sender: to_checksum(&sender, None),
            receiver: to_checksum(&receiver, None),
            token: to_checksum(&token, None),
            amount,
        };
        Ok(if withdrawn {
            let preimage = (preimage != [0u8; 32]).then(|| Secret::from_bytes(preimage));
            HtlcState::Withdrawn { lock, preimage }
        } else if refunded {
            HtlcState::Refunded(lock)
        } else {
            HtlcState::Locked(lock)
        })
    }

    async fn initiate_counter_swap(
        &self,
        request: &CounterSwapRequest,
    ) -> Result<CounterLock, LedgerError> {
        let token = self.token(&request.token)?;
        let amount = parse_amount(&request.amount, token.decimals).map_err(|e| LedgerError::Rejected {
            chain: Chain::Ethereum,
            reason: e.to_string(),
        })?;
        let token_address = Address::from_str(&token.asset)
            .map_err(|e| config_error(format!("invalid address for {}: {}", token.symbol, e)))?;
        let receiver = Address::from_str(&request.receiver).map_err(|e| LedgerError::Rejected {
            chain: Chain::Ethereum,
            reason: format!("invalid receiver {}: {}", request.receiver, e),
        })?;

        let mut call = self.contract.initiate_swap(
            request.hashlock.to_bytes(),
            U256::from(request.timelock),
            receiver,
            token_address,
            amount,
        );
        // Native ETH travels as value; ERC-20 allowance is granted out of band.
        if token_address == Address::zero() {
            call = call.value(amount);
        }

        let receipt = self
            .send_and_confirm(call, &request.source_swap_id, "initiateSwap")
            .await?;
        let tx_ref = format!("{:#x}", receipt.transaction_hash);
        let event = receipt
            .logs
            .into_iter()
            .find_map(|log| parse_log::<SwapInitiatedFilter>(log).ok())
            .ok_or_else(|| LedgerError::Rejected {
                chain: Chain::Ethereum,
                reason: format!("no SwapInitiated event in {}", tx_ref),
            })?;
        let swap_id = format!("0x{}", hex::encode(event.swap_id));
        info!(
            "[EvmLedger] Counter swap {} locked for {} in {}",
            swap_id, request.source_swap_id, tx_ref
        );
        Ok(CounterLock { swap_id, tx_ref })
    }

    async fn withdraw(&self, swap_id: &str, preimage: &Secret) -> Result<TxRef, LedgerError> {
        let id = parse_swap_id(swap_id)?;
        let call = self.contract.withdraw(id, preimage.to_bytes());
        let receipt = self.send_and_confirm(call, swap_id, "withdraw").await?;
        Ok(format!("{:#x}", receipt.transaction_hash))
    }

    async fn refund(&self, swap_id: &str) -> Result<TxRef, LedgerError> {
        let id = parse_swap_id(swap_id)?;
        let call = self.contract.refund(id);
        let receipt = self.send_and_confirm(call, swap_id, "refund").await?;
        Ok(format!("{:#x}", receipt.transaction_hash))
    }

    async fn is_withdrawable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        let id = parse_swap_id(swap_id)?;
        let call = self.contract.is_withdrawable(id);
        with_timeout(Chain::Ethereum, self.request_timeout, call.call())
            .await?
            .map_err(|e| self.classify(swap_id, e))
    }

    async fn is_refundable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        let id = parse_swap_id(swap_id)?;
        let call = self.contract.is_refundable(id);
        with_timeout(Chain::Ethereum, self.request_timeout, call.call())
            .await?
            .map_err(|e| self.classify(swap_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EthereumConfig {
        EthereumConfig {
            rpc_url: "http://127.0.0.1:8545".into(),
            contract_address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into()),
            private_key: Some(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".into(),
            ),
            ..EthereumConfig::default()
        }
    }

    #[test]
    fn test_new_requires_key_and_contract() {
        let timeouts = CoordinatorConfig::default();
        assert!(EvmLedger::new(&config(), &timeouts).is_ok());

        let mut missing_key = config();
        missing_key.private_key = None;
        assert!(matches!(
            EvmLedger::new(&missing_key, &timeouts),
            Err(LedgerError::Config { .. })
        ));

        let mut bad_contract = config();
        bad_contract.contract_address = Some("not-an-address".into());
        assert!(matches!(
            EvmLedger::new(&bad_contract, &timeouts),
            Err(LedgerError::Config { .. })
        ));
    }

    #[test]
    fn test_swap_id_parsing() {
        assert!(parse_swap_id(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(matches!(
            parse_swap_id("0x1234"),
            Err(LedgerError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let mut config = config();
        config.rpc_url = "http://127.0.0.1:9".into();
        let timeouts = CoordinatorConfig {
            request_timeout: Duration::from_secs(2),
            ..CoordinatorConfig::default()
        };
        let ledger = EvmLedger::new(&config, &timeouts).unwrap();
        let err = ledger
            .get_swap_status(&format!("0x{}", "ab".repeat(32)))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
