use crate::config::{find_token, CoordinatorConfig, CosmosConfig};
use crate::data_structures::{Chain, Hashlock, Secret, TokenInfo, TxRef};
use crate::error::LedgerError;
use crate::onchain::interface::{
    with_timeout, CounterLock, CounterSwapRequest, HtlcState, LedgerAdapter, LockDetails,
};
use crate::validation::parse_amount;
use async_trait::async_trait;
use ethers::types::U256;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

const TX_POLL_INTERVAL: Duration = Duration::from_secs(2);

// Response of the `get_swap` smart query
#[derive(Debug, Deserialize)]
struct SwapResponse {
    hashlock: String,
    timelock: u64,
    sender: String,
    receiver: String,
    denom: String,
    amount: String,
    withdrawn: bool,
    refunded: bool,
    #[serde(default)]
    preimage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoolResponse {
    data: bool,
}

#[derive(Debug)]
struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// CosmWasm HTLC contract driven through a wasmd compatible CLI, which holds
/// the operator key in its keyring.
#[derive(Debug, Clone)]
pub struct CosmosCliLedger {
    config: CosmosConfig,
    contract: String,
    request_timeout: Duration,
    confirmation_timeout: Duration,
}

impl CosmosCliLedger {
    pub fn new(config: &CosmosConfig, timeouts: &CoordinatorConfig) -> Result<Self, LedgerError> {
        let contract = config
            .contract_address
            .clone()
            .ok_or_else(|| LedgerError::Config {
                chain: Chain::Cosmos,
                reason: "missing HTLC contract address".into(),
            })?;
        info!(
            "[CosmosLedger] Using contract {} on {} via {}",
            contract,
            config.chain_id,
            config.binary.display()
        );
        Ok(CosmosCliLedger {
            config: config.clone(),
            contract,
            request_timeout: timeouts.request_timeout,
            confirmation_timeout: timeouts.confirmation_timeout,
        })
    }

    async fn run(&self, args: &[String]) -> Result<CliOutput, LedgerError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "[CosmosLedger] Executing {} {}",
            self.config.binary.display(),
            args.iter().take(3).cloned().collect::<Vec<_>>().join(" ")
        );

        let output = with_timeout(Chain::Cosmos, self.request_timeout, cmd.output())
            .await?
            .map_err(|e| LedgerError::Query {
                chain: Chain::Cosmos,
                reason: format!("failed to execute {}: {}", self.config.binary.display(), e),
            })?;
        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn node_args(&self) -> Vec<String> {
        vec![
            "--node".into(),
            self.config.node.clone(),
            "--output".into(),
            "json".into(),
        ]
    }

    async fn query_smart(&self, swap_id: &str, msg: Value) -> Result<Value, LedgerError> {
        let mut args: Vec<String> = vec![
            "query".into(),
            "wasm".into(),
            "contract-state".into(),
            "smart".into(),
            self.contract.clone(),
            msg.to_string(),
        ];
        args.extend(self.node_args());

        let output = self.run(&args).await?;
        if !output.success {
            return Err(LedgerError::classify(Chain::Cosmos, swap_id, &output.stderr));
        }
        serde_json::from_str(&output.stdout).map_err(|e| LedgerError::Query {
            chain: Chain::Cosmos,
            reason: format!("unreadable query response: {}", e),
        })
    }

    /// Broadcasts an execute message and waits until it is included in a block.
    async fn execute(&self, swap_id: &str, msg: Value, funds: Option<String>) -> Result<Value, LedgerError> {
        let mut args: Vec<String> = vec![
            "tx".into(),
            "wasm".into(),
            "execute".into(),
            self.contract.clone(),
            msg.to_string(),
            "--from".into(),
            self.config.key_name.clone(),
            "--keyring-backend".into(),
            self.config.keyring_backend.clone(),
            "--chain-id".into(),
            self.config.chain_id.clone(),
            "--gas".into(),
            "auto".into(),
            "--gas-adjustment".into(),
            self.config.gas_adjustment.to_string(),
            "--gas-prices".into(),
            self.config.gas_prices.clone(),
            "--broadcast-mode".into(),
            "sync".into(),
            "-y".into(),
        ];
        if let Some(funds) = funds {
            args.push("--amount".into());
            args.push(funds);
        }
        args.extend(self.node_args());

        let output = self.run(&args).await?;
        if !output.success {
            return Err(LedgerError::classify(Chain::Cosmos, swap_id, &output.stderr));
        }
        let broadcast: Value = serde_json::from_str(&output.stdout).map_err(|e| LedgerError::Query {
            chain: Chain::Cosmos,
            reason: format!("unreadable broadcast response: {}", e),
        })?;
        check_tx_code(swap_id, &broadcast)?;
        let tx_hash = broadcast["txhash"]
            .as_str()
            .ok_or_else(|| LedgerError::Query {
                chain: Chain::Cosmos,
                reason: "broadcast response without txhash".into(),
            })?
            .to_string();
        self.wait_for_tx(swap_id, &tx_hash).await
    }

    async fn wait_for_tx(&self, swap_id: &str, tx_hash: &str) -> Result<Value, LedgerError> {
        let deadline = Instant::now() + self.confirmation_timeout;
        let mut args: Vec<String> = vec!["query".into(), "tx".into(), tx_hash.to_string()];
        args.extend(self.node_args());

        loop {
            let output = self.run(&args).await?;
            if output.success {
                let tx: Value = serde_json::from_str(&output.stdout).map_err(|e| LedgerError::Query {
                    chain: Chain::Cosmos,
                    reason: format!("unreadable tx response: {}", e),
                })?;
                check_tx_code(swap_id, &tx)?;
                return Ok(tx);
            }
            if Instant::now() >= deadline {
                return Err(LedgerError::Timeout {
                    chain: Chain::Cosmos,
                    timeout: self.confirmation_timeout,
                });
            }
            debug!("[CosmosLedger] {} not yet included, polling again", tx_hash);
            tokio::time::sleep(TX_POLL_INTERVAL).await;
        }
    }

    fn token(&self, symbol: &str) -> Result<&TokenInfo, LedgerError> {
        find_token(&self.config.tokens, symbol).ok_or_else(|| LedgerError::Config {
            chain: Chain::Cosmos,
            reason: format!("token {} is not configured", symbol),
        })
    }

    async fn query_flag(&self, swap_id: &str, query: &str) -> Result<bool, LedgerError> {
        let mut msg = serde_json::Map::new();
        msg.insert(query.to_string(), json!({ "swap_id": swap_id }));
        let response = self.query_smart(swap_id, Value::Object(msg)).await?;
        let parsed: BoolResponse = serde_json::from_value(response).map_err(|e| LedgerError::Query {
            chain: Chain::Cosmos,
            reason: format!("unexpected {} response: {}", query, e),
        })?;
        Ok(parsed.data)
    }
}

fn check_tx_code(swap_id: &str, tx: &Value) -> Result<(), LedgerError> {
    let code = tx["code"].as_u64().unwrap_or(0);
    if code == 0 {
        return Ok(());
    }
    let raw_log = tx["raw_log"].as_str().unwrap_or_default();
    Err(match LedgerError::classify(Chain::Cosmos, swap_id, raw_log) {
        LedgerError::Query { reason, .. } => LedgerError::Rejected {
            chain: Chain::Cosmos,
            reason: format!("code {}: {}", code, reason),
        },
        classified => classified,
    })
}

/// Finds a `wasm` event attribute in either the legacy `logs` layout or the
/// top-level `events` list.
fn find_wasm_attribute(tx: &Value, key: &str) -> Option<String> {
    let from_logs = tx["logs"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|log| log["events"].as_array().into_iter().flatten());
    let top_level = tx["events"].as_array().into_iter().flatten();

    from_logs
        .chain(top_level)
        .filter(|event| event["type"] == "wasm")
        .flat_map(|event| event["attributes"].as_array().into_iter().flatten())
        .find(|attr| attr["key"] == key)
        .and_then(|attr| attr["value"].as_str().map(str::to_string))
}

fn parse_state(swap_id: &str, response: &Value) -> Result<HtlcState, LedgerError> {
    let data = &response["data"];
    if data.is_null() {
        return Ok(HtlcState::Absent);
    }
    let malformed = |reason: String| LedgerError::Query {
        chain: Chain::Cosmos,
        reason: format!("malformed get_swap response for {}: {}", swap_id, reason),
    };
    let swap: SwapResponse =
        serde_json::from_value(data.clone()).map_err(|e| malformed(e.to_string()))?;
    let lock = LockDetails {
        hashlock: Hashlock::from_hex(&swap.hashlock).map_err(|e| malformed(e.to_string()))?,
        timelock: swap.timelock,
        sender: swap.sender,
        receiver: swap.receiver,
        token: swap.denom,
        amount: U256::from_dec_str(&swap.amount).map_err(|e| malformed(e.to_string()))?,
    };
    Ok(if swap.withdrawn {
        let preimage = swap.preimage.as_deref().and_then(|p| Secret::from_hex(p).ok());
        HtlcState::Withdrawn { lock, preimage }
    } else if swap.refunded {
        HtlcState::Refunded(lock)
    } else {
        HtlcState::Locked(lock)
    })
}

#[async_trait]
impl LedgerAdapter for CosmosCliLedger {
    fn chain(&self) -> Chain {
        Chain::Cosmos
    }

    async fn get_swap_status(&self, swap_id: &str) -> Result<HtlcState, LedgerError> {
        match self
            .query_smart(swap_id, json!({ "get_swap": { "swap_id": swap_id } }))
            .await
        {
            Ok(response) => parse_state(swap_id, &response),
            Err(LedgerError::NotFound { .. }) => Ok(HtlcState::Absent),
            Err(err) => Err(err),
        }
    }

    async fn initiate_counter_swap(
        &self,
        request: &CounterSwapRequest,
    ) -> Result<CounterLock, LedgerError> {
        let token = self.token(&request.token)?;
        let micro = parse_amount(&request.amount, token.decimals).map_err(|e| LedgerError::Rejected {
            chain: Chain::Cosmos,
            reason: e.to_string(),
        })?;
        let msg = json!({
            "initiate_swap": {
                "hashlock": request.hashlock.to_hex(),
                "timelock": request.timelock,
                "receiver": request.receiver,
            }
        });
        let funds = format!("{}{}", micro, token.asset);
        let tx = self.execute(&request.source_swap_id, msg, Some(funds)).await?;
        let tx_ref = tx["txhash"].as_str().unwrap_or_default().to_string();
        let swap_id = find_wasm_attribute(&tx, "swap_id").ok_or_else(|| LedgerError::Rejected {
            chain: Chain::Cosmos,
            reason: format!("no swap_id attribute in {}", tx_ref),
        })?;
        info!(
            "[CosmosLedger] Counter swap {} locked for {} in {}",
            swap_id, request.source_swap_id, tx_ref
        );
        Ok(CounterLock { swap_id, tx_ref })
    }

    async fn withdraw(&self, swap_id: &str, preimage: &Secret) -> Result<TxRef, LedgerError> {
        let msg = json!({ "withdraw": { "swap_id": swap_id, "preimage": preimage.to_hex() } });
        let tx = self.execute(swap_id, msg, None).await?;
        Ok(tx["txhash"].as_str().unwrap_or_default().to_string())
    }

    async fn refund(&self, swap_id: &str) -> Result<TxRef, LedgerError> {
        let msg = json!({ "refund": { "swap_id": swap_id } });
        let tx = self.execute(swap_id, msg, None).await?;
        Ok(tx["txhash"].as_str().unwrap_or_default().to_string())
    }

    async fn is_withdrawable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        self.query_flag(swap_id, "is_withdrawable").await
    }

    async fn is_refundable(&self, swap_id: &str) -> Result<bool, LedgerError> {
        self.query_flag(swap_id, "is_refundable").await
    }
}
