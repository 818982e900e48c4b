use crate::crypto;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Chain-assigned HTLC identifier: `0x` + 64 hex on ethereum, 64 hex on cosmos.
pub type SwapId = String;

/// Transaction hash as reported by the ledger.
pub type TxRef = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Cosmos,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Cosmos => "cosmos",
        }
    }

    pub fn counterpart(&self) -> Chain {
        match self {
            Chain::Ethereum => Chain::Cosmos,
            Chain::Cosmos => Chain::Ethereum,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ethereum" => Ok(Chain::Ethereum),
            "cosmos" => Ok(Chain::Cosmos),
            other => Err(ValidationError::UnknownChain(other.to_string())),
        }
    }
}

fn decode_32(input: &str) -> Option<[u8; 32]> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 64 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    bytes.try_into().ok()
}

/// SHA-256 commitment to a secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hashlock([u8; 32]);

impl Hashlock {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hashlock(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self, ValidationError> {
        decode_32(input)
            .map(Hashlock)
            .ok_or(ValidationError::InvalidHashlock)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashlock({})", self.to_hex())
    }
}

impl Serialize for Hashlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hashlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Hashlock::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// 32-byte preimage. Debug output never shows the bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Secret(bytes)
    }

    pub fn from_hex(input: &str) -> Result<Self, ValidationError> {
        decode_32(input).map(Secret).ok_or(ValidationError::InvalidSecret)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn hashlock(&self) -> Hashlock {
        crypto::generate_hashlock(&self.0)
    }

    pub fn matches(&self, hashlock: &Hashlock) -> bool {
        self.hashlock() == *hashlock
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Secret::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Pending,
    Initiated,
    CounterInitiated,
    Withdrawn,
    Completed,
    Refunded,
    Expired,
    Failed,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Refunded | SwapStatus::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            SwapStatus::Pending => 0,
            SwapStatus::Initiated => 1,
            SwapStatus::CounterInitiated => 2,
            SwapStatus::Withdrawn => 3,
            SwapStatus::Expired => 4,
            SwapStatus::Completed | SwapStatus::Refunded | SwapStatus::Failed => 5,
        }
    }

    /// Statuses only move forward. Terminal statuses never change and an
    /// expired swap can no longer complete.
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            SwapStatus::Completed => self != SwapStatus::Expired,
            SwapStatus::Refunded | SwapStatus::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "pending",
            SwapStatus::Initiated => "initiated",
            SwapStatus::CounterInitiated => "counter_initiated",
            SwapStatus::Withdrawn => "withdrawn",
            SwapStatus::Completed => "completed",
            SwapStatus::Refunded => "refunded",
            SwapStatus::Expired => "expired",
            SwapStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_lowercase().as_str() {
            "pending" => SwapStatus::Pending,
            "initiated" => SwapStatus::Initiated,
            "counter_initiated" => SwapStatus::CounterInitiated,
            "withdrawn" => SwapStatus::Withdrawn,
            "completed" => SwapStatus::Completed,
            "refunded" => SwapStatus::Refunded,
            "expired" => SwapStatus::Expired,
            "failed" => SwapStatus::Failed,
            other => return Err(ValidationError::UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Token known to one chain. `asset` is the ERC-20 address (zero address for
/// native ETH) or the bank denom on cosmos.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub asset: String,
    pub decimals: u32,
}

impl TokenInfo {
    pub fn new(symbol: &str, asset: &str, decimals: u32) -> Self {
        TokenInfo {
            symbol: symbol.to_string(),
            asset: asset.to_string(),
            decimals,
        }
    }
}

/// Swap terms as submitted by a client. Every field is optional on the wire
/// so that validation can name what is missing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTerms {
    pub swap_id: Option<String>,
    pub secret: Option<String>,
    pub hashlock: Option<String>,
    pub timelock: Option<u64>,
    pub from_chain: Option<String>,
    pub to_chain: Option<String>,
    pub from_token: Option<String>,
    pub to_token: Option<String>,
    pub amount: Option<String>,
    pub to_amount: Option<String>,
    pub sender_address: Option<String>,
    pub receiver_address: Option<String>,
    pub eth_account: Option<String>,
    pub cosmos_account: Option<String>,
}

/// Registry entry for one swap, keyed by the source-chain swap id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRecord {
    pub swap_id: SwapId,
    pub hashlock: Hashlock,
    pub secret: Secret,
    pub timelock: u64,
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub to_amount: String,
    pub sender_address: String,
    pub receiver_address: String,
    pub status: SwapStatus,
    pub initiate_tx_ref: Option<TxRef>,
    pub withdraw_tx_ref: Option<TxRef>,
    pub counter_swap_id: Option<SwapId>,
    pub counter_timelock: Option<u64>,
    pub counter_tx_ref: Option<TxRef>,
    #[serde(default)]
    pub refund_tx_refs: Vec<TxRef>,
    pub last_error: Option<String>,
    /// Accounts this swap is listed under, besides sender and receiver.
    #[serde(default)]
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn view(&self) -> SwapView {
        SwapView {
            swap_id: self.swap_id.clone(),
            hashlock: self.hashlock,
            timelock: self.timelock,
            from_chain: self.from_chain,
            to_chain: self.to_chain,
            from_token: self.from_token.clone(),
            to_token: self.to_token.clone(),
            amount: self.amount.clone(),
            to_amount: self.to_amount.clone(),
            sender_address: self.sender_address.clone(),
            receiver_address: self.receiver_address.clone(),
            status: self.status,
            initiate_tx_ref: self.initiate_tx_ref.clone(),
            withdraw_tx_ref: self.withdraw_tx_ref.clone(),
            counter_swap_id: self.counter_swap_id.clone(),
            counter_timelock: self.counter_timelock,
            counter_tx_ref: self.counter_tx_ref.clone(),
            refund_tx_refs: self.refund_tx_refs.clone(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Every account the swap should be listed under.
    pub fn accounts(&self) -> Vec<&str> {
        let mut accounts = vec![self.sender_address.as_str(), self.receiver_address.as_str()];
        accounts.extend(self.participants.iter().map(String::as_str));
        accounts
    }
}

/// Public projection of a [`SwapRecord`]. Has no secret field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapView {
    pub swap_id: SwapId,
    pub hashlock: Hashlock,
    pub timelock: u64,
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub to_amount: String,
    pub sender_address: String,
    pub receiver_address: String,
    pub status: SwapStatus,
    pub initiate_tx_ref: Option<TxRef>,
    pub withdraw_tx_ref: Option<TxRef>,
    pub counter_swap_id: Option<SwapId>,
    pub counter_timelock: Option<u64>,
    pub counter_tx_ref: Option<TxRef>,
    pub refund_tx_refs: Vec<TxRef>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the transaction history listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub id: SwapId,
    pub from_chain: Chain,
    pub to_chain: Chain,
    pub from_token: String,
    pub to_token: String,
    pub amount: String,
    pub status: SwapStatus,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: i64,
    pub hash: Option<TxRef>,
    pub withdraw_hash: Option<TxRef>,
}

impl From<&SwapView> for TransactionSummary {
    fn from(view: &SwapView) -> Self {
        TransactionSummary {
            id: view.swap_id.clone(),
            from_chain: view.from_chain,
            to_chain: view.to_chain,
            from_token: view.from_token.clone(),
            to_token: view.to_token.clone(),
            amount: view.amount.clone(),
            status: view.status,
            timestamp: view.created_at.timestamp_millis(),
            hash: view.initiate_tx_ref.clone(),
            withdraw_hash: view.withdraw_tx_ref.clone(),
        }
    }
}
