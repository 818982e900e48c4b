use crate::config::{find_token, SystemConfig, TimelockPolicy};
use crate::data_structures::{
    Chain, Hashlock, Secret, SwapRecord, SwapStatus, SwapTerms, TokenInfo,
};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use ethers::types::U256;
use ethers::utils::{parse_units, to_checksum};
use regex::Regex;
use std::sync::OnceLock;

fn evm_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"))
}

fn cosmos_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]+1[a-z0-9]{38,58}$").expect("valid regex"))
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid regex"))
}

/// Accepts `0x` + 40 hex. Mixed-case input must carry a valid EIP-55 checksum.
pub fn validate_address(chain: Chain, address: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::InvalidAddress {
        chain,
        address: address.to_string(),
    };
    match chain {
        Chain::Ethereum => {
            if !evm_address_re().is_match(address) {
                return Err(invalid());
            }
            let digits = &address[2..];
            let mixed_case = digits.chars().any(|c| c.is_ascii_uppercase())
                && digits.chars().any(|c| c.is_ascii_lowercase());
            if mixed_case {
                let parsed = address.parse().map_err(|_| invalid())?;
                if to_checksum(&parsed, None) != address {
                    return Err(invalid());
                }
            }
            Ok(())
        }
        Chain::Cosmos => {
            if cosmos_address_re().is_match(address) {
                Ok(())
            } else {
                Err(invalid())
            }
        }
    }
}

pub fn validate_swap_id(chain: Chain, swap_id: &str) -> Result<(), ValidationError> {
    let digits = match chain {
        Chain::Ethereum => swap_id.strip_prefix("0x"),
        Chain::Cosmos => Some(swap_id),
    };
    match digits {
        Some(d) if d.len() == 64 && d.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
        _ => Err(ValidationError::InvalidSwapId {
            chain,
            swap_id: swap_id.to_string(),
        }),
    }
}

/// Parses a decimal amount into base units. Zero is rejected.
pub fn parse_amount(amount: &str, decimals: u32) -> Result<U256, ValidationError> {
    let trimmed = amount.trim();
    if !amount_re().is_match(trimmed) {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }
    let units: U256 = parse_units(trimmed, decimals)
        .map_err(|e| ValidationError::InvalidAmount(format!("{}: {}", amount, e)))?
        .into();
    if units.is_zero() {
        return Err(ValidationError::InvalidAmount(amount.to_string()));
    }
    Ok(units)
}

/// `now + min_duration < timelock <= now + max_duration`
pub fn validate_timelock(
    policy: &TimelockPolicy,
    timelock: u64,
    now: u64,
) -> Result<(), ValidationError> {
    let earliest = now + policy.min_duration.as_secs();
    let latest = now + policy.max_duration.as_secs();
    if timelock <= earliest || timelock > latest {
        return Err(ValidationError::TimelockOutOfBounds {
            timelock,
            earliest,
            latest,
        });
    }
    Ok(())
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// Turns submitted swap terms into a registry record.
#[derive(Clone, Debug)]
pub struct SwapValidator {
    policy: TimelockPolicy,
    ethereum_tokens: Vec<TokenInfo>,
    cosmos_tokens: Vec<TokenInfo>,
}

impl SwapValidator {
    pub fn new(config: &SystemConfig) -> Self {
        SwapValidator {
            policy: config.timelock.clone(),
            ethereum_tokens: config.ethereum.tokens.clone(),
            cosmos_tokens: config.cosmos.tokens.clone(),
        }
    }

    fn token(&self, chain: Chain, symbol: &str) -> Result<&TokenInfo, ValidationError> {
        let tokens = match chain {
            Chain::Ethereum => &self.ethereum_tokens,
            Chain::Cosmos => &self.cosmos_tokens,
        };
        find_token(tokens, symbol).ok_or_else(|| ValidationError::UnsupportedToken {
            chain,
            token: symbol.to_string(),
        })
    }

    pub fn validate(
        &self,
        terms: &SwapTerms,
        now: u64,
        created_at: DateTime<Utc>,
    ) -> Result<SwapRecord, ValidationError> {
        let from_chain: Chain = required(&terms.from_chain, "fromChain")?.parse()?;
        let to_chain: Chain = required(&terms.to_chain, "toChain")?.parse()?;
        if from_chain == to_chain {
            return Err(ValidationError::SameChain);
        }

        let swap_id = required(&terms.swap_id, "swapId")?;
        validate_swap_id(from_chain, swap_id)?;

        let hashlock = Hashlock::from_hex(required(&terms.hashlock, "hashlock")?)?;
        let secret = Secret::from_hex(required(&terms.secret, "secret")?)?;
        if !secret.matches(&hashlock) {
            return Err(ValidationError::SecretMismatch);
        }

        let timelock = terms.timelock.ok_or(ValidationError::MissingField("timelock"))?;
        validate_timelock(&self.policy, timelock, now)?;

        let from_token = self.token(from_chain, required(&terms.from_token, "fromToken")?)?;
        let to_token = self.token(to_chain, required(&terms.to_token, "toToken")?)?;

        let amount = required(&terms.amount, "amount")?;
        parse_amount(amount, from_token.decimals)?;
        let to_amount = match terms.to_amount.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => amount,
        };
        parse_amount(to_amount, to_token.decimals)?;

        let account_for = |chain: Chain| match chain {
            Chain::Ethereum => terms.eth_account.clone(),
            Chain::Cosmos => terms.cosmos_account.clone(),
        };
        let sender = terms
            .sender_address
            .clone()
            .or_else(|| account_for(from_chain))
            .ok_or(ValidationError::MissingField("senderAddress"))?;
        let receiver = terms
            .receiver_address
            .clone()
            .or_else(|| account_for(to_chain))
            .ok_or(ValidationError::MissingField("receiverAddress"))?;
        validate_address(from_chain, &sender)?;
        validate_address(to_chain, &receiver)?;

        let mut participants = Vec::new();
        if let Some(account) = &terms.eth_account {
            validate_address(Chain::Ethereum, account)?;
            participants.push(account.clone());
        }
        if let Some(account) = &terms.cosmos_account {
            validate_address(Chain::Cosmos, account)?;
            participants.push(account.clone());
        }

        Ok(SwapRecord {
            swap_id: swap_id.to_string(),
            hashlock,
            secret,
            timelock,
            from_chain,
            to_chain,
            from_token: from_token.symbol.clone(),
            to_token: to_token.symbol.clone(),
            amount: amount.to_string(),
            to_amount: to_amount.to_string(),
            sender_address: sender,
            receiver_address: receiver,
            status: SwapStatus::Pending,
            initiate_tx_ref: None,
            withdraw_tx_ref: None,
            counter_swap_id: None,
            counter_timelock: None,
            counter_tx_ref: None,
            refund_tx_refs: Vec::new(),
            last_error: None,
            participants,
            created_at,
            updated_at: created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_secret;

    const NOW: u64 = 1_700_000_000;

    fn terms() -> SwapTerms {
        let secret = generate_secret();
        SwapTerms {
            swap_id: Some(format!("0x{}", "1f".repeat(32))),
            secret: Some(secret.to_hex()),
            hashlock: Some(secret.hashlock().to_hex()),
            timelock: Some(NOW + 4 * 3600),
            from_chain: Some("ethereum".into()),
            to_chain: Some("cosmos".into()),
            from_token: Some("ETH".into()),
            to_token: Some("ATOM".into()),
            amount: Some("0.5".into()),
            to_amount: Some("120".into()),
            sender_address: Some(format!("0x{}", "a".repeat(40))),
            receiver_address: Some(format!("cosmos1{}", "q".repeat(38))),
            eth_account: None,
            cosmos_account: None,
        }
    }

    fn validator() -> SwapValidator {
        SwapValidator::new(&SystemConfig::default())
    }

    #[test]
    fn test_valid_terms_produce_pending_record() {
        let record = validator().validate(&terms(), NOW, Utc::now()).unwrap();
        assert_eq!(record.status, SwapStatus::Pending);
        assert_eq!(record.from_chain, Chain::Ethereum);
        assert_eq!(record.to_amount, "120");
        assert!(record.secret.matches(&record.hashlock));
    }

    #[test]
    fn test_timelock_bounds() {
        let policy = TimelockPolicy::default();
        assert!(validate_timelock(&policy, NOW + 1800, NOW).is_err());
        assert!(validate_timelock(&policy, NOW + 3600, NOW).is_err());
        assert!(validate_timelock(&policy, NOW + 3601, NOW).is_ok());
        assert!(validate_timelock(&policy, NOW + 86400, NOW).is_ok());
        assert!(validate_timelock(&policy, NOW + 86401, NOW).is_err());

        let mut short = terms();
        short.timelock = Some(NOW + 1800);
        assert!(matches!(
            validator().validate(&short, NOW, Utc::now()),
            Err(ValidationError::TimelockOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_secret_must_match_hashlock() {
        let mut bad = terms();
        bad.hashlock = Some(generate_secret().hashlock().to_hex());
        assert_eq!(
            validator().validate(&bad, NOW, Utc::now()).unwrap_err(),
            ValidationError::SecretMismatch
        );
    }

    #[test]
    fn test_token_must_belong_to_chain() {
        let mut bad = terms();
        bad.to_token = Some("USDC".into());
        assert!(matches!(
            validator().validate(&bad, NOW, Utc::now()),
            Err(ValidationError::UnsupportedToken { chain: Chain::Cosmos, .. })
        ));
    }

    #[test]
    fn test_chains_must_differ() {
        let mut bad = terms();
        bad.to_chain = Some("ethereum".into());
        assert_eq!(
            validator().validate(&bad, NOW, Utc::now()).unwrap_err(),
            ValidationError::SameChain
        );
    }

    #[test]
    fn test_missing_fields_are_named() {
        let mut bad = terms();
        bad.secret = None;
        assert_eq!(
            validator().validate(&bad, NOW, Utc::now()).unwrap_err(),
            ValidationError::MissingField("secret")
        );
    }

    #[test]
    fn test_addresses() {
        assert!(validate_address(Chain::Ethereum, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
        assert!(validate_address(Chain::Ethereum, "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").is_ok());
        assert!(validate_address(Chain::Ethereum, "0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_err());
        assert!(validate_address(Chain::Ethereum, "0x1234").is_err());
        assert!(validate_address(Chain::Cosmos, "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu").is_ok());
        assert!(validate_address(Chain::Cosmos, "Cosmos1abc").is_err());
    }

    #[test]
    fn test_amounts() {
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert!(parse_amount("0", 18).is_err());
        assert!(parse_amount("-1", 18).is_err());
        assert!(parse_amount("1e5", 18).is_err());
        assert!(parse_amount("abc", 18).is_err());
    }

    #[test]
    fn test_swap_id_formats() {
        let hex64 = "ab".repeat(32);
        assert!(validate_swap_id(Chain::Ethereum, &format!("0x{}", hex64)).is_ok());
        assert!(validate_swap_id(Chain::Ethereum, &hex64).is_err());
        assert!(validate_swap_id(Chain::Cosmos, &hex64).is_ok());
        assert!(validate_swap_id(Chain::Cosmos, "swap-1").is_err());
    }
}
