use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKey {
    AaveV3,
    MorphoBlue,
    CompoundV3,
    Radiant,
    Seamless,
}

impl fmt::Display for ProtocolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolKey::AaveV3 => "aavev3",
            ProtocolKey::MorphoBlue => "morphoblue",
            ProtocolKey::CompoundV3 => "compoundv3",
            ProtocolKey::Radiant => "radiant",
            ProtocolKey::Seamless => "seamless",
        };
        write!(f, "{}", s)
    }
}

/// A token amount paired with the descriptor needed to render and scale it.
#[derive(Debug, Clone)]
pub struct TokenPosition {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub amount: U256,
}

impl TokenPosition {
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }
}

/// The Morpho Blue market fivefold plus the borrower's current share balance.
#[derive(Debug, Clone)]
pub struct MorphoMarket {
    pub market_id: H256,
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    pub lltv: U256,
    pub borrow_shares: U256,
}

/// Pre-liquidation offer parameters read from the offer contract, already
/// interpolated for the borrower's current health factor where applicable.
#[derive(Debug, Clone)]
pub struct PreLiquidationOffer {
    pub offer_address: Address,
    pub pre_lltv: U256,
    pub pre_lcf1: U256,
    pub pre_lcf2: U256,
    pub pre_lif1: U256,
    pub pre_lif2: U256,
    pub oracle: Address,
    pub expiry: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Subgraph,
    Realtime,
    Predictive,
    PolicyRetry,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateSource::Subgraph => "subgraph",
            CandidateSource::Realtime => "realtime",
            CandidateSource::Predictive => "predictive",
            CandidateSource::PolicyRetry => "policy_retry",
        };
        write!(f, "{}", s)
    }
}

/// A borrower position discovered by ingestion, read-only once it reaches
/// the scorer. `health_factor` is `None` when the producer could not derive
/// one (e.g. a raw event refetch before the reserve read completes) — the
/// scorer treats a missing HF as a rejection, never as "definitely safe".
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chain_id: u64,
    pub borrower: Address,
    pub debt: TokenPosition,
    pub collateral: TokenPosition,
    pub health_factor: Option<f64>,
    pub protocol: ProtocolKey,
    pub morpho: Option<MorphoMarket>,
    pub preliq_offer: Option<PreLiquidationOffer>,
    pub source: CandidateSource,
    pub observed_at_unix: u64,
}

impl Candidate {
    pub fn dedupe_key(&self) -> (u64, Address, Address, Address) {
        (self.chain_id, self.borrower, self.debt.address, self.collateral.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(amount: u64) -> TokenPosition {
        TokenPosition {
            symbol: "USDC".into(),
            address: Address::repeat_byte(1),
            decimals: 6,
            amount: U256::from(amount),
        }
    }

    #[test]
    fn dedupe_key_is_stable_across_clones() {
        let c = Candidate {
            chain_id: 1,
            borrower: Address::repeat_byte(9),
            debt: position(1000),
            collateral: position(2000),
            health_factor: Some(0.95),
            protocol: ProtocolKey::AaveV3,
            morpho: None,
            preliq_offer: None,
            source: CandidateSource::Subgraph,
            observed_at_unix: 1_700_000_000,
        };
        assert_eq!(c.dedupe_key(), c.clone().dedupe_key());
    }

    #[test]
    fn zero_amount_is_detected() {
        assert!(position(0).is_zero());
        assert!(!position(1).is_zero());
    }
}
