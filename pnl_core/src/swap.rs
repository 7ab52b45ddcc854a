use crate::{PnLError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const SWAP_TYPE: &str = "SWAP";

/// A token transfer inside a swap, amounts already in UI units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenLeg {
    pub mint: String,
    pub amount: Decimal,
    pub from_user_account: Option<String>,
    pub to_user_account: Option<String>,
}

/// Validated swap event as produced by the indexer boundary.
///
/// Provider payloads are loosely typed; everything past this type can rely on
/// a non-empty signature, a real timestamp, and non-negative leg amounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwapEvent {
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub tx_type: String,
    pub source: String,
    pub description: String,
    pub fee_lamports: i64,
    pub fee_payer: String,
    pub legs: Vec<TokenLeg>,
}

impl SwapEvent {
    pub fn validate(self) -> Result<Self> {
        if self.signature.trim().is_empty() {
            return Err(PnLError::InvalidEvent("empty signature".to_string()));
        }

        if self.fee_lamports < 0 {
            return Err(PnLError::InvalidEvent(format!(
                "{}: negative fee {}",
                self.signature, self.fee_lamports
            )));
        }

        for leg in &self.legs {
            if leg.mint.trim().is_empty() {
                return Err(PnLError::InvalidEvent(format!(
                    "{}: token transfer without mint",
                    self.signature
                )));
            }
            if leg.amount.is_sign_negative() {
                return Err(PnLError::InvalidEvent(format!(
                    "{}: negative amount {} for {}",
                    self.signature, leg.amount, leg.mint
                )));
            }
        }

        Ok(self)
    }

    /// Only SWAP events with two or three token transfers are accounted
    pub fn is_classifiable(&self) -> bool {
        self.tx_type == SWAP_TYPE && (2..=3).contains(&self.legs.len())
    }
}
