//! Price observation model.
//!
//! A [`PriceObservation`] is an immutable priced snapshot of one symbol at one instant.
//! It can only be obtained through [`ObservationBuilder::build`], which enforces the
//! invariants checked by [`PriceObservation::validate_at`].

use crate::domain::errors::ValidationError;
use crate::domain::symbol::{SymbolClass, SymbolId};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Oldest accepted observation age
pub const MAX_OBSERVATION_AGE_DAYS: i64 = 5 * 365;
/// Forward slack for upstream timezone skew
pub const MAX_FUTURE_SKEW_DAYS: i64 = 1;

pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    symbol: String,
    class: SymbolClass,
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Decimal,
    volume: Option<Decimal>,
    timestamp: DateTime<Utc>,
    source: String,
    #[serde(default)]
    metadata: Metadata,
}

impl PriceObservation {
    /// Start building an observation. The symbol is canonicalized and classified.
    pub fn builder(
        symbol: &str,
        close: Decimal,
        timestamp: DateTime<Utc>,
        source: &str,
    ) -> ObservationBuilder {
        let id = SymbolId::parse(symbol);
        ObservationBuilder {
            observation: PriceObservation {
                symbol: id.canonical().to_string(),
                class: id.class(),
                open: None,
                high: None,
                low: None,
                close,
                volume: None,
                timestamp,
                source: source.to_string(),
                metadata: Metadata::new(),
            },
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn class(&self) -> SymbolClass {
        self.class
    }

    pub fn open(&self) -> Option<Decimal> {
        self.open
    }

    pub fn high(&self) -> Option<Decimal> {
        self.high
    }

    pub fn low(&self) -> Option<Decimal> {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> Option<Decimal> {
        self.volume
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Age of the embedded timestamp relative to `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// Checks every invariant against the given reference instant.
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if self.symbol != self.symbol.to_uppercase() {
            return Err(ValidationError::NotCanonical {
                symbol: self.symbol.clone(),
            });
        }
        if self.close <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveClose {
                symbol: self.symbol.clone(),
                close: self.close.to_string(),
            });
        }

        for (field, value) in [("open", self.open), ("high", self.high), ("low", self.low)] {
            if let Some(v) = value
                && v <= Decimal::ZERO
            {
                return Err(ValidationError::NonPositivePrice {
                    symbol: self.symbol.clone(),
                    field,
                    value: v.to_string(),
                });
            }
        }

        if let (Some(high), Some(low)) = (self.high, self.low)
            && high < low
        {
            return Err(ValidationError::HighBelowLow {
                symbol: self.symbol.clone(),
                high: high.to_string(),
                low: low.to_string(),
            });
        }

        if let Some(volume) = self.volume
            && volume < Decimal::ZERO
        {
            return Err(ValidationError::NegativeVolume {
                symbol: self.symbol.clone(),
                volume: volume.to_string(),
            });
        }

        let earliest = now - Duration::days(MAX_OBSERVATION_AGE_DAYS);
        let latest = now + Duration::days(MAX_FUTURE_SKEW_DAYS);
        if self.timestamp < earliest || self.timestamp > latest {
            return Err(ValidationError::TimestampOutOfRange {
                symbol: self.symbol.clone(),
                timestamp: self.timestamp.to_rfc3339(),
            });
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(Utc::now())
    }
}

/// Builder for [`PriceObservation`]
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    observation: PriceObservation,
}

impl ObservationBuilder {
    pub fn open(mut self, open: Option<Decimal>) -> Self {
        self.observation.open = open;
        self
    }

    pub fn high(mut self, high: Option<Decimal>) -> Self {
        self.observation.high = high;
        self
    }

    pub fn low(mut self, low: Option<Decimal>) -> Self {
        self.observation.low = low;
        self
    }

    pub fn volume(mut self, volume: Option<Decimal>) -> Self {
        self.observation.volume = volume;
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.observation
            .metadata
            .insert(key.to_string(), value.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.observation.metadata = metadata;
        self
    }

    /// Validates against the current instant and returns the immutable observation.
    pub fn build(self) -> Result<PriceObservation, ValidationError> {
        self.build_at(Utc::now())
    }

    pub fn build_at(self, now: DateTime<Utc>) -> Result<PriceObservation, ValidationError> {
        self.observation.validate_at(now)?;
        Ok(self.observation)
    }
}
