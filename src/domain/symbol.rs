//! Symbol classification.
//!
//! Every symbol string maps to exactly one [`SymbolClass`] and one canonical id. The
//! class is never stored on its own: it is recomputed from the symbol each time so the
//! same input always classifies identically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Base tickers recognized as cryptocurrencies
pub const KNOWN_CRYPTO_BASES: &[&str] = &[
    "BTC", "ETH", "ADA", "DOT", "LINK", "LTC", "BCH", "XRP", "XLM", "EOS",
];

// Longest first so "BTCUSDT" strips to "BTC" rather than "BTCT".
const QUOTE_SUFFIXES: &[&str] = &["USDT", "USD"];

/// Canonical quote currency for every crypto symbol. All crypto providers price in USD.
pub const CRYPTO_QUOTE: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SymbolClass {
    Equity,
    Crypto,
}

impl SymbolClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolClass::Equity => "EQUITY",
            SymbolClass::Crypto => "CRYPTO",
        }
    }
}

impl fmt::Display for SymbolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified symbol: canonical form, base ticker and class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId {
    canonical: String,
    base: String,
    class: SymbolClass,
}

impl SymbolId {
    /// Classifies and normalizes a raw symbol string.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        let base = base_ticker(&upper);

        if KNOWN_CRYPTO_BASES.contains(&base.as_str()) {
            Self {
                canonical: format!("{}/{}", base, CRYPTO_QUOTE),
                base,
                class: SymbolClass::Crypto,
            }
        } else {
            Self {
                canonical: upper.clone(),
                base: upper,
                class: SymbolClass::Equity,
            }
        }
    }

    /// Canonical store/cache key (uppercase; crypto as `BASE/USD`)
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Base ticker without separators or quote currency
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn class(&self) -> SymbolClass {
        self.class
    }

    pub fn is_crypto(&self) -> bool {
        self.class == SymbolClass::Crypto
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Pure, total classification of a symbol string.
pub fn classify(raw: &str) -> SymbolClass {
    SymbolId::parse(raw).class()
}

/// Canonical form of a symbol string (see [`SymbolId::canonical`]).
pub fn canonical_symbol(raw: &str) -> String {
    SymbolId::parse(raw).canonical
}

fn base_ticker(upper: &str) -> String {
    if let Some((base, _quote)) = upper.split_once(['/', '-']) {
        return base.to_string();
    }

    for quote in QUOTE_SUFFIXES {
        if let Some(base) = upper.strip_suffix(quote)
            && !base.is_empty()
        {
            return base.to_string();
        }
    }

    upper.to_string()
}

/// CoinGecko coin id for a crypto base ticker.
pub fn coingecko_id(base: &str) -> String {
    match base {
        "BTC" => "bitcoin",
        "ETH" => "ethereum",
        "ADA" => "cardano",
        "DOT" => "polkadot",
        "LINK" => "chainlink",
        "LTC" => "litecoin",
        "BCH" => "bitcoin-cash",
        "XRP" => "ripple",
        "XLM" => "stellar",
        "EOS" => "eos",
        other => return other.to_lowercase(),
    }
    .to_string()
}
