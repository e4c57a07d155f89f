//! Source priority tables.
//!
//! Live quotes and historical ranges have separate, independently overridable tables.
//! An override file only needs to name the entries it changes:
//!
//! ```toml
//! [live]
//! equity = ["yahoo", "finnhub"]
//!
//! [historical]
//! crypto = ["coingecko", "yahoo"]
//! ```

use crate::domain::ports::SourceKind;
use crate::domain::symbol::SymbolClass;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered candidates per symbol class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassPriorities {
    pub equity: Vec<SourceKind>,
    pub crypto: Vec<SourceKind>,
}

impl ClassPriorities {
    pub fn for_class(&self, class: SymbolClass) -> &[SourceKind] {
        match class {
            SymbolClass::Equity => &self.equity,
            SymbolClass::Crypto => &self.crypto,
        }
    }

    fn apply(&mut self, overrides: ClassOverrides, table: &str) -> Result<()> {
        if let Some(equity) = overrides.equity {
            validate(&equity, SymbolClass::Equity, table)?;
            self.equity = equity;
        }
        if let Some(crypto) = overrides.crypto {
            validate(&crypto, SymbolClass::Crypto, table)?;
            self.crypto = crypto;
        }
        Ok(())
    }
}

fn validate(sources: &[SourceKind], class: SymbolClass, table: &str) -> Result<()> {
    if sources.is_empty() {
        anyhow::bail!("{} priority for {} must not be empty", table, class);
    }
    if let Some(kind) = sources.iter().find(|k| !k.supports(class)) {
        anyhow::bail!("{} priority for {} lists {}, which cannot serve it", table, class, kind);
    }
    for (i, kind) in sources.iter().enumerate() {
        if sources[..i].contains(kind) {
            anyhow::bail!("{} priority for {} lists {} twice", table, class, kind);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityTable {
    pub live: ClassPriorities,
    pub historical: ClassPriorities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PriorityOverrides {
    live: Option<ClassOverrides>,
    historical: Option<ClassOverrides>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassOverrides {
    equity: Option<Vec<SourceKind>>,
    crypto: Option<Vec<SourceKind>>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        use SourceKind::*;
        Self {
            live: ClassPriorities {
                equity: vec![AlphaVantage, Yahoo, Finnhub],
                crypto: vec![CoinGecko, Finnhub],
            },
            historical: ClassPriorities {
                equity: vec![AlphaVantage, Yahoo, Finnhub],
                crypto: vec![CoinGecko, Yahoo, Finnhub],
            },
        }
    }
}

impl PriorityTable {
    pub fn live(&self, class: SymbolClass) -> &[SourceKind] {
        self.live.for_class(class)
    }

    pub fn historical(&self, class: SymbolClass) -> &[SourceKind] {
        self.historical.for_class(class)
    }

    /// Defaults with the entries named in `toml` replaced.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let overrides: PriorityOverrides =
            toml::from_str(toml).context("Failed to parse source priority overrides")?;

        let mut table = Self::default();
        if let Some(live) = overrides.live {
            table.live.apply(live, "live")?;
        }
        if let Some(historical) = overrides.historical {
            table.historical.apply(historical, "historical")?;
        }
        Ok(table)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read priority file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}
