use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::routing::{PriorityTable, SourceRegistry};
use crate::config::{ProviderEnvConfig, SourceEnvConfig};
use crate::domain::ports::{PriceFetcher, SourceKind};
use crate::infrastructure::fetchers::{
    AlphaVantageFetcher, CoinGeckoFetcher, FetcherSettings, FinnhubFetcher, YahooFetcher,
};

pub struct SourcesHandle {
    pub registry: SourceRegistry,
    pub priorities: PriorityTable,
}

pub struct SourcesBootstrap;

impl SourcesBootstrap {
    /// Builds the fetcher registry once. Providers that need a key and have none are left out.
    pub fn init(config: &SourceEnvConfig) -> Result<SourcesHandle> {
        let mut fetchers: Vec<Arc<dyn PriceFetcher>> = Vec::new();

        for kind in SourceKind::ALL {
            let settings = Self::settings(config.provider(kind));
            let fetcher: Option<Arc<dyn PriceFetcher>> = match kind {
                SourceKind::AlphaVantage => {
                    AlphaVantageFetcher::new(&settings).map(|f| Arc::new(f) as Arc<dyn PriceFetcher>)
                }
                SourceKind::Yahoo => Some(Arc::new(YahooFetcher::new(&settings))),
                SourceKind::Finnhub => {
                    FinnhubFetcher::new(&settings).map(|f| Arc::new(f) as Arc<dyn PriceFetcher>)
                }
                SourceKind::CoinGecko => Some(Arc::new(CoinGeckoFetcher::new(&settings))),
            };

            match fetcher {
                Some(fetcher) => {
                    info!(
                        "SourcesBootstrap: {} enabled ({} calls/min, {})",
                        kind, settings.calls_per_minute, settings.base_url
                    );
                    fetchers.push(fetcher);
                }
                None => warn!("SourcesBootstrap: {} disabled, no API key configured", kind),
            }
        }

        let registry = SourceRegistry::from_fetchers(fetchers);
        if registry.is_empty() {
            anyhow::bail!("No price source could be configured");
        }

        let priorities = match &config.priority_file {
            Some(path) => {
                info!("SourcesBootstrap: loading source priorities from {}", path);
                PriorityTable::from_file(path)
                    .with_context(|| format!("Failed to load priority file {}", path))?
            }
            None => PriorityTable::default(),
        };

        Ok(SourcesHandle {
            registry,
            priorities,
        })
    }

    fn settings(provider: &ProviderEnvConfig) -> FetcherSettings {
        FetcherSettings {
            kind: provider.kind,
            base_url: provider.base_url.clone(),
            api_key: None,
            calls_per_minute: provider.calls_per_minute,
            timeouts: provider.timeouts,
        }
        .with_api_key(provider.api_key.clone())
    }
}
