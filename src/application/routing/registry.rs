use crate::domain::ports::{PriceFetcher, SourceKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The set of configured fetchers, built once at bootstrap
#[derive(Clone, Default)]
pub struct SourceRegistry {
    fetchers: BTreeMap<SourceKind, Arc<dyn PriceFetcher>>,
}

impl SourceRegistry {
    /// Later entries for the same kind replace earlier ones.
    pub fn from_fetchers(fetchers: impl IntoIterator<Item = Arc<dyn PriceFetcher>>) -> Self {
        Self {
            fetchers: fetchers.into_iter().map(|f| (f.kind(), f)).collect(),
        }
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn PriceFetcher>> {
        self.fetchers.get(&kind)
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.fetchers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.fetchers.keys().copied().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn PriceFetcher>> {
        self.fetchers.values()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.kinds())
            .finish()
    }
}
