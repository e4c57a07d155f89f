use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("priceflow/", env!("CARGO_PKG_VERSION"));

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates a plain HTTP client for one provider.
    ///
    /// No retry middleware: a failed call is reported once and the router falls back
    /// to the next source. `timeout` is the provider's longest per-call deadline; the
    /// router applies the tighter live deadline on top of it.
    pub fn create_client(timeout: Duration) -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("HttpClientFactory: builder failed ({}), using defaults", e);
                Client::new()
            })
    }
}
