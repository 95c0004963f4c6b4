use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Timeout applied when a call does not set its own
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Create a configured HTTP client for calls to the generation providers
pub fn create_http_client() -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .user_agent(concat!("img2video/", env!("CARGO_PKG_VERSION")))
        .build()
}
