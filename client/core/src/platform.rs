//! Platform-specific signal lookups
//!
//! Backs the default [`SignalProvider`]. Only this module touches the OS or
//! the IP lookup service; the engine sees nothing but the provider.

use crate::logging::{log_debug, log_error, log_info};
use crate::signals::{AppContext, SignalProvider, SignalSource};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Public IPv4 echo service
pub const DEFAULT_IPV4_ENDPOINT: &str = "https://get-ipv4.adrta.com";

/// Host property holding an advertising id, preferred over the machine id
pub const ADVERTISING_ID_PROPERTY: &str = "advertising_id";

/// Host property holding the browser user agent
pub const USER_AGENT_PROPERTY: &str = "user_agent";

/// Platform abstraction
pub trait Platform: Send + Sync {
    /// Get platform name
    fn name(&self) -> &'static str;

    /// Stable, non-secret machine identifier
    fn machine_id(&self) -> Option<String>;
}

/// Get platform implementation
pub fn get_platform() -> Box<dyn Platform> {
    #[cfg(target_os = "linux")]
    return Box::new(LinuxPlatform);

    #[cfg(not(target_os = "linux"))]
    return Box::new(GenericPlatform);
}

// Linux
#[cfg(target_os = "linux")]
pub struct LinuxPlatform;

#[cfg(target_os = "linux")]
impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str { "Linux" }

    fn machine_id(&self) -> Option<String> {
        ["/etc/machine-id", "/var/lib/dbus/machine-id"]
            .iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .map(|raw| raw.trim().to_string())
            .find(|id| !id.is_empty())
    }
}

// Generic fallback
#[cfg(not(target_os = "linux"))]
pub struct GenericPlatform;

#[cfg(not(target_os = "linux"))]
impl Platform for GenericPlatform {
    fn name(&self) -> &'static str { "Generic" }
    fn machine_id(&self) -> Option<String> { None }
}

/// Hex SHA-256 of a raw identifier, so the raw value never leaves the device
pub fn digest_id(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[derive(Deserialize)]
struct IpEcho {
    ip: Option<String>,
}

/// Default lookups used when the host does not supply a provider
#[derive(Clone)]
pub struct PlatformSignals {
    client: reqwest::Client,
    ipv4_endpoint: String,
    lookup_timeout: Duration,
}

impl PlatformSignals {
    pub fn new(lookup_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            ipv4_endpoint: DEFAULT_IPV4_ENDPOINT.to_string(),
            lookup_timeout,
        }
    }

    pub fn with_ipv4_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.ipv4_endpoint = endpoint.into();
        self
    }

    /// Advertising id from the host, else the hashed machine id
    pub fn device_id(ctx: &AppContext) -> Option<String> {
        if let Some(ad_id) = ctx.property(ADVERTISING_ID_PROPERTY) {
            return Some(ad_id.to_string());
        }

        let platform = get_platform();
        match platform.machine_id() {
            Some(id) => Some(digest_id(&id)),
            None => {
                log_debug!("No machine id available on {}", platform.name());
                None
            }
        }
    }

    pub fn user_agent(ctx: &AppContext) -> Option<String> {
        ctx.property(USER_AGENT_PROPERTY).map(str::to_string)
    }

    /// Public IPv4 address as seen by the echo service
    pub async fn ipv4(&self) -> Option<String> {
        let mut request = self.client.get(&self.ipv4_endpoint);
        if !self.lookup_timeout.is_zero() {
            request = request.timeout(self.lookup_timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log_error!("Failed to fetch IP address: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            log_error!("Failed to fetch IP address: HTTP {}", response.status().as_u16());
            return None;
        }

        match response.json::<IpEcho>().await {
            Ok(echo) => echo.ip,
            Err(e) => {
                log_info!("Failed to parse IP address response: {}", e);
                None
            }
        }
    }

    /// Provider over these lookups, memoized per field for `ttl`
    pub fn into_provider(self, ttl: Duration) -> SignalProvider {
        let lookups = Arc::new(self);

        SignalProvider::builder()
            .device_id(SignalSource::new(|ctx: Arc<AppContext>| async move {
                PlatformSignals::device_id(&ctx)
            }))
            .ipv4(SignalSource::new(move |_| {
                let lookups = Arc::clone(&lookups);
                async move { lookups.ipv4().await }
            }))
            .user_agent(SignalSource::new(|ctx: Arc<AppContext>| async move {
                PlatformSignals::user_agent(&ctx)
            }))
            .build()
            .memoized(ttl)
    }
}

impl SignalProvider {
    /// Built-in provider: platform lookups memoized for `ttl`.
    ///
    /// `lookup_timeout` bounds the IPv4 echo request; zero means unbounded.
    pub fn platform(ttl: Duration, lookup_timeout: Duration) -> Self {
        PlatformSignals::new(lookup_timeout).into_provider(ttl)
    }
}
