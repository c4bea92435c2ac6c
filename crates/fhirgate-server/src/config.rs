//! Environment-derived configuration.

use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Upstream FHIR base URL (`PROXY_TO`).
    pub proxy_to: String,

    /// Socket (read) timeout in seconds.
    pub socket_timeout_secs: u64,

    /// Connection pool checkout timeout in seconds.
    pub connection_request_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Connection pool maximum total.
    pub max_connection_total: usize,

    /// Connection pool maximum per route.
    pub max_connection_per_route: usize,

    /// Relaxes bundle role enforcement to logging.
    pub dev_mode: bool,

    /// Emits `system|code` sync tag values.
    pub sync_tag_qualified: bool,

    /// Scope cache TTL in seconds.
    pub scope_cache_ttl_secs: u64,

    /// Listen address for the gateway.
    pub listen: String,
}

/// Upper bound on cached subject scopes.
pub const SCOPE_CACHE_MAX_ENTRIES: usize = 4096;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxy_to: String::new(),
            socket_timeout_secs: 60,
            connection_request_timeout_secs: 30,
            connect_timeout_secs: 30,
            max_connection_total: 64,
            max_connection_per_route: 32,
            dev_mode: false,
            sync_tag_qualified: false,
            scope_cache_ttl_secs: 300,
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns a message when `PROXY_TO` is missing or a value fails to
    /// parse.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            proxy_to: std::env::var("PROXY_TO")
                .map_err(|_| "PROXY_TO must point at the upstream FHIR base URL".to_string())?,
            socket_timeout_secs: env_or("GATEWAY_SOCKET_TIMEOUT", defaults.socket_timeout_secs)?,
            connection_request_timeout_secs: env_or(
                "GATEWAY_CONNECTION_REQUEST_TIMEOUT",
                defaults.connection_request_timeout_secs,
            )?,
            connect_timeout_secs: env_or("GATEWAY_CONNECT_TIMEOUT", defaults.connect_timeout_secs)?,
            max_connection_total: env_or(
                "GATEWAY_MAX_CONNECTION_TOTAL",
                defaults.max_connection_total,
            )?,
            max_connection_per_route: env_or(
                "GATEWAY_MAX_CONNECTION_PER_ROUTE",
                defaults.max_connection_per_route,
            )?,
            dev_mode: env_truthy("DEV_MODE"),
            sync_tag_qualified: env_truthy("GATEWAY_SYNC_TAG_QUALIFIED"),
            scope_cache_ttl_secs: env_or("GATEWAY_SCOPE_CACHE_TTL", defaults.scope_cache_ttl_secs)?,
            listen: std::env::var("GATEWAY_LISTEN").unwrap_or(defaults.listen),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.proxy_to.trim_end_matches('/').is_empty() {
            return Err("PROXY_TO must not be empty".into());
        }
        if !self.proxy_to.starts_with("http://") && !self.proxy_to.starts_with("https://") {
            return Err("PROXY_TO must be an http(s) URL".into());
        }
        if self.socket_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err("gateway timeouts must be > 0".into());
        }
        if self.max_connection_total == 0 || self.max_connection_per_route == 0 {
            return Err("gateway connection limits must be > 0".into());
        }
        if self.max_connection_per_route > self.max_connection_total {
            return Err(
                "GATEWAY_MAX_CONNECTION_PER_ROUTE must be <= GATEWAY_MAX_CONNECTION_TOTAL".into(),
            );
        }
        Ok(())
    }

    /// Upstream base URL without a trailing slash.
    #[must_use]
    pub fn upstream_base(&self) -> &str {
        self.proxy_to.trim_end_matches('/')
    }

    /// Socket timeout as a duration.
    #[must_use]
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Scope cache TTL as a `time` duration.
    #[must_use]
    pub fn scope_cache_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.scope_cache_ttl_secs as i64)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("{name} has an unparseable value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v == "1"
        })
        .unwrap_or(false)
}
