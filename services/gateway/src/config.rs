//! Configuration for the API Gateway

use std::{net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::routes::{BackendId, RouteTable};

/// API Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Backend service endpoints
    pub services: ServiceEndpoints,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Rate limiting configuration
    pub rate_limiting: RateLimitConfig,
    /// Route table override; the built-in table is used when empty
    pub routes: Vec<RouteConfig>,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Upper bound on handling one inbound request, in seconds
    pub timeout_seconds: u64,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable compression
    pub compression: bool,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed
    pub trusted_proxies: Vec<IpAddr>,
}

/// One backend service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base address, e.g. `http://127.0.0.1:8001`
    pub base_url: String,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    #[must_use] pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backend service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoints {
    pub user_service: BackendConfig,
    pub recipe_service: BackendConfig,
}

impl ServiceEndpoints {
    #[must_use] pub const fn get(&self, id: BackendId) -> &BackendConfig {
        match id {
            BackendId::UserService => &self.user_service,
            BackendId::RecipeService => &self.recipe_service,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT algorithm name, e.g. `HS256` or `RS256`
    pub algorithm: String,
    /// HMAC secret for `HS*`, PEM-encoded public key otherwise
    pub verification_key: String,
    /// Clock skew tolerated on `exp`, in seconds
    pub leeway_seconds: u64,
    /// Expected `iss` claim, if any
    pub issuer: Option<String>,
    /// Expected `aud` claim, if any
    pub audience: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// How often idle counters are swept, in seconds
    pub cleanup_interval_seconds: u64,
    /// Counters untouched for this long are evicted, in seconds
    pub idle_expiry_seconds: u64,
}

/// Declarative route entry, see [`crate::routes::RouteRule`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub method: String,
    /// Inbound pattern, e.g. `/users/{id:int}`
    pub path: String,
    pub backend: BackendId,
    /// Backend path template; defaults to the inbound pattern
    #[serde(default)]
    pub upstream_path: Option<String>,
    pub requests_per_window: u64,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_true")]
    pub require_auth: bool,
    #[serde(default)]
    pub forward_authorization: bool,
}

const fn default_backend_timeout_ms() -> u64 {
    5_000
}

const fn default_window_seconds() -> u64 {
    60
}

const fn default_true() -> bool {
    true
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Allow credentials
    pub allow_credentials: bool,
    /// Max age for preflight requests
    pub max_age_seconds: u64,
}

/// Monitoring and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    pub metrics_enabled: bool,
    /// Metrics endpoint path
    pub metrics_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
            compression: true,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            user_service: BackendConfig {
                base_url: "http://127.0.0.1:8001".to_string(),
                timeout_ms: default_backend_timeout_ms(),
            },
            recipe_service: BackendConfig {
                base_url: "http://127.0.0.1:8002".to_string(),
                timeout_ms: default_backend_timeout_ms(),
            },
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: "HS256".to_string(),
            verification_key: "change-me".to_string(),
            leeway_seconds: 0,
            issuer: None,
            audience: None,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval_seconds: 60,
            idle_expiry_seconds: 600,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Authorization".to_string(),
                "Content-Type".to_string(),
                "X-Request-Id".to_string(),
            ],
            // tower-http rejects credentials combined with a wildcard origin
            allow_credentials: false,
            max_age_seconds: 86400, // 24 hours
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            services: ServiceEndpoints::default(),
            auth: AuthConfig::default(),
            rate_limiting: RateLimitConfig::default(),
            routes: Vec::new(),
            cors: CorsConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file, with `GATEWAY__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> GatewayResult<Self> {
        Self::load(path, config::Environment::with_prefix("GATEWAY").separator("__"))
    }

    /// Built-in defaults, overlaid by the file, overlaid by the environment
    fn load(path: &str, environment: config::Environment) -> GatewayResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::with_name(path))
            .add_source(environment)
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Get server address
    #[must_use] pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Build the route table this configuration describes
    pub fn route_table(&self) -> GatewayResult<RouteTable> {
        if self.routes.is_empty() {
            RouteTable::standard()
        } else {
            RouteTable::from_config(&self.routes)
        }
    }

    /// Check everything that would otherwise fail at request time
    pub fn validate(&self) -> GatewayResult<()> {
        for (id, backend) in [
            (BackendId::UserService, &self.services.user_service),
            (BackendId::RecipeService, &self.services.recipe_service),
        ] {
            let url = reqwest::Url::parse(&backend.base_url).map_err(|e| {
                GatewayError::Config(format!(
                    "{} base_url '{}' is invalid: {e}",
                    id.name(),
                    backend.base_url
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(GatewayError::Config(format!(
                    "{} base_url must be http or https",
                    id.name()
                )));
            }
            if backend.timeout_ms == 0 {
                return Err(GatewayError::Config(format!(
                    "{} timeout_ms must be non-zero",
                    id.name()
                )));
            }
        }

        if self.auth.verification_key.is_empty() {
            return Err(GatewayError::Config(
                "auth.verification_key must not be empty".to_string(),
            ));
        }
        self.auth
            .algorithm
            .parse::<jsonwebtoken::Algorithm>()
            .map_err(|_| {
                GatewayError::Config(format!("unknown JWT algorithm '{}'", self.auth.algorithm))
            })?;

        let table = self.route_table()?;
        let longest_window = table
            .rules()
            .iter()
            .map(|rule| rule.limit.window)
            .max()
            .unwrap_or_default();
        if self.rate_limiting.enabled
            && Duration::from_secs(self.rate_limiting.idle_expiry_seconds) < longest_window
        {
            return Err(GatewayError::Config(
                "rate_limiting.idle_expiry_seconds must cover the longest route window".to_string(),
            ));
        }
        if self.rate_limiting.enabled && self.rate_limiting.cleanup_interval_seconds == 0 {
            return Err(GatewayError::Config(
                "rate_limiting.cleanup_interval_seconds must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
