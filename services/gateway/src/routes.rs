//! Static route table
//!
//! Maps `(method, path pattern)` to a backend, a backend path template and a
//! rate-limit descriptor. Built once at startup; the table is read-only for
//! the lifetime of the process and guarantees that any inbound request
//! matches at most one rule.

use std::fmt;
use std::time::Duration;

use axum::http::Method;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::RouteConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::models::RouteInfo;

/// Path parameters captured by a pattern, keyed by parameter name
pub type PathParams = FxHashMap<String, String>;

/// Backend services reachable through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    UserService,
    RecipeService,
}

impl BackendId {
    #[must_use] pub const fn name(self) -> &'static str {
        match self {
            Self::UserService => "user-service",
            Self::RecipeService => "recipe-service",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-window quota attached to a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDescriptor {
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitDescriptor {
    #[must_use] pub const fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    #[must_use] pub const fn per_minute(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

impl fmt::Display for RateLimitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window.as_secs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `{name:int}`: one or more ASCII digits
    Int,
    /// `{name}`: any non-empty segment
    Any,
}

impl ParamKind {
    fn accepts(self, segment: &str) -> bool {
        match self {
            Self::Int => !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()),
            Self::Any => !segment.is_empty() && !is_dot_segment(segment) && !segment.contains('\\'),
        }
    }
}

/// `.` and `..` in any spelling the URL parser normalises away
fn is_dot_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        "." | ".." | "%2e" | ".%2e" | "%2e." | "%2e%2e"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, kind: ParamKind },
}

/// Path pattern such as `/users/{id:int}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(GatewayError::Config(format!(
                "route pattern '{raw}' must start with '/'"
            )));
        };

        let mut segments = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                segments.push(Self::parse_segment(raw, part)?);
            }
        }

        let mut seen = Vec::new();
        for segment in &segments {
            if let Segment::Param { name, .. } = segment {
                if seen.contains(&name) {
                    return Err(GatewayError::Config(format!(
                        "route pattern '{raw}' repeats parameter '{name}'"
                    )));
                }
                seen.push(name);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    fn parse_segment(raw: &str, part: &str) -> GatewayResult<Segment> {
        if part.is_empty() {
            return Err(GatewayError::Config(format!(
                "route pattern '{raw}' has an empty segment"
            )));
        }

        let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) else {
            if part.contains(['{', '}']) {
                return Err(GatewayError::Config(format!(
                    "route pattern '{raw}' has a malformed parameter '{part}'"
                )));
            }
            return Ok(Segment::Literal(part.to_string()));
        };

        let (name, kind) = match inner.split_once(':') {
            None => (inner, ParamKind::Any),
            Some((name, "int")) => (name, ParamKind::Int),
            Some((_, other)) => {
                return Err(GatewayError::Config(format!(
                    "route pattern '{raw}' uses unknown parameter type '{other}'"
                )));
            }
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(GatewayError::Config(format!(
                "route pattern '{raw}' has an invalid parameter name '{name}'"
            )));
        }

        Ok(Segment::Param {
            name: name.to_string(),
            kind,
        })
    }

    #[must_use] pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match a concrete request path, capturing parameters
    #[must_use] pub fn matches(&self, path: &str) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        // "/users/" is treated as "/users"
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = PathParams::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param { name, kind } => {
                    if !kind.accepts(part) {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    /// Substitute captured parameters into this pattern
    pub fn render(&self, params: &PathParams) -> GatewayResult<String> {
        if self.segments.is_empty() {
            return Ok("/".to_string());
        }

        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Param { name, .. } => {
                    let value = params.get(name).ok_or_else(|| {
                        GatewayError::Internal(format!("path parameter '{name}' was not captured"))
                    })?;
                    path.push_str(value);
                }
            }
        }
        Ok(path)
    }

    /// Whether some concrete path could match both patterns
    #[must_use] pub fn overlaps(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Literal(lit), Segment::Param { kind, .. })
                    | (Segment::Param { kind, .. }, Segment::Literal(lit)) => kind.accepts(lit),
                    (Segment::Param { .. }, Segment::Param { .. }) => true,
                })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One entry of the route table
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// Stable identifier, also the rate-limit key component
    pub name: String,
    pub method: Method,
    pub pattern: PathPattern,
    pub backend: BackendId,
    /// Backend path template, filled with the captured parameters
    pub upstream: PathPattern,
    pub limit: RateLimitDescriptor,
    /// Unauthenticated rules are keyed by remote address instead of subject
    pub require_auth: bool,
    /// Pass the caller's `Authorization` header on to the backend
    pub forward_authorization: bool,
}

impl RouteRule {
    /// Rule with the same path upstream, authentication required
    pub fn new(
        name: &str,
        method: Method,
        pattern: &str,
        backend: BackendId,
        limit: RateLimitDescriptor,
    ) -> GatewayResult<Self> {
        let pattern = PathPattern::parse(pattern)?;
        Ok(Self {
            name: name.to_string(),
            method,
            upstream: pattern.clone(),
            pattern,
            backend,
            limit,
            require_auth: true,
            forward_authorization: false,
        })
    }

    pub fn with_upstream(mut self, upstream: &str) -> GatewayResult<Self> {
        self.upstream = PathPattern::parse(upstream)?;
        Ok(self)
    }

    #[must_use] pub const fn forward_authorization(mut self, forward: bool) -> Self {
        self.forward_authorization = forward;
        self
    }

    #[must_use] pub const fn require_auth(mut self, required: bool) -> Self {
        self.require_auth = required;
        self
    }

    fn from_config(config: &RouteConfig) -> GatewayResult<Self> {
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| {
                GatewayError::Config(format!(
                    "route '{}' has invalid method '{}'",
                    config.name, config.method
                ))
            })?;
        let limit = RateLimitDescriptor::new(
            config.requests_per_window,
            Duration::from_secs(config.window_seconds),
        );

        let rule = Self::new(&config.name, method, &config.path, config.backend, limit)?
            .require_auth(config.require_auth)
            .forward_authorization(config.forward_authorization);
        match &config.upstream_path {
            Some(upstream) => rule.with_upstream(upstream),
            None => Ok(rule),
        }
    }

    fn validate(&self) -> GatewayResult<()> {
        if self.limit.max_requests == 0 || self.limit.window.is_zero() {
            return Err(GatewayError::Config(format!(
                "route '{}' needs a non-zero quota and window",
                self.name
            )));
        }
        let captured: Vec<&str> = self.pattern.param_names().collect();
        if let Some(missing) = self.upstream.param_names().find(|n| !captured.contains(n)) {
            return Err(GatewayError::Config(format!(
                "route '{}' upstream uses parameter '{missing}' the inbound pattern does not capture",
                self.name
            )));
        }
        Ok(())
    }

    #[must_use] pub fn info(&self) -> RouteInfo {
        RouteInfo {
            name: self.name.clone(),
            method: self.method.to_string(),
            path: self.pattern.to_string(),
            backend: self.backend.to_string(),
            requires_auth: self.require_auth,
            rate_limit: self.limit.to_string(),
        }
    }
}

/// A rule matched against a concrete request
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub rule: &'a RouteRule,
    pub params: PathParams,
}

/// Immutable set of non-overlapping route rules
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate names and overlapping rules
    pub fn new(rules: Vec<RouteRule>) -> GatewayResult<Self> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            for other in &rules[..i] {
                if other.name == rule.name {
                    return Err(GatewayError::Config(format!(
                        "route name '{}' is used twice",
                        rule.name
                    )));
                }
                if other.method == rule.method && other.pattern.overlaps(&rule.pattern) {
                    return Err(GatewayError::Config(format!(
                        "routes '{}' ({} {}) and '{}' ({} {}) overlap",
                        other.name,
                        other.method,
                        other.pattern,
                        rule.name,
                        rule.method,
                        rule.pattern
                    )));
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn from_config(routes: &[RouteConfig]) -> GatewayResult<Self> {
        let rules = routes
            .iter()
            .map(RouteRule::from_config)
            .collect::<GatewayResult<Vec<_>>>()?;
        Self::new(rules)
    }

    /// The user/recipe route table the gateway ships with
    pub fn standard() -> GatewayResult<Self> {
        Self::new(vec![
            RouteRule::new(
                "list_users",
                Method::GET,
                "/users",
                BackendId::UserService,
                RateLimitDescriptor::per_minute(10),
            )?,
            RouteRule::new(
                "get_user",
                Method::GET,
                "/users/{id:int}",
                BackendId::UserService,
                RateLimitDescriptor::per_minute(5),
            )?
            .with_upstream("/users/{id}")?
            .forward_authorization(true),
            RouteRule::new(
                "register_user",
                Method::POST,
                "/users/register",
                BackendId::UserService,
                RateLimitDescriptor::per_minute(5),
            )?
            .with_upstream("/register")?,
            RouteRule::new(
                "create_recipe",
                Method::POST,
                "/recipes",
                BackendId::RecipeService,
                RateLimitDescriptor::per_minute(10),
            )?,
        ])
    }

    #[must_use] pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Find the unique rule for a request
    #[must_use] pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.rules
            .iter()
            .filter(|rule| rule.method == *method)
            .find_map(|rule| {
                rule.pattern
                    .matches(path)
                    .map(|params| RouteMatch { rule, params })
            })
    }

    #[must_use] pub fn catalog(&self) -> Vec<RouteInfo> {
        self.rules.iter().map(RouteRule::info).collect()
    }
}
