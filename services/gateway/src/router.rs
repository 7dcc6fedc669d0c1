//! Request routing: route table lookup and backend target resolution

use std::time::Duration;

use axum::http::Method;
use reqwest::Url;

use crate::config::ServiceEndpoints;
use crate::error::{GatewayError, GatewayResult};
use crate::routes::{BackendId, RouteMatch, RouteTable};

/// A backend the router can send requests to
#[derive(Debug, Clone)]
pub struct BackendTarget {
    pub id: BackendId,
    pub base_url: Url,
    pub timeout: Duration,
}

impl BackendTarget {
    #[must_use] pub const fn name(&self) -> &'static str {
        self.id.name()
    }
}

/// Fully resolved outbound call
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub backend: BackendTarget,
    /// Backend path after parameter substitution
    pub path: String,
    /// Absolute URL including the caller's query string
    pub url: Url,
    pub route: String,
    pub forward_authorization: bool,
}

/// Maps requests onto backends
#[derive(Debug, Clone)]
pub struct RequestRouter {
    table: RouteTable,
    user_service: BackendTarget,
    recipe_service: BackendTarget,
}

impl RequestRouter {
    pub fn new(table: RouteTable, services: &ServiceEndpoints) -> GatewayResult<Self> {
        Ok(Self {
            table,
            user_service: Self::target(BackendId::UserService, services)?,
            recipe_service: Self::target(BackendId::RecipeService, services)?,
        })
    }

    fn target(id: BackendId, services: &ServiceEndpoints) -> GatewayResult<BackendTarget> {
        let config = services.get(id);
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            GatewayError::Config(format!("{} base_url '{}' is invalid: {e}", id, config.base_url))
        })?;
        Ok(BackendTarget {
            id,
            base_url,
            timeout: config.timeout(),
        })
    }

    #[must_use] pub const fn table(&self) -> &RouteTable {
        &self.table
    }

    #[must_use] pub const fn backend(&self, id: BackendId) -> &BackendTarget {
        match id {
            BackendId::UserService => &self.user_service,
            BackendId::RecipeService => &self.recipe_service,
        }
    }

    /// Find the rule for a request, or `RouteNotFound`
    pub fn route(&self, method: &Method, path: &str) -> GatewayResult<RouteMatch<'_>> {
        self.table
            .lookup(method, path)
            .ok_or_else(|| GatewayError::RouteNotFound {
                method: method.to_string(),
                path: path.to_string(),
            })
    }

    /// Build the backend URL for a matched rule
    pub fn resolve(&self, matched: &RouteMatch<'_>, query: Option<&str>) -> GatewayResult<ResolvedTarget> {
        let backend = self.backend(matched.rule.backend).clone();
        let path = matched.rule.upstream.render(&matched.params)?;

        // Keep any path prefix on the base URL, e.g. http://host/api + /users
        let mut url = backend.base_url.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(query.filter(|q| !q.is_empty()));

        Ok(ResolvedTarget {
            backend,
            path,
            url,
            route: matched.rule.name.clone(),
            forward_authorization: matched.rule.forward_authorization,
        })
    }
}
