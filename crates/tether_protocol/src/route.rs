//! Endpoint to entity routing.
//!
//! A deferred write only stores `{entity, entity_id}`, so the gateway needs a
//! documented mapping from REST paths to entity names. The table is matched by
//! longest prefix; paths with no configured prefix fall back to their first
//! segment.

use crate::error::{ProtocolError, ProtocolResult};

/// A single prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Path prefix, e.g. `/chores`.
    pub prefix: String,
    /// Entity name, e.g. `chore`.
    pub entity: String,
}

/// The entity and id an endpoint refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTarget {
    /// Entity name.
    pub entity: String,
    /// Entity id, for item endpoints.
    pub entity_id: Option<String>,
}

/// Prefix-mapping table from endpoints to entities.
///
/// | prefix            | entity          |
/// |-------------------|-----------------|
/// | `/chores`         | `chore`         |
/// | `/rewards`        | `reward`        |
/// | `/members`        | `member`        |
/// | `/events`         | `event`         |
/// | `/shopping-items` | `shopping_item` |
/// | `/notes`          | `note`          |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table (every path uses the first-segment fallback).
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Adds a prefix mapping.
    pub fn with_route(mut self, prefix: impl Into<String>, entity: impl Into<String>) -> Self {
        let prefix = normalize(&prefix.into()).to_string();
        let entity = entity.into();
        self.routes.retain(|r| r.prefix != prefix);
        self.routes.push(Route { prefix, entity });
        // Longest prefix first so `/a/b` wins over `/a`.
        self.routes
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    /// Returns the configured routes.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolves an endpoint into its entity and optional id.
    ///
    /// Query strings and trailing slashes are ignored. Only the first path
    /// segment after the prefix is taken as the id.
    pub fn resolve(&self, endpoint: &str) -> ProtocolResult<EndpointTarget> {
        let path = normalize(endpoint);
        if !path.starts_with('/') || path.len() < 2 {
            return Err(ProtocolError::InvalidEndpoint(endpoint.to_string()));
        }

        for route in &self.routes {
            if let Some(rest) = strip_segment_prefix(path, &route.prefix) {
                return Ok(EndpointTarget {
                    entity: route.entity.clone(),
                    entity_id: first_segment(rest),
                });
            }
        }

        let mut segments = path[1..].split('/').filter(|s| !s.is_empty());
        let entity = segments
            .next()
            .ok_or_else(|| ProtocolError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(EndpointTarget {
            entity: entity.to_string(),
            entity_id: segments.next().map(str::to_string),
        })
    }

    /// Returns the collection prefix of an entity.
    pub fn prefix_for(&self, entity: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.entity == entity)
            .map(|r| r.prefix.as_str())
    }

    /// Rebuilds the endpoint for an entity (and id), the reverse of [`resolve`].
    ///
    /// [`resolve`]: RouteTable::resolve
    pub fn endpoint_for(&self, entity: &str, entity_id: Option<&str>) -> String {
        let prefix = match self.prefix_for(entity) {
            Some(prefix) => prefix.to_string(),
            None => format!("/{entity}"),
        };
        match entity_id {
            Some(id) => format!("{prefix}/{id}"),
            None => prefix,
        }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
            .with_route("/chores", "chore")
            .with_route("/rewards", "reward")
            .with_route("/members", "member")
            .with_route("/events", "event")
            .with_route("/shopping-items", "shopping_item")
            .with_route("/notes", "note")
    }
}

fn normalize(endpoint: &str) -> &str {
    let path = endpoint.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn first_segment(rest: &str) -> Option<String> {
    rest.split('/')
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
