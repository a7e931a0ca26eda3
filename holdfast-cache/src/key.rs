//! User-scoped cache keys.

use crate::error::{CacheError, CacheResult};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use urlencoding::encode;

/// A cache key derived from a route, its sorted query parameters, and the
/// user the result belongs to.
///
/// Rendered as `route|k1=v1&k2=v2|u:user`, so keys for one route share a
/// prefix and no two users can ever share a key. Parameter names, values
/// and the user are percent-encoded; the route has `%` and `|` escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    route: String,
    params: BTreeMap<String, String>,
    user: String,
    rendered: String,
}

impl CacheKey {
    /// Starts building a key for `route`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(route: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            route: route.into(),
            params: BTreeMap::new(),
            user: None,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// First non-empty segment of the route, used to pick the TTL.
    pub fn resource(&self) -> &str {
        self.route
            .split('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    route: String,
    params: BTreeMap<String, String>,
    user: Option<String>,
}

impl CacheKeyBuilder {
    /// Adds a query parameter. A repeated name keeps the last value.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Fails if no (or an empty) user scope was given.
    pub fn build(self) -> CacheResult<CacheKey> {
        let user = match self.user {
            Some(user) if !user.is_empty() => user,
            _ => return Err(CacheError::MissingUserScope { route: self.route }),
        };

        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let rendered = format!("{}|{}|u:{}", escape_route(&self.route), query, encode(&user));

        Ok(CacheKey {
            route: self.route,
            params: self.params,
            user,
            rendered,
        })
    }
}

/// Keeps `/` readable so prefix and resource matching still see segments.
fn escape_route(route: &str) -> Cow<'_, str> {
    if route.contains(['%', '|']) {
        Cow::Owned(route.replace('%', "%25").replace('|', "%7C"))
    } else {
        Cow::Borrowed(route)
    }
}
