// Route resolution module
// Declared route table plus the per-request cache that guarantees the
// route lookup runs at most once no matter how many consumers ask for it
//
// Numan Thabit 2025 Nov

use axum::http::Method;
use std::sync::{Arc, OnceLock};

pub const UNKNOWN: &str = "unknown";
/// Separates component from operation in a handler identifier, `UserController@show`.
pub const HANDLER_SEPARATOR: char = '@';

/// Result of matching one request against the route table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRoute {
    pub uri_pattern: String,
    pub controller: String,
    pub operation: String,
    matched: bool,
}

impl MatchedRoute {
    pub fn new(uri_pattern: impl Into<String>, handler: &str) -> Self {
        let (controller, operation) = split_handler(handler);
        Self {
            uri_pattern: uri_pattern.into(),
            controller,
            operation,
            matched: true,
        }
    }

    /// Sentinel for requests that never reached a declared route (404s,
    /// requests rejected before routing).
    pub fn unmatched() -> Self {
        Self {
            uri_pattern: UNKNOWN.to_string(),
            controller: UNKNOWN.to_string(),
            operation: UNKNOWN.to_string(),
            matched: false,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched
    }
}

/// Split `path::to::UserController@show` into (`UserController`, `show`).
/// Either side degrades to `unknown` when empty.
pub fn split_handler(handler: &str) -> (String, String) {
    let mut parts = handler.splitn(2, HANDLER_SEPARATOR);
    let owner = parts.next().unwrap_or_default();
    let component = owner
        .rsplit(|c| c == ':' || c == '\\' || c == '/')
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN);
    let operation = parts
        .next()
        .map(str::trim)
        .filter(|op| !op.is_empty())
        .unwrap_or(UNKNOWN);
    (component.to_string(), operation.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
    Wildcard,
}

#[derive(Debug, Clone)]
struct RouteDefinition {
    /// `None` accepts any method
    method: Option<Method>,
    pattern: String,
    segments: Vec<Segment>,
    handler: String,
}

impl RouteDefinition {
    fn accepts(&self, method: &Method) -> bool {
        match &self.method {
            None => true,
            Some(m) if m == method => true,
            Some(m) => *m == Method::GET && *method == Method::HEAD,
        }
    }

    fn matches_path(&self, path: &str) -> bool {
        let mut parts = path_segments(path);
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return parts.next().is_some(),
                Segment::Param => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => match parts.next() {
                    Some(part) if part == lit => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }

    /// Per-segment specificity, compared lexicographically. Literals outrank
    /// parameters, parameters outrank wildcards.
    fn rank(&self) -> Vec<u8> {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(_) => 2,
                Segment::Param => 1,
                Segment::Wildcard => 0,
            })
            .collect()
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    path_segments(pattern)
        .map(|seg| {
            if seg.starts_with('*') {
                Segment::Wildcard
            } else if seg.starts_with(':') || (seg.starts_with('{') && seg.ends_with('}')) {
                Segment::Param
            } else {
                Segment::Literal(seg.to_string())
            }
        })
        .collect()
}

/// Routes declared by the host. The most specific matching pattern wins,
/// the way axum dispatches; equally specific patterns go to the first one
/// declared. Patterns accept axum (`/users/:id`, `/files/*path`) and brace
/// (`/users/{id}`) parameter syntax.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDefinition>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: Method, pattern: &str, handler: &str) -> Self {
        self.push(Some(method), pattern, handler);
        self
    }

    pub fn any(mut self, pattern: &str, handler: &str) -> Self {
        self.push(None, pattern, handler);
        self
    }

    fn push(&mut self, method: Option<Method>, pattern: &str, handler: &str) {
        self.routes.push(RouteDefinition {
            method,
            pattern: pattern.to_string(),
            segments: parse_pattern(pattern),
            handler: handler.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_route(&self, method: &Method, path: &str) -> Option<MatchedRoute> {
        // max_by_key keeps the last maximum, so walk backwards
        self.routes
            .iter()
            .rev()
            .filter(|r| r.accepts(method) && r.matches_path(path))
            .max_by_key(|r| r.rank())
            .map(|r| MatchedRoute::new(r.pattern.clone(), &r.handler))
    }

    /// Definition declared under exactly `pattern`, as reported by the
    /// framework router.
    pub fn by_pattern(&self, method: &Method, pattern: &str) -> Option<MatchedRoute> {
        self.routes
            .iter()
            .find(|r| r.accepts(method) && r.pattern == pattern)
            .map(|r| MatchedRoute::new(r.pattern.clone(), &r.handler))
    }
}

/// What the route lookup needs to know about a request, captured at arrival.
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub method: Method,
    pub path: String,
    /// Pattern the framework router already matched, if it exposes one
    pub matched_path: Option<String>,
}

/// Request-scoped memo of the route lookup. Clones share the slot, so the
/// copy stored in request extensions and the one held by the metrics
/// ticket observe the same single computation.
#[derive(Debug, Clone, Default)]
pub struct RouteMatchCache {
    slot: Arc<OnceLock<MatchedRoute>>,
}

impl RouteMatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pattern the framework dispatched to wins over path matching;
    /// a dispatched pattern missing from the table still names the route.
    pub fn resolve(&self, ctx: &RouteContext, table: &RouteTable) -> &MatchedRoute {
        self.resolve_with(|| match ctx.matched_path.as_deref() {
            Some(pattern) => table
                .by_pattern(&ctx.method, pattern)
                .or_else(|| table.match_route(&ctx.method, &ctx.path))
                .or_else(|| Some(MatchedRoute::new(pattern, ""))),
            None => table.match_route(&ctx.method, &ctx.path),
        })
    }

    /// First caller runs `lookup`; everybody else gets the stored value.
    pub fn resolve_with<F>(&self, lookup: F) -> &MatchedRoute
    where
        F: FnOnce() -> Option<MatchedRoute>,
    {
        self.slot
            .get_or_init(|| lookup().unwrap_or_else(MatchedRoute::unmatched))
    }

    pub fn get(&self) -> Option<&MatchedRoute> {
        self.slot.get()
    }
}

/// Everything a consumer needs to resolve the current request's route.
/// Inserted into request extensions; the metrics ticket keeps a clone.
#[derive(Debug, Clone)]
pub struct RequestRoute {
    ctx: Arc<RouteContext>,
    table: Arc<RouteTable>,
    cache: RouteMatchCache,
}

impl RequestRoute {
    pub fn new(ctx: RouteContext, table: Arc<RouteTable>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            table,
            cache: RouteMatchCache::new(),
        }
    }

    pub fn resolve(&self) -> &MatchedRoute {
        self.cache.resolve(&self.ctx, &self.table)
    }

    /// Lookup result if some consumer already paid for it.
    pub fn cached(&self) -> Option<&MatchedRoute> {
        self.cache.get()
    }
}
