//! Route Table
//!
//! Ordered route definitions and deterministic path matching. Routes are
//! ordered once at load time by descending pattern length, so the most
//! specific prefix always wins; an exclusion lets a parent route step
//! aside for a child that owns a sub-path.

use crate::{GatewayError, GatewayResult, SubscriptionTier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use url::Url;

/// Sliding-window limit attached to a route
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub window_ms: u64,
    #[serde(rename = "max")]
    pub max_requests: u32,
}

impl RateLimit {
    pub fn new(window_ms: u64, max_requests: u32) -> GatewayResult<Self> {
        if window_ms == 0 || max_requests == 0 {
            return Err(GatewayError::Config(format!(
                "rate limit needs a positive window and maximum, got {window_ms}ms/{max_requests}"
            )));
        }
        Ok(Self { window_ms, max_requests })
    }
}

/// Services the gateway answers itself
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalService {
    Catalog,
    Payments,
    Entitlements,
}

/// Where an admitted request goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteTarget {
    Upstream(Url),
    Local(LocalService),
}

/// One `(regex, replacement)` pair of a static rewrite mapping
#[derive(Clone, Debug)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: &str, replacement: &str) -> GatewayResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| GatewayError::Config(format!("invalid rewrite pattern {pattern:?}: {e}")))?;
        Ok(Self {
            pattern,
            replacement: replacement.to_string(),
        })
    }
}

/// Named path rewrites resolved at load time
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputedRewrite {
    StripPrefix(String),
    AddPrefix(String),
    ReplacePrefix { from: String, to: String },
}

/// Path transformation applied before forwarding
#[derive(Clone, Debug, Default)]
pub enum PathRewrite {
    #[default]
    None,
    Mapping(Vec<RewriteRule>),
    Computed(ComputedRewrite),
}

impl PathRewrite {
    /// Rewrite `path`; mapping rules apply in order, each to its first match
    pub fn apply(&self, path: &str) -> String {
        let rewritten = match self {
            Self::None => path.to_string(),
            Self::Mapping(rules) => rules.iter().fold(path.to_string(), |acc, rule| {
                rule.pattern.replace(&acc, rule.replacement.as_str()).into_owned()
            }),
            Self::Computed(ComputedRewrite::StripPrefix(prefix)) => {
                path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string()
            }
            Self::Computed(ComputedRewrite::AddPrefix(prefix)) => format!("{prefix}{path}"),
            Self::Computed(ComputedRewrite::ReplacePrefix { from, to }) => {
                match path.strip_prefix(from.as_str()) {
                    Some(rest) => format!("{to}{rest}"),
                    None => path.to_string(),
                }
            }
        };

        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }
}

/// Veto that lets a more specific sibling claim a sub-path
#[derive(Clone, Debug, Default)]
pub enum PathExclusion {
    #[default]
    None,
    Prefixes(Vec<String>),
    Pattern(Regex),
}

impl PathExclusion {
    pub fn prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Prefixes(prefixes.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: &str) -> GatewayResult<Self> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| GatewayError::Config(format!("invalid exclusion pattern {pattern:?}: {e}")))
    }

    /// True when the route must not claim `path`
    pub fn vetoes(&self, path: &str) -> bool {
        match self {
            Self::None => false,
            Self::Prefixes(prefixes) => prefixes.iter().any(|p| under_prefix(path, p)),
            Self::Pattern(re) => re.is_match(path),
        }
    }
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => prefix.is_empty() || rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Validated route definition
#[derive(Clone, Debug)]
pub struct Route {
    pub url_pattern: String,
    pub requires_auth: bool,
    pub requires_credit_check: bool,
    pub rate_limit: Option<RateLimit>,
    pub required_tier: Option<SubscriptionTier>,
    pub target: RouteTarget,
    pub change_origin: bool,
    pub path_rewrite: PathRewrite,
    pub path_exclusion: PathExclusion,
}

impl Route {
    fn with_target(pattern: &str, target: RouteTarget) -> GatewayResult<Self> {
        Ok(Self {
            url_pattern: validate_pattern(pattern)?,
            requires_auth: false,
            requires_credit_check: false,
            rate_limit: None,
            required_tier: None,
            target,
            change_origin: true,
            path_rewrite: PathRewrite::None,
            path_exclusion: PathExclusion::None,
        })
    }

    /// Route forwarding to an upstream base URL
    pub fn upstream(pattern: &str, target: &str) -> GatewayResult<Self> {
        Self::with_target(pattern, RouteTarget::Upstream(parse_target(target)?))
    }

    /// Route answered by the gateway itself
    pub fn local(pattern: &str, service: LocalService) -> GatewayResult<Self> {
        Self::with_target(pattern, RouteTarget::Local(service))
    }

    pub fn with_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn with_credit_check(mut self) -> Self {
        self.requires_credit_check = true;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_required_tier(mut self, tier: SubscriptionTier) -> Self {
        self.required_tier = Some(tier);
        self
    }

    pub fn with_change_origin(mut self, change_origin: bool) -> Self {
        self.change_origin = change_origin;
        self
    }

    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.path_rewrite = rewrite;
        self
    }

    pub fn with_exclusion(mut self, exclusion: PathExclusion) -> Self {
        self.path_exclusion = exclusion;
        self
    }

    /// Whether this route claims an already normalized path
    pub fn claims(&self, path: &str) -> bool {
        prefix_matches(&self.url_pattern, path) && !self.path_exclusion.vetoes(path)
    }

    /// Path relative to the route's mount point, always rooted
    pub fn strip_mount<'a>(&self, path: &'a str) -> &'a str {
        if self.url_pattern == "/" {
            return path;
        }
        match path.strip_prefix(self.url_pattern.as_str()) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }
}

/// Segment-aware prefix test; `/` matches everything
fn prefix_matches(pattern: &str, path: &str) -> bool {
    if pattern == "/" {
        return true;
    }
    pattern == path
        || path
            .strip_prefix(pattern)
            .map_or(false, |rest| rest.starts_with('/'))
}

fn validate_pattern(pattern: &str) -> GatewayResult<String> {
    if !pattern.starts_with('/') {
        return Err(GatewayError::Config(format!(
            "route pattern {pattern:?} must start with '/'"
        )));
    }
    if pattern.contains(['?', '#', '*']) {
        return Err(GatewayError::Config(format!(
            "route pattern {pattern:?} must be a plain path prefix"
        )));
    }
    Ok(normalize_path(pattern))
}

fn parse_target(target: &str) -> GatewayResult<Url> {
    let url = Url::parse(target)
        .map_err(|e| GatewayError::Config(format!("invalid upstream target {target:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        _ => Err(GatewayError::Config(format!(
            "upstream target {target:?} must be an absolute http(s) URL"
        ))),
    }
}

/// Canonical request path used for matching and dispatch
///
/// Strips query and fragment, drops empty and `.` segments, resolves `..`
/// (never above the root) and roots the result. Dot segments count in
/// their percent-encoded forms too and backslashes separate segments, so
/// the path a route is matched on is the path the upstream receives.
pub fn normalize_path(raw: &str) -> String {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let mut segments: Vec<&str> = Vec::new();

    for segment in raw[..end].split(['/', '\\']) {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                segments.pop();
            }
            None if segment.is_empty() => {}
            None => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    match segment.to_ascii_lowercase().replace("%2e", ".").as_str() {
        "." => Some(DotSegment::Current),
        ".." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Immutable, specificity-ordered route collection
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Validate and order routes by descending pattern length
    pub fn new(mut routes: Vec<Route>) -> GatewayResult<Self> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.url_pattern.clone()) {
                return Err(GatewayError::Config(format!(
                    "duplicate route pattern {}",
                    route.url_pattern
                )));
            }
        }

        routes.sort_by(|a, b| {
            Reverse(a.url_pattern.len())
                .cmp(&Reverse(b.url_pattern.len()))
                .then_with(|| a.url_pattern.cmp(&b.url_pattern))
        });

        Ok(Self { routes })
    }

    /// Build from serialized definitions
    pub fn from_specs(specs: Vec<RouteSpec>) -> GatewayResult<Self> {
        let routes = specs
            .into_iter()
            .map(Route::try_from)
            .collect::<GatewayResult<Vec<_>>>()?;
        Self::new(routes)
    }

    /// Resolve a raw request path to exactly one route
    pub fn match_path(&self, raw_path: &str) -> GatewayResult<&Route> {
        let path = normalize_path(raw_path);
        self.routes
            .iter()
            .find(|route| route.claims(&path))
            .ok_or(GatewayError::RouteNotFound(path))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// =============================================================================
// Serialized route definitions
// =============================================================================

/// Route definition as written in a routes file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub url: String,
    #[serde(default)]
    pub auth: bool,
    #[serde(default)]
    pub credit_check: bool,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub required_tier: Option<SubscriptionTier>,
    pub proxy: ProxySpec,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub local: Option<LocalService>,
    #[serde(default = "default_change_origin")]
    pub change_origin: bool,
    #[serde(default)]
    pub path_rewrite: PathRewriteSpec,
    #[serde(default)]
    pub path_exclusion: PathExclusionSpec,
}

fn default_change_origin() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PathRewriteSpec {
    #[default]
    None,
    Mapping { rules: Vec<(String, String)> },
    StripPrefix { prefix: String },
    AddPrefix { prefix: String },
    ReplacePrefix { from: String, to: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PathExclusionSpec {
    #[default]
    None,
    Prefixes { prefixes: Vec<String> },
    Pattern { pattern: String },
}

impl TryFrom<PathRewriteSpec> for PathRewrite {
    type Error = GatewayError;

    fn try_from(spec: PathRewriteSpec) -> GatewayResult<Self> {
        Ok(match spec {
            PathRewriteSpec::None => Self::None,
            PathRewriteSpec::Mapping { rules } => Self::Mapping(
                rules
                    .iter()
                    .map(|(pattern, replacement)| RewriteRule::new(pattern, replacement))
                    .collect::<GatewayResult<Vec<_>>>()?,
            ),
            PathRewriteSpec::StripPrefix { prefix } => {
                Self::Computed(ComputedRewrite::StripPrefix(prefix))
            }
            PathRewriteSpec::AddPrefix { prefix } => Self::Computed(ComputedRewrite::AddPrefix(prefix)),
            PathRewriteSpec::ReplacePrefix { from, to } => {
                Self::Computed(ComputedRewrite::ReplacePrefix { from, to })
            }
        })
    }
}

impl TryFrom<PathExclusionSpec> for PathExclusion {
    type Error = GatewayError;

    fn try_from(spec: PathExclusionSpec) -> GatewayResult<Self> {
        match spec {
            PathExclusionSpec::None => Ok(Self::None),
            PathExclusionSpec::Prefixes { prefixes } => Ok(Self::Prefixes(prefixes)),
            PathExclusionSpec::Pattern { pattern } => Self::pattern(&pattern),
        }
    }
}

impl TryFrom<RouteSpec> for Route {
    type Error = GatewayError;

    fn try_from(spec: RouteSpec) -> GatewayResult<Self> {
        let mut route = match (spec.proxy.target.as_deref(), spec.proxy.local) {
            (Some(target), None) => Route::upstream(&spec.url, target)?,
            (None, Some(service)) => Route::local(&spec.url, service)?,
            _ => {
                return Err(GatewayError::Config(format!(
                    "route {} needs exactly one of proxy.target or proxy.local",
                    spec.url
                )))
            }
        };

        route.requires_auth = spec.auth;
        route.requires_credit_check = spec.credit_check;
        route.rate_limit = spec
            .rate_limit
            .map(|rl| RateLimit::new(rl.window_ms, rl.max_requests))
            .transpose()?;
        route.required_tier = spec.required_tier;
        route.change_origin = spec.proxy.change_origin;
        route.path_rewrite = spec.proxy.path_rewrite.try_into()?;
        route.path_exclusion = spec.proxy.path_exclusion.try_into()?;

        Ok(route)
    }
}
