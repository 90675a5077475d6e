//! Response cache policy table.
//!
//! Each row maps a path glob to a TTL and a query string rule. The first
//! matching row wins. In globs `*` matches within one path segment and `**`
//! matches across segments.

use crate::error::{CdnError, Result};
use citadel_config::CachePolicySettings;
use regex::Regex;
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

/// Which query parameters take part in the CDN cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStringRule {
    IncludeAll,
    ExcludeAll,
    /// Keep only these parameters
    IncludeList(BTreeSet<String>),
    /// Keep every parameter except these
    ExcludeList(BTreeSet<String>),
}

impl QueryStringRule {
    /// Parse a rule name (`include-all`, `exclude-all`, `include-list`,
    /// `exclude-list`) with its parameter list.
    pub fn parse(rule: &str, params: &[String]) -> Result<Self> {
        let list = || params.iter().cloned().collect::<BTreeSet<_>>();
        match rule {
            "include-all" => Ok(Self::IncludeAll),
            "exclude-all" => Ok(Self::ExcludeAll),
            "include-list" => Ok(Self::IncludeList(list())),
            "exclude-list" => Ok(Self::ExcludeList(list())),
            other => Err(CdnError::Config(format!("unknown query rule {:?}", other))),
        }
    }

    pub fn keeps(&self, param: &str) -> bool {
        match self {
            Self::IncludeAll => true,
            Self::ExcludeAll => false,
            Self::IncludeList(names) => names.contains(param),
            Self::ExcludeList(names) => !names.contains(param),
        }
    }
}

/// Header value for a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// `Cache-Control: no-store`
    NoStore,
    /// `Cache-Control: private, no-cache`
    NoCache,
    /// `Cache-Control: public, max-age=N`
    Public(Duration),
}

impl CacheStrategy {
    pub fn to_header_value(&self) -> String {
        match self {
            Self::NoStore => "no-store".to_string(),
            Self::NoCache => "private, no-cache".to_string(),
            Self::Public(ttl) => format!("public, max-age={}", ttl.as_secs()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pattern: String,
    matcher: Regex,
    pub ttl: Duration,
    pub query: QueryStringRule,
}

impl CachePolicy {
    pub fn new(pattern: impl Into<String>, ttl: Duration, query: QueryStringRule) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = glob_to_regex(&pattern)?;
        Ok(Self {
            pattern,
            matcher,
            ttl,
            query,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn strategy(&self) -> CacheStrategy {
        if self.ttl.is_zero() {
            CacheStrategy::NoStore
        } else {
            CacheStrategy::Public(self.ttl)
        }
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("^");
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**") {
            expr.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            expr.push_str("[^/]*");
            rest = tail;
        } else {
            let next = rest.find('*').unwrap_or(rest.len());
            expr.push_str(&regex::escape(&rest[..next]));
            rest = &rest[next..];
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|e| CdnError::Config(format!("bad pattern {:?}: {}", pattern, e)))
}

/// Ordered list of cache policies.
#[derive(Debug, Clone, Default)]
pub struct CachePolicyTable {
    policies: Vec<CachePolicy>,
}

impl CachePolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &[CachePolicySettings]) -> Result<Self> {
        settings.iter().try_fold(Self::new(), |table, row| {
            let query = QueryStringRule::parse(&row.query, &row.query_params)?;
            Ok(table.with_policy(CachePolicy::new(
                row.pattern.clone(),
                Duration::from_secs(row.ttl_secs),
                query,
            )?))
        })
    }

    /// Append a row. Earlier rows take precedence.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// First policy whose pattern matches `path`.
    pub fn lookup(&self, path: &str) -> Option<&CachePolicy> {
        self.policies.iter().find(|policy| policy.matches(path))
    }

    /// Strategy for a path. Unmatched paths are not cached at the edge.
    pub fn strategy(&self, path: &str) -> CacheStrategy {
        self.lookup(path)
            .map(CachePolicy::strategy)
            .unwrap_or(CacheStrategy::NoCache)
    }

    /// `Cache-Control` header value for a path.
    ///
    /// ```
    /// use citadel_cdn::{CachePolicy, CachePolicyTable, QueryStringRule};
    /// use std::time::Duration;
    ///
    /// let table = CachePolicyTable::new().with_policy(
    ///     CachePolicy::new("/static/**", Duration::from_secs(3600), QueryStringRule::ExcludeAll).unwrap(),
    /// );
    /// assert_eq!(table.cache_control("/static/js/app.js"), "public, max-age=3600");
    /// assert_eq!(table.cache_control("/api/me"), "private, no-cache");
    /// ```
    pub fn cache_control(&self, path: &str) -> String {
        self.strategy(path).to_header_value()
    }

    /// Normalise a URL into its CDN cache key form.
    ///
    /// Query parameters are filtered by the matching policy's rule and sorted
    /// by name. Unmatched paths keep every parameter. The fragment is dropped.
    pub fn normalize_url(&self, raw: &str) -> Result<String> {
        let mut url = Url::parse(raw)?;
        url.set_fragment(None);

        let rule = self
            .lookup(url.path())
            .map(|policy| policy.query.clone())
            .unwrap_or(QueryStringRule::IncludeAll);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| rule.keeps(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }
}
