//! Operation filters
//!
//! A filter set is a list of include/exclude filters combined with logical
//! AND: an operation is selected only when no applicable filter excludes it.

use std::ops::BitAnd;

use super::Operation;

/// The result of a single filter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Included,
    Excluded,
}

impl FilterResult {
    #[must_use]
    pub const fn is_included(self) -> bool {
        matches!(self, Self::Included)
    }

    #[must_use]
    pub const fn is_excluded(self) -> bool {
        matches!(self, Self::Excluded)
    }
}

impl BitAnd for FilterResult {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        if self.is_excluded() || rhs.is_excluded() {
            Self::Excluded
        } else {
            Self::Included
        }
    }
}

/// What a filter looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Exact label: `"GET /users/{id}"`
    Operation(String),
    /// HTTP method, case-insensitive
    Method(String),
    PathPrefix(String),
    Tag(String),
    /// Any of the inner matchers
    AnyOf(Vec<Matcher>),
}

impl Matcher {
    /// Parse `"method:POST"`, `"path:/admin"`, `"tag:billing"` or an
    /// operation label such as `"GET /users"`.
    ///
    /// # Errors
    ///
    /// Returns a message for unknown prefixes and empty values.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let matcher = if let Some(method) = raw.strip_prefix("method:") {
            Self::Method(method.trim().to_ascii_uppercase())
        } else if let Some(prefix) = raw.strip_prefix("path:") {
            Self::PathPrefix(prefix.trim().to_string())
        } else if let Some(tag) = raw.strip_prefix("tag:") {
            Self::Tag(tag.trim().to_string())
        } else if let Some((method, path)) = raw.split_once(' ') {
            Self::Operation(format!("{} {}", method.to_ascii_uppercase(), path.trim()))
        } else {
            return Err(format!(
                "invalid filter `{raw}`: expected `METHOD /path`, `method:`, `path:` or `tag:`"
            ));
        };
        match &matcher {
            Self::Method(v) | Self::PathPrefix(v) | Self::Tag(v) if v.is_empty() => {
                Err(format!("invalid filter `{raw}`: empty value"))
            }
            _ => Ok(matcher),
        }
    }

    #[must_use]
    pub fn matches(&self, operation: &Operation) -> bool {
        match self {
            Self::Operation(label) => operation.label() == *label,
            Self::Method(method) => operation.method.eq_ignore_ascii_case(method),
            Self::PathPrefix(prefix) => operation.path.starts_with(prefix.as_str()),
            Self::Tag(tag) => operation.tags.iter().any(|t| t == tag),
            Self::AnyOf(matchers) => matchers.iter().any(|m| m.matches(operation)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    Include,
    Exclude,
}

/// One include or exclude rule, optionally limited to a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub kind: FilterKind,
    pub matcher: Matcher,
    /// `None` is the default scope, applied when operations are selected.
    pub scope: Option<String>,
}

impl Filter {
    #[must_use]
    pub fn include(matcher: Matcher) -> Self {
        Self {
            kind: FilterKind::Include,
            matcher,
            scope: None,
        }
    }

    #[must_use]
    pub fn exclude(matcher: Matcher) -> Self {
        Self {
            kind: FilterKind::Exclude,
            matcher,
            scope: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn apply(&self, operation: &Operation) -> FilterResult {
        let matched = self.matcher.matches(operation);
        match (&self.kind, matched) {
            (FilterKind::Include, true) | (FilterKind::Exclude, false) => FilterResult::Included,
            (FilterKind::Include, false) | (FilterKind::Exclude, true) => FilterResult::Excluded,
        }
    }
}

/// Decide whether `operation` passes the filters of the given scope.
///
/// Stops at the first exclusion. No applicable filters means included.
#[must_use]
pub fn evaluate_filters(filters: &[Filter], operation: &Operation, scope: Option<&str>) -> FilterResult {
    let excluded = filters
        .iter()
        .filter(|f| f.scope.as_deref() == scope)
        .any(|f| f.apply(operation).is_excluded());
    if excluded {
        FilterResult::Excluded
    } else {
        FilterResult::Included
    }
}

/// Ordered collection of filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config lists. Each include list entry widens the selection
    /// (they are OR-ed into a single include filter); each exclude entry is
    /// its own filter.
    ///
    /// # Errors
    ///
    /// Returns the first entry that does not parse.
    pub fn from_patterns(include: &[String], exclude: &[String]) -> Result<Self, String> {
        let mut set = Self::new();
        if !include.is_empty() {
            let matchers = include
                .iter()
                .map(|raw| Matcher::parse(raw))
                .collect::<Result<Vec<_>, _>>()?;
            set.add(Filter::include(Matcher::AnyOf(matchers)));
        }
        for raw in exclude {
            set.add(Filter::exclude(Matcher::parse(raw)?));
        }
        Ok(set)
    }

    pub fn add(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Evaluate the default scope.
    #[must_use]
    pub fn apply_to(&self, operation: &Operation) -> FilterResult {
        evaluate_filters(&self.filters, operation, None)
    }

    #[must_use]
    pub fn apply_in_scope(&self, operation: &Operation, scope: &str) -> FilterResult {
        evaluate_filters(&self.filters, operation, Some(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(method: &str, path: &str, tags: &[&str]) -> Operation {
        Operation {
            method: method.into(),
            path: path.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Operation::default()
        }
    }

    #[test]
    fn and_semantics() {
        use FilterResult::{Excluded, Included};
        assert_eq!(Included & Included, Included);
        assert_eq!(Included & Excluded, Excluded);
        assert_eq!(Excluded & Included, Excluded);
        assert_eq!(Excluded & Excluded, Excluded);
    }

    #[test]
    fn parse_matchers() {
        assert_eq!(Matcher::parse("method:post").unwrap(), Matcher::Method("POST".into()));
        assert_eq!(Matcher::parse("path:/admin").unwrap(), Matcher::PathPrefix("/admin".into()));
        assert_eq!(Matcher::parse("tag:billing").unwrap(), Matcher::Tag("billing".into()));
        assert_eq!(
            Matcher::parse("get /users").unwrap(),
            Matcher::Operation("GET /users".into())
        );
        assert!(Matcher::parse("nonsense").is_err());
        assert!(Matcher::parse("tag:").is_err());
    }

    #[test]
    fn empty_filters_include_everything() {
        let set = FilterSet::new();
        assert!(set.apply_to(&op("GET", "/x", &[])).is_included());
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let set = FilterSet::from_patterns(
            &["tag:pets".into()],
            &["method:DELETE".into()],
        )
        .unwrap();
        assert!(set.apply_to(&op("GET", "/pets", &["pets"])).is_included());
        assert!(set.apply_to(&op("DELETE", "/pets/{id}", &["pets"])).is_excluded());
        assert!(set.apply_to(&op("GET", "/users", &["users"])).is_excluded());
    }

    #[test]
    fn include_list_is_a_union() {
        let set = FilterSet::from_patterns(&["GET /a".into(), "path:/b".into()], &[]).unwrap();
        assert!(set.apply_to(&op("GET", "/a", &[])).is_included());
        assert!(set.apply_to(&op("POST", "/b/c", &[])).is_included());
        assert!(set.apply_to(&op("POST", "/a", &[])).is_excluded());
    }

    #[test]
    fn scopes_are_isolated() {
        let mut set = FilterSet::new();
        set.add(Filter::exclude(Matcher::Method("POST".into())).with_scope("stateful"));
        let post = op("POST", "/a", &[]);
        assert!(set.apply_to(&post).is_included());
        assert!(set.apply_in_scope(&post, "stateful").is_excluded());
    }
}
