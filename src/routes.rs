//! Route storage: a segment trie for patterned paths and a flat map for
//! concrete ones.
//!
//! Paths are split on `/` into segments. Each segment is one of:
//!
//! | Segment | Kind | Matches |
//! |---------|------|---------|
//! | `about` | static | exactly `about` |
//! | `{k}` inside a literal | templated static | every value of `k` in the insert options |
//! | `:name` | parameter | any single segment, bound as `name` |
//! | `*` / `*name` | wildcard | the rest of the path, bound as `name` (or `*`) |
//!
//! At every node a match tries the static child first, then templated
//! static children, then the parameter child, then the wildcard.
//!
//! ```text
//! add("/:locale/about/", A, options{locale: [de, fr]})
//! match("/de/about/")  → A, {locale: de}
//! match("/it/about/")  → none (it not in options)
//! ```
//!
//! [`Routes`] exposes the same surface over both stores; the flat store is
//! faster to build and to look up once every path is concrete.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

const PREFIX_PARAMETER: char = ':';
const PREFIX_WILDCARD: char = '*';
const SHARD_KEY_DEFAULT: &str = "_default";

/// Values substituted into `{key}` templates at insertion.
pub type RouteOptions = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug, PartialEq)]
pub enum RouteError {
    #[error("Path already exists: {path} ({existing} != {value})")]
    PathConflict {
        path: String,
        value: String,
        existing: String,
    },
    #[error("Path param differs from existing param: {path} ({new_param} vs {existing_param})")]
    PathParamNameConflict {
        path: String,
        new_param: String,
        existing_param: String,
    },
    #[error("Missing a templated option in path: {0}")]
    MissingOption(String),
    #[error("Invalid shard: {0}")]
    InvalidShard(String),
    #[error("Sharding cannot be done on a routing trie")]
    ShardUnsupported,
}

/// A matched route and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<V> {
    pub path: String,
    pub value: V,
    pub params: HashMap<String, String>,
}

/// One stored route: `(path, value, options)`.
pub type RouteNode<V> = (String, V, Option<RouteOptions>);

// =============================================================================
// Routes
// =============================================================================

/// Route container over either store.
#[derive(Debug, Clone)]
pub enum Routes<V> {
    Trie(RouteTrie<V>),
    Simple(RoutesDict<V>),
}

impl<V: Clone + PartialEq + fmt::Display> Default for Routes<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + PartialEq + fmt::Display> Routes<V> {
    pub fn new() -> Self {
        Routes::Trie(RouteTrie::default())
    }

    pub fn simple() -> Self {
        Routes::Simple(RoutesDict::default())
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, Routes::Simple(_))
    }

    /// Insert a route. Empty paths are ignored.
    pub fn add(&mut self, path: &str, value: V, options: Option<RouteOptions>) -> Result<(), RouteError> {
        if path.is_empty() {
            return Ok(());
        }
        match self {
            Routes::Trie(trie) => trie.add(path, value, options),
            Routes::Simple(dict) => dict.add(path, value),
        }
    }

    pub fn matches(&self, path: &str) -> Option<MatchResult<V>> {
        match self {
            Routes::Trie(trie) => trie.matches(path),
            Routes::Simple(dict) => dict.matches(path),
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<MatchResult<V>> {
        match self {
            Routes::Trie(trie) => trie.remove(path),
            Routes::Simple(dict) => dict.remove(path),
        }
    }

    /// Remove every route for which `keep` is false; returns the count removed.
    pub fn filter(&mut self, keep: impl Fn(&str, &V) -> bool) -> usize {
        match self {
            Routes::Trie(trie) => trie.filter(&keep),
            Routes::Simple(dict) => dict.filter(&keep),
        }
    }

    /// Every route in deterministic path order.
    pub fn nodes(&self) -> Vec<RouteNode<V>> {
        match self {
            Routes::Trie(trie) => trie.nodes(),
            Routes::Simple(dict) => dict.nodes(),
        }
    }

    /// Every path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.nodes().into_iter().map(|(p, _, _)| p).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        match self {
            Routes::Trie(trie) => trie.len(),
            Routes::Simple(dict) => dict.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        *self = match self {
            Routes::Trie(_) => Routes::new(),
            Routes::Simple(_) => Routes::simple(),
        };
    }

    /// Merge `other` into this container.
    pub fn update(&mut self, other: &Routes<V>) -> Result<(), RouteError> {
        for (path, value, options) in other.nodes() {
            self.add(&path, value, options)?;
        }
        Ok(())
    }

    /// Keep only the routes belonging to shard `current` (1-based) of
    /// `count`, distributing evenly per `key`. Only the flat store shards.
    pub fn shard(
        &mut self,
        count: usize,
        current: usize,
        key: impl Fn(&V) -> String,
    ) -> Result<(), RouteError> {
        if count <= 1 {
            return Err(RouteError::InvalidShard("Shard count needs to be greater than 1".into()));
        }
        if count >= 50 {
            return Err(RouteError::InvalidShard("Shard count needs to be less than 50".into()));
        }
        if count < current {
            return Err(RouteError::InvalidShard(
                "Shard count needs to be larger than the current shard".into(),
            ));
        }
        if current < 1 {
            return Err(RouteError::InvalidShard("Current shard needs to be at least 1".into()));
        }
        match self {
            Routes::Trie(_) => Err(RouteError::ShardUnsupported),
            Routes::Simple(dict) => {
                dict.shard(count, current, key);
                Ok(())
            }
        }
    }

    /// Copy every route into a flat store.
    pub fn to_simple(&self) -> Result<Routes<V>, RouteError> {
        let mut simple = Routes::simple();
        simple.update(self)?;
        Ok(simple)
    }
}

impl<V: Clone + PartialEq + fmt::Display> std::ops::Add for &Routes<V> {
    type Output = Result<Routes<V>, RouteError>;

    fn add(self, other: &Routes<V>) -> Self::Output {
        let mut routes = match self {
            Routes::Trie(_) => Routes::new(),
            Routes::Simple(_) => Routes::simple(),
        };
        routes.update(self)?;
        routes.update(other)?;
        Ok(routes)
    }
}

// =============================================================================
// Flat store
// =============================================================================

/// Concrete path → value map.
#[derive(Debug, Clone)]
pub struct RoutesDict<V> {
    map: BTreeMap<String, V>,
}

impl<V> Default for RoutesDict<V> {
    fn default() -> Self {
        Self { map: BTreeMap::new() }
    }
}

impl<V: Clone + PartialEq + fmt::Display> RoutesDict<V> {
    pub fn add(&mut self, path: &str, value: V) -> Result<(), RouteError> {
        if let Some(existing) = self.map.get(path)
            && *existing != value
        {
            return Err(RouteError::PathConflict {
                path: path.to_string(),
                value: value.to_string(),
                existing: existing.to_string(),
            });
        }
        self.map.insert(path.to_string(), value);
        Ok(())
    }

    pub fn matches(&self, path: &str) -> Option<MatchResult<V>> {
        self.map.get(path).map(|value| MatchResult {
            path: path.to_string(),
            value: value.clone(),
            params: HashMap::new(),
        })
    }

    pub fn remove(&mut self, path: &str) -> Option<MatchResult<V>> {
        self.map.remove(path).map(|value| MatchResult {
            path: path.to_string(),
            value,
            params: HashMap::new(),
        })
    }

    pub fn filter(&mut self, keep: &dyn Fn(&str, &V) -> bool) -> usize {
        let before = self.map.len();
        self.map.retain(|path, value| keep(path, value));
        before - self.map.len()
    }

    pub fn nodes(&self) -> Vec<RouteNode<V>> {
        self.map
            .iter()
            .map(|(path, value)| (path.clone(), value.clone(), None))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn shard(&mut self, count: usize, current: usize, key: impl Fn(&V) -> String) {
        let index = current - 1;
        let mut counters: HashMap<String, usize> = HashMap::new();
        let mut remove = Vec::new();
        for (path, value) in &self.map {
            let counter_key = key(value);
            let counter_key = if counter_key.is_empty() {
                SHARD_KEY_DEFAULT.to_string()
            } else {
                counter_key
            };
            let seen = counters.entry(counter_key).or_insert(0);
            if *seen % count != index {
                remove.push(path.clone());
            }
            *seen += 1;
        }
        for path in remove {
            self.map.remove(&path);
        }
    }
}

// =============================================================================
// Trie
// =============================================================================

#[derive(Debug, Clone)]
struct Entry<V> {
    path: String,
    value: V,
    options: Option<RouteOptions>,
    /// Concrete (cleaned) paths the entry's template expands to.
    concrete: BTreeSet<String>,
}

impl<V> Entry<V> {
    fn is_templated(&self) -> bool {
        !self.concrete.contains(clean_path(&self.path))
    }
}

#[derive(Debug, Clone)]
struct Node<V> {
    entry: Option<Entry<V>>,
    param_name: Option<String>,
    param_options: Option<BTreeSet<String>>,
    wildcard: bool,
    static_children: BTreeMap<String, Node<V>>,
    param_child: Option<Box<Node<V>>>,
    wildcard_child: Option<Box<Node<V>>>,
}

impl<V> Node<V> {
    fn new(param_name: Option<String>, wildcard: bool) -> Self {
        Self {
            entry: None,
            param_name,
            param_options: None,
            wildcard,
            static_children: BTreeMap::new(),
            param_child: None,
            wildcard_child: None,
        }
    }
}

/// Segment trie supporting parameters, wildcards and templated literals.
#[derive(Debug, Clone)]
pub struct RouteTrie<V> {
    root: Node<V>,
}

impl<V> Default for RouteTrie<V> {
    fn default() -> Self {
        Self {
            root: Node::new(None, false),
        }
    }
}

/// Strip one leading and one trailing `/`.
pub fn clean_path(path: &str) -> &str {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.strip_suffix('/').unwrap_or(path)
}

fn segments(path: &str) -> Vec<&str> {
    clean_path(path).split('/').collect()
}

/// Every concrete path a templated `path` expands to under `options`.
fn dynamic_paths(path: &str, options: Option<&RouteOptions>) -> Result<BTreeSet<String>, RouteError> {
    let cleaned = clean_path(path).to_string();
    let mut possible = BTreeSet::from([cleaned.clone()]);
    let Some(options) = options else {
        return Ok(possible);
    };
    if !cleaned.contains('{') {
        return Ok(possible);
    }
    for (key, values) in options {
        let placeholder = format!("{{{key}}}");
        let mut expanded = Vec::new();
        for value in values {
            for candidate in &possible {
                expanded.push(candidate.replace(&placeholder, value));
            }
        }
        possible.extend(expanded);
    }
    let concrete: BTreeSet<String> = possible.into_iter().filter(|p| !p.contains('{')).collect();
    if concrete.is_empty() {
        return Err(RouteError::MissingOption(cleaned));
    }
    Ok(concrete)
}

impl<V: Clone + PartialEq + fmt::Display> RouteTrie<V> {
    pub fn add(&mut self, path: &str, value: V, options: Option<RouteOptions>) -> Result<(), RouteError> {
        let segs = segments(path);
        add_node(&mut self.root, &segs, path, value, options)
    }

    pub fn matches(&self, path: &str) -> Option<MatchResult<V>> {
        let segs = segments(path);
        match_node(&self.root, &segs, None, clean_path(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<MatchResult<V>> {
        let segs = segments(path);
        remove_node(&mut self.root, &segs)
    }

    pub fn filter(&mut self, keep: &dyn Fn(&str, &V) -> bool) -> usize {
        filter_node(&mut self.root, keep)
    }

    pub fn nodes(&self) -> Vec<RouteNode<V>> {
        let mut out = Vec::new();
        collect_nodes(&self.root, &mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }
}

fn add_node<V: Clone + PartialEq + fmt::Display>(
    node: &mut Node<V>,
    segs: &[&str],
    path: &str,
    value: V,
    options: Option<RouteOptions>,
) -> Result<(), RouteError> {
    let Some((segment, rest)) = segs.split_first() else {
        if let Some(existing) = &node.entry
            && existing.value != value
        {
            return Err(RouteError::PathConflict {
                path: path.to_string(),
                value: value.to_string(),
                existing: existing.value.to_string(),
            });
        }
        let concrete = dynamic_paths(path, options.as_ref())?;
        node.entry = Some(Entry {
            path: path.to_string(),
            value,
            options,
            concrete,
        });
        return Ok(());
    };

    if let Some(name) = segment.strip_prefix(PREFIX_PARAMETER) {
        let param_options = options.as_ref().and_then(|o| o.get(name)).cloned();
        let child = node
            .param_child
            .get_or_insert_with(|| Box::new(Node::new(Some(name.to_string()), false)));
        if child.param_name.as_deref() != Some(name) {
            return Err(RouteError::PathParamNameConflict {
                path: path.to_string(),
                new_param: name.to_string(),
                existing_param: child.param_name.clone().unwrap_or_default(),
            });
        }
        if let Some(values) = param_options {
            child
                .param_options
                .get_or_insert_with(BTreeSet::new)
                .extend(values);
        }
        return add_node(child, rest, path, value, options);
    }

    if let Some(name) = segment.strip_prefix(PREFIX_WILDCARD) {
        if let Some(existing) = node.wildcard_child.as_ref().and_then(|c| c.entry.as_ref())
            && existing.value != value
        {
            return Err(RouteError::PathConflict {
                path: path.to_string(),
                value: value.to_string(),
                existing: existing.value.to_string(),
            });
        }
        let name = if name.is_empty() { "*" } else { name };
        let mut child = Node::new(Some(name.to_string()), true);
        add_node(&mut child, &[], path, value, options)?;
        node.wildcard_child = Some(Box::new(child));
        return Ok(());
    }

    let child = node
        .static_children
        .entry(segment.to_string())
        .or_insert_with(|| Node::new(None, false));
    add_node(child, rest, path, value, options)
}

fn bind<V>(node: &Node<V>, mut matched: MatchResult<V>, last: Option<&str>) -> MatchResult<V> {
    if let (Some(name), Some(last)) = (&node.param_name, last) {
        matched.params.insert(name.clone(), last.to_string());
    }
    matched
}

fn has_templated_entry<V>(node: &Node<V>) -> bool {
    node.entry.as_ref().is_some_and(Entry::is_templated)
        || node.static_children.values().any(has_templated_entry)
}

fn match_node<V: Clone>(
    node: &Node<V>,
    segs: &[&str],
    last: Option<&str>,
    full: &str,
) -> Option<MatchResult<V>> {
    if let (Some(last), Some(allowed)) = (last, &node.param_options)
        && !allowed.contains(last)
    {
        return None;
    }

    if node.wildcard {
        let entry = node.entry.as_ref()?;
        let mut rest: Vec<&str> = last.into_iter().collect();
        rest.extend_from_slice(segs);
        let matched = MatchResult {
            path: entry.path.clone(),
            value: entry.value.clone(),
            params: HashMap::new(),
        };
        return Some(bind(node, matched, Some(&rest.join("/"))));
    }

    let Some((segment, rest)) = segs.split_first() else {
        let entry = node.entry.as_ref()?;
        if entry.is_templated() && !entry.concrete.contains(full) {
            return None;
        }
        let matched = MatchResult {
            path: entry.path.clone(),
            value: entry.value.clone(),
            params: HashMap::new(),
        };
        return Some(bind(node, matched, last));
    };

    if let Some(child) = node.static_children.get(*segment) {
        if let Some(matched) = match_node(child, rest, Some(segment), full) {
            return Some(bind(node, matched, last));
        }
    } else {
        for (key, child) in &node.static_children {
            if key.contains('{')
                && has_templated_entry(child)
                && let Some(matched) = match_node(child, rest, Some(segment), full)
            {
                return Some(bind(node, matched, last));
            }
        }
    }

    if let Some(child) = &node.param_child
        && let Some(matched) = match_node(child, rest, Some(segment), full)
    {
        return Some(bind(node, matched, last));
    }

    if let Some(child) = &node.wildcard_child {
        return match_node(child, rest, Some(segment), full).map(|m| bind(node, m, last));
    }

    None
}

fn remove_node<V>(node: &mut Node<V>, segs: &[&str]) -> Option<MatchResult<V>> {
    if node.wildcard {
        return take_entry(node);
    }
    let Some((segment, rest)) = segs.split_first() else {
        return take_entry(node);
    };
    if let Some(child) = node.static_children.get_mut(*segment) {
        return remove_node(child, rest);
    }
    if segment.starts_with(PREFIX_PARAMETER)
        && let Some(child) = node.param_child.as_mut()
    {
        return remove_node(child, rest);
    }
    if segment.starts_with(PREFIX_WILDCARD)
        && let Some(child) = node.wildcard_child.as_mut()
    {
        return remove_node(child, rest);
    }
    None
}

fn take_entry<V>(node: &mut Node<V>) -> Option<MatchResult<V>> {
    node.entry.take().map(|entry| MatchResult {
        path: entry.path,
        value: entry.value,
        params: HashMap::new(),
    })
}

fn filter_node<V>(node: &mut Node<V>, keep: &dyn Fn(&str, &V) -> bool) -> usize {
    let mut removed = 0;
    if let Some(entry) = &node.entry
        && !keep(&entry.path, &entry.value)
    {
        node.entry = None;
        removed += 1;
    }
    for child in node.static_children.values_mut() {
        removed += filter_node(child, keep);
    }
    if let Some(child) = node.wildcard_child.as_mut() {
        removed += filter_node(child, keep);
    }
    if let Some(child) = node.param_child.as_mut() {
        removed += filter_node(child, keep);
    }
    removed
}

fn collect_nodes<V: Clone>(node: &Node<V>, out: &mut Vec<RouteNode<V>>) {
    if let Some(entry) = &node.entry {
        out.push((entry.path.clone(), entry.value.clone(), entry.options.clone()));
    }
    for child in node.static_children.values() {
        collect_nodes(child, out);
    }
    if let Some(child) = &node.wildcard_child {
        collect_nodes(child, out);
    }
    if let Some(child) = &node.param_child {
        collect_nodes(child, out);
    }
}
