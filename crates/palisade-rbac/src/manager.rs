//! Role manager: domain-scoped role graphs and membership queries.

use std::collections::{BTreeSet, HashMap};

use crate::graph::RoleGraph;

/// Default bound on the number of edges followed when resolving membership.
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 100;

/// Resolves transitive role membership for one grouping relation.
///
/// Links without a domain live in a default graph; each domain has its own
/// graph, so a link in one domain never grants anything in another.
///
/// # Examples
///
/// ```
/// use palisade_rbac::RoleManager;
///
/// let mut rm = RoleManager::new();
/// rm.add_link("alice", "role:ops", None);
/// rm.add_link("role:ops", "role:staff", None);
///
/// assert!(rm.has_link("alice", "role:staff", None));
/// assert!(rm.has_link("bob", "bob", None)); // reflexive
/// assert!(!rm.has_link("role:staff", "alice", None));
/// ```
#[derive(Debug, Clone)]
pub struct RoleManager {
    max_depth: usize,
    global: RoleGraph,
    domains: HashMap<String, RoleGraph>,
}

impl RoleManager {
    /// Creates an empty role manager with the default depth bound.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_HIERARCHY_DEPTH)
    }

    /// Creates an empty role manager that follows at most `max_depth` edges.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            global: RoleGraph::default(),
            domains: HashMap::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn graph(&self, domain: Option<&str>) -> Option<&RoleGraph> {
        match domain {
            None => Some(&self.global),
            Some(d) => self.domains.get(d),
        }
    }

    fn graph_mut(&mut self, domain: Option<&str>) -> &mut RoleGraph {
        match domain {
            None => &mut self.global,
            Some(d) => self.domains.entry(d.to_string()).or_default(),
        }
    }

    /// Adds `member -> group`. Idempotent; returns whether the link is new.
    pub fn add_link(&mut self, member: &str, group: &str, domain: Option<&str>) -> bool {
        self.graph_mut(domain).add_edge(member, group)
    }

    /// Removes `member -> group`. Returns whether a link was removed.
    pub fn remove_link(&mut self, member: &str, group: &str, domain: Option<&str>) -> bool {
        let removed = match domain {
            None => self.global.remove_edge(member, group),
            Some(d) => self
                .domains
                .get_mut(d)
                .is_some_and(|g| g.remove_edge(member, group)),
        };
        if let Some(d) = domain
            && self.domains.get(d).is_some_and(|g| g.edge_count() == 0)
        {
            self.domains.remove(d);
        }
        removed
    }

    /// Returns whether `group` is reachable from `member` in zero or more
    /// steps. Every principal has itself.
    pub fn has_link(&self, member: &str, group: &str, domain: Option<&str>) -> bool {
        if member == group {
            return true;
        }
        self.graph(domain)
            .is_some_and(|g| g.reaches(member, group, self.max_depth))
    }

    /// All groups transitively reachable from `member`.
    pub fn roles_of(&self, member: &str, domain: Option<&str>) -> BTreeSet<String> {
        self.graph(domain)
            .map(|g| g.reachable(member, self.max_depth))
            .unwrap_or_default()
    }

    /// Groups `member` belongs to directly.
    pub fn direct_roles(&self, member: &str, domain: Option<&str>) -> Vec<String> {
        self.graph(domain)
            .map(|g| g.direct_groups(member))
            .unwrap_or_default()
    }

    /// Direct members of `group`.
    pub fn direct_members(&self, group: &str, domain: Option<&str>) -> Vec<String> {
        self.graph(domain)
            .map(|g| g.direct_members(group))
            .unwrap_or_default()
    }

    /// Total number of links across all domains.
    pub fn link_count(&self) -> usize {
        self.global.edge_count() + self.domains.values().map(RoleGraph::edge_count).sum::<usize>()
    }

    /// Drops every link, keeping the depth bound.
    pub fn clear(&mut self) {
        self.global = RoleGraph::default();
        self.domains.clear();
    }
}

impl Default for RoleManager {
    fn default() -> Self {
        Self::new()
    }
}
