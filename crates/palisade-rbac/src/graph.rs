//! Arena-backed role graph.
//!
//! Principals (users and roles alike) are interned into a node table; edges
//! point from a member to the groups it belongs to. A node is released as
//! soon as its last edge goes away. Cycles are allowed, so every traversal
//! carries a visited set.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::warn;

#[derive(Debug, Clone)]
struct Node {
    name: String,
    /// Groups this node is a direct member of.
    groups: Vec<usize>,
    /// Direct members of this node.
    members: Vec<usize>,
}

/// Directed `member -> group` graph for one domain.
#[derive(Debug, Clone, Default)]
pub(crate) struct RoleGraph {
    ids: HashMap<String, usize>,
    nodes: Vec<Node>,
    edges: usize,
}

impl RoleGraph {
    fn id(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    fn intern(&mut self, name: &str) -> usize {
        if let Some(id) = self.id(name) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            groups: Vec::new(),
            members: Vec::new(),
        });
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Adds `member -> group`. Returns `false` if the edge already existed.
    pub(crate) fn add_edge(&mut self, member: &str, group: &str) -> bool {
        let from = self.intern(member);
        let to = self.intern(group);
        if self.nodes[from].groups.contains(&to) {
            return false;
        }
        self.nodes[from].groups.push(to);
        self.nodes[to].members.push(from);
        self.edges += 1;
        true
    }

    /// Removes `member -> group`. Returns `false` if there was no such edge.
    pub(crate) fn remove_edge(&mut self, member: &str, group: &str) -> bool {
        let (Some(from), Some(to)) = (self.id(member), self.id(group)) else {
            return false;
        };
        let Some(pos) = self.nodes[from].groups.iter().position(|&g| g == to) else {
            return false;
        };
        self.nodes[from].groups.remove(pos);
        self.nodes[to].members.retain(|&m| m != from);
        self.edges -= 1;

        // Release the higher slot first so the other id stays valid.
        let (high, low) = if from > to { (from, to) } else { (to, from) };
        self.release_if_isolated(high);
        if low != high {
            self.release_if_isolated(low);
        }
        true
    }

    /// Drops `id` from the table if it has no edges left. The last node is
    /// moved into the freed slot and every reference to it is renumbered.
    fn release_if_isolated(&mut self, id: usize) {
        let node = &self.nodes[id];
        if !node.groups.is_empty() || !node.members.is_empty() {
            return;
        }
        let last = self.nodes.len() - 1;
        let removed = self.nodes.swap_remove(id);
        self.ids.remove(&removed.name);
        if id == last {
            return;
        }

        let moved = &self.nodes[id];
        let neighbours: Vec<usize> = moved.groups.iter().chain(&moved.members).copied().collect();
        for n in neighbours {
            // A self-loop on the moved node still names its old slot.
            let node = &mut self.nodes[if n == last { id } else { n }];
            for slot in node.groups.iter_mut().chain(node.members.iter_mut()) {
                if *slot == last {
                    *slot = id;
                }
            }
        }
        let name = self.nodes[id].name.clone();
        self.ids.insert(name, id);
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges
    }

    /// Breadth-first search from `member` for `group`, following at most
    /// `max_depth` edges.
    pub(crate) fn reaches(&self, member: &str, group: &str, max_depth: usize) -> bool {
        let (Some(start), Some(target)) = (self.id(member), self.id(group)) else {
            return false;
        };
        let mut found = false;
        self.walk(start, max_depth, |id| {
            found = id == target;
            found
        });
        found
    }

    /// Every group reachable from `member` within `max_depth` edges.
    pub(crate) fn reachable(&self, member: &str, max_depth: usize) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(start) = self.id(member) {
            self.walk(start, max_depth, |id| {
                out.insert(self.nodes[id].name.clone());
                false
            });
        }
        out
    }

    /// Visits nodes reachable from `start` (excluding `start` itself unless
    /// a cycle leads back to it) in breadth-first order. Stops as soon as
    /// `visit` returns `true`.
    fn walk(&self, start: usize, max_depth: usize, mut visit: impl FnMut(usize) -> bool) {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(start, 0usize)]);
        let mut truncated = false;

        while let Some((id, depth)) = queue.pop_front() {
            if depth == max_depth {
                if !truncated && self.nodes[id].groups.iter().any(|g| !visited.contains(g)) {
                    truncated = true;
                    warn!(
                        principal = %self.nodes[start].name,
                        max_depth,
                        "role hierarchy depth limit reached"
                    );
                }
                continue;
            }
            for &next in &self.nodes[id].groups {
                if !visited.insert(next) {
                    continue;
                }
                if visit(next) {
                    return;
                }
                queue.push_back((next, depth + 1));
            }
        }
    }

    pub(crate) fn direct_groups(&self, member: &str) -> Vec<String> {
        self.id(member)
            .map(|id| self.names(&self.nodes[id].groups))
            .unwrap_or_default()
    }

    pub(crate) fn direct_members(&self, group: &str) -> Vec<String> {
        self.id(group)
            .map(|id| self.names(&self.nodes[id].members))
            .unwrap_or_default()
    }

    fn names(&self, ids: &[usize]) -> Vec<String> {
        ids.iter().map(|&id| self.nodes[id].name.clone()).collect()
    }
}
