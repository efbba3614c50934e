//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use derive_new::new;

use crate::lsdb::{Adjacency, AdjacencyDatabase};

pub type LinkStateMetric = u64;

// Outcome of a link-state mutation.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkStateChange {
    pub topology_changed: bool,
    pub link_attributes_changed: bool,
    pub node_label_changed: bool,
}

// Shortest-path tree from one source node: for every reachable node,
// the distance and the set of first-hop neighbors on any equal-cost
// shortest path.
pub type SpfResult = BTreeMap<String, SpfNode>;

#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct SpfNode {
    pub metric: LinkStateMetric,
    pub next_hops: BTreeSet<String>,
}

// A path is a sequence of links walked away from the source.
pub type Path = Vec<Link>;

// Identity of a bidirectional link, ordered so that (n1, if1) is the
// smaller endpoint.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct LinkKey {
    pub n1: String,
    pub if1: String,
    pub n2: String,
    pub if2: String,
}

// A value that may change under an ordered-fib hold: the new value only
// takes effect after the hold countdown reaches zero.
#[derive(Clone, Debug)]
struct HoldableValue<T> {
    value: T,
    held_value: Option<T>,
    hold_ttl: u32,
}

trait Holdable: Copy + Eq {
    // Whether the transition makes the link more usable. Such changes
    // are delayed by the hold-up countdown, the rest by hold-down.
    fn is_improvement(old: &Self, new: &Self) -> bool;
}

// Overload flag: clearing it brings the direction up.
impl Holdable for bool {
    fn is_improvement(old: &Self, new: &Self) -> bool {
        *old && !*new
    }
}

// Metric: decreasing is an improvement.
impl Holdable for LinkStateMetric {
    fn is_improvement(old: &Self, new: &Self) -> bool {
        new < old
    }
}

// A bidirectional link assembled from the two directed adjacencies of
// its endpoints. Per-direction state is kept for both ends; directional
// accessors take the querying node.
#[derive(Clone, Debug)]
pub struct Link {
    n1: String,
    if1: String,
    n2: String,
    if2: String,
    metric1: HoldableValue<LinkStateMetric>,
    metric2: HoldableValue<LinkStateMetric>,
    adj_label1: u32,
    adj_label2: u32,
    overload1: HoldableValue<bool>,
    overload2: HoldableValue<bool>,
    nh_v4_1: Ipv4Addr,
    nh_v6_1: Ipv6Addr,
    nh_v4_2: Ipv4Addr,
    nh_v6_2: Ipv6Addr,
    area: String,
}

// Link-state database of one area: the set of adjacency databases and
// the symmetric link set derived from them, plus memoized SPF and
// k-shortest-path results.
#[derive(Debug, Default)]
pub struct LinkState {
    area: String,
    adjacency_databases: BTreeMap<String, AdjacencyDatabase>,
    links: BTreeMap<LinkKey, Link>,
    // Links whose withdrawal is being held down; removed for good once
    // the hold expires.
    dying_links: BTreeSet<LinkKey>,
    spf_results: RefCell<BTreeMap<String, Arc<SpfResult>>>,
    kth_path_results: RefCell<BTreeMap<(String, String, usize), Arc<Vec<Path>>>>,
    // Statistics.
    spf_runs: Cell<u64>,
    spf_ms: Cell<u64>,
}

// ===== impl HoldableValue =====

impl<T: Holdable> HoldableValue<T> {
    fn new(value: T) -> HoldableValue<T> {
        HoldableValue {
            value,
            held_value: None,
            hold_ttl: 0,
        }
    }

    fn value(&self) -> T {
        self.value
    }

    fn has_hold(&self) -> bool {
        self.held_value.is_some()
    }

    // Applies a new value, possibly under a hold. Returns true if the
    // observable value changed immediately.
    fn update(&mut self, new: T, hold_up_ttl: u32, hold_down_ttl: u32) -> bool {
        if self.value == new {
            // A change back to the current value cancels any pending hold.
            self.held_value = None;
            self.hold_ttl = 0;
            return false;
        }
        let ttl = if T::is_improvement(&self.value, &new) {
            hold_up_ttl
        } else {
            hold_down_ttl
        };
        if ttl == 0 {
            self.value = new;
            self.held_value = None;
            self.hold_ttl = 0;
            true
        } else {
            self.held_value = Some(new);
            self.hold_ttl = ttl;
            false
        }
    }

    // Steps the countdown. Returns true if the held value took effect.
    fn decrement(&mut self) -> bool {
        if let Some(held) = self.held_value {
            self.hold_ttl -= 1;
            if self.hold_ttl == 0 {
                self.value = held;
                self.held_value = None;
                return true;
            }
        }
        false
    }
}

// ===== impl Link =====

impl Link {
    // Builds a link from the two directed adjacencies of a node pair.
    // `adj1` is `node1`'s adjacency towards `node2` and vice versa.
    fn from_adjacencies(
        node1: &str,
        adj1: &Adjacency,
        node2: &str,
        adj2: &Adjacency,
        area: String,
    ) -> Link {
        let (n1, a1, n2, a2) =
            if (node1, &adj1.if_name) <= (node2, &adj2.if_name) {
                (node1, adj1, node2, adj2)
            } else {
                (node2, adj2, node1, adj1)
            };
        Link {
            n1: n1.to_owned(),
            if1: a1.if_name.clone(),
            n2: n2.to_owned(),
            if2: a2.if_name.clone(),
            metric1: HoldableValue::new(a1.metric),
            metric2: HoldableValue::new(a2.metric),
            adj_label1: a1.adj_label,
            adj_label2: a2.adj_label,
            overload1: HoldableValue::new(a1.is_overloaded),
            overload2: HoldableValue::new(a2.is_overloaded),
            nh_v4_1: a1.next_hop_v4,
            nh_v6_1: a1.next_hop_v6,
            nh_v4_2: a2.next_hop_v4,
            nh_v6_2: a2.next_hop_v6,
            area,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            n1: self.n1.clone(),
            if1: self.if1.clone(),
            n2: self.n2.clone(),
            if2: self.if2.clone(),
        }
    }

    fn first_side(&self, node: &str) -> bool {
        if node == self.n1 {
            true
        } else if node == self.n2 {
            false
        } else {
            panic!("node {} is not an endpoint of {}", node, self.to_string());
        }
    }

    pub fn get_other_node_name(&self, node: &str) -> &str {
        if self.first_side(node) { &self.n2 } else { &self.n1 }
    }

    pub fn get_iface_from_node(&self, node: &str) -> &str {
        if self.first_side(node) { &self.if1 } else { &self.if2 }
    }

    pub fn get_metric_from_node(&self, node: &str) -> LinkStateMetric {
        if self.first_side(node) {
            self.metric1.value()
        } else {
            self.metric2.value()
        }
    }

    pub fn get_adj_label_from_node(&self, node: &str) -> u32 {
        if self.first_side(node) {
            self.adj_label1
        } else {
            self.adj_label2
        }
    }

    pub fn get_nh_v4_from_node(&self, node: &str) -> IpAddr {
        IpAddr::V4(if self.first_side(node) {
            self.nh_v4_1
        } else {
            self.nh_v4_2
        })
    }

    pub fn get_nh_v6_from_node(&self, node: &str) -> IpAddr {
        IpAddr::V6(if self.first_side(node) {
            self.nh_v6_1
        } else {
            self.nh_v6_2
        })
    }

    pub fn get_area(&self) -> &str {
        &self.area
    }

    // A link is usable only when both directions are advertised up.
    pub fn is_up(&self) -> bool {
        !self.overload1.value() && !self.overload2.value()
    }

    fn has_holds(&self) -> bool {
        self.metric1.has_hold()
            || self.metric2.has_hold()
            || self.overload1.has_hold()
            || self.overload2.has_hold()
    }

    // Places the whole link under a hold-up countdown, so a newly
    // appearing link only becomes usable once the countdown expires.
    fn hold_initial_up(&mut self, hold_up_ttl: u32) {
        for overload in [&mut self.overload1, &mut self.overload2] {
            overload.value = true;
            overload.held_value = Some(false);
            overload.hold_ttl = hold_up_ttl;
        }
    }

    // Marks one direction as withdrawn, under the hold-down countdown.
    fn set_down_from_node(
        &mut self,
        node: &str,
        hold_up_ttl: u32,
        hold_down_ttl: u32,
    ) -> bool {
        if self.first_side(node) {
            self.overload1.update(true, hold_up_ttl, hold_down_ttl)
        } else {
            self.overload2.update(true, hold_up_ttl, hold_down_ttl)
        }
    }

    // Folds the state of a freshly derived link into this one, applying
    // holds to the topology-relevant parts. Returns what changed.
    fn update_from(
        &mut self,
        new: &Link,
        hold_up_ttl: u32,
        hold_down_ttl: u32,
    ) -> LinkStateChange {
        let mut change = LinkStateChange::default();
        for (metric, new_metric) in [
            (&mut self.metric1, &new.metric1),
            (&mut self.metric2, &new.metric2),
        ] {
            change.topology_changed |=
                metric.update(new_metric.value(), hold_up_ttl, hold_down_ttl);
        }
        for (overload, new_overload) in [
            (&mut self.overload1, &new.overload1),
            (&mut self.overload2, &new.overload2),
        ] {
            change.topology_changed |= overload.update(
                new_overload.value(),
                hold_up_ttl,
                hold_down_ttl,
            );
        }
        if (self.adj_label1, self.adj_label2)
            != (new.adj_label1, new.adj_label2)
            || (self.nh_v4_1, self.nh_v6_1, self.nh_v4_2, self.nh_v6_2)
                != (new.nh_v4_1, new.nh_v6_1, new.nh_v4_2, new.nh_v6_2)
        {
            self.adj_label1 = new.adj_label1;
            self.adj_label2 = new.adj_label2;
            self.nh_v4_1 = new.nh_v4_1;
            self.nh_v6_1 = new.nh_v6_1;
            self.nh_v4_2 = new.nh_v4_2;
            self.nh_v6_2 = new.nh_v6_2;
            change.link_attributes_changed = true;
        }
        change
    }

    // Steps all hold countdowns. Returns true if any value took effect.
    fn decrement_holds(&mut self) -> bool {
        let mut changed = false;
        changed |= self.metric1.decrement();
        changed |= self.metric2.decrement();
        changed |= self.overload1.decrement();
        changed |= self.overload2.decrement();
        changed
    }

    pub fn directional_to_string(&self, node: &str) -> String {
        format!("{}->{}", node, self.get_other_node_name(node))
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%{}<->{}%{}", self.n1, self.if1, self.n2, self.if2)
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Link) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Link {}

// ===== impl LinkState =====

impl LinkState {
    pub fn new(area: String) -> LinkState {
        LinkState {
            area,
            ..Default::default()
        }
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn has_node(&self, node: &str) -> bool {
        self.adjacency_databases.contains_key(node)
    }

    pub fn is_node_overloaded(&self, node: &str) -> bool {
        self.adjacency_databases
            .get(node)
            .is_some_and(|db| db.is_overloaded)
    }

    pub fn get_adjacency_databases(
        &self,
    ) -> &BTreeMap<String, AdjacencyDatabase> {
        &self.adjacency_databases
    }

    pub fn num_links(&self) -> usize {
        self.links.values().filter(|link| link.is_up()).count()
    }

    // Returns the currently-usable links attached to the given node.
    pub fn links_from_node(&self, node: &str) -> Vec<&Link> {
        self.links
            .values()
            .filter(|link| link.n1 == node || link.n2 == node)
            .filter(|link| link.is_up())
            .collect()
    }

    // Returns the metric of the cheapest usable direct link from a to b.
    pub fn get_metric_from_a_to_b(
        &self,
        a: &str,
        b: &str,
    ) -> Option<LinkStateMetric> {
        self.links_from_node(a)
            .into_iter()
            .filter(|link| link.get_other_node_name(a) == b)
            .map(|link| link.get_metric_from_node(a))
            .min()
    }

    // Replaces a node's adjacency database. Newly-usable links go under
    // the hold-up countdown and newly-unusable ones under hold-down;
    // both countdowns are zero outside ordered-fib mode.
    pub fn update_adjacency_database(
        &mut self,
        db: AdjacencyDatabase,
        hold_up_ttl: u32,
        hold_down_ttl: u32,
    ) -> LinkStateChange {
        let node = db.this_node_name.clone();
        let prev = self.adjacency_databases.insert(node.clone(), db);
        let new_db = &self.adjacency_databases[&node];

        let mut change = LinkStateChange::default();
        match &prev {
            Some(prev) => {
                change.node_label_changed =
                    prev.node_label != new_db.node_label;
                // Drain state affects the node's transit role.
                change.topology_changed |=
                    prev.is_overloaded != new_db.is_overloaded;
            }
            None => {
                change.node_label_changed = new_db.node_label != 0;
            }
        }

        // All affected links are incident to this node.
        self.reconcile_node_links(&node, hold_up_ttl, hold_down_ttl, &mut change);

        self.maybe_invalidate_caches(&change);
        change
    }

    // Removes a node's adjacency database, equivalent to the node
    // advertising nothing at all.
    pub fn delete_adjacency_database(&mut self, node: &str) -> LinkStateChange {
        let mut change = LinkStateChange::default();
        let Some(prev) = self.adjacency_databases.remove(node) else {
            return change;
        };
        change.node_label_changed = prev.node_label != 0;

        let keys = self
            .links
            .keys()
            .filter(|key| key.n1 == node || key.n2 == node)
            .cloned()
            .collect::<Vec<_>>();
        for key in keys {
            let was_up = self.links[&key].is_up();
            self.links.remove(&key);
            self.dying_links.remove(&key);
            change.topology_changed |= was_up;
        }

        self.maybe_invalidate_caches(&change);
        change
    }

    // Steps every hold countdown by one. Returns whether the usable
    // topology became logically different.
    pub fn decrement_holds(&mut self) -> LinkStateChange {
        let mut change = LinkStateChange::default();
        let mut expired = Vec::new();
        for (key, link) in self.links.iter_mut() {
            change.topology_changed |= link.decrement_holds();
            if self.dying_links.contains(key) && !link.is_up() {
                expired.push(key.clone());
            }
        }
        for key in expired {
            self.links.remove(&key);
            self.dying_links.remove(&key);
        }
        self.maybe_invalidate_caches(&change);
        change
    }

    pub fn has_holds(&self) -> bool {
        self.links.values().any(|link| link.has_holds())
    }

    // Memoized Dijkstra from the given source.
    pub fn get_spf_result(&self, src: &str) -> Arc<SpfResult> {
        if let Some(result) = self.spf_results.borrow().get(src) {
            return result.clone();
        }
        let start_time = std::time::Instant::now();
        let result = Arc::new(self.run_spf(src));
        self.spf_runs.set(self.spf_runs.get() + 1);
        self.spf_ms.set(
            self.spf_ms.get() + start_time.elapsed().as_millis() as u64,
        );
        self.spf_results
            .borrow_mut()
            .insert(src.to_owned(), result.clone());
        result
    }

    // Number of shortest-path computations run so far, and the time
    // spent in them.
    pub fn num_spf_runs(&self) -> u64 {
        self.spf_runs.get()
    }

    pub fn spf_time_ms(&self) -> u64 {
        self.spf_ms.get()
    }

    // Returns the k-th set of equal-cost loop-free paths between two
    // nodes. Only k = 1 (all shortest) and k = 2 (all second-shortest)
    // are supported.
    pub fn get_kth_paths(&self, src: &str, dst: &str, k: usize) -> Arc<Vec<Path>> {
        assert!(k == 1 || k == 2, "unsupported k: {}", k);
        let cache_key = (src.to_owned(), dst.to_owned(), k);
        if let Some(paths) = self.kth_path_results.borrow().get(&cache_key) {
            return paths.clone();
        }
        let paths = Arc::new(match k {
            1 => self
                .shortest_paths(src, dst, &BTreeSet::new(), &BTreeSet::new())
                .map(|(_, paths)| paths)
                .unwrap_or_default(),
            _ => self.second_shortest_paths(src, dst),
        });
        self.kth_path_results
            .borrow_mut()
            .insert(cache_key, paths.clone());
        paths
    }

    // Unweighted hop count between two nodes over usable links.
    pub fn get_hops_from_a_to_b(&self, a: &str, b: &str) -> Option<u32> {
        if !self.has_node(a) || !self.has_node(b) {
            return None;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(a.to_owned());
        queue.push_back((a.to_owned(), 0));
        while let Some((node, hops)) = queue.pop_front() {
            if node == b {
                return Some(hops);
            }
            for link in self.links_from_node(&node) {
                let other = link.get_other_node_name(&node);
                if visited.insert(other.to_owned()) {
                    queue.push_back((other.to_owned(), hops + 1));
                }
            }
        }
        None
    }

    // Longest hop distance from any node to the given node.
    pub fn get_max_hops_to_node(&self, node: &str) -> u32 {
        let mut max_hops = 0;
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();
        visited.insert(node.to_owned());
        queue.push_back((node.to_owned(), 0));
        while let Some((node, hops)) = queue.pop_front() {
            max_hops = std::cmp::max(max_hops, hops);
            for link in self.links_from_node(&node) {
                let other = link.get_other_node_name(&node);
                if visited.insert(other.to_owned()) {
                    queue.push_back((other.to_owned(), hops + 1));
                }
            }
        }
        max_hops
    }

    // ===== helpers =====

    fn maybe_invalidate_caches(&self, change: &LinkStateChange) {
        if change.topology_changed || change.link_attributes_changed {
            self.spf_results.borrow_mut().clear();
            self.kth_path_results.borrow_mut().clear();
        }
    }

    // Derives the link set a node's adjacency database currently
    // supports. Parallel links pair up in advertised order.
    fn build_links_for_node(&self, node: &str) -> BTreeMap<LinkKey, Link> {
        let mut links = BTreeMap::new();
        let Some(db) = self.adjacency_databases.get(node) else {
            return links;
        };
        let mut neighbors = BTreeSet::new();
        for adj in &db.adjacencies {
            neighbors.insert(adj.other_node_name.as_str());
        }
        for other in neighbors {
            if other == node {
                continue;
            }
            let Some(other_db) = self.adjacency_databases.get(other) else {
                continue;
            };
            let fwd = db
                .adjacencies
                .iter()
                .filter(|adj| adj.other_node_name == other);
            let rev = other_db
                .adjacencies
                .iter()
                .filter(|adj| adj.other_node_name == node);
            for (fwd_adj, rev_adj) in fwd.zip(rev) {
                let link = Link::from_adjacencies(
                    node,
                    fwd_adj,
                    other,
                    rev_adj,
                    self.area.clone(),
                );
                links.insert(link.key(), link);
            }
        }
        links
    }

    // Diffs the node's derived link set against the stored one,
    // applying holds to additions and withdrawals.
    fn reconcile_node_links(
        &mut self,
        node: &str,
        hold_up_ttl: u32,
        hold_down_ttl: u32,
        change: &mut LinkStateChange,
    ) {
        let new_links = self.build_links_for_node(node);

        let old_keys = self
            .links
            .keys()
            .filter(|key| key.n1 == node || key.n2 == node)
            .cloned()
            .collect::<Vec<_>>();

        for key in &old_keys {
            match new_links.get(key) {
                Some(new_link) => {
                    self.dying_links.remove(key);
                    let link = self.links.get_mut(key).unwrap();
                    let link_change =
                        link.update_from(new_link, hold_up_ttl, hold_down_ttl);
                    change.topology_changed |= link_change.topology_changed;
                    change.link_attributes_changed |=
                        link_change.link_attributes_changed;
                }
                None => {
                    // One side withdrew the adjacency.
                    if hold_down_ttl > 0 {
                        let link = self.links.get_mut(key).unwrap();
                        link.set_down_from_node(node, hold_up_ttl, hold_down_ttl);
                        self.dying_links.insert(key.clone());
                    } else {
                        let was_up = self.links[key].is_up();
                        self.links.remove(key);
                        self.dying_links.remove(key);
                        change.topology_changed |= was_up;
                    }
                }
            }
        }

        for (key, mut link) in new_links {
            if self.links.contains_key(&key) {
                continue;
            }
            if hold_up_ttl > 0 {
                link.hold_initial_up(hold_up_ttl);
            } else {
                change.topology_changed |= link.is_up();
            }
            self.links.insert(key, link);
        }
    }

    // Dijkstra over the usable link set. Overloaded nodes are valid
    // destinations but never provide transit.
    fn run_spf(&self, src: &str) -> SpfResult {
        let mut result = SpfResult::new();
        if !self.has_node(src) {
            return result;
        }

        let mut dist = BTreeMap::new();
        let mut first_hops: BTreeMap<String, BTreeSet<String>> =
            BTreeMap::new();
        let mut queue = BinaryHeap::new();

        dist.insert(src.to_owned(), 0);
        first_hops.insert(src.to_owned(), BTreeSet::new());
        queue.push(Reverse((0, src.to_owned())));

        while let Some(Reverse((metric, node))) = queue.pop() {
            if dist.get(&node) != Some(&metric) {
                continue;
            }
            if node != src && self.is_node_overloaded(&node) {
                continue;
            }
            for link in self.links_from_node(&node) {
                let other = link.get_other_node_name(&node);
                let alt = metric + link.get_metric_from_node(&node);
                let hops_via = if node == src {
                    std::iter::once(other.to_owned()).collect()
                } else {
                    first_hops[&node].clone()
                };
                match dist.get(other) {
                    Some(other_dist) if *other_dist < alt => {}
                    Some(other_dist) if *other_dist == alt => {
                        first_hops.get_mut(other).unwrap().extend(hops_via);
                    }
                    _ => {
                        dist.insert(other.to_owned(), alt);
                        first_hops.insert(other.to_owned(), hops_via);
                        queue.push(Reverse((alt, other.to_owned())));
                    }
                }
            }
        }

        for (node, metric) in dist {
            let next_hops = first_hops.remove(&node).unwrap();
            result.insert(node, SpfNode::new(metric, next_hops));
        }
        result
    }

    // Dijkstra with banned links/nodes, enumerating every equal-cost
    // shortest path between the two nodes.
    fn shortest_paths(
        &self,
        src: &str,
        dst: &str,
        banned_links: &BTreeSet<LinkKey>,
        banned_nodes: &BTreeSet<String>,
    ) -> Option<(LinkStateMetric, Vec<Path>)> {
        if !self.has_node(src) || !self.has_node(dst) {
            return None;
        }

        let mut dist = BTreeMap::new();
        let mut preds: BTreeMap<String, Vec<(String, LinkKey)>> =
            BTreeMap::new();
        let mut queue = BinaryHeap::new();

        dist.insert(src.to_owned(), 0);
        queue.push(Reverse((0, src.to_owned())));

        while let Some(Reverse((metric, node))) = queue.pop() {
            if dist.get(&node) != Some(&metric) {
                continue;
            }
            if node != src && self.is_node_overloaded(&node) {
                continue;
            }
            if node == dst {
                continue;
            }
            for link in self.links_from_node(&node) {
                let key = link.key();
                if banned_links.contains(&key) {
                    continue;
                }
                let other = link.get_other_node_name(&node);
                if banned_nodes.contains(other) {
                    continue;
                }
                let alt = metric + link.get_metric_from_node(&node);
                match dist.get(other) {
                    Some(other_dist) if *other_dist < alt => {}
                    Some(other_dist) if *other_dist == alt => {
                        preds
                            .get_mut(other)
                            .unwrap()
                            .push((node.clone(), key));
                    }
                    _ => {
                        dist.insert(other.to_owned(), alt);
                        preds.insert(
                            other.to_owned(),
                            vec![(node.clone(), key)],
                        );
                        queue.push(Reverse((alt, other.to_owned())));
                    }
                }
            }
        }

        let total = *dist.get(dst)?;

        // Walk the predecessor DAG backwards, collecting all paths.
        let mut paths = Vec::new();
        let mut stack = Vec::new();
        self.collect_paths(src, dst, &preds, &mut stack, &mut paths);
        Some((total, paths))
    }

    fn collect_paths(
        &self,
        src: &str,
        node: &str,
        preds: &BTreeMap<String, Vec<(String, LinkKey)>>,
        stack: &mut Vec<LinkKey>,
        paths: &mut Vec<Path>,
    ) {
        if node == src {
            let path = stack
                .iter()
                .rev()
                .map(|key| self.links[key].clone())
                .collect();
            paths.push(path);
            return;
        }
        let Some(node_preds) = preds.get(node) else {
            return;
        };
        for (prev, key) in node_preds {
            stack.push(key.clone());
            self.collect_paths(src, prev, preds, stack, paths);
            stack.pop();
        }
    }

    // Yen-style deviation over the set of equal-cost shortest paths:
    // every deviation bans the next edge of each shortest path sharing
    // the root prefix, and the second-shortest set is the equal-cost
    // minimum over all candidates.
    fn second_shortest_paths(&self, src: &str, dst: &str) -> Vec<Path> {
        let first = self.get_kth_paths(src, dst, 1);
        if first.is_empty() {
            return Vec::new();
        }

        let mut best_total = None;
        let mut candidates: BTreeMap<Vec<LinkKey>, Path> = BTreeMap::new();

        for path in first.iter() {
            let nodes = path_nodes(src, path);
            for deviation in 0..path.len() {
                let spur_node = &nodes[deviation];
                let root = &path[..deviation];
                let root_keys =
                    root.iter().map(|link| link.key()).collect::<Vec<_>>();
                let root_cost = path_cost(src, root);

                // Ban the deviating edge of every shortest path that
                // shares this root.
                let mut banned_links = BTreeSet::new();
                for other in first.iter() {
                    let other_keys = other
                        .iter()
                        .take(deviation + 1)
                        .map(|link| link.key())
                        .collect::<Vec<_>>();
                    if other_keys.len() == deviation + 1
                        && other_keys[..deviation] == root_keys[..]
                    {
                        banned_links
                            .insert(other_keys[deviation].clone());
                    }
                }
                let banned_nodes = nodes[..deviation]
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>();

                let Some((spur_cost, spur_paths)) = self.shortest_paths(
                    spur_node,
                    dst,
                    &banned_links,
                    &banned_nodes,
                ) else {
                    continue;
                };
                let total = root_cost + spur_cost;
                if best_total.is_some_and(|best| total > best) {
                    continue;
                }
                if best_total.is_some_and(|best| total < best)
                    || best_total.is_none()
                {
                    best_total = Some(total);
                    candidates.clear();
                }
                for spur_path in spur_paths {
                    let mut candidate = root.to_vec();
                    candidate.extend(spur_path);
                    let keys = candidate
                        .iter()
                        .map(|link| link.key())
                        .collect::<Vec<_>>();
                    candidates.entry(keys).or_insert(candidate);
                }
            }
        }

        candidates.into_values().collect()
    }
}

// ===== global functions =====

// Checks whether path A's edge sequence appears within path B's edge
// sequence as an ordered subsequence.
pub fn path_a_in_path_b(a: &Path, b: &Path) -> bool {
    let mut b_iter = b.iter();
    a.iter().all(|a_link| {
        b_iter.by_ref().any(|b_link| a_link.key() == b_link.key())
    })
}

// Returns the node sequence of a path, starting at the source.
pub fn path_nodes(src: &str, path: &[Link]) -> Vec<String> {
    let mut nodes = vec![src.to_owned()];
    let mut at = src.to_owned();
    for link in path {
        at = link.get_other_node_name(&at).to_owned();
        nodes.push(at.clone());
    }
    nodes
}

// Returns the cost of a path walked away from the source.
pub fn path_cost(src: &str, path: &[Link]) -> LinkStateMetric {
    let mut cost = 0;
    let mut at = src.to_owned();
    for link in path {
        cost += link.get_metric_from_node(&at);
        at = link.get_other_node_name(&at).to_owned();
    }
    cost
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::lsdb::AdjacencyDatabase;

    fn adjacency(other: &str, if_name: &str, metric: u64) -> Adjacency {
        Adjacency::new(
            other.to_owned(),
            if_name.to_owned(),
            Ipv4Addr::new(169, 254, 0, 1),
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            metric,
            0,
            false,
        )
    }

    fn adj_db(node: &str, adjacencies: Vec<Adjacency>) -> AdjacencyDatabase {
        AdjacencyDatabase::new(node.to_owned(), 0, false, adjacencies, None)
    }

    fn line_topology() -> LinkState {
        // a -1- b -1- c
        let mut link_state = LinkState::new("0".to_owned());
        link_state.update_adjacency_database(
            adj_db("a", vec![adjacency("b", "a/1", 1)]),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db(
                "b",
                vec![adjacency("a", "b/1", 1), adjacency("c", "b/2", 1)],
            ),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db("c", vec![adjacency("b", "c/1", 1)]),
            0,
            0,
        );
        link_state
    }

    fn diamond_topology() -> LinkState {
        // a - b - d and a - c - d, all metric 1
        let mut link_state = LinkState::new("0".to_owned());
        link_state.update_adjacency_database(
            adj_db(
                "a",
                vec![adjacency("b", "a/1", 1), adjacency("c", "a/2", 1)],
            ),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db(
                "b",
                vec![adjacency("a", "b/1", 1), adjacency("d", "b/2", 1)],
            ),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db(
                "c",
                vec![adjacency("a", "c/1", 1), adjacency("d", "c/2", 1)],
            ),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db(
                "d",
                vec![adjacency("b", "d/1", 1), adjacency("c", "d/2", 1)],
            ),
            0,
            0,
        );
        link_state
    }

    fn full_mesh_topology() -> LinkState {
        let mut link_state = LinkState::new("0".to_owned());
        let nodes = ["a", "b", "c"];
        for node in nodes {
            let adjacencies = nodes
                .iter()
                .filter(|other| **other != node)
                .map(|other| {
                    adjacency(other, &format!("{}-{}", node, other), 1)
                })
                .collect();
            link_state
                .update_adjacency_database(adj_db(node, adjacencies), 0, 0);
        }
        link_state
    }

    #[test]
    fn symmetric_adjacency_requirement() {
        let mut link_state = LinkState::new("0".to_owned());
        link_state.update_adjacency_database(
            adj_db("a", vec![adjacency("b", "a/1", 1)]),
            0,
            0,
        );
        // Only one side advertises: no usable link yet.
        assert_eq!(link_state.num_links(), 0);
        assert!(link_state.links_from_node("a").is_empty());

        let change = link_state.update_adjacency_database(
            adj_db("b", vec![adjacency("a", "b/1", 1)]),
            0,
            0,
        );
        assert!(change.topology_changed);
        assert_eq!(link_state.num_links(), 1);
        assert_eq!(link_state.get_metric_from_a_to_b("a", "b"), Some(1));
    }

    #[test]
    fn spf_line() {
        let link_state = line_topology();
        let spf = link_state.get_spf_result("a");
        assert_eq!(spf["b"].metric, 1);
        assert_eq!(spf["c"].metric, 2);
        assert_eq!(
            spf["c"].next_hops,
            ["b".to_owned()].into_iter().collect()
        );
    }

    #[test]
    fn spf_ecmp_next_hops() {
        let link_state = diamond_topology();
        let spf = link_state.get_spf_result("a");
        assert_eq!(spf["d"].metric, 2);
        assert_eq!(
            spf["d"].next_hops,
            ["b".to_owned(), "c".to_owned()].into_iter().collect()
        );
    }

    #[test]
    fn spf_overloaded_transit_excluded() {
        let mut link_state = diamond_topology();
        let mut db = adj_db(
            "b",
            vec![adjacency("a", "b/1", 1), adjacency("d", "b/2", 1)],
        );
        db.is_overloaded = true;
        let change = link_state.update_adjacency_database(db, 0, 0);
        assert!(change.topology_changed);

        let spf = link_state.get_spf_result("a");
        // b remains a valid destination but no longer provides transit.
        assert_eq!(spf["b"].metric, 1);
        assert_eq!(
            spf["d"].next_hops,
            ["c".to_owned()].into_iter().collect()
        );
    }

    #[test]
    fn spf_cache_invalidation() {
        let mut link_state = line_topology();
        let spf = link_state.get_spf_result("a");
        assert_eq!(spf["c"].metric, 2);

        link_state.update_adjacency_database(
            adj_db(
                "b",
                vec![adjacency("a", "b/1", 1), adjacency("c", "b/2", 10)],
            ),
            0,
            0,
        );
        let spf = link_state.get_spf_result("a");
        assert_eq!(spf["c"].metric, 11);
    }

    #[test]
    fn ksp1_diamond() {
        let link_state = diamond_topology();
        let paths = link_state.get_kth_paths("a", "d", 1);
        assert_eq!(paths.len(), 2);
        for path in paths.iter() {
            assert_eq!(path.len(), 2);
            assert_eq!(path_cost("a", path), 2);
        }
    }

    #[test]
    fn ksp2_full_mesh() {
        let link_state = full_mesh_topology();
        let first = link_state.get_kth_paths("a", "c", 1);
        assert_eq!(first.len(), 1);
        assert_eq!(path_cost("a", &first[0]), 1);

        let second = link_state.get_kth_paths("a", "c", 2);
        assert_eq!(second.len(), 1);
        assert_eq!(path_cost("a", &second[0]), 2);
        assert_eq!(
            path_nodes("a", &second[0]),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
    }

    #[test]
    fn path_containment() {
        let link_state = full_mesh_topology();
        let first = link_state.get_kth_paths("a", "b", 1);
        let second = link_state.get_kth_paths("a", "c", 2);
        // a->b is contained in a->b->c.
        let a_b = &first[0];
        let a_b_c = second
            .iter()
            .find(|path| path_nodes("a", path)[1] == "b")
            .unwrap();
        assert!(path_a_in_path_b(a_b, a_b_c));
        assert!(!path_a_in_path_b(a_b_c, a_b));
    }

    #[test]
    fn hop_counts() {
        let link_state = line_topology();
        assert_eq!(link_state.get_hops_from_a_to_b("a", "c"), Some(2));
        assert_eq!(link_state.get_hops_from_a_to_b("a", "a"), Some(0));
        assert_eq!(link_state.get_hops_from_a_to_b("a", "x"), None);
        assert_eq!(link_state.get_max_hops_to_node("a"), 2);
        assert_eq!(link_state.get_max_hops_to_node("b"), 1);
    }

    #[test]
    fn ordered_fib_holds() {
        let mut link_state = line_topology();

        // Withdraw b->c under a hold-down of 2: the link stays usable
        // until the countdown expires.
        let change = link_state.update_adjacency_database(
            adj_db("b", vec![adjacency("a", "b/1", 1)]),
            1,
            2,
        );
        assert!(!change.topology_changed);
        assert!(link_state.has_holds());
        assert_eq!(link_state.get_metric_from_a_to_b("b", "c"), Some(1));

        let change = link_state.decrement_holds();
        assert!(!change.topology_changed);
        let change = link_state.decrement_holds();
        assert!(change.topology_changed);
        assert!(!link_state.has_holds());
        assert_eq!(link_state.get_metric_from_a_to_b("b", "c"), None);
    }

    #[test]
    fn delete_adjacency_database() {
        let mut link_state = line_topology();
        let change = link_state.delete_adjacency_database("b");
        assert!(change.topology_changed);
        assert!(!link_state.has_node("b"));
        assert_eq!(link_state.num_links(), 0);
        assert!(link_state.get_spf_result("a").get("c").is_none());
    }

    #[test]
    fn parallel_links() {
        let mut link_state = LinkState::new("0".to_owned());
        link_state.update_adjacency_database(
            adj_db(
                "a",
                vec![adjacency("b", "a/1", 1), adjacency("b", "a/2", 2)],
            ),
            0,
            0,
        );
        link_state.update_adjacency_database(
            adj_db(
                "b",
                vec![adjacency("a", "b/1", 1), adjacency("a", "b/2", 2)],
            ),
            0,
            0,
        );
        assert_eq!(link_state.num_links(), 2);
        assert_eq!(link_state.get_metric_from_a_to_b("a", "b"), Some(1));
    }
}
