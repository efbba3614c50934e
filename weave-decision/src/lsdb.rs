//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use derive_new::new;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use weave_utils::southbound::PerfEvents;

// Key markers in the replicated key-value store.
pub const ADJ_DB_MARKER: &str = "adj:";
pub const PREFIX_DB_MARKER: &str = "prefix:";
pub const FIB_TIME_MARKER: &str = "fibtime:";

// Default administrative area.
pub const DEFAULT_AREA: &str = "0";

// One directed adjacency advertised by a node.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Adjacency {
    // Neighbor at the far end of the link.
    pub other_node_name: String,
    // Local interface name.
    pub if_name: String,
    // Link-local next-hops towards the neighbor.
    pub next_hop_v4: Ipv4Addr,
    pub next_hop_v6: Ipv6Addr,
    // Directional link metric.
    pub metric: u64,
    // Adjacency segment label. Zero means unallocated.
    pub adj_label: u32,
    // Whether this adjacency is administratively down.
    pub is_overloaded: bool,
}

// Full adjacency state of one node, as replicated through the store.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct AdjacencyDatabase {
    pub this_node_name: String,
    // Node segment label. Zero means the node doesn't run
    // segment routing.
    pub node_label: u32,
    // Whether the node is drained and must not carry transit traffic.
    pub is_overloaded: bool,
    pub adjacencies: Vec<Adjacency>,
    pub area: Option<String>,
    #[new(default)]
    pub perf_events: Option<PerfEvents>,
}

// Origin of a prefix advertisement.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PrefixType {
    Loopback,
    Weave,
    Bgp,
    Rib,
}

// How traffic to the prefix should be encapsulated.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PrefixForwardingType {
    Ip,
    SrMpls,
}

// Which path computation feeds the prefix's routes.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PrefixForwardingAlgorithm {
    SpEcmp,
    Ksp2EdEcmp,
}

// One prefix advertisement from one node.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PrefixEntry {
    pub prefix: IpNetwork,
    pub prefix_type: PrefixType,
    pub forwarding_type: PrefixForwardingType,
    pub forwarding_algorithm: PrefixForwardingAlgorithm,
    // Present on BGP advertisements; drives best-path selection.
    #[new(default)]
    pub metric_vector: Option<MetricVector>,
    // Label to place at the bottom of pushed label stacks.
    #[new(default)]
    pub prepend_label: Option<u32>,
    // Minimum number of dynamic next-hops required to program a route.
    #[new(default)]
    pub min_nexthop: Option<u64>,
}

// Full prefix state of one node, as replicated through the store.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PrefixDatabase {
    pub this_node_name: String,
    pub prefix_entries: Vec<PrefixEntry>,
    // Set on per-prefix keys to signal a withdrawal.
    #[new(default)]
    pub delete_prefix: bool,
    #[new(default)]
    pub perf_events: Option<PerfEvents>,
}

// Value stored under a key in the replicated store. A value without a
// payload is a TTL refresh and carries no database change.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct Value {
    pub value: Option<Vec<u8>>,
    pub ttl_version: i64,
}

// One batch of changes from the replication layer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Publication {
    pub area: Option<String>,
    pub key_vals: BTreeMap<String, Value>,
    pub expired_keys: Vec<String>,
}

//
// Metric vectors.
//
// BGP-style prefix advertisements carry an ordered list of prioritized
// metric entities. Vectors are compared entity by entity in decreasing
// priority order; higher metric values win.
//

// Metric entity identifiers.
pub const METRIC_ENTITY_IGP_COST: i64 = 9;
// Priority of the synthesized IGP-cost entity. It is the lowest of all
// priorities so the IGP distance only breaks remaining ties.
pub const METRIC_PRIORITY_IGP_COST: i64 = 500;

// How an entity present in only one of the compared vectors is judged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum CompareType {
    WinIfPresent,
    WinIfNotPresent,
    IgnoreIfNotPresent,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct MetricEntity {
    pub entity_type: i64,
    pub priority: i64,
    pub op: CompareType,
    pub is_best_path_tie_breaker: bool,
    pub metric: Vec<i64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MetricVector {
    pub metrics: Vec<MetricEntity>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareResult {
    Winner,
    TieWinner,
    Tie,
    TieLooser,
    Looser,
    Error,
}

// ===== impl AdjacencyDatabase =====

impl AdjacencyDatabase {
    // An expired or deleted node is equivalent to a node advertising
    // nothing at all.
    pub fn empty(node_name: &str, area: Option<String>) -> AdjacencyDatabase {
        AdjacencyDatabase::new(node_name.to_owned(), 0, false, vec![], area)
    }
}

// ===== impl MetricVector =====

impl MetricVector {
    pub fn get_entity(&self, entity_type: i64) -> Option<&MetricEntity> {
        self.metrics
            .iter()
            .find(|entity| entity.entity_type == entity_type)
    }

    // Returns the entities ordered by decreasing priority.
    fn sorted(&self) -> Vec<&MetricEntity> {
        let mut metrics = self.metrics.iter().collect::<Vec<_>>();
        metrics.sort_by(|a, b| b.priority.cmp(&a.priority));
        metrics
    }
}

// ===== impl CompareResult =====

impl CompareResult {
    fn invert(self) -> CompareResult {
        match self {
            CompareResult::Winner => CompareResult::Looser,
            CompareResult::TieWinner => CompareResult::TieLooser,
            CompareResult::Tie => CompareResult::Tie,
            CompareResult::TieLooser => CompareResult::TieWinner,
            CompareResult::Looser => CompareResult::Winner,
            CompareResult::Error => CompareResult::Error,
        }
    }
}

// ===== global functions =====

// Extracts the node name from a replicated-store key, e.g.
// "adj:node-1" or "prefix:node-1:10.0.0.0/24".
pub fn node_name_from_key(key: &str) -> String {
    let suffix = key.split_once(':').map_or(key, |(_, suffix)| suffix);
    suffix
        .split_once(':')
        .map_or(suffix, |(node, _)| node)
        .to_owned()
}

// Extracts the per-prefix component of a prefix-database key, if the key
// uses the per-prefix format "prefix:<node>:<ip>/<plen>".
pub fn prefix_from_key(key: &str) -> Option<IpNetwork> {
    let suffix = key.strip_prefix(PREFIX_DB_MARKER)?;
    let (_, prefix) = suffix.split_once(':')?;
    prefix.parse().ok()
}

// Compares two metric lists of the same entity. Higher values win.
fn compare_metrics(
    lhs: &[i64],
    rhs: &[i64],
    tie_breaker: bool,
) -> CompareResult {
    if lhs.len() != rhs.len() {
        return CompareResult::Error;
    }
    for (l, r) in lhs.iter().zip(rhs.iter()) {
        if l != r {
            return match (l > r, tie_breaker) {
                (true, false) => CompareResult::Winner,
                (true, true) => CompareResult::TieWinner,
                (false, false) => CompareResult::Looser,
                (false, true) => CompareResult::TieLooser,
            };
        }
    }
    CompareResult::Tie
}

// Judges an entity present in only one vector.
fn result_for_loner(op: CompareType, tie_breaker: bool) -> CompareResult {
    match (op, tie_breaker) {
        (CompareType::WinIfPresent, false) => CompareResult::Winner,
        (CompareType::WinIfPresent, true) => CompareResult::TieWinner,
        (CompareType::WinIfNotPresent, false) => CompareResult::Looser,
        (CompareType::WinIfNotPresent, true) => CompareResult::TieLooser,
        (CompareType::IgnoreIfNotPresent, _) => CompareResult::Tie,
    }
}

// Compares two metric vectors entity by entity in decreasing priority
// order. The first non-tie outcome decides.
pub fn compare_metric_vectors(
    lhs: &MetricVector,
    rhs: &MetricVector,
) -> CompareResult {
    let lhs = lhs.sorted();
    let rhs = rhs.sorted();

    let mut result = CompareResult::Tie;
    let mut li = 0;
    let mut ri = 0;
    while result == CompareResult::Tie && li < lhs.len() && ri < rhs.len() {
        let l = lhs[li];
        let r = rhs[ri];
        if l.priority == r.priority {
            if l.entity_type != r.entity_type || l.op != r.op {
                return CompareResult::Error;
            }
            result =
                compare_metrics(&l.metric, &r.metric, l.is_best_path_tie_breaker);
            li += 1;
            ri += 1;
        } else if l.priority > r.priority {
            result = result_for_loner(l.op, l.is_best_path_tie_breaker);
            li += 1;
        } else {
            result = result_for_loner(r.op, r.is_best_path_tie_breaker).invert();
            ri += 1;
        }
    }
    while result == CompareResult::Tie && li < lhs.len() {
        result = result_for_loner(lhs[li].op, lhs[li].is_best_path_tie_breaker);
        li += 1;
    }
    while result == CompareResult::Tie && ri < rhs.len() {
        result = result_for_loner(rhs[ri].op, rhs[ri].is_best_path_tie_breaker)
            .invert();
        ri += 1;
    }
    result
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(priority: i64, metric: Vec<i64>) -> MetricEntity {
        MetricEntity::new(
            priority,
            priority,
            CompareType::WinIfNotPresent,
            false,
            metric,
        )
    }

    #[test]
    fn node_name_extraction() {
        assert_eq!(node_name_from_key("adj:node-1"), "node-1");
        assert_eq!(node_name_from_key("prefix:node-1"), "node-1");
        assert_eq!(
            node_name_from_key("prefix:node-1:10.0.0.0/24"),
            "node-1"
        );
        assert_eq!(node_name_from_key("fibtime:node-2"), "node-2");
    }

    #[test]
    fn prefix_key_extraction() {
        assert_eq!(prefix_from_key("prefix:node-1"), None);
        assert_eq!(
            prefix_from_key("prefix:node-1:10.0.0.0/24"),
            Some("10.0.0.0/24".parse().unwrap())
        );
        assert_eq!(prefix_from_key("adj:node-1"), None);
    }

    #[test]
    fn metric_vector_winner() {
        let a = MetricVector {
            metrics: vec![entity(100, vec![50])],
        };
        let b = MetricVector {
            metrics: vec![entity(100, vec![40])],
        };
        assert_eq!(compare_metric_vectors(&a, &b), CompareResult::Winner);
        assert_eq!(compare_metric_vectors(&b, &a), CompareResult::Looser);
        assert_eq!(compare_metric_vectors(&a, &a), CompareResult::Tie);
    }

    #[test]
    fn metric_vector_priority_order() {
        // The higher-priority entity decides even when a lower-priority
        // one disagrees.
        let a = MetricVector {
            metrics: vec![entity(200, vec![1]), entity(100, vec![0])],
        };
        let b = MetricVector {
            metrics: vec![entity(200, vec![0]), entity(100, vec![9])],
        };
        assert_eq!(compare_metric_vectors(&a, &b), CompareResult::Winner);
    }

    #[test]
    fn metric_vector_tie_breaker() {
        let mut tb = entity(100, vec![7]);
        tb.is_best_path_tie_breaker = true;
        let a = MetricVector {
            metrics: vec![entity(200, vec![1]), tb.clone()],
        };
        let mut tb2 = tb;
        tb2.metric = vec![3];
        let b = MetricVector {
            metrics: vec![entity(200, vec![1]), tb2],
        };
        assert_eq!(compare_metric_vectors(&a, &b), CompareResult::TieWinner);
        assert_eq!(compare_metric_vectors(&b, &a), CompareResult::TieLooser);
    }

    #[test]
    fn metric_vector_loner() {
        // Entity present only on one side, judged by its compare type.
        let a = MetricVector {
            metrics: vec![entity(200, vec![1]), entity(100, vec![5])],
        };
        let b = MetricVector {
            metrics: vec![entity(200, vec![1])],
        };
        // entity() uses WinIfNotPresent: the side carrying it looses.
        assert_eq!(compare_metric_vectors(&a, &b), CompareResult::Looser);
        assert_eq!(compare_metric_vectors(&b, &a), CompareResult::Winner);
    }

    #[test]
    fn metric_vector_length_mismatch() {
        let a = MetricVector {
            metrics: vec![entity(100, vec![1, 2])],
        };
        let b = MetricVector {
            metrics: vec![entity(100, vec![1])],
        };
        assert_eq!(compare_metric_vectors(&a, &b), CompareResult::Error);
    }
}
