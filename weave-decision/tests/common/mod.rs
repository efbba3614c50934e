//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use weave_decision::link_state::LinkState;
use weave_decision::lsdb::{
    Adjacency, AdjacencyDatabase, CompareType, MetricEntity, MetricVector,
    PrefixDatabase, PrefixEntry, PrefixForwardingAlgorithm,
    PrefixForwardingType, PrefixType,
};
use weave_decision::prefix_state::PrefixState;

fn node_index(node: &str) -> u8 {
    node.as_bytes()[0] - b'a' + 1
}

// Address of the far end of the link, as seen from `node`.
pub fn link_nh_v4(node: &str, other: &str) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, node_index(node), node_index(other))
}

pub fn link_nh_v6(node: &str, other: &str) -> Ipv6Addr {
    Ipv6Addr::new(
        0xfe80,
        0,
        0,
        0,
        0,
        0,
        node_index(node) as u16,
        node_index(other) as u16,
    )
}

pub fn ifname(node: &str, other: &str) -> String {
    format!("{}-{}", node, other)
}

pub fn adjacency(
    node: &str,
    other: &str,
    metric: u64,
    adj_label: u32,
) -> Adjacency {
    Adjacency::new(
        other.to_owned(),
        ifname(node, other),
        link_nh_v4(node, other),
        link_nh_v6(node, other),
        metric,
        adj_label,
        false,
    )
}

pub fn adjacency_db(
    node: &str,
    node_label: u32,
    adjacencies: Vec<Adjacency>,
) -> AdjacencyDatabase {
    AdjacencyDatabase::new(
        node.to_owned(),
        node_label,
        false,
        adjacencies,
        None,
    )
}

pub fn prefix_db(node: &str, entries: Vec<PrefixEntry>) -> PrefixDatabase {
    PrefixDatabase::new(node.to_owned(), entries)
}

pub fn prefix_entry(
    prefix: IpNetwork,
    prefix_type: PrefixType,
    forwarding_type: PrefixForwardingType,
    forwarding_algorithm: PrefixForwardingAlgorithm,
) -> PrefixEntry {
    PrefixEntry::new(prefix, prefix_type, forwarding_type, forwarding_algorithm)
}

pub fn loopback_entry(node: &str) -> PrefixEntry {
    let addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, node_index(node) as u16);
    prefix_entry(
        IpNetwork::new(IpAddr::V6(addr), 128).unwrap(),
        PrefixType::Loopback,
        PrefixForwardingType::Ip,
        PrefixForwardingAlgorithm::SpEcmp,
    )
}

pub fn loopback_addr(node: &str) -> IpAddr {
    IpAddr::V6(Ipv6Addr::new(
        0x2001,
        0xdb8,
        0,
        0,
        0,
        0,
        0,
        node_index(node) as u16,
    ))
}

// A metric entity at the given priority; higher values win.
pub fn metric_entity(priority: i64, metric: Vec<i64>) -> MetricEntity {
    MetricEntity::new(
        priority,
        priority,
        CompareType::WinIfNotPresent,
        false,
        metric,
    )
}

// A tie-breaker entity: differences keep all advertisers in the
// winning set.
pub fn tie_breaker_entity(priority: i64, metric: Vec<i64>) -> MetricEntity {
    MetricEntity::new(priority, priority, CompareType::WinIfNotPresent, true, metric)
}

pub fn metric_vector(metrics: Vec<MetricEntity>) -> MetricVector {
    MetricVector { metrics }
}

// a -1- b -1- c, node labels 100/200/300, adjacency label 10001 on the
// a->b direction.
pub fn line_topology() -> LinkState {
    let mut link_state = LinkState::new("0".to_owned());
    link_state.update_adjacency_database(
        adjacency_db("a", 100, vec![adjacency("a", "b", 1, 10001)]),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "b",
            200,
            vec![adjacency("b", "a", 1, 0), adjacency("b", "c", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db("c", 300, vec![adjacency("c", "b", 1, 0)]),
        0,
        0,
    );
    link_state
}

// a-b-d / a-c-d, all metric 1, node labels 100/200/300/400.
pub fn diamond_topology() -> LinkState {
    let mut link_state = LinkState::new("0".to_owned());
    link_state.update_adjacency_database(
        adjacency_db(
            "a",
            100,
            vec![adjacency("a", "b", 1, 0), adjacency("a", "c", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "b",
            200,
            vec![adjacency("b", "a", 1, 0), adjacency("b", "d", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "c",
            300,
            vec![adjacency("c", "a", 1, 0), adjacency("c", "d", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "d",
            400,
            vec![adjacency("d", "b", 1, 0), adjacency("d", "c", 1, 0)],
        ),
        0,
        0,
    );
    link_state
}

// Full mesh over a, b and c, all metric 1.
pub fn full_mesh_topology(node_labels: [u32; 3]) -> LinkState {
    let mut link_state = LinkState::new("0".to_owned());
    let nodes = ["a", "b", "c"];
    for (node, node_label) in nodes.into_iter().zip(node_labels) {
        let adjacencies = nodes
            .iter()
            .filter(|other| **other != node)
            .map(|other| adjacency(node, other, 1, 0))
            .collect();
        link_state.update_adjacency_database(
            adjacency_db(node, node_label, adjacencies),
            0,
            0,
        );
    }
    link_state
}

pub fn prefix_state_with(databases: Vec<PrefixDatabase>) -> PrefixState {
    let mut prefix_state = PrefixState::default();
    for database in &databases {
        prefix_state.update_prefix_database(database);
    }
    prefix_state
}
