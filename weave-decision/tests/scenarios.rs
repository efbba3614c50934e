//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use std::collections::BTreeSet;
use std::net::IpAddr;

use const_addrs::{ip, net};
use maplit::btreeset;
use weave_decision::lsdb::{
    PrefixForwardingAlgorithm, PrefixForwardingType, PrefixType,
};
use weave_decision::spf::SpfSolver;
use weave_utils::ip::{AddressFamily, IpAddrExt};
use weave_utils::mpls::Label;
use weave_utils::southbound::{
    MplsAction, MplsRoute, NextHop, RouteDatabaseDelta,
};

use common::*;

fn solver(my_node_name: &str) -> SpfSolver {
    SpfSolver::new(my_node_name.to_owned(), true, false, false, false)
}

fn nexthop(
    node: &str,
    other: &str,
    af: AddressFamily,
    metric: u64,
    mpls_action: Option<MplsAction>,
) -> NextHop {
    let addr = match af {
        AddressFamily::Ipv4 => IpAddr::V4(link_nh_v4(node, other)),
        AddressFamily::Ipv6 => IpAddr::V6(link_nh_v6(node, other)),
    };
    NextHop::new(
        addr,
        Some(ifname(node, other)),
        metric,
        mpls_action,
        false,
        Some("0".to_owned()),
    )
}

// Linear 3-node topology, interior prefix advertised by the far end.
#[test]
fn linear_ecmp_interior_prefix() {
    let link_state = line_topology();
    let prefix = net!("10.0.0.0/24");
    let prefix_state = prefix_state_with(vec![prefix_db(
        "c",
        vec![prefix_entry(
            prefix,
            PrefixType::Weave,
            PrefixForwardingType::Ip,
            PrefixForwardingAlgorithm::SpEcmp,
        )],
    )]);

    let mut solver = solver("a");
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();

    // One unicast route through b, metric 2.
    assert_eq!(route_db.unicast_entries.len(), 1);
    let entry = &route_db.unicast_entries[&prefix];
    assert_eq!(
        entry.nexthops,
        btreeset! {nexthop("a", "b", AddressFamily::Ipv4, 2, None)}
    );

    // Own node label pops and looks up; b's label is one hop away
    // (penultimate-hop-pop); c's label is swapped through b; the
    // adjacency label pops over the direct link.
    assert_eq!(route_db.mpls_entries.len(), 4);
    assert_eq!(
        route_db.mpls_entries[&Label::new(100)].nexthops,
        btreeset! {NextHop::new(
            IpAddr::unspecified(AddressFamily::Ipv6),
            None,
            0,
            Some(MplsAction::PopAndLookup),
            false,
            None,
        )}
    );
    assert_eq!(
        route_db.mpls_entries[&Label::new(200)].nexthops,
        btreeset! {nexthop(
            "a", "b", AddressFamily::Ipv6, 1, Some(MplsAction::Php)
        )}
    );
    assert_eq!(
        route_db.mpls_entries[&Label::new(300)].nexthops,
        btreeset! {nexthop(
            "a", "b", AddressFamily::Ipv6, 2,
            Some(MplsAction::Swap(Label::new(300)))
        )}
    );
    assert_eq!(
        route_db.mpls_entries[&Label::new(10001)].nexthops,
        btreeset! {nexthop(
            "a", "b", AddressFamily::Ipv6, 1, Some(MplsAction::Php)
        )}
    );
}

// Diamond topology: equal-cost paths through both middle nodes.
#[test]
fn diamond_ecmp() {
    let link_state = diamond_topology();
    let prefix = net!("10.1.0.0/16");
    let prefix_state = prefix_state_with(vec![prefix_db(
        "d",
        vec![prefix_entry(
            prefix,
            PrefixType::Weave,
            PrefixForwardingType::Ip,
            PrefixForwardingAlgorithm::SpEcmp,
        )],
    )]);

    let mut solver = solver("a");
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();

    // Both equal-cost first hops are used.
    let entry = &route_db.unicast_entries[&prefix];
    assert_eq!(
        entry.nexthops,
        btreeset! {
            nexthop("a", "b", AddressFamily::Ipv4, 2, None),
            nexthop("a", "c", AddressFamily::Ipv4, 2, None),
        }
    );

    // d's node label is swapped over both paths.
    assert_eq!(
        route_db.mpls_entries[&Label::new(400)].nexthops,
        btreeset! {
            nexthop("a", "b", AddressFamily::Ipv6, 2,
                Some(MplsAction::Swap(Label::new(400)))),
            nexthop("a", "c", AddressFamily::Ipv6, 2,
                Some(MplsAction::Swap(Label::new(400)))),
        }
    );
}

// BGP best-path selection with the IGP distance as final tiebreak.
#[test]
fn bgp_best_path_igp_tiebreak() {
    let mut link_state = line_topology();
    // Make the metrics asymmetric: dist(a, b) = 2 and dist(a, c) = 3.
    link_state.update_adjacency_database(
        adjacency_db("a", 100, vec![adjacency("a", "b", 2, 0)]),
        0,
        0,
    );

    let prefix = net!("2001:db8:100::/64");
    let mv = metric_vector(vec![metric_entity(100, vec![50])]);
    let mut entry_b = prefix_entry(
        prefix,
        PrefixType::Bgp,
        PrefixForwardingType::Ip,
        PrefixForwardingAlgorithm::SpEcmp,
    );
    entry_b.metric_vector = Some(mv.clone());
    let mut entry_c = entry_b.clone();
    entry_c.metric_vector = Some(mv);

    let prefix_state = prefix_state_with(vec![
        prefix_db("b", vec![entry_b, loopback_entry("b")]),
        prefix_db("c", vec![entry_c, loopback_entry("c")]),
    ]);

    let mut solver =
        SpfSolver::new("a".to_owned(), false, false, false, true);
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();

    let entry = &route_db.unicast_entries[&prefix];
    // b is closer and wins the tiebreak.
    let best_prefix_entry = entry.best_prefix_entry.as_ref().unwrap();
    assert_eq!(best_prefix_entry.prefix, prefix);
    let best_nexthop = entry.best_nexthop.as_ref().unwrap();
    assert_eq!(best_nexthop.addr, loopback_addr("b"));
    assert_eq!(best_nexthop.metric, 2);
    assert!(!entry.do_not_install);
    assert_eq!(
        entry.nexthops,
        btreeset! {nexthop("a", "b", AddressFamily::Ipv6, 2, None)}
    );
}

// A prefix advertised with mixed BGP and non-BGP types is skipped.
#[test]
fn mixed_bgp_and_interior_prefix_is_skipped() {
    let link_state = line_topology();
    let prefix = net!("2001:db8:200::/64");

    let mut bgp_entry = prefix_entry(
        prefix,
        PrefixType::Bgp,
        PrefixForwardingType::Ip,
        PrefixForwardingAlgorithm::SpEcmp,
    );
    bgp_entry.metric_vector =
        Some(metric_vector(vec![metric_entity(100, vec![1])]));
    let interior_entry = prefix_entry(
        prefix,
        PrefixType::Weave,
        PrefixForwardingType::Ip,
        PrefixForwardingAlgorithm::SpEcmp,
    );

    let prefix_state = prefix_state_with(vec![
        prefix_db("a", vec![bgp_entry]),
        prefix_db("b", vec![interior_entry]),
    ]);

    let mut solver = solver("c");
    let route_db =
        solver.build_route_db("c", &link_state, &prefix_state);
    assert!(route_db
        .map_or(true, |db| !db.unicast_entries.contains_key(&prefix)));
    assert_eq!(solver.counters.skipped_unicast_route, 1);
}

// KSP2 anycast: the local node is part of the winning set and splices
// in the static next-hops behind its prepend label.
#[test]
fn ksp2_anycast_with_local_static_routes() {
    let link_state = full_mesh_topology([100, 200, 300]);
    let prefix = net!("2001:db8:300::/64");

    let entries = ["a", "b", "c"]
        .into_iter()
        .enumerate()
        .map(|(index, node)| {
            let mut entry = prefix_entry(
                prefix,
                PrefixType::Bgp,
                PrefixForwardingType::SrMpls,
                PrefixForwardingAlgorithm::Ksp2EdEcmp,
            );
            // Identical vectors except a tie-breaker entity, so every
            // advertiser stays in the winning set.
            entry.metric_vector = Some(metric_vector(vec![
                metric_entity(200, vec![100]),
                tie_breaker_entity(100, vec![index as i64]),
            ]));
            entry.prepend_label = Some(9001);
            (node, entry)
        })
        .collect::<Vec<_>>();

    let prefix_state = prefix_state_with(
        entries
            .into_iter()
            .map(|(node, entry)| {
                prefix_db(node, vec![entry, loopback_entry(node)])
            })
            .collect(),
    );

    let mut solver = solver("a");

    // Static MPLS route behind the prepend label.
    let static_nexthop = NextHop::new(
        ip!("2001:db8:ffff::1"),
        None,
        0,
        None,
        true,
        None,
    );
    solver.push_routes_delta_updates(RouteDatabaseDelta {
        mpls_routes_to_update: vec![MplsRoute::new(
            Label::new(9001),
            btreeset! {static_nexthop.clone()},
        )],
        ..Default::default()
    });
    let static_delta = solver.process_static_route_updates().unwrap();
    assert_eq!(static_delta.mpls_routes_to_update.len(), 1);

    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();
    let entry = &route_db.unicast_entries[&prefix];

    // Two dynamic first-shortest paths with the prepend label pushed,
    // and the static next-hop contributed by the local advertisement.
    // No second-shortest path survives containment filtering.
    let push_9001 = Some(MplsAction::Push(vec![Label::new(9001)]));
    let expected_dynamic = btreeset! {
        NextHop::new(
            IpAddr::V6(link_nh_v6("a", "b")),
            Some(ifname("a", "b")),
            1,
            push_9001.clone(),
            true,
            Some("0".to_owned()),
        ),
        NextHop::new(
            IpAddr::V6(link_nh_v6("a", "c")),
            Some(ifname("a", "c")),
            1,
            push_9001,
            true,
            Some("0".to_owned()),
        ),
    };
    let mut expected = expected_dynamic;
    expected.insert(static_nexthop);
    assert_eq!(entry.nexthops, expected);

    // No path may run through the other anycast advertiser.
    assert!(entry.nexthops.iter().all(|nexthop| nexthop.metric <= 1));
}

// A KSP2 prefix below its advertised minimum next-hop count is not
// programmed.
#[test]
fn ksp2_min_nexthop_enforced() {
    let link_state = full_mesh_topology([100, 200, 300]);
    let prefix = net!("2001:db8:400::/64");

    let mut entry = prefix_entry(
        prefix,
        PrefixType::Weave,
        PrefixForwardingType::SrMpls,
        PrefixForwardingAlgorithm::Ksp2EdEcmp,
    );
    entry.min_nexthop = Some(5);

    let prefix_state =
        prefix_state_with(vec![prefix_db("c", vec![entry])]);

    let mut solver = solver("a");
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();
    assert!(!route_db.unicast_entries.contains_key(&prefix));
}

// Node-label collision: the lexicographically greater node keeps the
// label.
#[test]
fn node_label_collision() {
    let mut link_state = line_topology();
    // b and c both advertise label 500.
    link_state.update_adjacency_database(
        adjacency_db(
            "b",
            500,
            vec![adjacency("b", "a", 1, 0), adjacency("b", "c", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db("c", 500, vec![adjacency("c", "b", 1, 0)]),
        0,
        0,
    );

    let mut solver = solver("a");
    let route_db = solver
        .build_route_db("a", &link_state, &weave_decision::prefix_state::PrefixState::default())
        .unwrap();

    // The surviving route leads to c, two hops away.
    let entry = &route_db.mpls_entries[&Label::new(500)];
    assert_eq!(
        entry.nexthops,
        btreeset! {nexthop(
            "a", "b", AddressFamily::Ipv6, 2,
            Some(MplsAction::Swap(Label::new(500)))
        )}
    );
    assert_eq!(solver.counters.duplicate_node_label, 1);
}

// With LFA computation enabled, loop-free alternates show up next to
// the shortest-path next-hops.
#[test]
fn lfa_next_hops() {
    let mut link_state = weave_decision::link_state::LinkState::new("0".to_owned());
    // a-b(1), a-c(10), b-d(1), c-d(1): c offers a loop-free alternate
    // towards d.
    link_state.update_adjacency_database(
        adjacency_db(
            "a",
            0,
            vec![adjacency("a", "b", 1, 0), adjacency("a", "c", 10, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "b",
            0,
            vec![adjacency("b", "a", 1, 0), adjacency("b", "d", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "c",
            0,
            vec![adjacency("c", "a", 10, 0), adjacency("c", "d", 1, 0)],
        ),
        0,
        0,
    );
    link_state.update_adjacency_database(
        adjacency_db(
            "d",
            0,
            vec![adjacency("d", "b", 1, 0), adjacency("d", "c", 1, 0)],
        ),
        0,
        0,
    );

    let prefix = net!("2001:db8:500::/64");
    let prefix_state = prefix_state_with(vec![prefix_db(
        "d",
        vec![prefix_entry(
            prefix,
            PrefixType::Weave,
            PrefixForwardingType::Ip,
            PrefixForwardingAlgorithm::SpEcmp,
        )],
    )]);

    let mut solver =
        SpfSolver::new("a".to_owned(), false, true, false, false);
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();

    let entry = &route_db.unicast_entries[&prefix];
    let metrics = entry
        .nexthops
        .iter()
        .map(|nexthop| nexthop.metric)
        .collect::<BTreeSet<_>>();
    // Shortest path through b (metric 2) and the alternate through c
    // (metric 11).
    assert_eq!(metrics, btreeset! {2, 11});
}

// A prefix advertised by the local node itself is never programmed.
#[test]
fn self_advertised_prefix_is_shadowed() {
    let link_state = line_topology();
    let prefix = net!("2001:db8:600::/64");
    let prefix_state = prefix_state_with(vec![
        prefix_db(
            "a",
            vec![prefix_entry(
                prefix,
                PrefixType::Weave,
                PrefixForwardingType::Ip,
                PrefixForwardingAlgorithm::SpEcmp,
            )],
        ),
        prefix_db(
            "c",
            vec![prefix_entry(
                prefix,
                PrefixType::Weave,
                PrefixForwardingType::Ip,
                PrefixForwardingAlgorithm::SpEcmp,
            )],
        ),
    ]);

    let mut solver = solver("a");
    let route_db = solver
        .build_route_db("a", &link_state, &prefix_state)
        .unwrap();
    assert!(!route_db.unicast_entries.contains_key(&prefix));
}

// The computing node must exist in the link state.
#[test]
fn unknown_node_has_no_route_db() {
    let link_state = line_topology();
    let prefix_state =
        weave_decision::prefix_state::PrefixState::default();
    let mut solver = solver("x");
    assert!(solver
        .build_route_db("x", &link_state, &prefix_state)
        .is_none());
}
