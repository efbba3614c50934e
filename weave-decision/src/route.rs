//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use derive_new::new;
use ipnetwork::IpNetwork;
use weave_utils::mpls::Label;
use weave_utils::southbound::{
    MplsRoute, NextHop, RouteDatabase, RouteDatabaseDelta, UnicastRoute,
};

use crate::lsdb::PrefixEntry;

// Computed unicast routing entry for one prefix.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RibUnicastEntry {
    pub prefix: IpNetwork,
    #[new(default)]
    pub nexthops: BTreeSet<NextHop>,
    // Winning advertisement, present for routes subject to best-path
    // selection.
    #[new(default)]
    pub best_prefix_entry: Option<PrefixEntry>,
    #[new(default)]
    pub best_nexthop: Option<NextHop>,
    #[new(default)]
    pub do_not_install: bool,
}

// Computed MPLS routing entry for one label.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RibMplsEntry {
    pub label: Label,
    pub nexthops: BTreeSet<NextHop>,
}

// Full computed routing state, rebuilt from scratch on every
// recomputation and diffed against the previously published one.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteDb {
    pub unicast_entries: BTreeMap<IpNetwork, RibUnicastEntry>,
    pub mpls_entries: BTreeMap<Label, RibMplsEntry>,
}

// ===== impl RibUnicastEntry =====

impl RibUnicastEntry {
    pub fn to_unicast_route(&self) -> UnicastRoute {
        UnicastRoute::new(
            self.prefix,
            self.nexthops.clone(),
            self.best_nexthop.clone(),
            self.do_not_install,
        )
    }
}

// ===== impl RibMplsEntry =====

impl RibMplsEntry {
    pub fn to_mpls_route(&self) -> MplsRoute {
        MplsRoute::new(self.label, self.nexthops.clone())
    }
}

// ===== impl RouteDb =====

impl RouteDb {
    pub fn is_empty(&self) -> bool {
        self.unicast_entries.is_empty() && self.mpls_entries.is_empty()
    }

    pub fn to_route_database(&self, this_node_name: String) -> RouteDatabase {
        RouteDatabase {
            this_node_name,
            unicast_routes: self
                .unicast_entries
                .values()
                .map(RibUnicastEntry::to_unicast_route)
                .collect(),
            mpls_routes: self
                .mpls_entries
                .values()
                .map(RibMplsEntry::to_mpls_route)
                .collect(),
        }
    }

    // Applies a published delta, producing the database it described.
    pub fn apply(&mut self, delta: &RouteDatabaseDelta) {
        for route in &delta.unicast_routes_to_update {
            let mut entry = RibUnicastEntry::new(route.prefix);
            entry.nexthops = route.next_hops.clone();
            entry.best_nexthop = route.best_next_hop.clone();
            entry.do_not_install = route.do_not_install;
            self.unicast_entries.insert(route.prefix, entry);
        }
        for prefix in &delta.unicast_routes_to_delete {
            self.unicast_entries.remove(prefix);
        }
        for route in &delta.mpls_routes_to_update {
            self.mpls_entries.insert(
                route.top_label,
                RibMplsEntry::new(route.top_label, route.next_hops.clone()),
            );
        }
        for label in &delta.mpls_routes_to_delete {
            self.mpls_entries.remove(label);
        }
    }
}

// ===== global functions =====

// Computes the incremental delta that turns `old` into `new`. An entry
// lands in the update set when added or changed, in the delete set when
// withdrawn, and nowhere when identical.
pub fn get_route_delta(new: &RouteDb, old: &RouteDb) -> RouteDatabaseDelta {
    let mut delta = RouteDatabaseDelta::default();

    for (prefix, entry) in &new.unicast_entries {
        if old.unicast_entries.get(prefix) == Some(entry) {
            continue;
        }
        delta.unicast_routes_to_update.push(entry.to_unicast_route());
    }
    for prefix in old.unicast_entries.keys() {
        if !new.unicast_entries.contains_key(prefix) {
            delta.unicast_routes_to_delete.push(*prefix);
        }
    }

    for (label, entry) in &new.mpls_entries {
        if old.mpls_entries.get(label) == Some(entry) {
            continue;
        }
        delta.mpls_routes_to_update.push(entry.to_mpls_route());
    }
    for label in old.mpls_entries.keys() {
        if !new.mpls_entries.contains_key(label) {
            delta.mpls_routes_to_delete.push(*label);
        }
    }

    delta
}

// ===== unit tests =====
