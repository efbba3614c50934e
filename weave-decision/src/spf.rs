//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use ipnetwork::IpNetwork;
use itertools::Itertools;
use tracing::debug;
use weave_utils::ip::{AddressFamily, IpAddrExt, IpNetworkExt};
use weave_utils::mpls::{is_mpls_label_valid, Label};
use weave_utils::southbound::{MplsAction, NextHop, RouteDatabaseDelta};

use crate::debug::Debug;
use crate::error::Error;
use crate::link_state::{
    path_a_in_path_b, LinkState, LinkStateMetric, SpfResult,
};
use crate::lsdb::{
    compare_metric_vectors, CompareResult, CompareType, MetricEntity,
    MetricVector, PrefixEntry, PrefixForwardingAlgorithm,
    PrefixForwardingType, PrefixType, METRIC_ENTITY_IGP_COST,
    METRIC_PRIORITY_IGP_COST,
};
use crate::prefix_state::PrefixState;
use crate::route::{RibMplsEntry, RibUnicastEntry, RouteDb};

// Advertisements of one prefix, keyed by advertising node.
pub type NodePrefixes = BTreeMap<String, PrefixEntry>;

// Static MPLS routing table, fed through the static-update stream.
pub type StaticMplsRoutes = BTreeMap<Label, BTreeSet<NextHop>>;

// Outcome of best-path selection for one prefix.
#[derive(Debug, Default)]
pub struct BestPathResult {
    pub success: bool,
    pub nodes: BTreeSet<String>,
    pub best_node: Option<String>,
    pub best_vector: Option<MetricVector>,
    pub best_igp_metric: Option<i64>,
}

// Counters exported by the solver.
#[derive(Debug, Default)]
pub struct SpfSolverCounters {
    pub route_build_runs: u64,
    pub route_build_ms: u64,
    pub path_build_ms: u64,
    pub skipped_unicast_route: u64,
    pub skipped_mpls_route: u64,
    pub duplicate_node_label: u64,
    pub no_route_to_prefix: u64,
    pub no_route_to_label: u64,
    pub missing_loopback_addr: u64,
    pub incompatible_forwarding_type: u64,
    pub errors: u64,
}

// The route-computation engine: turns the link-state and prefix
// databases, seen from one node's perspective, into a route database.
#[derive(Debug)]
pub struct SpfSolver {
    my_node_name: String,
    enable_v4: bool,
    compute_lfa_paths: bool,
    bgp_dry_run: bool,
    bgp_use_igp_metric: bool,
    static_routes: StaticMplsRoutes,
    static_routes_updates: Vec<RouteDatabaseDelta>,
    pub counters: SpfSolverCounters,
}

// ===== impl SpfSolver =====

impl SpfSolver {
    pub fn new(
        my_node_name: String,
        enable_v4: bool,
        compute_lfa_paths: bool,
        bgp_dry_run: bool,
        bgp_use_igp_metric: bool,
    ) -> SpfSolver {
        SpfSolver {
            my_node_name,
            enable_v4,
            compute_lfa_paths,
            bgp_dry_run,
            bgp_use_igp_metric,
            static_routes: Default::default(),
            static_routes_updates: Default::default(),
            counters: Default::default(),
        }
    }

    //
    // Static MPLS routes.
    //

    pub fn static_routes_updated(&self) -> bool {
        !self.static_routes_updates.is_empty()
    }

    pub fn push_routes_delta_updates(&mut self, delta: RouteDatabaseDelta) {
        self.static_routes_updates.push(delta);
    }

    pub fn get_static_routes(&self) -> &StaticMplsRoutes {
        &self.static_routes
    }

    // Squashes the queued static-route deltas (later updates win, an
    // update cancels a pending delete and vice-versa), folds them into
    // the static table and returns the consolidated delta.
    pub fn process_static_route_updates(
        &mut self,
    ) -> Option<RouteDatabaseDelta> {
        let mut routes_to_update = BTreeMap::new();
        let mut routes_to_delete = BTreeSet::new();

        for update in self.static_routes_updates.drain(..) {
            for route in update.mpls_routes_to_update {
                debug!(label = %route.top_label, "static mpls route update");
                routes_to_delete.remove(&route.top_label);
                routes_to_update.insert(route.top_label, route);
            }
            for label in update.mpls_routes_to_delete {
                debug!(%label, "static mpls route delete");
                routes_to_update.remove(&label);
                routes_to_delete.insert(label);
            }
        }

        if routes_to_update.is_empty() && routes_to_delete.is_empty() {
            return None;
        }

        let mut delta = RouteDatabaseDelta {
            this_node_name: self.my_node_name.clone(),
            ..Default::default()
        };
        for (label, route) in routes_to_update {
            self.static_routes.insert(label, route.next_hops.clone());
            delta.mpls_routes_to_update.push(route);
        }
        for label in routes_to_delete {
            self.static_routes.remove(&label);
            delta.mpls_routes_to_delete.push(label);
        }
        Some(delta)
    }

    //
    // Route database computation.
    //

    // Builds the route database from the perspective of the given node.
    // Returns None when the node is absent from the link state.
    pub fn build_route_db(
        &mut self,
        my_node_name: &str,
        link_state: &LinkState,
        prefix_state: &PrefixState,
    ) -> Option<RouteDb> {
        if !link_state.has_node(my_node_name) {
            return None;
        }

        let start_time = Instant::now();
        self.counters.route_build_runs += 1;

        let mut route_db = RouteDb::default();

        //
        // Unicast route best paths: IP and IP-over-MPLS routes.
        //

        for (prefix, node_prefixes) in prefix_state.prefixes() {
            let mut has_bgp = false;
            let mut has_non_bgp = false;
            let mut missing_mv = false;
            let mut has_sp_ecmp = false;
            for (node_name, entry) in node_prefixes {
                let is_bgp = entry.prefix_type == PrefixType::Bgp;
                has_bgp |= is_bgp;
                has_non_bgp |= !is_bgp;
                if is_bgp && entry.metric_vector.is_none() {
                    missing_mv = true;
                    Error::MissingMetricVector(*prefix, node_name.clone())
                        .log();
                }
                has_sp_ecmp |= entry.forwarding_algorithm
                    == PrefixForwardingAlgorithm::SpEcmp;
            }

            // Skip BGP prefixes that have data issues.
            if has_bgp {
                if has_non_bgp {
                    Error::MixedPrefixAdvertisements(*prefix).log();
                    self.counters.skipped_unicast_route += 1;
                    continue;
                }
                if missing_mv {
                    self.counters.skipped_unicast_route += 1;
                    continue;
                }
            }

            // Don't shadow prefixes this node originates itself.
            if node_prefixes.contains_key(my_node_name) && !has_bgp {
                continue;
            }

            let is_v4 = prefix.address_family() == AddressFamily::Ipv4;
            if is_v4 && !self.enable_v4 {
                Error::V4PrefixDisabled(*prefix).log();
                self.counters.skipped_unicast_route += 1;
                continue;
            }

            if has_sp_ecmp && has_bgp {
                self.select_ecmp_bgp(
                    &mut route_db.unicast_entries,
                    my_node_name,
                    prefix,
                    node_prefixes,
                    is_v4,
                    link_state,
                    prefix_state,
                );
            } else if has_sp_ecmp {
                self.select_ecmp_weave(
                    &mut route_db.unicast_entries,
                    my_node_name,
                    prefix,
                    node_prefixes,
                    is_v4,
                    link_state,
                );
            } else {
                let nodes = self.get_best_announcing_nodes(
                    my_node_name,
                    prefix,
                    node_prefixes,
                    has_bgp,
                    true,
                    link_state,
                );
                if !nodes.success || nodes.nodes.is_empty() {
                    continue;
                }
                self.select_ksp2(
                    &mut route_db.unicast_entries,
                    prefix,
                    my_node_name,
                    &nodes,
                    node_prefixes,
                    has_bgp,
                    is_v4,
                    link_state,
                    prefix_state,
                );
            }
        }

        //
        // MPLS routes for all node labels.
        //

        let mut label_to_node: BTreeMap<Label, (String, RibMplsEntry)> =
            BTreeMap::new();
        for adj_db in link_state.get_adjacency_databases().values() {
            let top_label = adj_db.node_label;
            // Label not set: non-segment-routing node.
            if top_label == 0 {
                continue;
            }
            if !is_mpls_label_valid(top_label) {
                Error::InvalidNodeLabel(
                    top_label,
                    adj_db.this_node_name.clone(),
                )
                .log();
                self.counters.skipped_mpls_route += 1;
                continue;
            }
            let label = Label::new(top_label);

            // Node label collisions happen when segmented networks
            // allocating from the same range join. The higher node name
            // keeps the label.
            if let Some((owner, _)) = label_to_node.get(&label) {
                Debug::DuplicateNodeLabel(
                    top_label,
                    owner,
                    &adj_db.this_node_name,
                )
                .log();
                self.counters.duplicate_node_label += 1;
                if adj_db.this_node_name < *owner {
                    continue;
                }
            }

            // The local node's own label pops and hands the packet to
            // the next layer.
            if adj_db.this_node_name == my_node_name {
                let nexthop = NextHop::new(
                    std::net::IpAddr::unspecified(AddressFamily::Ipv6),
                    None,
                    0,
                    Some(MplsAction::PopAndLookup),
                    false,
                    None,
                );
                label_to_node.insert(
                    label,
                    (
                        adj_db.this_node_name.clone(),
                        RibMplsEntry::new(
                            label,
                            std::iter::once(nexthop).collect(),
                        ),
                    ),
                );
                continue;
            }

            let dst_nodes = std::iter::once(adj_db.this_node_name.clone())
                .collect::<BTreeSet<_>>();
            let (min_metric, nexthop_nodes) = self.get_next_hops_with_metric(
                my_node_name,
                &dst_nodes,
                false,
                link_state,
            );
            if nexthop_nodes.is_empty() {
                Error::NoRouteToLabel(
                    top_label,
                    adj_db.this_node_name.clone(),
                )
                .log();
                self.counters.no_route_to_label += 1;
                continue;
            }

            let nexthops = self.get_next_hops(
                my_node_name,
                &dst_nodes,
                false,
                false,
                min_metric,
                &nexthop_nodes,
                Some(label),
                link_state,
            );
            label_to_node.insert(
                label,
                (
                    adj_db.this_node_name.clone(),
                    RibMplsEntry::new(label, nexthops),
                ),
            );
        }
        route_db.mpls_entries.extend(
            label_to_node
                .into_iter()
                .map(|(label, (_, entry))| (label, entry)),
        );

        //
        // MPLS routes for all of this node's adjacency labels.
        //

        for link in link_state.links_from_node(my_node_name) {
            let top_label = link.get_adj_label_from_node(my_node_name);
            if top_label == 0 {
                continue;
            }
            if !is_mpls_label_valid(top_label) {
                Error::InvalidAdjacencyLabel(
                    top_label,
                    link.directional_to_string(my_node_name),
                )
                .log();
                self.counters.skipped_mpls_route += 1;
                continue;
            }
            let label = Label::new(top_label);
            let nexthop = NextHop::new(
                link.get_nh_v6_from_node(my_node_name),
                Some(link.get_iface_from_node(my_node_name).to_owned()),
                link.get_metric_from_node(my_node_name),
                Some(MplsAction::Php),
                false,
                Some(link.get_area().to_owned()),
            );
            route_db.mpls_entries.insert(
                label,
                RibMplsEntry::new(label, std::iter::once(nexthop).collect()),
            );
        }

        self.counters.route_build_ms +=
            start_time.elapsed().as_millis() as u64;
        Some(route_db)
    }

    //
    // Best-path selection.
    //

    // Determines the set of nodes whose advertisements win for a
    // prefix, and the best among them.
    fn get_best_announcing_nodes(
        &mut self,
        my_node_name: &str,
        prefix: &IpNetwork,
        node_prefixes: &NodePrefixes,
        has_bgp: bool,
        use_ksp2: bool,
        link_state: &LinkState,
    ) -> BestPathResult {
        let mut dst_nodes = BestPathResult::default();

        // KSP2 requires every advertiser to use MPLS encapsulation.
        if use_ksp2 {
            for (node_name, entry) in node_prefixes {
                if entry.forwarding_type != PrefixForwardingType::SrMpls {
                    Error::IncompatibleForwardingType(
                        *prefix,
                        node_name.clone(),
                    )
                    .log();
                    self.counters.incompatible_forwarding_type += 1;
                    return dst_nodes;
                }
            }
        }

        // Every advertiser of a non-BGP prefix is a best node.
        if !has_bgp {
            for node_name in node_prefixes.keys() {
                if node_name == my_node_name {
                    dst_nodes.nodes.clear();
                    return dst_nodes;
                }
                dst_nodes.nodes.insert(node_name.clone());
            }
            dst_nodes.success = true;
            return self.maybe_filter_drained_nodes(dst_nodes, link_state);
        }

        let best_path = self.run_best_path_selection_bgp(
            my_node_name,
            prefix,
            node_prefixes,
            link_state,
        );
        if !best_path.success {
            Error::NoRouteToPrefix(*prefix).log();
            self.counters.no_route_to_prefix += 1;
            return dst_nodes;
        }

        if !use_ksp2 {
            // Don't announce a BGP prefix this node itself originates.
            if best_path.nodes.contains(my_node_name) {
                Debug::SelfOriginatedBestPath(prefix).log();
                return dst_nodes;
            }
            return self.maybe_filter_drained_nodes(best_path, link_state);
        }

        // With KSP2, our own advertisement stays in the winning set when
        // other nodes share it and we carry a prepend label for it: the
        // static next-hops behind that label are spliced in later.
        let label_exists_for_my_node = node_prefixes
            .get(my_node_name)
            .is_some_and(|entry| entry.prepend_label.is_some());
        if !best_path.nodes.contains(my_node_name)
            || (best_path.nodes.len() > 1 && label_exists_for_my_node)
        {
            return self.maybe_filter_drained_nodes(best_path, link_state);
        }

        Debug::SelfOriginatedBestPath(prefix).log();
        dst_nodes
    }

    // Orders BGP advertisers by their metric vectors.
    fn run_best_path_selection_bgp(
        &mut self,
        my_node_name: &str,
        prefix: &IpNetwork,
        node_prefixes: &NodePrefixes,
        link_state: &LinkState,
    ) -> BestPathResult {
        let mut ret = BestPathResult::default();
        let spf_result = link_state.get_spf_result(my_node_name);

        for (node_name, prefix_entry) in node_prefixes {
            // Skip unreachable advertisers.
            let Some(spf_node) = spf_result.get(node_name) else {
                Error::NodeUnreachable(node_name.clone()).log();
                continue;
            };

            let Some(metric_vector) = &prefix_entry.metric_vector else {
                Error::MissingMetricVector(*prefix, node_name.clone()).log();
                continue;
            };

            // The IGP-cost entity is synthesized here and must never
            // arrive from the outside.
            if metric_vector
                .get_entity(METRIC_ENTITY_IGP_COST)
                .is_some()
            {
                Error::UnexpectedIgpCostEntity(*prefix, node_name.clone())
                    .log();
                self.counters.errors += 1;
                continue;
            }

            let mut metric_vector = metric_vector.clone();
            if self.bgp_use_igp_metric {
                let igp_metric = spf_node.metric as i64;
                if ret.best_igp_metric.map_or(true, |best| best > igp_metric) {
                    ret.best_igp_metric = Some(igp_metric);
                }
                // Lower IGP distance must win, hence the negation.
                metric_vector.metrics.push(MetricEntity::new(
                    METRIC_ENTITY_IGP_COST,
                    METRIC_PRIORITY_IGP_COST,
                    CompareType::WinIfNotPresent,
                    false,
                    vec![-igp_metric],
                ));
                Debug::AttachIgpMetric(prefix, node_name, igp_metric).log();
            }

            let result = match &ret.best_vector {
                Some(best_vector) => {
                    compare_metric_vectors(&metric_vector, best_vector)
                }
                None => CompareResult::Winner,
            };
            match result {
                CompareResult::Winner => {
                    ret.nodes.clear();
                    ret.best_vector = Some(metric_vector);
                    ret.best_node = Some(node_name.clone());
                    ret.nodes.insert(node_name.clone());
                }
                CompareResult::TieWinner => {
                    ret.best_vector = Some(metric_vector);
                    ret.best_node = Some(node_name.clone());
                    ret.nodes.insert(node_name.clone());
                }
                CompareResult::TieLooser => {
                    ret.nodes.insert(node_name.clone());
                }
                CompareResult::Tie => {
                    Error::BestPathTie(*prefix).log();
                    return ret;
                }
                CompareResult::Error => {
                    Error::BestPathError(*prefix).log();
                    return ret;
                }
                CompareResult::Looser => (),
            }
        }
        ret.success = true;
        ret
    }

    // Removes drained nodes from the winning set, unless that would
    // empty it.
    fn maybe_filter_drained_nodes(
        &self,
        result: BestPathResult,
        link_state: &LinkState,
    ) -> BestPathResult {
        let filtered = result
            .nodes
            .iter()
            .filter(|node| !link_state.is_node_overloaded(node))
            .cloned()
            .collect::<BTreeSet<_>>();
        if filtered.is_empty() {
            result
        } else {
            BestPathResult {
                nodes: filtered,
                ..result
            }
        }
    }

    // The largest minimum-next-hop requirement advertised by any of the
    // winning nodes.
    fn get_min_next_hop_threshold(
        &self,
        best_path: &BestPathResult,
        node_prefixes: &NodePrefixes,
    ) -> Option<u64> {
        best_path
            .nodes
            .iter()
            .filter_map(|node| node_prefixes.get(node))
            .filter_map(|entry| entry.min_nexthop)
            .max()
    }

    //
    // Route selection.
    //

    // Equal-cost shortest-path routes for a prefix advertised with the
    // plain interior type.
    #[allow(clippy::too_many_arguments)]
    fn select_ecmp_weave(
        &mut self,
        unicast_entries: &mut BTreeMap<IpNetwork, RibUnicastEntry>,
        my_node_name: &str,
        prefix: &IpNetwork,
        node_prefixes: &NodePrefixes,
        is_v4: bool,
        link_state: &LinkState,
    ) {
        let ret = self.get_best_announcing_nodes(
            my_node_name,
            prefix,
            node_prefixes,
            false,
            false,
            link_state,
        );
        if !ret.success {
            return;
        }
        let prefix_nodes = ret.nodes;

        let per_destination = get_prefix_forwarding_type(node_prefixes)
            == PrefixForwardingType::SrMpls;

        let (min_metric, nexthop_nodes) = self.get_next_hops_with_metric(
            my_node_name,
            &prefix_nodes,
            per_destination,
            link_state,
        );
        if nexthop_nodes.is_empty() {
            tracing::warn!(
                %prefix,
                advertised_by = %prefix_nodes.iter().join(", "),
                "no route to prefix"
            );
            self.counters.no_route_to_prefix += 1;
            return;
        }

        let mut entry = RibUnicastEntry::new(*prefix);
        entry.nexthops = self.get_next_hops(
            my_node_name,
            &prefix_nodes,
            is_v4,
            per_destination,
            min_metric,
            &nexthop_nodes,
            None,
            link_state,
        );
        unicast_entries.insert(*prefix, entry);
    }

    // Equal-cost shortest-path routes for a BGP prefix, annotated with
    // the winning advertisement and its loopback next-hop.
    #[allow(clippy::too_many_arguments)]
    fn select_ecmp_bgp(
        &mut self,
        unicast_entries: &mut BTreeMap<IpNetwork, RibUnicastEntry>,
        my_node_name: &str,
        prefix: &IpNetwork,
        node_prefixes: &NodePrefixes,
        is_v4: bool,
        link_state: &LinkState,
        prefix_state: &PrefixState,
    ) {
        let dst_info = self.get_best_announcing_nodes(
            my_node_name,
            prefix,
            node_prefixes,
            true,
            false,
            link_state,
        );
        if !dst_info.success {
            return;
        }

        // Don't program a route we advertise a best path for, or one
        // with no path at all.
        if dst_info.nodes.is_empty()
            || dst_info.nodes.contains(my_node_name)
        {
            if !dst_info.nodes.contains(my_node_name) {
                Error::NoRouteToPrefix(*prefix).log();
                self.counters.no_route_to_prefix += 1;
            }
            return;
        }

        let Some(best_node) = &dst_info.best_node else {
            return;
        };
        let best_nexthop = prefix_state.get_loopback_vias(
            &std::iter::once(best_node.clone()).collect(),
            is_v4,
            dst_info.best_igp_metric,
        );
        if best_nexthop.len() != 1 {
            self.counters.missing_loopback_addr += 1;
            Error::MissingLoopbackAddress(*prefix, best_node.clone()).log();
            return;
        }

        let (min_metric, nexthop_nodes) = self.get_next_hops_with_metric(
            my_node_name,
            &dst_info.nodes,
            false,
            link_state,
        );
        if nexthop_nodes.is_empty() {
            Error::NoRouteToPrefix(*prefix).log();
            self.counters.no_route_to_prefix += 1;
            return;
        }

        let mut entry = RibUnicastEntry::new(*prefix);
        entry.nexthops = self.get_next_hops(
            my_node_name,
            &dst_info.nodes,
            is_v4,
            false,
            min_metric,
            &nexthop_nodes,
            None,
            link_state,
        );
        entry.best_prefix_entry =
            Some(node_prefixes[best_node].clone());
        entry.best_nexthop = Some(best_nexthop.into_iter().next().unwrap());
        entry.do_not_install = self.bgp_dry_run;
        unicast_entries.insert(*prefix, entry);
    }

    // Routes over the first- and second-shortest path sets, with the
    // full label stack pushed at the first hop.
    #[allow(clippy::too_many_arguments)]
    fn select_ksp2(
        &mut self,
        unicast_entries: &mut BTreeMap<IpNetwork, RibUnicastEntry>,
        prefix: &IpNetwork,
        my_node_name: &str,
        best_path: &BestPathResult,
        node_prefixes: &NodePrefixes,
        has_bgp: bool,
        is_v4: bool,
        link_state: &LinkState,
        prefix_state: &PrefixState,
    ) {
        let start_time = Instant::now();
        let mut entry = RibUnicastEntry::new(*prefix);
        let mut self_node_contained = false;

        // All shortest paths towards each winning node.
        let mut paths = Vec::new();
        for node in &best_path.nodes {
            if node == my_node_name {
                self_node_contained = true;
                continue;
            }
            paths.extend(link_state.get_kth_paths(my_node_name, node, 1).iter().cloned());
        }

        // Second-shortest paths, dropping any that contains a selected
        // shortest path. In a full mesh where two nodes announce an
        // anycast prefix, the second-shortest path to one of them runs
        // through the other, and using it would spray traffic twice
        // over the shared first hop.
        let first_paths_len = paths.len();
        for node in &best_path.nodes {
            if node == my_node_name {
                continue;
            }
            for sec_path in
                link_state.get_kth_paths(my_node_name, node, 2).iter()
            {
                let redundant = paths[..first_paths_len]
                    .iter()
                    .any(|path| path_a_in_path_b(path, sec_path));
                if !redundant {
                    paths.push(sec_path.clone());
                }
            }
        }

        if paths.is_empty() {
            return;
        }

        let adjacency_databases = link_state.get_adjacency_databases();
        'path: for path in &paths {
            let mut cost: LinkStateMetric = 0;
            let mut labels = VecDeque::new();
            let mut next_node_name = my_node_name.to_owned();
            for link in path {
                cost += link.get_metric_from_node(&next_node_name);
                next_node_name =
                    link.get_other_node_name(&next_node_name).to_owned();
                labels.push_front(
                    adjacency_databases[&next_node_name].node_label,
                );
            }
            // The first hop's own label is unnecessary: we hand the
            // packet to it directly (penultimate-hop-pop).
            labels.pop_back();
            // The destination's prepend label sits at the bottom of
            // the stack.
            if let Some(prepend_label) =
                node_prefixes[&next_node_name].prepend_label
            {
                labels.push_front(prepend_label);
            }

            let mut mpls_action = None;
            if !labels.is_empty() {
                let mut stack = Vec::with_capacity(labels.len());
                for label in labels {
                    match Label::try_new(label) {
                        Some(label) => stack.push(label),
                        None => {
                            Error::InvalidLabelStack(*prefix).log();
                            self.counters.skipped_mpls_route += 1;
                            continue 'path;
                        }
                    }
                }
                mpls_action = Some(MplsAction::Push(stack));
            }

            let first_link = &path[0];
            let addr = if is_v4 {
                first_link.get_nh_v4_from_node(my_node_name)
            } else {
                first_link.get_nh_v6_from_node(my_node_name)
            };
            entry.nexthops.insert(NextHop::new(
                addr,
                Some(first_link.get_iface_from_node(my_node_name).to_owned()),
                cost,
                mpls_action,
                true,
                Some(first_link.get_area().to_owned()),
            ));
        }

        // An anycast prefix we advertise ourselves contributes the
        // static next-hops programmed behind our prepend label.
        let mut static_nexthops = 0;
        if self_node_contained {
            if let Some(label) = node_prefixes[my_node_name]
                .prepend_label
                .and_then(Label::try_new)
            {
                match self.static_routes.get(&label) {
                    Some(nexthops) => {
                        for nexthop in nexthops {
                            static_nexthops += 1;
                            entry.nexthops.insert(NextHop::new(
                                nexthop.addr,
                                None,
                                0,
                                None,
                                true,
                                None,
                            ));
                        }
                    }
                    None => Error::StaticNexthopsMissing(label).log(),
                }
            }
        }

        // Enforce the advertised minimum on dynamic next-hops.
        let min_nexthop =
            self.get_min_next_hop_threshold(best_path, node_prefixes);
        let dynamic_nexthops =
            entry.nexthops.len() as i64 - static_nexthops;
        if let Some(min_nexthop) = min_nexthop {
            if min_nexthop as i64 > dynamic_nexthops {
                Error::MinNexthopNotMet(
                    *prefix,
                    dynamic_nexthops,
                    min_nexthop as i64,
                )
                .log();
                return;
            }
        }

        if has_bgp {
            if let Some(best_node) = &best_path.best_node {
                let best_nexthop = prefix_state.get_loopback_vias(
                    &std::iter::once(best_node.clone()).collect(),
                    is_v4,
                    best_path.best_igp_metric,
                );
                if best_nexthop.len() == 1 {
                    entry.best_nexthop =
                        Some(best_nexthop.into_iter().next().unwrap());
                    entry.best_prefix_entry =
                        Some(node_prefixes[best_node].clone());
                    entry.do_not_install = self.bgp_dry_run;
                }
            }
        }

        unicast_entries.insert(*prefix, entry);
        self.counters.path_build_ms +=
            start_time.elapsed().as_millis() as u64;
    }

    //
    // Next-hop derivation.
    //

    // Returns the distance to the closest winning nodes, and for every
    // usable (first-hop neighbor, destination) pair the remaining
    // distance from that neighbor. With `per_destination` unset the
    // destination key is left empty, consolidating equal-cost routes.
    fn get_next_hops_with_metric(
        &self,
        my_node_name: &str,
        dst_node_names: &BTreeSet<String>,
        per_destination: bool,
        link_state: &LinkState,
    ) -> (
        LinkStateMetric,
        BTreeMap<(String, String), LinkStateMetric>,
    ) {
        let spf_result = link_state.get_spf_result(my_node_name);
        let (shortest_metric, min_cost_nodes) =
            get_min_cost_nodes(&spf_result, dst_node_names);

        let mut nexthop_nodes = BTreeMap::new();
        if min_cost_nodes.is_empty() {
            return (shortest_metric, nexthop_nodes);
        }

        // Neighbors on a shortest path towards the closest nodes.
        for dst_node in &min_cost_nodes {
            let dst_key = if per_destination {
                dst_node.clone()
            } else {
                String::new()
            };
            for nh_name in &spf_result[dst_node].next_hops {
                let edge_metric = link_state
                    .get_metric_from_a_to_b(my_node_name, nh_name)
                    .unwrap();
                nexthop_nodes.insert(
                    (nh_name.clone(), dst_key.clone()),
                    shortest_metric - edge_metric,
                );
            }
        }

        // Neighbors providing a loop-free alternate (RFC 5286): N is an
        // LFA for D iff dist(N, D) < dist(N, S) + dist(S, D).
        if self.compute_lfa_paths {
            for link in link_state.links_from_node(my_node_name) {
                let neighbor_name = link.get_other_node_name(my_node_name);
                let neighbor_spf = link_state.get_spf_result(neighbor_name);
                let neighbor_to_here = neighbor_spf[my_node_name].metric;
                for dst_node in dst_node_names {
                    let Some(spf_node) = neighbor_spf.get(dst_node) else {
                        continue;
                    };
                    let distance_from_neighbor = spf_node.metric;
                    if distance_from_neighbor
                        >= shortest_metric + neighbor_to_here
                    {
                        continue;
                    }
                    let key = (
                        neighbor_name.to_owned(),
                        if per_destination {
                            dst_node.clone()
                        } else {
                            String::new()
                        },
                    );
                    let metric = nexthop_nodes
                        .entry(key)
                        .or_insert(distance_from_neighbor);
                    *metric =
                        std::cmp::min(*metric, distance_from_neighbor);
                }
            }
        }

        (shortest_metric, nexthop_nodes)
    }

    // Converts best next-hop nodes into installable next-hops over the
    // local links, attaching MPLS actions where required.
    #[allow(clippy::too_many_arguments)]
    fn get_next_hops(
        &self,
        my_node_name: &str,
        dst_node_names: &BTreeSet<String>,
        is_v4: bool,
        per_destination: bool,
        min_metric: LinkStateMetric,
        nexthop_nodes: &BTreeMap<(String, String), LinkStateMetric>,
        swap_label: Option<Label>,
        link_state: &LinkState,
    ) -> BTreeSet<NextHop> {
        let empty_dst = String::new();
        let dst_keys = if per_destination {
            dst_node_names.iter().collect::<Vec<_>>()
        } else {
            vec![&empty_dst]
        };

        let mut nexthops = BTreeSet::new();
        for link in link_state.links_from_node(my_node_name) {
            let neighbor_node = link.get_other_node_name(my_node_name);
            for dst_node in &dst_keys {
                let Some(metric_from_neighbor) = nexthop_nodes
                    .get(&(neighbor_node.to_owned(), (*dst_node).clone()))
                else {
                    continue;
                };

                // Never route towards one destination through another.
                if !dst_node.is_empty()
                    && dst_node_names.contains(neighbor_node)
                    && neighbor_node != dst_node.as_str()
                {
                    continue;
                }

                // Without LFA computation only shortest-path links
                // qualify; anything else would inflate the metric.
                let dist_over_link = link.get_metric_from_node(my_node_name)
                    + metric_from_neighbor;
                if !self.compute_lfa_paths && dist_over_link != min_metric {
                    continue;
                }

                // Label swap towards the destination node, degenerating
                // to penultimate-hop-pop on the last hop.
                let mut mpls_action = None;
                if let Some(swap_label) = swap_label {
                    let is_nexthop_also_dst =
                        dst_node_names.contains(neighbor_node);
                    mpls_action = Some(if is_nexthop_also_dst {
                        MplsAction::Php
                    } else {
                        MplsAction::Swap(swap_label)
                    });
                }

                // Per-destination MPLS encapsulation pushes the
                // destination's node label.
                if !dst_node.is_empty() && *dst_node != neighbor_node {
                    let dst_label = link_state.get_adjacency_databases()
                        [*dst_node]
                        .node_label;
                    if !is_mpls_label_valid(dst_label) {
                        continue;
                    }
                    mpls_action =
                        Some(MplsAction::Push(vec![Label::new(dst_label)]));
                }

                let addr = if is_v4 {
                    link.get_nh_v4_from_node(my_node_name)
                } else {
                    link.get_nh_v6_from_node(my_node_name)
                };
                nexthops.insert(NextHop::new(
                    addr,
                    Some(
                        link.get_iface_from_node(my_node_name).to_owned(),
                    ),
                    dist_over_link,
                    mpls_action,
                    false,
                    Some(link.get_area().to_owned()),
                ));
            }
        }
        nexthops
    }
}

// ===== global functions =====

// Finds the subset of destinations closest to the source, along with
// their common distance.
pub fn get_min_cost_nodes(
    spf_result: &SpfResult,
    dst_node_names: &BTreeSet<String>,
) -> (LinkStateMetric, BTreeSet<String>) {
    let mut shortest_metric = LinkStateMetric::MAX;
    let mut min_cost_nodes = BTreeSet::new();
    for dst_node in dst_node_names {
        let Some(spf_node) = spf_result.get(dst_node) else {
            continue;
        };
        if shortest_metric > spf_node.metric {
            shortest_metric = spf_node.metric;
            min_cost_nodes.clear();
        }
        if shortest_metric == spf_node.metric {
            min_cost_nodes.insert(dst_node.clone());
        }
    }
    (shortest_metric, min_cost_nodes)
}

// The prefix is MPLS-encapsulated only when every advertiser asks for
// it.
fn get_prefix_forwarding_type(
    node_prefixes: &NodePrefixes,
) -> PrefixForwardingType {
    if node_prefixes
        .values()
        .all(|entry| entry.forwarding_type == PrefixForwardingType::SrMpls)
    {
        PrefixForwardingType::SrMpls
    } else {
        PrefixForwardingType::Ip
    }
}
