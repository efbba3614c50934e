//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::IpAddr;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::mpls::Label;

// MPLS label-stack operation attached to a next-hop.
#[derive(Clone, Debug, EnumAsInner, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MplsAction {
    // Push the given label stack (bottom of stack first).
    Push(Vec<Label>),
    // Swap the incoming top label with the given one.
    Swap(Label),
    // Penultimate-hop-pop: strip the top label before forwarding.
    Php,
    // Pop the top label and do an IP lookup on the next layer.
    PopAndLookup,
}

// Route next-hop.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct NextHop {
    // Next-hop address.
    pub addr: IpAddr,
    // Outgoing interface, if tied to one.
    pub ifname: Option<String>,
    // Metric of the path through this next-hop.
    pub metric: u64,
    // MPLS operation to apply when forwarding through this next-hop.
    pub mpls_action: Option<MplsAction>,
    // Whether this next-hop lies on a non-shortest path.
    pub non_shortest: bool,
    // Area the next-hop was learned from.
    pub area: Option<String>,
    // ECMP weight, assigned by policy. Zero means unweighted.
    #[new(default)]
    pub weight: u32,
}

// Unicast route ready for installation.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct UnicastRoute {
    pub prefix: IpNetwork,
    pub next_hops: BTreeSet<NextHop>,
    // Best next-hop, present for routes subject to best-path selection.
    pub best_next_hop: Option<NextHop>,
    // Advisory flag: compute and publish but do not install.
    pub do_not_install: bool,
}

// MPLS label-switched route ready for installation.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct MplsRoute {
    pub top_label: Label,
    pub next_hops: BTreeSet<NextHop>,
}

// Incremental change to a route database, streamed to the
// forwarding-install agent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabaseDelta {
    pub this_node_name: String,
    pub unicast_routes_to_update: Vec<UnicastRoute>,
    pub unicast_routes_to_delete: Vec<IpNetwork>,
    pub mpls_routes_to_update: Vec<MplsRoute>,
    pub mpls_routes_to_delete: Vec<Label>,
    pub perf_events: Option<PerfEvents>,
}

// Full route database, returned by inspection RPCs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteDatabase {
    pub this_node_name: String,
    pub unicast_routes: Vec<UnicastRoute>,
    pub mpls_routes: Vec<MplsRoute>,
}

// Timestamped measurement event carried through the update pipeline.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct PerfEvent {
    pub node_name: String,
    pub event_name: String,
    pub unix_ts_ms: i64,
}

pub type PerfEvents = Vec<PerfEvent>;

// ===== impl RouteDatabaseDelta =====

impl RouteDatabaseDelta {
    pub fn is_empty(&self) -> bool {
        self.unicast_routes_to_update.is_empty()
            && self.unicast_routes_to_delete.is_empty()
            && self.mpls_routes_to_update.is_empty()
            && self.mpls_routes_to_delete.is_empty()
    }
}

