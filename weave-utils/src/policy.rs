//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// RIB policy configuration.
//
// A policy is a TTL-bounded list of statements. Each statement matches a
// set of prefixes and rewrites the ECMP weights of the matched routes'
// next-hops before they are published to the forwarding layer.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RibPolicy {
    pub statements: Vec<RibPolicyStatement>,
    // Policy validity in seconds, measured from the moment it is installed.
    pub ttl_secs: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RibPolicyStatement {
    pub name: String,
    pub matcher: RibRouteMatcher,
    pub action: RibRouteAction,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RibRouteMatcher {
    pub prefixes: Vec<IpNetwork>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RibRouteAction {
    SetWeight {
        // Weight assigned to next-hops from areas without an explicit
        // entry. A weight of zero removes the next-hop.
        default_weight: u32,
        area_to_weight: BTreeMap<String, u32>,
    },
}

// ===== impl RibRouteMatcher =====

impl RibRouteMatcher {
    pub fn matches(&self, prefix: &IpNetwork) -> bool {
        self.prefixes.contains(prefix)
    }
}
