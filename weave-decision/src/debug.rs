//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use tracing::debug;

// Decision debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instance lifecycle
    InstanceStart,
    InstanceStop,
    // Publication processing
    AdjacencyDbUpdate(&'a str, &'a str),
    AdjacencyDbExpire(&'a str, &'a str),
    PrefixDbUpdate(&'a str),
    PrefixDbExpire(&'a str),
    FibTimeUpdate(&'a str, u64),
    // Route computation
    DebounceExpired(u32),
    ColdStartExpired,
    DuplicateNodeLabel(u32, &'a str, &'a str),
    SelfOriginatedBestPath(&'a IpNetwork),
    AttachIgpMetric(&'a IpNetwork, &'a str, i64),
    AreaRouteOverwrite(&'a str),
    RouteUpdatePublish(usize, usize, usize, usize),
    // Ordered fib
    DecrementHolds,
    // RIB policy
    RibPolicyInstall(u64),
    RibPolicyExpired,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::AdjacencyDbUpdate(node, area)
            | Debug::AdjacencyDbExpire(node, area) => {
                debug!(%node, %area, "{}", self);
            }
            Debug::PrefixDbUpdate(node) | Debug::PrefixDbExpire(node) => {
                debug!(%node, "{}", self);
            }
            Debug::FibTimeUpdate(node, fib_time_ms) => {
                debug!(%node, %fib_time_ms, "{}", self);
            }
            Debug::DebounceExpired(count) => {
                debug!(%count, "{}", self);
            }
            Debug::ColdStartExpired => {
                debug!("{}", self);
            }
            Debug::DuplicateNodeLabel(label, owner, node) => {
                debug!(%label, %owner, %node, "{}", self);
            }
            Debug::SelfOriginatedBestPath(prefix) => {
                debug!(%prefix, "{}", self);
            }
            Debug::AttachIgpMetric(prefix, node, igp_metric) => {
                debug!(%prefix, %node, %igp_metric, "{}", self);
            }
            Debug::AreaRouteOverwrite(area) => {
                debug!(%area, "{}", self);
            }
            Debug::RouteUpdatePublish(
                unicast_update,
                unicast_delete,
                mpls_update,
                mpls_delete,
            ) => {
                debug!(
                    %unicast_update, %unicast_delete, %mpls_update,
                    %mpls_delete, "{}", self
                );
            }
            Debug::DecrementHolds => {
                debug!("{}", self);
            }
            Debug::RibPolicyInstall(validity_ms) => {
                debug!(%validity_ms, "{}", self);
            }
            Debug::RibPolicyExpired => {
                debug!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    // Display debug message. Text is kept in sync with debug message
    // definitions.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::AdjacencyDbUpdate(..) => {
                write!(f, "adjacency database update")
            }
            Debug::AdjacencyDbExpire(..) => {
                write!(f, "adjacency database expired")
            }
            Debug::PrefixDbUpdate(..) => {
                write!(f, "prefix database update")
            }
            Debug::PrefixDbExpire(..) => {
                write!(f, "prefix database expired")
            }
            Debug::FibTimeUpdate(..) => {
                write!(f, "fib time measurement update")
            }
            Debug::DebounceExpired(..) => {
                write!(f, "processing accumulated updates")
            }
            Debug::ColdStartExpired => {
                write!(f, "cold-start grace period elapsed")
            }
            Debug::DuplicateNodeLabel(..) => {
                write!(f, "duplicate node label advertisement")
            }
            Debug::SelfOriginatedBestPath(..) => {
                write!(f, "ignoring prefix, best path originated by self")
            }
            Debug::AttachIgpMetric(..) => {
                write!(f, "attaching IGP metric to prefix advertisement")
            }
            Debug::AreaRouteOverwrite(..) => {
                write!(f, "area route database overwrote earlier entries")
            }
            Debug::RouteUpdatePublish(..) => {
                write!(f, "publishing route delta")
            }
            Debug::DecrementHolds => {
                write!(f, "decrementing ordered-fib holds")
            }
            Debug::RibPolicyInstall(..) => {
                write!(f, "installing RIB policy")
            }
            Debug::RibPolicyExpired => {
                write!(f, "RIB policy expired")
            }
        }
    }
}
