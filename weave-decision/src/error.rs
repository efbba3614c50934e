//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use tracing::{error, warn};
use weave_utils::mpls::Label;

// Decision errors.
#[derive(Debug)]
pub enum Error {
    // Publication processing
    PublicationDecode(String, serde_json::Error),
    NodeNameMismatch(String, String),
    FibTimeParse(String, String),
    // Prefix-level data errors
    MixedPrefixAdvertisements(IpNetwork),
    MissingMetricVector(IpNetwork, String),
    V4PrefixDisabled(IpNetwork),
    IncompatibleForwardingType(IpNetwork, String),
    UnexpectedIgpCostEntity(IpNetwork, String),
    NodeUnreachable(String),
    BestPathTie(IpNetwork),
    BestPathError(IpNetwork),
    NoRouteToPrefix(IpNetwork),
    MissingLoopbackAddress(IpNetwork, String),
    MinNexthopNotMet(IpNetwork, i64, i64),
    // MPLS validity errors
    InvalidNodeLabel(u32, String),
    InvalidAdjacencyLabel(u32, String),
    InvalidLabelStack(IpNetwork),
    NoRouteToLabel(u32, String),
    StaticNexthopsMissing(Label),
    // RIB policy
    RibPolicyDisabled,
    RibPolicyStale,
    RibPolicyNotConfigured,
    // Shutdown
    Terminating,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::PublicationDecode(key, error) => {
                error!(%key, %error, "{}", self);
            }
            Error::NodeNameMismatch(key_node, db_node) => {
                error!(%key_node, %db_node, "{}", self);
            }
            Error::FibTimeParse(node, value) => {
                error!(%node, %value, "{}", self);
            }
            Error::MixedPrefixAdvertisements(prefix) => {
                error!(%prefix, "{}", self);
            }
            Error::MissingMetricVector(prefix, node) => {
                error!(%prefix, %node, "{}", self);
            }
            Error::V4PrefixDisabled(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::IncompatibleForwardingType(prefix, node) => {
                error!(%prefix, %node, "{}", self);
            }
            Error::UnexpectedIgpCostEntity(prefix, node) => {
                error!(%prefix, %node, "{}", self);
            }
            Error::NodeUnreachable(node) => {
                error!(%node, "{}", self);
            }
            Error::BestPathTie(prefix) | Error::BestPathError(prefix) => {
                error!(%prefix, "{}", self);
            }
            Error::NoRouteToPrefix(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::MissingLoopbackAddress(prefix, node) => {
                error!(%prefix, %node, "{}", self);
            }
            Error::MinNexthopNotMet(prefix, nexthops, min_nexthop) => {
                warn!(%prefix, %nexthops, %min_nexthop, "{}", self);
            }
            Error::InvalidNodeLabel(label, node) => {
                error!(%label, %node, "{}", self);
            }
            Error::InvalidAdjacencyLabel(label, link) => {
                error!(%label, %link, "{}", self);
            }
            Error::InvalidLabelStack(prefix) => {
                error!(%prefix, "{}", self);
            }
            Error::NoRouteToLabel(label, node) => {
                warn!(%label, %node, "{}", self);
            }
            Error::StaticNexthopsMissing(label) => {
                error!(%label, "{}", self);
            }
            Error::RibPolicyDisabled
            | Error::RibPolicyStale
            | Error::RibPolicyNotConfigured => {
                warn!("{}", self);
            }
            Error::Terminating => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PublicationDecode(..) => {
                write!(f, "failed to decode publication value")
            }
            Error::NodeNameMismatch(..) => {
                write!(f, "database node name disagrees with its key")
            }
            Error::FibTimeParse(..) => {
                write!(f, "failed to parse fib time value")
            }
            Error::MixedPrefixAdvertisements(..) => {
                write!(
                    f,
                    "prefix is advertised with both BGP and non-BGP types"
                )
            }
            Error::MissingMetricVector(..) => {
                write!(
                    f,
                    "BGP prefix advertisement carries no metric vector"
                )
            }
            Error::V4PrefixDisabled(..) => {
                write!(f, "received v4 prefix while v4 is not enabled")
            }
            Error::IncompatibleForwardingType(..) => {
                write!(
                    f,
                    "incompatible forwarding type for KSP2 computation"
                )
            }
            Error::UnexpectedIgpCostEntity(..) => {
                write!(
                    f,
                    "unexpected IGP-cost entity in received metric vector"
                )
            }
            Error::NodeUnreachable(..) => {
                write!(f, "no route to advertising node")
            }
            Error::BestPathTie(..) => {
                write!(f, "tie ordering prefix advertisements")
            }
            Error::BestPathError(..) => {
                write!(f, "failed to order prefix advertisements")
            }
            Error::NoRouteToPrefix(..) => {
                write!(f, "no route to prefix")
            }
            Error::MissingLoopbackAddress(..) => {
                write!(f, "no loopback address for best path")
            }
            Error::MinNexthopNotMet(..) => {
                write!(f, "not enough next-hops to program route")
            }
            Error::InvalidNodeLabel(..) => {
                write!(f, "ignoring invalid node label")
            }
            Error::InvalidAdjacencyLabel(..) => {
                write!(f, "ignoring invalid adjacency label")
            }
            Error::InvalidLabelStack(..) => {
                write!(f, "ignoring path with invalid label stack")
            }
            Error::NoRouteToLabel(..) => {
                write!(f, "no route to node label")
            }
            Error::StaticNexthopsMissing(..) => {
                write!(f, "no static next-hops for prepend label")
            }
            Error::RibPolicyDisabled => {
                write!(f, "RIB policy feature is not enabled")
            }
            Error::RibPolicyStale => {
                write!(f, "RIB policy is stale")
            }
            Error::RibPolicyNotConfigured => {
                write!(f, "RIB policy is not configured")
            }
            Error::Terminating => {
                write!(f, "instance is terminating")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::PublicationDecode(_, error) => Some(error),
            _ => None,
        }
    }
}
