//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// MPLS label.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(transparent)]
pub struct Label(u32);

// ===== impl Label =====

impl Label {
    pub const VALUE_MASK: u32 = 0x000FFFFF;

    // Well-known MPLS labels.
    pub const IPV4_EXPLICIT_NULL: u32 = 0;
    pub const ROUTER_ALERT: u32 = 1;
    pub const IPV6_EXPLICIT_NULL: u32 = 2;
    pub const IMPLICIT_NULL: u32 = 3;

    // MPLS label ranges.
    pub const RESERVED_RANGE: std::ops::RangeInclusive<u32> = 0..=15;
    pub const UNRESERVED_RANGE: std::ops::RangeInclusive<u32> = 16..=1048575;

    pub fn new(label: u32) -> Label {
        if label > *Self::UNRESERVED_RANGE.end() {
            panic!("invalid label value: {}", label);
        }
        Label(label)
    }

    // Checked constructor for label values learned from the network.
    pub fn try_new(label: u32) -> Option<Label> {
        if label > *Self::UNRESERVED_RANGE.end() {
            return None;
        }
        Some(Label(label))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        Self::RESERVED_RANGE.contains(&self.0)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Label::IPV4_EXPLICIT_NULL => write!(f, "ipv4-explicit-null"),
            Label::ROUTER_ALERT => write!(f, "router-alert"),
            Label::IPV6_EXPLICIT_NULL => write!(f, "ipv6-explicit-null"),
            Label::IMPLICIT_NULL => write!(f, "implicit-null"),
            _ => write!(f, "{}", self.0),
        }
    }
}

// Checks whether a label value advertised by a remote node is usable for
// programming. Zero means "no label allocated" and reserved values can
// never identify a node or adjacency.
pub fn is_mpls_label_valid(label: u32) -> bool {
    Label::UNRESERVED_RANGE.contains(&label)
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_validity() {
        assert!(!is_mpls_label_valid(0));
        assert!(!is_mpls_label_valid(15));
        assert!(is_mpls_label_valid(16));
        assert!(is_mpls_label_valid(1048575));
        assert!(!is_mpls_label_valid(1048576));
    }

    #[test]
    fn label_try_new() {
        assert_eq!(Label::try_new(100), Some(Label::new(100)));
        assert_eq!(Label::try_new(u32::MAX), None);
    }
}
