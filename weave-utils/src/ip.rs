//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Address Family identifier.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns true if this is an usable address.
    fn is_usable(&self) -> bool;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Returns the address family of the network.
    fn address_family(&self) -> AddressFamily;

    // Returns true if this is a host prefix (/32 or /128).
    fn is_host_prefix(&self) -> bool;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn is_usable(&self) -> bool {
        !(self.is_loopback() || self.is_multicast() || self.is_unspecified())
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == self.address_family().max_prefixlen()
    }
}
