//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

use weave_utils::policy::{RibPolicy, RibRouteAction};

use crate::route::RibUnicastEntry;

// An installed RIB policy: an immutable policy snapshot bound to an
// absolute expiry deadline. Once expired the policy behaves as absent.
#[derive(Debug)]
pub struct RibPolicyInstance {
    policy: RibPolicy,
    expiry: Instant,
}

// ===== impl RibPolicyInstance =====

impl RibPolicyInstance {
    pub fn new(policy: RibPolicy) -> RibPolicyInstance {
        let ttl = Duration::from_secs(policy.ttl_secs.max(0) as u64);
        RibPolicyInstance {
            policy,
            expiry: Instant::now() + ttl,
        }
    }

    pub fn policy(&self) -> &RibPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        Instant::now() < self.expiry
    }

    pub fn ttl_remaining(&self) -> Duration {
        self.expiry.saturating_duration_since(Instant::now())
    }

    // Rewrites the entry's next-hop weights according to the first
    // matching statement. Next-hops resolving to weight zero are
    // removed. Returns whether the entry was transformed.
    pub fn apply_action(&self, entry: &mut RibUnicastEntry) -> bool {
        for statement in &self.policy.statements {
            if !statement.matcher.matches(&entry.prefix) {
                continue;
            }
            let RibRouteAction::SetWeight {
                default_weight,
                area_to_weight,
            } = &statement.action;

            entry.nexthops = std::mem::take(&mut entry.nexthops)
                .into_iter()
                .filter_map(|mut nexthop| {
                    let weight = nexthop
                        .area
                        .as_ref()
                        .and_then(|area| area_to_weight.get(area))
                        .copied()
                        .unwrap_or(*default_weight);
                    if weight == 0 {
                        return None;
                    }
                    nexthop.weight = weight;
                    Some(nexthop)
                })
                .collect();
            return true;
        }
        false
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use const_addrs::{ip, net};
    use maplit::btreemap;
    use weave_utils::policy::{RibPolicyStatement, RibRouteMatcher};
    use weave_utils::southbound::NextHop;

    use super::*;

    fn nexthop(addr: IpAddr, area: &str) -> NextHop {
        NextHop::new(addr, None, 1, None, false, Some(area.to_owned()))
    }

    fn policy(ttl_secs: i64) -> RibPolicy {
        RibPolicy {
            statements: vec![RibPolicyStatement {
                name: "drain-area-1".to_owned(),
                matcher: RibRouteMatcher {
                    prefixes: vec![net!("10.0.0.0/24")],
                },
                action: RibRouteAction::SetWeight {
                    default_weight: 10,
                    area_to_weight: btreemap! {"1".to_owned() => 0},
                },
            }],
            ttl_secs,
        }
    }

    #[test]
    fn weight_rewrite_and_drop() {
        let instance = RibPolicyInstance::new(policy(60));
        assert!(instance.is_active());

        let mut entry = RibUnicastEntry::new(net!("10.0.0.0/24"));
        entry.nexthops.insert(nexthop(ip!("fe80::1"), "0"));
        entry.nexthops.insert(nexthop(ip!("fe80::2"), "1"));

        assert!(instance.apply_action(&mut entry));
        assert_eq!(entry.nexthops.len(), 1);
        let nh = entry.nexthops.first().unwrap();
        assert_eq!(nh.addr, ip!("fe80::1"));
        assert_eq!(nh.weight, 10);

        // Unmatched prefixes are left alone.
        let mut other = RibUnicastEntry::new(net!("10.99.0.0/24"));
        other.nexthops.insert(nexthop(ip!("fe80::1"), "0"));
        assert!(!instance.apply_action(&mut other));
        assert_eq!(other.nexthops.first().unwrap().weight, 0);
    }

    #[test]
    fn expired_policy_is_inactive() {
        let instance = RibPolicyInstance::new(policy(0));
        assert!(!instance.is_active());
        assert_eq!(instance.ttl_remaining(), Duration::ZERO);
    }
}
