//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use tracing::{debug, error};
use weave_utils::ip::IpNetworkExt;
use weave_utils::southbound::NextHop;

use crate::lsdb::{PrefixDatabase, PrefixEntry, PrefixType};

// Global prefix state: who advertises what, plus the per-node host
// loopback addresses tracked for BGP best-next-hop resolution.
#[derive(Debug, Default)]
pub struct PrefixState {
    prefixes: BTreeMap<IpNetwork, BTreeMap<String, PrefixEntry>>,
    node_to_prefixes: BTreeMap<String, BTreeSet<IpNetwork>>,
    node_host_loopbacks_v4: BTreeMap<String, Ipv4Addr>,
    node_host_loopbacks_v6: BTreeMap<String, Ipv6Addr>,
}

// ===== impl PrefixState =====

impl PrefixState {
    // Atomically replaces a node's advertisements. Returns whether any
    // observable prefix changed.
    pub fn update_prefix_database(&mut self, prefix_db: &PrefixDatabase) -> bool {
        let mut changed = false;
        let node_name = &prefix_db.this_node_name;

        let old_prefix_set = self
            .node_to_prefixes
            .get(node_name)
            .cloned()
            .unwrap_or_default();

        let new_prefix_set = prefix_db
            .prefix_entries
            .iter()
            .map(|entry| entry.prefix)
            .collect::<BTreeSet<_>>();
        self.node_to_prefixes
            .insert(node_name.clone(), new_prefix_set.clone());

        // Withdraw prefixes that are no longer advertised.
        for prefix in &old_prefix_set {
            if new_prefix_set.contains(prefix) {
                continue;
            }
            debug!(%prefix, node = %node_name, "prefix withdrawn");
            let node_list = self.prefixes.get_mut(prefix).unwrap();
            node_list.remove(node_name);
            changed = true;
            if node_list.is_empty() {
                self.prefixes.remove(prefix);
            }
            self.delete_loopback_prefix(prefix, node_name);
        }

        for entry in &prefix_db.prefix_entries {
            let node_list = self.prefixes.entry(entry.prefix).or_default();
            match node_list.get(node_name) {
                None => {
                    debug!(
                        prefix = %entry.prefix, node = %node_name,
                        "prefix advertised"
                    );
                    node_list.insert(node_name.clone(), entry.clone());
                    changed = true;
                }
                Some(old_entry) if old_entry != entry => {
                    debug!(
                        prefix = %entry.prefix, node = %node_name,
                        "prefix updated"
                    );
                    node_list.insert(node_name.clone(), entry.clone());
                    changed = true;
                }
                Some(_) => continue,
            }

            // Track host loopback addresses per node.
            if entry.prefix_type == PrefixType::Loopback
                && entry.prefix.is_host_prefix()
            {
                match entry.prefix {
                    IpNetwork::V4(prefix) => {
                        self.node_host_loopbacks_v4
                            .insert(node_name.clone(), prefix.ip());
                    }
                    IpNetwork::V6(prefix) => {
                        self.node_host_loopbacks_v6
                            .insert(node_name.clone(), prefix.ip());
                    }
                }
            }
        }

        if new_prefix_set.is_empty() {
            self.node_to_prefixes.remove(node_name);
        }

        changed
    }

    pub fn prefixes(
        &self,
    ) -> &BTreeMap<IpNetwork, BTreeMap<String, PrefixEntry>> {
        &self.prefixes
    }

    // Rebuilds the per-node view of the advertisements.
    pub fn get_prefix_databases(&self) -> BTreeMap<String, PrefixDatabase> {
        let mut databases = BTreeMap::new();
        for (node_name, prefixes) in &self.node_to_prefixes {
            let entries = prefixes
                .iter()
                .map(|prefix| self.prefixes[prefix][node_name].clone())
                .collect();
            databases.insert(
                node_name.clone(),
                PrefixDatabase::new(node_name.clone(), entries),
            );
        }
        databases
    }

    pub fn node_host_loopbacks_v4(&self) -> &BTreeMap<String, Ipv4Addr> {
        &self.node_host_loopbacks_v4
    }

    pub fn node_host_loopbacks_v6(&self) -> &BTreeMap<String, Ipv6Addr> {
        &self.node_host_loopbacks_v6
    }

    // Returns the loopback addresses of the given nodes as next-hops,
    // annotated with the provided IGP metric.
    pub fn get_loopback_vias(
        &self,
        nodes: &BTreeSet<String>,
        is_v4: bool,
        igp_metric: Option<i64>,
    ) -> Vec<NextHop> {
        let mut result = Vec::with_capacity(nodes.len());
        let metric = igp_metric.unwrap_or(0) as u64;
        for node in nodes {
            let addr = if is_v4 {
                self.node_host_loopbacks_v4.get(node).copied().map(IpAddr::V4)
            } else {
                self.node_host_loopbacks_v6.get(node).copied().map(IpAddr::V6)
            };
            match addr {
                Some(addr) => result
                    .push(NextHop::new(addr, None, metric, None, false, None)),
                None => error!(%node, "no loopback address for node"),
            }
        }
        result
    }

    fn delete_loopback_prefix(&mut self, prefix: &IpNetwork, node_name: &str) {
        if !prefix.is_host_prefix() {
            return;
        }
        match prefix {
            IpNetwork::V4(prefix) => {
                if self.node_host_loopbacks_v4.get(node_name)
                    == Some(&prefix.ip())
                {
                    self.node_host_loopbacks_v4.remove(node_name);
                }
            }
            IpNetwork::V6(prefix) => {
                if self.node_host_loopbacks_v6.get(node_name)
                    == Some(&prefix.ip())
                {
                    self.node_host_loopbacks_v6.remove(node_name);
                }
            }
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::net;

    use super::*;
    use crate::lsdb::{
        PrefixForwardingAlgorithm, PrefixForwardingType, PrefixEntry,
    };

    fn entry(prefix: IpNetwork, prefix_type: PrefixType) -> PrefixEntry {
        PrefixEntry::new(
            prefix,
            prefix_type,
            PrefixForwardingType::Ip,
            PrefixForwardingAlgorithm::SpEcmp,
        )
    }

    #[test]
    fn advertise_update_withdraw() {
        let mut prefix_state = PrefixState::default();
        let prefix = net!("10.0.0.0/24");

        let db = PrefixDatabase::new(
            "a".to_owned(),
            vec![entry(prefix, PrefixType::Weave)],
        );
        assert!(prefix_state.update_prefix_database(&db));
        assert_eq!(prefix_state.prefixes().len(), 1);

        // Same advertisement again: no observable change.
        assert!(!prefix_state.update_prefix_database(&db));

        // Withdraw everything.
        let db = PrefixDatabase::new("a".to_owned(), vec![]);
        assert!(prefix_state.update_prefix_database(&db));
        assert!(prefix_state.prefixes().is_empty());
        assert!(prefix_state.get_prefix_databases().is_empty());
    }

    #[test]
    fn loopback_tracking() {
        let mut prefix_state = PrefixState::default();
        let v4 = net!("192.0.2.1/32");
        let v6 = net!("2001:db8::1/128");

        let db = PrefixDatabase::new(
            "a".to_owned(),
            vec![
                entry(v4, PrefixType::Loopback),
                entry(v6, PrefixType::Loopback),
                // Non-host prefixes are not loopback candidates.
                entry(net!("192.0.2.0/24"), PrefixType::Loopback),
            ],
        );
        prefix_state.update_prefix_database(&db);
        assert_eq!(prefix_state.node_host_loopbacks_v4().len(), 1);
        assert_eq!(prefix_state.node_host_loopbacks_v6().len(), 1);

        let vias = prefix_state.get_loopback_vias(
            &["a".to_owned()].into_iter().collect(),
            false,
            Some(7),
        );
        assert_eq!(vias.len(), 1);
        assert_eq!(vias[0].addr, v6.ip());
        assert_eq!(vias[0].metric, 7);

        // Missing loopback yields nothing.
        let vias = prefix_state.get_loopback_vias(
            &["b".to_owned()].into_iter().collect(),
            false,
            None,
        );
        assert!(vias.is_empty());

        // Withdrawal clears the tracked loopback.
        let db = PrefixDatabase::new(
            "a".to_owned(),
            vec![entry(v6, PrefixType::Loopback)],
        );
        prefix_state.update_prefix_database(&db);
        assert!(prefix_state.node_host_loopbacks_v4().is_empty());
        assert_eq!(prefix_state.node_host_loopbacks_v6().len(), 1);
    }
}
