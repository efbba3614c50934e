//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Deserialize;

// Decision configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Name this node is known by in the replicated store.
    pub node_name: String,
    // Whether v4 prefixes are programmed. When disabled, v4 prefixes
    // are skipped with a counter bump.
    pub enable_v4: bool,
    // Ordered-fib programming: delays route changes so that nodes
    // closer to the change program before farther ones.
    pub enable_ordered_fib_programming: bool,
    // Append the IGP distance to BGP metric vectors as the final
    // tiebreak.
    pub bgp_use_igp_metric: bool,
    // Compute and publish BGP routes without installing them.
    pub bgp_dry_run: bool,
    // Whether RIB policies may be installed through the RPC surface.
    pub enable_rib_policy: bool,
    // Cold-start grace period in seconds. No deltas are published
    // until it elapses.
    pub eor_time_s: Option<u64>,
    // Debounce window bounds for the recompute backoff.
    pub debounce_min_ms: u64,
    pub debounce_max_ms: u64,
    // Include loop-free-alternate next-hops in computed routes.
    pub compute_lfa_paths: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            node_name: String::new(),
            enable_v4: false,
            enable_ordered_fib_programming: false,
            bgp_use_igp_metric: false,
            bgp_dry_run: false,
            enable_rib_policy: false,
            eor_time_s: None,
            debounce_min_ms: 10,
            debounce_max_ms: 250,
            compute_lfa_paths: false,
        }
    }
}
