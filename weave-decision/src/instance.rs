//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};
use weave_utils::backoff::ExponentialBackoff;
use weave_utils::policy::RibPolicy;
use weave_utils::southbound::{
    MplsRoute, PerfEvent, PerfEvents, RouteDatabaseDelta,
};
use weave_utils::task::{IntervalTask, TimeoutTask};
use weave_utils::{Receiver, UnboundedReceiver, UnboundedSender};

use crate::config::Config;
use crate::debug::Debug;
use crate::error::Error;
use crate::link_state::{LinkState, LinkStateChange};
use crate::lsdb::{
    self, node_name_from_key, prefix_from_key, AdjacencyDatabase,
    PrefixDatabase, PrefixEntry, Publication,
};
use crate::policy::RibPolicyInstance;
use crate::prefix_state::PrefixState;
use crate::route::{get_route_delta, RouteDb};
use crate::spf::SpfSolver;
use crate::tasks;
use crate::tasks::messages::{RequestMsg, TimerMsg};

// Counter submission period.
const COUNTER_SUBMIT_INTERVAL: Duration = Duration::from_secs(5);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    struct PendingUpdateFlags: u8 {
        const LINK_STATE = 0x01;
        const PREFIX_STATE = 0x02;
    }
}

// Bookkeeping of updates accumulated while the debounce timer runs.
#[derive(Debug)]
struct PendingUpdates {
    node_name: String,
    count: u32,
    flags: PendingUpdateFlags,
    perf_events: Option<PerfEvents>,
}

// Counters exported by the instance.
#[derive(Debug)]
pub struct DecisionCounters {
    pub adj_db_update: u64,
    pub prefix_db_update: u64,
    pub errors: u64,
    pub spf_runs: u64,
    pub spf_ms: u64,
    pub num_partial_adjacencies: u64,
    pub num_complete_adjacencies: u64,
    pub num_nodes: u64,
    pub num_prefixes: u64,
    pub num_nodes_v4_loopbacks: u64,
    pub num_nodes_v6_loopbacks: u64,
    pub discontinuity_time: DateTime<Utc>,
}

// The Decision instance: owns one LinkState per area, the global
// PrefixState, the solver and the optional RIB policy. Consumes the
// publication and static-route streams and publishes route deltas
// after a debounced recompute.
#[derive(Debug)]
pub struct Decision {
    config: Config,
    area_link_states: BTreeMap<String, LinkState>,
    prefix_state: PrefixState,
    spf_solver: SpfSolver,
    rib_policy: Option<RibPolicyInstance>,
    // Last published route database.
    route_db: RouteDb,
    pending_updates: PendingUpdates,
    backoff: ExponentialBackoff,
    // Per-node forwarding-install times, for ordered-fib scheduling.
    fib_times: BTreeMap<String, Duration>,
    // Per-node prefix advertisements, stored separately for full-db
    // and per-prefix keys. Per-prefix entries override full-db ones.
    full_db_prefix_entries: BTreeMap<String, BTreeMap<IpNetwork, PrefixEntry>>,
    per_prefix_entries: BTreeMap<String, BTreeMap<IpNetwork, PrefixEntry>>,
    pub counters: DecisionCounters,
    // Outbound route-delta queue (multi-consumer).
    route_updates_tx: broadcast::Sender<RouteDatabaseDelta>,
    // Timer plumbing.
    timer_eventp: UnboundedSender<TimerMsg>,
    timer_eventc: Option<UnboundedReceiver<TimerMsg>>,
    debounce_timer: Option<TimeoutTask>,
    cold_start_timer: Option<TimeoutTask>,
    ordered_fib_timer: Option<TimeoutTask>,
    rib_policy_timer: Option<TimeoutTask>,
    _counter_interval: IntervalTask,
}

// ===== impl PendingUpdates =====

impl PendingUpdates {
    fn new(node_name: String) -> PendingUpdates {
        PendingUpdates {
            node_name,
            count: 0,
            flags: PendingUpdateFlags::empty(),
            perf_events: None,
        }
    }

    fn apply_link_state_change(
        &mut self,
        change: &LinkStateChange,
        perf_events: Option<&PerfEvents>,
    ) {
        if !(change.topology_changed
            || change.link_attributes_changed
            || change.node_label_changed)
        {
            return;
        }
        self.count += 1;
        self.flags.insert(PendingUpdateFlags::LINK_STATE);
        self.keep_perf_events(perf_events);
    }

    fn apply_prefix_state_change(
        &mut self,
        changed: bool,
        perf_events: Option<&PerfEvents>,
    ) {
        if !changed {
            return;
        }
        self.count += 1;
        self.flags.insert(PendingUpdateFlags::PREFIX_STATE);
        self.keep_perf_events(perf_events);
    }

    fn needs_route_update(&self) -> bool {
        !self.flags.is_empty()
    }

    fn add_event(&mut self, event_name: &str) {
        let events = self.perf_events.get_or_insert_with(Vec::new);
        events.push(PerfEvent::new(
            self.node_name.clone(),
            event_name.to_owned(),
            Utc::now().timestamp_millis(),
        ));
    }

    fn move_out_events(&mut self) -> Option<PerfEvents> {
        self.perf_events.take()
    }

    fn reset(&mut self) {
        self.count = 0;
        self.flags = PendingUpdateFlags::empty();
        self.perf_events = None;
    }

    // The first batch of measurement events wins; later ones would
    // misattribute the debounce delay.
    fn keep_perf_events(&mut self, perf_events: Option<&PerfEvents>) {
        if self.perf_events.is_none() {
            self.perf_events = perf_events.cloned();
        }
    }
}

// ===== impl DecisionCounters =====

impl Default for DecisionCounters {
    fn default() -> DecisionCounters {
        DecisionCounters {
            adj_db_update: 0,
            prefix_db_update: 0,
            errors: 0,
            spf_runs: 0,
            spf_ms: 0,
            num_partial_adjacencies: 0,
            num_complete_adjacencies: 0,
            num_nodes: 0,
            num_prefixes: 0,
            num_nodes_v4_loopbacks: 0,
            num_nodes_v6_loopbacks: 0,
            discontinuity_time: Utc::now(),
        }
    }
}

// ===== impl Decision =====

impl Decision {
    pub fn new(
        config: Config,
        route_updates_tx: broadcast::Sender<RouteDatabaseDelta>,
    ) -> Decision {
        let (timer_eventp, timer_eventc) = mpsc::unbounded_channel();

        let spf_solver = SpfSolver::new(
            config.node_name.clone(),
            config.enable_v4,
            config.compute_lfa_paths,
            config.bgp_dry_run,
            config.bgp_use_igp_metric,
        );
        let backoff = ExponentialBackoff::new(
            Duration::from_millis(config.debounce_min_ms),
            Duration::from_millis(config.debounce_max_ms),
        );

        // Absorb initial churn before publishing anything.
        let cold_start_timer = config.eor_time_s.map(|eor_time_s| {
            tasks::timeout_timer(
                Duration::from_secs(eor_time_s),
                TimerMsg::ColdStart,
                &timer_eventp,
            )
        });
        let counter_interval = tasks::counter_submit_interval(
            COUNTER_SUBMIT_INTERVAL,
            &timer_eventp,
        );

        Decision {
            pending_updates: PendingUpdates::new(config.node_name.clone()),
            config,
            area_link_states: Default::default(),
            prefix_state: Default::default(),
            spf_solver,
            rib_policy: None,
            route_db: Default::default(),
            backoff,
            fib_times: Default::default(),
            full_db_prefix_entries: Default::default(),
            per_prefix_entries: Default::default(),
            counters: Default::default(),
            route_updates_tx,
            timer_eventp,
            timer_eventc: Some(timer_eventc),
            debounce_timer: None,
            cold_start_timer,
            ordered_fib_timer: None,
            rib_policy_timer: None,
            _counter_interval: counter_interval,
        }
    }

    // Runs the instance until one of the inbound streams signals
    // end-of-stream. In-flight marshaled requests complete with a
    // terminating error.
    pub async fn run(
        mut self,
        mut publications: Receiver<Publication>,
        mut static_updates: Receiver<RouteDatabaseDelta>,
        mut requests: UnboundedReceiver<RequestMsg>,
    ) {
        Debug::InstanceStart.log();
        let mut timer_eventc = self.timer_eventc.take().unwrap();

        loop {
            tokio::select! {
                biased;
                publication = publications.recv() => {
                    match publication {
                        Some(publication) => {
                            self.process_publication(publication);
                            self.schedule_debounce();
                        }
                        None => break,
                    }
                }
                delta = static_updates.recv() => {
                    match delta {
                        Some(delta) => {
                            self.spf_solver.push_routes_delta_updates(delta);
                            self.schedule_debounce();
                        }
                        None => break,
                    }
                }
                request = requests.recv() => {
                    match request {
                        Some(request) => self.process_request(request),
                        None => break,
                    }
                }
                msg = timer_eventc.recv() => {
                    if let Some(msg) = msg {
                        self.process_timer_event(msg);
                    }
                }
            }
        }

        // Cancel all timers and fail the requests still in flight.
        self.debounce_timer = None;
        self.cold_start_timer = None;
        self.ordered_fib_timer = None;
        self.rib_policy_timer = None;
        requests.close();
        while let Ok(request) = requests.try_recv() {
            reject_request(request);
        }
        Debug::InstanceStop.log();
    }

    //
    // Publication processing.
    //

    fn process_publication(&mut self, publication: Publication) {
        let area = publication
            .area
            .unwrap_or_else(|| lsdb::DEFAULT_AREA.to_owned());
        self.area_link_states
            .entry(area.clone())
            .or_insert_with(|| LinkState::new(area.clone()));

        for (key, value) in &publication.key_vals {
            // A value without a payload is a TTL refresh.
            let Some(bytes) = &value.value else {
                continue;
            };
            let node_name = node_name_from_key(key);

            if key.starts_with(lsdb::ADJ_DB_MARKER) {
                match serde_json::from_slice::<AdjacencyDatabase>(bytes) {
                    Ok(adjacency_db) => self.process_adjacency_db_update(
                        &area,
                        &node_name,
                        adjacency_db,
                    ),
                    Err(error) => {
                        Error::PublicationDecode(key.clone(), error).log();
                        self.counters.errors += 1;
                    }
                }
                continue;
            }

            if key.starts_with(lsdb::PREFIX_DB_MARKER) {
                match serde_json::from_slice::<PrefixDatabase>(bytes) {
                    Ok(prefix_db) => self.process_prefix_db_update(
                        key,
                        &node_name,
                        prefix_db,
                    ),
                    Err(error) => {
                        Error::PublicationDecode(key.clone(), error).log();
                        self.counters.errors += 1;
                    }
                }
                continue;
            }

            if key.starts_with(lsdb::FIB_TIME_MARKER) {
                let fib_time = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|value| value.trim().parse::<u64>().ok());
                match fib_time {
                    Some(fib_time_ms) => {
                        Debug::FibTimeUpdate(&node_name, fib_time_ms).log();
                        self.fib_times.insert(
                            node_name,
                            Duration::from_millis(fib_time_ms),
                        );
                    }
                    None => {
                        Error::FibTimeParse(
                            node_name,
                            String::from_utf8_lossy(bytes).into_owned(),
                        )
                        .log();
                        self.counters.errors += 1;
                    }
                }
                continue;
            }
        }

        for key in &publication.expired_keys {
            let node_name = node_name_from_key(key);

            if key.starts_with(lsdb::ADJ_DB_MARKER) {
                Debug::AdjacencyDbExpire(&node_name, &area).log();
                let link_state = self.area_link_states.get_mut(&area).unwrap();
                let change = link_state.delete_adjacency_database(&node_name);
                self.pending_updates.apply_link_state_change(&change, None);
                continue;
            }

            if key.starts_with(lsdb::PREFIX_DB_MARKER) {
                Debug::PrefixDbExpire(&node_name).log();
                // An expiry is processed like a client-sent deletion.
                let mut delete_db =
                    PrefixDatabase::new(node_name.clone(), vec![]);
                delete_db.delete_prefix = true;
                let node_prefix_db =
                    self.update_node_prefix_database(key, delete_db);
                let changed = self
                    .prefix_state
                    .update_prefix_database(&node_prefix_db);
                self.pending_updates.apply_prefix_state_change(changed, None);
                continue;
            }
        }
    }

    fn process_adjacency_db_update(
        &mut self,
        area: &str,
        key_node_name: &str,
        adjacency_db: AdjacencyDatabase,
    ) {
        if adjacency_db.this_node_name != key_node_name {
            Error::NodeNameMismatch(
                key_node_name.to_owned(),
                adjacency_db.this_node_name,
            )
            .log();
            self.counters.errors += 1;
            return;
        }
        Debug::AdjacencyDbUpdate(&adjacency_db.this_node_name, area).log();
        self.counters.adj_db_update += 1;

        // Under ordered-fib programming, the hold-up equals our hop
        // distance to the changed node and the hold-down covers the
        // farthest node behind it.
        let mut hold_up_ttl = 0;
        let mut hold_down_ttl = 0;
        let link_state = &self.area_link_states[area];
        if self.config.enable_ordered_fib_programming {
            if let Some(hops) = link_state.get_hops_from_a_to_b(
                &self.config.node_name,
                &adjacency_db.this_node_name,
            ) {
                hold_up_ttl = hops;
                hold_down_ttl = link_state
                    .get_max_hops_to_node(&adjacency_db.this_node_name)
                    .saturating_sub(hops);
            }
        }

        let perf_events = adjacency_db.perf_events.clone();
        let link_state = self.area_link_states.get_mut(area).unwrap();
        let change = link_state.update_adjacency_database(
            adjacency_db,
            hold_up_ttl,
            hold_down_ttl,
        );
        self.pending_updates
            .apply_link_state_change(&change, perf_events.as_ref());

        if link_state.has_holds() && self.ordered_fib_timer.is_none() {
            self.ordered_fib_timer = Some(tasks::timeout_timer(
                self.get_max_fib(),
                TimerMsg::OrderedFibHolds,
                &self.timer_eventp,
            ));
        }
    }

    fn process_prefix_db_update(
        &mut self,
        key: &str,
        key_node_name: &str,
        prefix_db: PrefixDatabase,
    ) {
        if prefix_db.this_node_name != key_node_name {
            Error::NodeNameMismatch(
                key_node_name.to_owned(),
                prefix_db.this_node_name,
            )
            .log();
            self.counters.errors += 1;
            return;
        }
        Debug::PrefixDbUpdate(&prefix_db.this_node_name).log();
        self.counters.prefix_db_update += 1;

        let node_prefix_db = self.update_node_prefix_database(key, prefix_db);
        let changed =
            self.prefix_state.update_prefix_database(&node_prefix_db);
        self.pending_updates.apply_prefix_state_change(
            changed,
            node_prefix_db.perf_events.as_ref(),
        );
    }

    // Merges a received prefix database into the node's stored view.
    // Full-db keys replace the whole view; per-prefix keys touch one
    // prefix and override full-db entries for it.
    fn update_node_prefix_database(
        &mut self,
        key: &str,
        prefix_db: PrefixDatabase,
    ) -> PrefixDatabase {
        let node_name = prefix_db.this_node_name.clone();

        match prefix_from_key(key) {
            Some(prefix) => {
                let entries =
                    self.per_prefix_entries.entry(node_name.clone()).or_default();
                if prefix_db.delete_prefix {
                    entries.remove(&prefix);
                } else {
                    match prefix_db.prefix_entries.first() {
                        Some(first) => {
                            if prefix_db.prefix_entries.len() > 1 {
                                warn!(
                                    %key,
                                    "received more than one prefix entry, \
                                     only the first one is processed"
                                );
                            }
                            entries.insert(prefix, first.clone());
                        }
                        None => {
                            error!(%key, "received no entries for prefix db");
                        }
                    }
                }
            }
            None => {
                let entries = self
                    .full_db_prefix_entries
                    .entry(node_name.clone())
                    .or_default();
                entries.clear();
                for entry in &prefix_db.prefix_entries {
                    entries.insert(entry.prefix, entry.clone());
                }
            }
        }

        let per_prefix = self
            .per_prefix_entries
            .get(&node_name)
            .cloned()
            .unwrap_or_default();
        let mut merged = per_prefix.values().cloned().collect::<Vec<_>>();
        if let Some(full_db) = self.full_db_prefix_entries.get(&node_name) {
            merged.extend(
                full_db
                    .iter()
                    .filter(|(prefix, _)| !per_prefix.contains_key(prefix))
                    .map(|(_, entry)| entry.clone()),
            );
        }

        let mut node_prefix_db = PrefixDatabase::new(node_name, merged);
        node_prefix_db.perf_events = prefix_db.perf_events;
        node_prefix_db
    }

    //
    // Scheduling.
    //

    // Starts or advances the debounce timer. At maximum backoff the
    // timer is already running and is left alone.
    fn schedule_debounce(&mut self) {
        if !self.pending_updates.needs_route_update()
            && !self.spf_solver.static_routes_updated()
        {
            return;
        }
        if !self.backoff.at_max_backoff() {
            self.backoff.report_error();
            self.debounce_timer = Some(tasks::timeout_timer(
                self.backoff.time_remaining_until_retry(),
                TimerMsg::Debounce,
                &self.timer_eventp,
            ));
        } else if self.debounce_timer.is_none() {
            // Reached during the cold-start grace period, when an
            // expired debounce didn't reset the backoff.
            self.debounce_timer = Some(tasks::timeout_timer(
                self.backoff.time_remaining_until_retry(),
                TimerMsg::Debounce,
                &self.timer_eventp,
            ));
        }
    }

    fn process_timer_event(&mut self, msg: TimerMsg) {
        match msg {
            TimerMsg::Debounce => {
                self.process_pending_updates();
            }
            TimerMsg::ColdStart => {
                self.cold_start_update();
            }
            TimerMsg::CounterSubmit => {
                self.update_global_counters();
            }
            TimerMsg::OrderedFibHolds => {
                self.ordered_fib_timer = None;
                self.decrement_ordered_fib_holds();
            }
            TimerMsg::RibPolicyExpiry => {
                Debug::RibPolicyExpired.log();
                self.process_rib_policy_update();
            }
        }
    }

    //
    // Route computation and publication.
    //

    fn process_pending_updates(&mut self) {
        self.debounce_timer = None;
        if self.cold_start_timer.is_some() {
            return;
        }

        self.pending_updates.add_event("DECISION_DEBOUNCE");
        Debug::DebounceExpired(self.pending_updates.count).log();

        // Static routes go first since computed routes may depend on
        // them.
        let mut static_routes_updated = false;
        if self.spf_solver.static_routes_updated() {
            static_routes_updated = true;
            if let Some(delta) = self.spf_solver.process_static_route_updates()
            {
                let _ = self.route_updates_tx.send(delta);
            }
        }

        let mut maybe_route_db = None;
        if self.pending_updates.needs_route_update() || static_routes_updated {
            maybe_route_db = self.build_route_db(None);
        }
        let perf_events = self.pending_updates.move_out_events();
        match maybe_route_db {
            Some(route_db) => {
                self.send_route_update(route_db, perf_events, "ROUTE_UPDATE");
            }
            None => {
                warn!("recompute incurred no routes");
            }
        }

        self.pending_updates.reset();
        self.backoff.report_success();
    }

    fn cold_start_update(&mut self) {
        self.cold_start_timer = None;
        Debug::ColdStartExpired.log();
        match self.build_route_db(None) {
            Some(route_db) => {
                self.send_route_update(
                    route_db,
                    Some(Vec::new()),
                    "COLD_START_UPDATE",
                );
            }
            None => {
                // Nothing was learned during the grace period. Publish
                // one empty database so the forwarding agent can flush
                // stale state.
                error!(
                    "no routes to program after cold start, publishing \
                     empty route database"
                );
                self.send_route_update(
                    RouteDb::default(),
                    None,
                    "COLD_START_UPDATE",
                );
            }
        }
    }

    fn process_rib_policy_update(&mut self) {
        if self.cold_start_timer.is_some() {
            return;
        }
        match self.build_route_db(None) {
            Some(route_db) => {
                self.send_route_update(
                    route_db,
                    Some(Vec::new()),
                    "RIB_POLICY_UPDATE",
                );
            }
            None => warn!("rib policy update incurred no routes"),
        }
    }

    fn decrement_ordered_fib_holds(&mut self) {
        Debug::DecrementHolds.log();
        let mut topology_changed = false;
        let mut still_has_holds = false;
        for link_state in self.area_link_states.values_mut() {
            topology_changed |=
                link_state.decrement_holds().topology_changed;
            still_has_holds |= link_state.has_holds();
        }

        if topology_changed && self.cold_start_timer.is_none() {
            match self.build_route_db(None) {
                Some(route_db) => {
                    self.send_route_update(
                        route_db,
                        Some(Vec::new()),
                        "ORDERED_FIB_HOLDS_EXPIRED",
                    );
                }
                None => debug!("hold decrement incurred no routes"),
            }
        }

        if still_has_holds {
            self.ordered_fib_timer = Some(tasks::timeout_timer(
                self.get_max_fib(),
                TimerMsg::OrderedFibHolds,
                &self.timer_eventp,
            ));
        }
    }

    // Builds the route database across all areas. The union is a naive
    // map insertion: when two areas produce an entry for the same key,
    // the later area wins.
    fn build_route_db(&mut self, node_name: Option<&str>) -> Option<RouteDb> {
        let node_name = node_name.unwrap_or(&self.config.node_name);
        let mut route_db = RouteDb::default();
        for (area, link_state) in &self.area_link_states {
            match self.spf_solver.build_route_db(
                node_name,
                link_state,
                &self.prefix_state,
            ) {
                Some(area_db) => {
                    let mut overwrote = false;
                    for (prefix, entry) in area_db.unicast_entries {
                        overwrote |= route_db
                            .unicast_entries
                            .insert(prefix, entry)
                            .is_some();
                    }
                    for (label, entry) in area_db.mpls_entries {
                        overwrote |= route_db
                            .mpls_entries
                            .insert(label, entry)
                            .is_some();
                    }
                    if overwrote {
                        Debug::AreaRouteOverwrite(area).log();
                    }
                }
                None => warn!(%area, "no routes for area"),
            }
        }
        if route_db.is_empty() {
            None
        } else {
            Some(route_db)
        }
    }

    fn send_route_update(
        &mut self,
        mut route_db: RouteDb,
        mut perf_events: Option<PerfEvents>,
        event_name: &str,
    ) {
        if let Some(events) = &mut perf_events {
            events.push(PerfEvent::new(
                self.config.node_name.clone(),
                event_name.to_owned(),
                Utc::now().timestamp_millis(),
            ));
        }

        // Apply the RIB policy before publication. Entries left with no
        // next-hops are withdrawn.
        if let Some(rib_policy) =
            self.rib_policy.as_ref().filter(|policy| policy.is_active())
        {
            route_db.unicast_entries.retain(|prefix, entry| {
                if rib_policy.apply_action(entry) {
                    debug!(%prefix, "rib policy transformed route");
                }
                if entry.nexthops.is_empty() {
                    debug!(
                        %prefix,
                        "removing route without remaining next-hops"
                    );
                    return false;
                }
                true
            });
        }

        let mut delta = get_route_delta(&route_db, &self.route_db);
        self.route_db = route_db;

        delta.this_node_name = self.config.node_name.clone();
        delta.perf_events = perf_events;
        Debug::RouteUpdatePublish(
            delta.unicast_routes_to_update.len(),
            delta.unicast_routes_to_delete.len(),
            delta.mpls_routes_to_update.len(),
            delta.mpls_routes_to_delete.len(),
        )
        .log();
        let _ = self.route_updates_tx.send(delta);
    }

    //
    // Marshaled requests.
    //

    fn process_request(&mut self, request: RequestMsg) {
        match request {
            RequestMsg::GetRouteDb {
                node_name,
                responder,
            } => {
                let node_name = node_name
                    .unwrap_or_else(|| self.config.node_name.clone());
                let route_db =
                    self.build_route_db(Some(&node_name)).unwrap_or_default();
                let mut database = route_db.to_route_database(node_name);
                // Static MPLS routes are part of the node's view.
                for (label, nexthops) in self.spf_solver.get_static_routes() {
                    database
                        .mpls_routes
                        .push(MplsRoute::new(*label, nexthops.clone()));
                }
                let _ = responder.send(Ok(database));
            }
            RequestMsg::GetStaticRoutes { responder } => {
                let routes = self
                    .spf_solver
                    .get_static_routes()
                    .iter()
                    .map(|(label, nexthops)| {
                        MplsRoute::new(*label, nexthops.clone())
                    })
                    .collect();
                let _ = responder.send(Ok(routes));
            }
            RequestMsg::GetAdjacencyDbs { area, responder } => {
                let area =
                    area.unwrap_or_else(|| lsdb::DEFAULT_AREA.to_owned());
                let databases = self
                    .area_link_states
                    .get(&area)
                    .map(|link_state| {
                        link_state
                            .get_adjacency_databases()
                            .values()
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = responder.send(Ok(databases));
            }
            RequestMsg::GetAllAdjacencyDbs { responder } => {
                let databases = self
                    .area_link_states
                    .values()
                    .flat_map(|link_state| {
                        link_state.get_adjacency_databases().values().cloned()
                    })
                    .collect();
                let _ = responder.send(Ok(databases));
            }
            RequestMsg::GetPrefixDbs { responder } => {
                let databases = self
                    .prefix_state
                    .get_prefix_databases()
                    .into_values()
                    .collect();
                let _ = responder.send(Ok(databases));
            }
            RequestMsg::SetRibPolicy { policy, responder } => {
                let result = self.set_rib_policy(policy);
                let _ = responder.send(result);
            }
            RequestMsg::GetRibPolicy { responder } => {
                let result = if !self.config.enable_rib_policy {
                    Err(Error::RibPolicyDisabled)
                } else {
                    match &self.rib_policy {
                        Some(instance) if instance.is_active() => {
                            Ok(instance.policy().clone())
                        }
                        _ => Err(Error::RibPolicyNotConfigured),
                    }
                };
                let _ = responder.send(result);
            }
        }
    }

    fn set_rib_policy(&mut self, policy: RibPolicy) -> Result<(), Error> {
        if !self.config.enable_rib_policy {
            return Err(Error::RibPolicyDisabled);
        }
        if policy.ttl_secs <= 0 {
            return Err(Error::RibPolicyStale);
        }

        let instance = RibPolicyInstance::new(policy);
        let validity = instance.ttl_remaining();
        Debug::RibPolicyInstall(validity.as_millis() as u64).log();
        self.rib_policy = Some(instance);

        // The expiry triggers a recompute so the next publication
        // reflects the policy's removal.
        self.rib_policy_timer = Some(tasks::timeout_timer(
            validity,
            TimerMsg::RibPolicyExpiry,
            &self.timer_eventp,
        ));
        self.process_rib_policy_update();
        Ok(())
    }

    //
    // Counters.
    //

    fn update_global_counters(&mut self) {
        let mut num_adjacencies = 0;
        let mut num_partial_adjacencies = 0;
        let mut spf_runs = 0;
        let mut spf_ms = 0;
        let mut node_set = BTreeSet::new();
        for link_state in self.area_link_states.values() {
            num_adjacencies += link_state.num_links();
            spf_runs += link_state.num_spf_runs();
            spf_ms += link_state.spf_time_ms();
            let spf_result =
                link_state.get_spf_result(&self.config.node_name);
            for (node_name, adjacency_db) in
                link_state.get_adjacency_databases()
            {
                node_set.insert(node_name.clone());
                let num_links =
                    link_state.links_from_node(node_name).len();
                // A partial adjacency misses its reverse direction.
                // Count them only for reachable, connected nodes.
                if spf_result.contains_key(node_name) && num_links != 0 {
                    num_partial_adjacencies += adjacency_db
                        .adjacencies
                        .len()
                        .saturating_sub(num_links);
                }
            }
        }

        self.counters.spf_runs = spf_runs;
        self.counters.spf_ms = spf_ms;
        self.counters.num_partial_adjacencies =
            num_partial_adjacencies as u64;
        self.counters.num_complete_adjacencies = num_adjacencies as u64;
        // A node with no adjacencies still counts itself.
        self.counters.num_nodes = std::cmp::max(node_set.len(), 1) as u64;
        self.counters.num_prefixes =
            self.prefix_state.prefixes().len() as u64;
        self.counters.num_nodes_v4_loopbacks =
            self.prefix_state.node_host_loopbacks_v4().len() as u64;
        self.counters.num_nodes_v6_loopbacks =
            self.prefix_state.node_host_loopbacks_v6().len() as u64;
        self.counters.discontinuity_time = Utc::now();
        debug!(
            num_nodes = %self.counters.num_nodes,
            num_prefixes = %self.counters.num_prefixes,
            num_complete_adjacencies = %self.counters.num_complete_adjacencies,
            num_partial_adjacencies = %self.counters.num_partial_adjacencies,
            "global counters updated"
        );
    }

    // Ordered-fib hold decrements are paced by the slowest neighbor's
    // forwarding-install time.
    fn get_max_fib(&self) -> Duration {
        std::cmp::max(
            Duration::from_millis(1),
            self.fib_times.values().max().copied().unwrap_or_default(),
        )
    }
}

// ===== helper functions =====

fn reject_request(request: RequestMsg) {
    match request {
        RequestMsg::GetRouteDb { responder, .. } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::GetStaticRoutes { responder } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::GetAdjacencyDbs { responder, .. } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::GetAllAdjacencyDbs { responder } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::GetPrefixDbs { responder } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::SetRibPolicy { responder, .. } => {
            let _ = responder.send(Err(Error::Terminating));
        }
        RequestMsg::GetRibPolicy { responder } => {
            let _ = responder.send(Err(Error::Terminating));
        }
    }
}
