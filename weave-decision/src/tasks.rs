//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use weave_utils::task::{IntervalTask, TimeoutTask};
use weave_utils::UnboundedSender;

//
// Decision tasks diagram:
//
//                      +--------------+
//   publications ----> |              |
//   static updates --> |              | ----> route updates
//   requests --------> |   instance   |
//                      |              |
//   debounce_timer --> |              |
//   cold_start_timer ->|              |
//   counter_interval ->|              |
//   ordered_fib_timer->|              |
//   rib_policy_timer ->|              |
//                      +--------------+
//

// Decision inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};
    use weave_utils::policy::RibPolicy;
    use weave_utils::southbound::{MplsRoute, RouteDatabase};
    use weave_utils::Responder;

    use crate::error::Error;
    use crate::lsdb::{AdjacencyDatabase, PrefixDatabase};

    // Timer expiration events (child task -> main task).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum TimerMsg {
        Debounce,
        ColdStart,
        CounterSubmit,
        OrderedFibHolds,
        RibPolicyExpiry,
    }

    // Marshaled inspection and policy requests. The responder completes
    // once the request was processed on the instance's run loop.
    #[derive(Debug)]
    pub enum RequestMsg {
        GetRouteDb {
            node_name: Option<String>,
            responder: Responder<Result<RouteDatabase, Error>>,
        },
        GetStaticRoutes {
            responder: Responder<Result<Vec<MplsRoute>, Error>>,
        },
        GetAdjacencyDbs {
            area: Option<String>,
            responder: Responder<Result<Vec<AdjacencyDatabase>, Error>>,
        },
        GetAllAdjacencyDbs {
            responder: Responder<Result<Vec<AdjacencyDatabase>, Error>>,
        },
        GetPrefixDbs {
            responder: Responder<Result<Vec<PrefixDatabase>, Error>>,
        },
        SetRibPolicy {
            policy: RibPolicy,
            responder: Responder<Result<(), Error>>,
        },
        GetRibPolicy {
            responder: Responder<Result<RibPolicy, Error>>,
        },
    }
}

// ===== global functions =====

pub(crate) fn timeout_timer(
    timeout: Duration,
    msg: messages::TimerMsg,
    timer_eventp: &UnboundedSender<messages::TimerMsg>,
) -> TimeoutTask {
    let timer_eventp = timer_eventp.clone();

    TimeoutTask::new(timeout, move || async move {
        let _ = timer_eventp.send(msg);
    })
}

pub(crate) fn counter_submit_interval(
    interval: Duration,
    timer_eventp: &UnboundedSender<messages::TimerMsg>,
) -> IntervalTask {
    let timer_eventp = timer_eventp.clone();

    IntervalTask::new(interval, false, move || {
        let timer_eventp = timer_eventp.clone();
        async move {
            let _ = timer_eventp.send(messages::TimerMsg::CounterSubmit);
        }
    })
}
