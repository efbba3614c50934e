//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod backoff;
pub mod ip;
pub mod mpls;
pub mod policy;
pub mod southbound;
pub mod task;

use tokio::sync::{mpsc, oneshot};

// Channel type aliases.
pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;
pub type UnboundedSender<T> = mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = mpsc::UnboundedReceiver<T>;

// One-shot responder used to marshal request/response exchanges onto a
// run loop. The caller keeps the receiving half and awaits it.
pub type Responder<T> = oneshot::Sender<T>;
