//
// Copyright (c) The Weave Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::{task, time};
use tracing::Instrument;

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] function.
///
/// Dropping this handle cancels the task.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
}

/// A handle to a task that fires a callback once after a timeout.
///
/// Dropping this handle cancels the timeout task.
#[derive(Debug)]
pub struct TimeoutTask {
    _task: Task<()>,
}

/// A handle to a task that fires a callback on every interval tick.
///
/// Dropping this handle cancels the interval task.
#[derive(Debug)]
pub struct IntervalTask {
    _task: Task<()>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future.in_current_span()),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a new task that will call the provided async closure when the
    /// specified timeout expires.
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = Task::spawn(async move {
            time::sleep(timeout).await;
            (cb)().await;
        });

        TimeoutTask { _task: task }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a new task that will call the provided async closure whenever
    /// the specified interval timer ticks.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = Task::spawn(async move {
            let mut interval_fut = if tick_on_start {
                time::interval(interval)
            } else {
                time::interval_at(time::Instant::now() + interval, interval)
            };

            loop {
                interval_fut.tick().await;
                (cb)().await;
            }
        });

        IntervalTask { _task: task }
    }
}
