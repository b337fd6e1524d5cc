//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;

use tokio::task;
use tracing::Instrument;

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] function.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle for a long-running session task (periodic transmission, failure
/// detection or ingress reception).
///
/// Dropping this handle cancels the task, so replacing a stored handle
/// cancels and restarts the task atomically with respect to the caller.
#[derive(Debug)]
pub struct SessionTask {
    #[cfg(not(feature = "testing"))]
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
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
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
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl SessionTask =====

impl SessionTask {
    #[cfg(not(feature = "testing"))]
    pub(crate) fn spawn<Fut>(future: Fut) -> SessionTask
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        SessionTask {
            _task: Task::spawn(future),
        }
    }

    #[cfg(feature = "testing")]
    pub(crate) fn stub() -> SessionTask {
        SessionTask {}
    }
}
