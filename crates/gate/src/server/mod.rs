// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback callback server.
//!
//! Started on demand, it completes the browser token flow and hosts the
//! confirmation pages. It runs on its own OS thread with a current-thread
//! Tokio runtime and stops itself after an idle window. Any caller that needs
//! it while it is down restarts it, possibly on a different port, so URLs
//! must always be built from the port returned by the latest [`CallbackServer::start`].
//!
//! Lifecycle: `Stopped -> Starting -> Ready -> (idle timeout | shutdown) -> Stopped`.

pub mod routes;

use std::net::{Ipv4Addr, TcpListener};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GateConfig;

pub use routes::CallbackContext;

/// Ports probed upward from the base port before giving up.
pub const MAX_PORT_ATTEMPTS: u16 = 10;

/// How long `start()` waits for the listener thread to report readiness.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    Ready,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// First port probed; 0 binds a single ephemeral port.
    pub base_port: u16,
    pub idle_timeout: Duration,
    pub max_attempts: u16,
}

impl ServerSettings {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            base_port: config.callback_port,
            idle_timeout: config.callback_idle(),
            max_attempts: MAX_PORT_ATTEMPTS,
        }
    }
}

struct Running {
    port: u16,
    generation: u64,
    shutdown: CancellationToken,
    deadline: watch::Sender<Instant>,
}

struct ServerState {
    phase: Phase,
    generation: u64,
    running: Option<Running>,
}

/// On-demand loopback HTTP server for the auth callback and confirmation pages.
pub struct CallbackServer {
    settings: ServerSettings,
    context: Arc<CallbackContext>,
    state: Arc<Mutex<ServerState>>,
}

impl CallbackServer {
    pub fn new(settings: ServerSettings, context: Arc<CallbackContext>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            context,
            state: Arc::new(Mutex::new(ServerState {
                phase: Phase::Stopped,
                generation: 0,
                running: None,
            })),
        })
    }

    pub fn context(&self) -> &Arc<CallbackContext> {
        &self.context
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Port of the live listener, if any.
    pub fn port(&self) -> Option<u16> {
        let state = self.state.lock();
        state.running.as_ref().filter(|r| !r.shutdown.is_cancelled()).map(|r| r.port)
    }

    pub fn is_running(&self) -> bool {
        self.port().is_some()
    }

    /// Ensure the server is listening and return its port.
    ///
    /// Pushes back the idle deadline on every call, including when the server is
    /// already running. Blocks up to a few seconds on a cold start; async
    /// callers should use [`CallbackServer::ensure_running`].
    pub fn start(&self) -> anyhow::Result<u16> {
        let mut state = self.state.lock();

        if let Some(ref running) = state.running {
            if !running.shutdown.is_cancelled() {
                push_deadline(&running.deadline, Instant::now() + self.settings.idle_timeout);
                tracing::debug!(port = running.port, "callback server already running, idle timer reset");
                return Ok(running.port);
            }
        }

        state.phase = Phase::Starting;
        let (listener, port) = match probe_port(self.settings.base_port, self.settings.max_attempts)
            .and_then(|l| {
                l.set_nonblocking(true)?;
                let port = l.local_addr()?.port();
                Ok((l, port))
            }) {
            Ok(bound) => bound,
            Err(e) => {
                state.phase = Phase::Stopped;
                return Err(e);
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let shutdown = CancellationToken::new();
        let (deadline_tx, deadline_rx) = watch::channel(Instant::now() + self.settings.idle_timeout);
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let router = routes::build_router(Arc::clone(&self.context));

        let spawned = std::thread::Builder::new().name("adsgate-callback".into()).spawn({
            let shutdown = shutdown.clone();
            let state = Arc::clone(&self.state);
            move || {
                serve_on_thread(listener, router, shutdown, deadline_rx, ready_tx, port);
                let mut state = state.lock();
                if state.running.as_ref().is_some_and(|r| r.generation == generation) {
                    state.running = None;
                    state.phase = Phase::Stopped;
                }
                tracing::info!(port, "callback server stopped");
            }
        });
        if let Err(e) = spawned {
            state.phase = Phase::Stopped;
            return Err(e.into());
        }

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(port, "timed out waiting for callback server readiness, continuing");
            }
            Ok(Err(e)) => {
                state.phase = Phase::Stopped;
                return Err(e.context("callback server failed to start"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                state.phase = Phase::Stopped;
                anyhow::bail!("callback server thread exited before becoming ready");
            }
        }

        state.running = Some(Running { port, generation, shutdown, deadline: deadline_tx });
        state.phase = Phase::Ready;
        tracing::info!(port, idle_secs = self.settings.idle_timeout.as_secs(), "callback server ready");
        Ok(port)
    }

    /// Keep a running server up for at least `window`, regardless of the idle
    /// timeout. Returns the port, or `None` if the server is not running.
    pub fn keep_alive(&self, window: Duration) -> Option<u16> {
        let state = self.state.lock();
        let running = state.running.as_ref().filter(|r| !r.shutdown.is_cancelled())?;
        push_deadline(&running.deadline, Instant::now() + window);
        tracing::debug!(port = running.port, secs = window.as_secs(), "callback server held open");
        Some(running.port)
    }

    /// Async wrapper around [`CallbackServer::start`].
    pub async fn ensure_running(self: &Arc<Self>) -> anyhow::Result<u16> {
        let server = Arc::clone(self);
        tokio::task::spawn_blocking(move || server.start()).await?
    }

    /// Stop the listener. In-flight requests are allowed to finish.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if let Some(running) = state.running.take() {
            tracing::info!(port = running.port, "shutting down callback server");
            running.shutdown.cancel();
        }
        state.phase = Phase::Stopped;
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(ref running) = self.state.lock().running {
            running.shutdown.cancel();
        }
    }
}

/// Move the idle deadline to `at` unless it is already later.
fn push_deadline(deadline: &watch::Sender<Instant>, at: Instant) {
    deadline.send_if_modified(|current| {
        if at > *current {
            *current = at;
            true
        } else {
            false
        }
    });
}

/// Bind the first free loopback port in `base..base + attempts`.
fn probe_port(base: u16, attempts: u16) -> anyhow::Result<TcpListener> {
    if base == 0 {
        return Ok(TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?);
    }
    for offset in 0..attempts {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => return Ok(listener),
            Err(e) => tracing::debug!(port, err = %e, "port unavailable"),
        }
    }
    anyhow::bail!("could not find an available port after {attempts} attempts starting at {base}")
}

fn serve_on_thread(
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
    deadline: watch::Receiver<Instant>,
    ready_tx: mpsc::Sender<anyhow::Result<()>>,
    port: u16,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return;
        }
    };

    let result = rt.block_on(async move {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(l) => l,
            Err(e) => {
                let _ = ready_tx.send(Err(e.into()));
                return Ok(());
            }
        };
        tokio::spawn(idle_watch(deadline, shutdown.clone()));
        let _ = ready_tx.send(Ok(()));
        axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await
    });
    if let Err(e) = result {
        tracing::error!(port, err = %e, "callback server error");
    }
}

/// Cancel `shutdown` once the deadline passes without being pushed back.
async fn idle_watch(mut deadline: watch::Receiver<Instant>, shutdown: CancellationToken) {
    loop {
        let at = *deadline.borrow_and_update();
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep_until(at) => {
                if *deadline.borrow() <= Instant::now() {
                    tracing::info!("callback server idle, shutting down");
                    shutdown.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
