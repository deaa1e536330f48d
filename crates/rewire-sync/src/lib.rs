//! # Synchronization
//!
//! A [`SyncSession`] drives a live [`State`] against a remote handler:
//!
//! 1. snapshot the state and diff it against the last accepted snapshot;
//! 2. hand `(current, previous, diff, args)` to the handler;
//! 3. keep what the handler returns as the new snapshot and, when it is a
//!    mapping, patch it back into the live state so listeners fire.
//!
//! With a slippage window configured, bursts of [`SyncSession::call`] are
//! coalesced: only the last call of a burst runs a cycle and every caller in
//! the burst receives that cycle's result.
//!
//! ```rust,no_run
//! use rewire_core::{State, Value};
//! use rewire_sync::{SyncOptions, SyncRequest, SyncSession};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), rewire_sync::SyncError> {
//! let state = State::from_json(serde_json::json!({ "title": "draft" })).unwrap();
//! let session = SyncSession::new(
//!     state,
//!     |req: SyncRequest| async move { Ok::<_, anyhow::Error>(req.current) },
//!     SyncOptions { slippage: Some(Duration::from_millis(100)) },
//! );
//! let accepted: Value = session.call(vec![]).await?;
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use rewire_core::{Diff, State, StateError, Value, deep_clone, deep_diff, deep_patch};

#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    /// Debounce window. `None` runs every call immediately.
    pub slippage: Option<Duration>,
}

/// What the handler is given on every cycle.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    /// Fresh plain snapshot of the live state.
    pub current: Value,
    /// Last snapshot returned by the handler (`Undefined` before the first).
    pub previous: Value,
    /// `None` when nothing changed since `previous`.
    pub diff: Option<Diff>,
    /// Extra arguments forwarded from `call`/`cycle`.
    pub args: Vec<Value>,
}

pub trait SyncHandler {
    /// Returns the accepted snapshot. A mapping is patched back into the
    /// live state; anything else is only remembered.
    fn handle(&self, request: SyncRequest) -> impl Future<Output = anyhow::Result<Value>>;
}

impl<F, Fut> SyncHandler for F
where
    F: Fn(SyncRequest) -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    fn handle(&self, request: SyncRequest) -> impl Future<Output = anyhow::Result<Value>> {
        self(request)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error("sync handler failed: {0}")]
    Handler(Arc<anyhow::Error>),
    #[error("could not patch state: {0}")]
    Patch(#[from] StateError),
    /// The call that was going to run the coalesced cycle was dropped.
    #[error("coalesced sync was dropped before it completed")]
    Cancelled,
}

type Outcome = Result<Value, SyncError>;

type Waiters = Vec<oneshot::Sender<Outcome>>;

#[derive(Default)]
struct Debounce {
    generation: u64,
    waiters: Waiters,
}

/// A call sleeping through its window. If it is dropped while it is still
/// the newest call of its burst, nobody else would run the cycle, so the
/// burst is resolved with `Cancelled`.
struct PendingCall<'a> {
    debounce: &'a RefCell<Debounce>,
    generation: u64,
    armed: bool,
}

impl<'a> PendingCall<'a> {
    fn enter(debounce: &'a RefCell<Debounce>, waiter: oneshot::Sender<Outcome>) -> Self {
        let mut state = debounce.borrow_mut();
        state.generation += 1;
        state.waiters.push(waiter);
        Self {
            debounce,
            generation: state.generation,
            armed: true,
        }
    }

    /// The burst's waiters, unless a later call has taken over.
    fn take_waiters(&self) -> Option<Waiters> {
        let mut state = self.debounce.borrow_mut();
        (state.generation == self.generation).then(|| std::mem::take(&mut state.waiters))
    }

    fn settle(mut self) -> Option<Waiters> {
        self.armed = false;
        self.take_waiters()
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(waiters) = self.take_waiters() else {
            return;
        };
        log::debug!("sync call dropped; cancelling {} coalesced call(s)", waiters.len());
        for waiter in waiters {
            let _ = waiter.send(Err(SyncError::Cancelled));
        }
    }
}

pub struct SyncSession<H> {
    state: State,
    handler: H,
    options: SyncOptions,
    snapshot: RefCell<Value>,
    debounce: RefCell<Debounce>,
}

impl<H: SyncHandler> SyncSession<H> {
    pub fn new(state: State, handler: H, options: SyncOptions) -> Self {
        Self {
            state,
            handler,
            options,
            snapshot: RefCell::new(Value::Undefined),
            debounce: RefCell::new(Debounce::default()),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Snapshot kept from the last successful cycle.
    pub fn last_snapshot(&self) -> Value {
        self.snapshot.borrow().clone()
    }

    /// One snapshot/diff/handle/patch round. A failing handler leaves the
    /// stored snapshot untouched, so the next cycle diffs against the last
    /// successful one.
    pub async fn cycle(&self, args: Vec<Value>) -> Outcome {
        let previous = self.last_snapshot();
        let current = self.state.snapshot();
        let diff = deep_diff(&current, &previous);
        log::debug!(
            "sync cycle: {} difference(s)",
            diff.as_ref().map_or(0, Diff::len)
        );

        let accepted = self
            .handler
            .handle(SyncRequest {
                current,
                previous,
                diff,
                args,
            })
            .await
            .map_err(|err| {
                log::warn!("sync handler failed: {err:#}");
                SyncError::Handler(Arc::new(err))
            })?;

        let accepted = deep_clone(&accepted);
        *self.snapshot.borrow_mut() = accepted.clone();
        if accepted.is_mapping() {
            deep_patch(&self.state, &accepted)?;
        }
        Ok(accepted)
    }

    /// Runs a cycle, debounced by the configured slippage.
    ///
    /// Every call waits the full window from its own start; when it wakes up
    /// and no later call arrived meanwhile, it runs the cycle on behalf of all
    /// pending callers. A cycle already in flight is never interrupted.
    /// Pending callers resolve once some later call completes its window, or
    /// with [`SyncError::Cancelled`] if the newest call is dropped first.
    pub async fn call(&self, args: Vec<Value>) -> Outcome {
        let Some(window) = self.options.slippage else {
            return self.cycle(args).await;
        };

        let (tx, rx) = oneshot::channel();
        let pending = PendingCall::enter(&self.debounce, tx);

        tokio::time::sleep(window).await;

        let Some(waiters) = pending.settle() else {
            return rx.await.unwrap_or(Err(SyncError::Cancelled));
        };

        log::debug!("running sync for {} coalesced call(s)", waiters.len());
        let outcome = self.cycle(args).await;
        for waiter in waiters {
            // Our own receiver is still alive in `rx`; others may have gone away.
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}
