//! Dependency capture.
//!
//! A [`Context`] owns at most one active capture. While a capture runs, reads
//! go through an explicit [`Scope`] handle, which records every
//! `(node, channel)` pair it is shown. When the getter returns, each record is
//! handed to the caller's `subscribe` callback.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::{Channel, State, StateError, Value};

/// Per-item projection registered by [`State::each`].
pub type Projector = Rc<dyn Fn(&Value, usize, &State) -> Value>;

pub struct Capture {
    pub node: State,
    pub channel: Channel,
    pub projector: Option<Projector>,
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("node", &self.node)
            .field("channel", &self.channel)
            .field("projector", &self.projector.is_some())
            .finish()
    }
}

/// Read handle passed to computations.
pub struct Scope {
    tracking: bool,
    captures: RefCell<Vec<Capture>>,
}

impl Scope {
    fn tracking() -> Self {
        Self {
            tracking: true,
            captures: RefCell::new(Vec::new()),
        }
    }

    /// A scope that records nothing; used for re-evaluation and plain reads.
    pub fn untracked() -> Self {
        Self {
            tracking: false,
            captures: RefCell::new(Vec::new()),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Records a dependency. Recording the same pair again keeps its original
    /// position but replaces the projector.
    pub fn record(&self, node: &State, channel: Channel, projector: Option<Projector>) {
        if !self.tracking {
            return;
        }
        let mut captures = self.captures.borrow_mut();
        if let Some(existing) = captures
            .iter_mut()
            .find(|c| c.node.ptr_eq(node) && c.channel == channel)
        {
            existing.projector = projector;
            return;
        }
        captures.push(Capture {
            node: node.clone(),
            channel,
            projector,
        });
    }

    pub fn captured(&self) -> usize {
        self.captures.borrow().len()
    }

    fn into_captures(self) -> Vec<Capture> {
        self.captures.into_inner()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("tracking", &self.tracking)
            .field("captured", &self.captured())
            .finish()
    }
}

struct ContextInner {
    active: Cell<bool>,
}

/// Owner of the single-capture invariant. Nodes created together share one.
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

thread_local! {
    static DEFAULT_CONTEXT: Context = Context::new();
}

impl Context {
    pub fn new() -> Self {
        Self(Rc::new(ContextInner {
            active: Cell::new(false),
        }))
    }

    /// The context used by nodes created without explicit options.
    pub fn default_context() -> Context {
        DEFAULT_CONTEXT.with(Context::clone)
    }

    pub fn is_capturing(&self) -> bool {
        self.0.active.get()
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Runs `getter` under a fresh tracking scope, then feeds every captured
    /// dependency to `subscribe` before returning the getter's result.
    pub fn capture<R>(
        &self,
        getter: impl FnOnce(&Scope) -> R,
        mut subscribe: impl FnMut(Capture),
    ) -> Result<R, StateError> {
        if self.0.active.get() {
            return Err(StateError::Collision);
        }
        let scope = Scope::tracking();
        let out = {
            let _active = ActiveGuard::enter(self);
            getter(&scope)
        };
        let captures = scope.into_captures();
        log::trace!("capture finished with {} dependencies", captures.len());
        for capture in captures {
            subscribe(capture);
        }
        Ok(out)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("capturing", &self.is_capturing())
            .finish()
    }
}

struct ActiveGuard<'a>(&'a Context);

impl<'a> ActiveGuard<'a> {
    fn enter(ctx: &'a Context) -> Self {
        ctx.0.active.set(true);
        Self(ctx)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.0.active.set(false);
    }
}
