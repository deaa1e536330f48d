//! # Reactive state graph
//!
//! Rewire wraps plain mappings and sequences into [`State`] nodes. Reads can
//! be tracked, writes emit ordered change notifications, and computed
//! properties re-evaluate themselves when what they read changes.
//!
//! ## Nodes and writes
//!
//! ```rust
//! use rewire_core::*;
//!
//! let state = State::from_json(serde_json::json!({ "count": 1 })).unwrap();
//! state.on("count", |change| log::info!("count is now {:?}", change.new));
//! state.set("count", 2).unwrap();
//! assert_eq!(state.get("count"), Value::from(2));
//! ```
//!
//! Storing a container wraps it into a child node. Changes inside the child
//! bubble up to the parent's wildcard channel with the path that led to them.
//!
//! ## Computed properties
//!
//! A [`Computed`] receives a [`Scope`]. Anything read through that scope
//! (`State::read`, `State::depend`, `State::each`) becomes a dependency:
//!
//! ```rust
//! use rewire_core::*;
//!
//! let state = State::from_json(serde_json::json!({ "a": 1 })).unwrap();
//! state
//!     .set("b", computed(|scope, n, _| {
//!         Value::from(n.read(scope, "a").as_f64().unwrap_or_default() * 2.0)
//!     }))
//!     .unwrap();
//! state.set("a", 5).unwrap();
//! assert_eq!(state.get("b"), Value::from(10));
//! ```
//!
//! Plain `get` reads are not tracked. Only one capture may run per
//! [`Context`] at a time; starting another one from inside a computation
//! fails with [`StateError::Collision`].
//!
//! ## Snapshots
//!
//! [`deep_clone`], [`deep_diff`] and [`deep_patch`] move between live nodes
//! and plain values. Patching writes through `set`, so listeners see patched
//! values like any other write.

pub mod context;
pub mod diff;
pub mod error;
pub mod events;
pub mod key;
pub mod prelude;
pub mod state;
mod updater;
pub mod value;
mod watcher;

pub use context::*;
pub use diff::*;
pub use error::*;
pub use events::*;
pub use key::*;
pub use state::*;
pub use value::*;
