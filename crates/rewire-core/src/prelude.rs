pub use crate::context::{Context, Scope};
pub use crate::diff::{Diff, deep_clone, deep_diff, deep_patch};
pub use crate::error::StateError;
pub use crate::events::Handler;
pub use crate::key::{Channel, Key};
pub use crate::state::{Change, State, StateBuilder, StateOptions};
pub use crate::value::{Assign, Computed, Props, Value, computed};
