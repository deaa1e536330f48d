//! Nested-node forwarding.
//!
//! When a node stores a child node under `key`, changes announced on the
//! child's wildcard channel are re-emitted on the parent under `key` and the
//! wildcard, with `key` prepended to the change path.

use crate::events::Handler;
use crate::{Change, Channel, Key, State};

pub(crate) fn bind(parent: &State, key: &Key, child: &State) {
    unbind(parent, key);
    log::trace!("watching nested `{key}`");
    let weak_parent = parent.downgrade();
    let prop = key.clone();
    let handler = Handler::new(move |change: &Change| {
        let Some(parent) = weak_parent.upgrade() else {
            return;
        };
        let mut path = Vec::with_capacity(change.path.len() + 1);
        path.push(prop.clone());
        path.extend(change.path.iter().cloned());
        let forwarded = Change {
            path,
            ..change.clone()
        };
        parent.emit(&[Channel::Key(prop.clone()), Channel::AnyProperty], &forwarded);
    });
    child.listen(&[Channel::AnyProperty], &handler);

    let weak_child = child.downgrade();
    parent.watchers().once(
        [key.clone()],
        &Handler::new(move |_: &()| {
            if let Some(child) = weak_child.upgrade() {
                child.off(Channel::AnyProperty, Some(&handler));
            }
        }),
    );
}

pub(crate) fn unbind(parent: &State, key: &Key) {
    parent.watchers().emit(std::slice::from_ref(key), &());
}
