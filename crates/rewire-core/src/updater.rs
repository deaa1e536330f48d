//! Computed properties.
//!
//! Binding `key` to a [`Computed`] evaluates it under a capture and subscribes
//! to whatever it read. Plain reads re-run the whole computation; reads made
//! through [`State::each`] patch only the affected element of the stored
//! derived sequence. Each subscription leaves a teardown on the node's updater
//! registry so the next (re)bind or delete of `key` can remove it.

use crate::context::{Capture, Projector, Scope};
use crate::events::Handler;
use crate::state::WeakState;
use crate::{Change, Computed, Key, State, StateError, Value};

pub(crate) fn bind(node: &State, key: &Key, computed: Computed) -> Result<Value, StateError> {
    unbind(node, key);
    log::trace!("binding computed `{key}`");
    node.context().capture(
        |scope| computed.eval(scope, node, key),
        |capture| subscribe(node, key, &computed, capture),
    )
}

/// Runs (and drops) every teardown registered for `key`.
pub(crate) fn unbind(node: &State, key: &Key) {
    node.updaters().emit(std::slice::from_ref(key), &());
}

fn subscribe(node: &State, key: &Key, computed: &Computed, capture: Capture) {
    let Capture {
        node: source,
        channel,
        projector,
    } = capture;
    let target = node.downgrade();
    let prop = key.clone();
    let handler = match projector {
        None => {
            let computed = computed.clone();
            Handler::new(move |_: &Change| recompute(&target, &prop, &computed))
        }
        Some(project) => Handler::new(move |change: &Change| patch_item(&target, &prop, &project, change)),
    };
    source.listen(std::slice::from_ref(&channel), &handler);

    let source = source.downgrade();
    node.updaters().once(
        [key.clone()],
        &Handler::new(move |_: &()| {
            if let Some(source) = source.upgrade() {
                source.off(channel.clone(), Some(&handler));
            }
        }),
    );
}

fn recompute(target: &WeakState, key: &Key, computed: &Computed) {
    let Some(node) = target.upgrade() else {
        return;
    };
    let value = computed.eval(&Scope::untracked(), &node, key);
    if let Err(err) = node.write_computed(key.clone(), value) {
        log::warn!("dropping recomputed `{key}`: {err}");
    }
}

/// Mirrors one structural change of the source sequence onto the derived one.
fn patch_item(target: &WeakState, key: &Key, project: &Projector, change: &Change) {
    let Some(node) = target.upgrade() else {
        return;
    };
    let Some(derived) = node.get(key.clone()).into_node() else {
        return;
    };
    let Some(index) = change.key.as_index() else {
        return;
    };
    let result = if change.new.is_undefined() {
        derived.splice(index, 1, Vec::new()).map(drop)
    } else if change.old.is_undefined() {
        derived.set(index, project(&change.new, index, &change.node))
    } else {
        let value = project(&change.new, index, &change.node);
        derived.splice(index, 1, vec![value]).map(drop)
    };
    if let Err(err) = result {
        log::warn!("could not update derived `{key}`[{index}]: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;

    use crate::{Channel, Context, State, StateError, StateOptions, Value, computed};

    #[test]
    fn recomputes_once_per_dependency_change() {
        let node = State::from_json(json!({"a": 1})).unwrap();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        node.set(
            "b",
            computed(move |scope, n, _| {
                r.set(r.get() + 1);
                Value::from(n.read(scope, "a").as_f64().unwrap_or_default() * 2.0)
            }),
        )
        .unwrap();
        assert_eq!(node.get("b"), Value::from(2));
        assert_eq!(runs.get(), 1);

        node.set("a", 5).unwrap();
        assert_eq!(node.get("b"), Value::from(10));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn rebinding_drops_previous_subscriptions() {
        let node = State::from_json(json!({"a": 1, "c": 100})).unwrap();
        node.set("b", computed(|s, n, _| n.read(s, "a"))).unwrap();
        node.set("b", computed(|s, n, _| n.read(s, "c"))).unwrap();
        assert_eq!(node.listener_count("a"), 0);
        assert_eq!(node.listener_count("c"), 1);

        node.set("a", 2).unwrap();
        assert_eq!(node.get("b"), Value::from(100));
        node.set("c", 3).unwrap();
        assert_eq!(node.get("b"), Value::from(3));
    }

    #[test]
    fn plain_assignment_and_delete_tear_down() {
        let node = State::from_json(json!({"a": 1})).unwrap();
        node.set("b", computed(|s, n, _| n.read(s, "a"))).unwrap();
        node.set("b", 0).unwrap();
        assert_eq!(node.listener_count("a"), 0);
        node.set("a", 9).unwrap();
        assert_eq!(node.get("b"), Value::from(0));

        node.set("b", computed(|s, n, _| n.read(s, "a"))).unwrap();
        assert_eq!(node.listener_count("a"), 1);
        node.delete("b").unwrap();
        assert_eq!(node.listener_count("a"), 0);
    }

    #[test]
    fn depends_across_nodes() {
        let ctx = Context::new();
        let opts = StateOptions { context: Some(ctx) };
        let source = State::wrap_with(json!({"n": 2}), &opts).into_node().unwrap();
        let view = State::wrap_with(json!({}), &opts).into_node().unwrap();
        let src = source.clone();
        view.set("square", computed(move |s, _, _| {
            let n = src.read(s, "n").as_f64().unwrap_or_default();
            Value::from(n * n)
        }))
        .unwrap();
        source.set("n", 3).unwrap();
        assert_eq!(view.get("square"), Value::from(9));
    }

    #[test]
    fn binding_inside_a_capture_collides() {
        let node = State::new();
        let inner = node.clone();
        let err = Rc::new(Cell::new(None));
        let e = err.clone();
        node.set(
            "outer",
            computed(move |_, _, _| {
                e.set(inner.set("inner", computed(|_, _, _| Value::Null)).err());
                Value::Null
            }),
        )
        .unwrap();
        assert_eq!(err.take(), Some(StateError::Collision));
    }

    #[test]
    fn structural_updates_touch_one_item() {
        let node = State::from_json(json!({"list": [1, 2, 3]})).unwrap();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        node.set(
            "doubled",
            computed(move |scope, n, _| {
                let c = c.clone();
                let list = n.get("list").into_node().unwrap_or_else(State::list);
                Value::List(list.each(scope, move |item, _, _| {
                    c.set(c.get() + 1);
                    Value::from(item.as_f64().unwrap_or_default() * 2.0)
                }))
            }),
        )
        .unwrap();
        let doubled = || node.get("doubled").to_json();
        assert_eq!(doubled(), json!([2, 4, 6]));
        assert_eq!(calls.get(), 3);

        let list = node.get("list").into_node().unwrap();
        list.push(4).unwrap();
        assert_eq!(doubled(), json!([2, 4, 6, 8]));
        assert_eq!(calls.get(), 4);

        list.set(0, 10).unwrap();
        assert_eq!(doubled(), json!([20, 4, 6, 8]));
        assert_eq!(calls.get(), 5);

        list.pop().unwrap();
        assert_eq!(doubled(), json!([20, 4, 6]));
        assert_eq!(calls.get(), 5);
        assert_eq!(list.listener_count(Channel::AnyIndex), 1);
    }
}
