//! # State nodes
//!
//! A [`State`] wraps one mapping or one sequence. Every write goes through
//! [`State::set`] / [`State::delete`], which classify the incoming value,
//! maintain computed and nested bindings, and emit a [`Change`] on the node's
//! registry.
//!
//! Channels a write emits on:
//!
//! | node     | key            | channels                         |
//! |----------|----------------|----------------------------------|
//! | mapping  | any            | `Key(k)`, `AnyProperty`          |
//! | sequence | index          | `Key(i)`, `AnyIndex`             |
//! | sequence | `length`       | `Key(length)`, `AnyProperty`     |
//!
//! Emission is synchronous: every listener (and every write it performs) has
//! run by the time `set` returns.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::{SmallVec, smallvec};

use crate::context::{Context, Projector, Scope};
use crate::events::{Handler, Registry};
use crate::{
    Assign, Channel, Computed, Key, Props, StateError, Value, deep_clone, updater, watcher,
};

/// Payload of every emission.
#[derive(Clone, Debug)]
pub struct Change {
    /// Stored value after the write (`Undefined` for deletes).
    pub new: Value,
    /// Deep copy of the value before the write.
    pub old: Value,
    /// Key written on `node`.
    pub key: Key,
    /// Node whose data changed.
    pub node: State,
    /// Keys from the node the listener is attached to down to `key`.
    pub path: Vec<Key>,
}

/// Settings shared by a node and every child it wraps.
#[derive(Clone, Debug, Default)]
pub struct StateOptions {
    /// Capture owner; the thread-local default when `None`.
    pub context: Option<Context>,
}

/// Largest sequence length; indices stay strictly below it.
pub const MAX_LENGTH: usize = u32::MAX as usize;

impl StateOptions {
    fn context(&self) -> Context {
        self.context.clone().unwrap_or_else(Context::default_context)
    }
}

enum Data {
    Map(Props),
    Seq(Vec<Value>),
}

struct NodeInner {
    data: RefCell<Data>,
    listeners: Registry<Channel, Change>,
    updaters: Registry<Key, ()>,
    watchers: Registry<Key, ()>,
    context: Context,
    frozen: Cell<bool>,
}

/// Shared handle to a reactive node. Cloning the handle does not clone data.
#[derive(Clone)]
pub struct State(Rc<NodeInner>);

#[derive(Clone)]
pub struct WeakState(Weak<NodeInner>);

impl WeakState {
    pub fn upgrade(&self) -> Option<State> {
        self.0.upgrade().map(State)
    }
}

/// Initial data plus the computed properties and listeners bound before the
/// node is handed out. Computed values are in place before any listener is
/// attached, so listeners only hear later changes.
#[must_use]
pub struct StateBuilder {
    data: Value,
    options: StateOptions,
    computed: Vec<(Key, Computed)>,
    listeners: Vec<(Channel, Handler<Change>)>,
}

impl StateBuilder {
    pub fn options(mut self, options: StateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn computed(mut self, key: impl Into<Key>, f: Computed) -> Self {
        self.computed.push((key.into(), f));
        self
    }

    pub fn listener(mut self, channel: impl Into<Channel>, f: impl Fn(&Change) + 'static) -> Self {
        self.listeners.push((channel.into(), Handler::new(f)));
        self
    }

    /// Fails with `Rejected` when the data is a scalar, or with whatever
    /// binding a computed property fails with.
    pub fn build(self) -> Result<State, StateError> {
        let context = self.options.context();
        let node = match wrap_in(self.data, &context) {
            Value::Node(node) => node,
            Value::Undefined => State::empty(Data::Map(Props::new()), context),
            other => {
                return Err(StateError::Rejected {
                    key: other.type_name().to_string(),
                    reason: "state data must be a mapping or a sequence",
                });
            }
        };
        for (key, f) in self.computed {
            node.set(key, f)?;
        }
        for (channel, handler) in &self.listeners {
            node.listen(std::slice::from_ref(channel), handler);
        }
        Ok(node)
    }
}

impl State {
    /// Starts a node from `data` (`Undefined` gives an empty mapping).
    pub fn builder(data: impl Into<Value>) -> StateBuilder {
        StateBuilder {
            data: data.into(),
            options: StateOptions::default(),
            computed: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn empty(data: Data, context: Context) -> Self {
        State(Rc::new(NodeInner {
            data: RefCell::new(data),
            listeners: Registry::new(),
            updaters: Registry::new(),
            watchers: Registry::new(),
            context,
            frozen: Cell::new(false),
        }))
    }

    /// Empty mapping on the default context.
    pub fn new() -> Self {
        Self::empty(Data::Map(Props::new()), Context::default_context())
    }

    /// Empty sequence on the default context.
    pub fn list() -> Self {
        Self::empty(Data::Seq(Vec::new()), Context::default_context())
    }

    /// Wraps plain containers into nodes; nodes and scalars pass through.
    pub fn wrap(value: impl Into<Value>) -> Value {
        wrap_in(value.into(), &Context::default_context())
    }

    pub fn wrap_with(value: impl Into<Value>, options: &StateOptions) -> Value {
        wrap_in(value.into(), &options.context())
    }

    pub fn from_json(json: serde_json::Value) -> Option<State> {
        Self::wrap(json).into_node()
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakState {
        WeakState(Rc::downgrade(&self.0))
    }

    pub fn is_list(&self) -> bool {
        matches!(&*self.0.data.borrow(), Data::Seq(_))
    }

    /// Number of properties (mapping) or elements (sequence).
    pub fn len(&self) -> usize {
        match &*self.0.data.borrow() {
            Data::Map(props) => props.len(),
            Data::Seq(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<Key> {
        match &*self.0.data.borrow() {
            Data::Map(props) => props.keys().map(|k| Key::Name(k.clone())).collect(),
            Data::Seq(items) => (0..items.len()).map(Key::Index).collect(),
        }
    }

    /// Stored entries, cloned out so callers may recurse without holding a
    /// borrow on this node.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        match &*self.0.data.borrow() {
            Data::Map(props) => props
                .iter()
                .map(|(k, v)| (Key::Name(k.clone()), v.clone()))
                .collect(),
            Data::Seq(items) => items
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v))
                .collect(),
        }
    }

    /// Plain deep copy of the node.
    pub fn snapshot(&self) -> Value {
        deep_clone(&Value::Node(self.clone()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.snapshot().to_json()
    }

    /// Makes every later `set`/`delete` fail with [`StateError::Frozen`].
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub(crate) fn updaters(&self) -> &Registry<Key, ()> {
        &self.0.updaters
    }

    pub(crate) fn watchers(&self) -> &Registry<Key, ()> {
        &self.0.watchers
    }

    fn normalize(&self, key: Key) -> Key {
        if self.is_list() { key.for_seq() } else { key.for_map() }
    }

    fn normalize_channel(&self, channel: Channel) -> Channel {
        match channel {
            Channel::Key(k) => Channel::Key(self.normalize(k)),
            other => other,
        }
    }

    // ---- reads ----

    /// Untracked read. Missing keys read as `Undefined`; `length` on a
    /// sequence reads its element count.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = self.normalize(key.into());
        match (&*self.0.data.borrow(), &key) {
            (Data::Map(props), Key::Name(name)) => props.get(name).cloned().unwrap_or_default(),
            (Data::Seq(items), Key::Index(i)) => items.get(*i).cloned().unwrap_or_default(),
            (Data::Seq(items), k) if k.is_length() => Value::from(items.len()),
            _ => Value::Undefined,
        }
    }

    /// Tracked read: registers `key` as a dependency of the running capture,
    /// then returns the stored value.
    pub fn read(&self, scope: &Scope, key: impl Into<Key>) -> Value {
        let key = self.normalize(key.into());
        scope.record(self, Channel::Key(key.clone()), None);
        self.get(key)
    }

    // ---- virtual properties ----

    /// Registers `channel` of this node as a dependency without reading data.
    pub fn depend(&self, scope: &Scope, channel: impl Into<Channel>) {
        scope.record(self, self.normalize_channel(channel.into()), None);
    }

    /// Subscribes `f` to changes of `name`, or of every property when `name`
    /// is `None`.
    pub fn watch(&self, name: Option<Key>, f: impl Fn(&Change) + 'static) -> Handler<Change> {
        self.on(Channel::from(name), f)
    }

    /// Drops every subscriber of `name` (or of the wildcard channel).
    pub fn unwatch(&self, name: Option<Key>) -> usize {
        self.off(Channel::from(name), None)
    }

    // ---- tools ----

    pub fn on(&self, channel: impl Into<Channel>, f: impl Fn(&Change) + 'static) -> Handler<Change> {
        let handler = Handler::new(f);
        self.listen(&[channel.into()], &handler);
        handler
    }

    pub fn once(&self, channel: impl Into<Channel>, f: impl Fn(&Change) + 'static) -> Handler<Change> {
        let handler = Handler::new(f);
        let channel = self.normalize_channel(channel.into());
        self.0.listeners.once([channel], &handler);
        handler
    }

    /// Subscribes an existing handler to several channels at once.
    pub fn listen(&self, channels: &[Channel], handler: &Handler<Change>) {
        let channels = channels.iter().map(|c| self.normalize_channel(c.clone()));
        self.0.listeners.on(channels, handler);
    }

    pub fn off(&self, channel: impl Into<Channel>, handler: Option<&Handler<Change>>) -> usize {
        let channel = self.normalize_channel(channel.into());
        self.0.listeners.off(&channel, handler)
    }

    pub fn emit(&self, channels: &[Channel], change: &Change) -> usize {
        let channels: SmallVec<[Channel; 3]> = channels
            .iter()
            .map(|c| self.normalize_channel(c.clone()))
            .collect();
        self.0.listeners.emit(&channels, change)
    }

    pub fn listener_count(&self, channel: impl Into<Channel>) -> usize {
        let channel = self.normalize_channel(channel.into());
        self.0.listeners.listener_count(&channel)
    }

    /// Maps the sequence through `f`, dropping falsy results. Under a tracking
    /// scope, also registers `f` as the per-item projector for this node's
    /// structural channel, so later index writes re-run `f` for that item only.
    /// Mappings yield an empty vec.
    pub fn each(
        &self,
        scope: &Scope,
        f: impl Fn(&Value, usize, &State) -> Value + 'static,
    ) -> Vec<Value> {
        let items = match &*self.0.data.borrow() {
            Data::Seq(items) => items.clone(),
            Data::Map(_) => return Vec::new(),
        };
        let f: Projector = Rc::new(f);
        scope.record(self, Channel::AnyIndex, Some(f.clone()));
        items
            .iter()
            .enumerate()
            .map(|(i, item)| f(item, i, self))
            .filter(Value::is_truthy)
            .collect()
    }

    // ---- writes ----

    fn check_write(&self, key: &Key, value: Option<&Value>) -> Result<(), StateError> {
        if self.is_frozen() {
            return Err(StateError::Frozen { key: key.to_string() });
        }
        if !self.is_list() {
            return Ok(());
        }
        match key {
            Key::Index(i) if *i < MAX_LENGTH => Ok(()),
            Key::Index(_) => Err(StateError::Rejected {
                key: key.to_string(),
                reason: "sequence index out of range",
            }),
            k if k.is_length() => match value {
                None => Ok(()),
                Some(Value::Number(n))
                    if *n >= 0.0 && n.fract() == 0.0 && *n <= MAX_LENGTH as f64 =>
                {
                    Ok(())
                }
                Some(_) => Err(StateError::Rejected {
                    key: key.to_string(),
                    reason: "invalid sequence length",
                }),
            },
            _ => Err(StateError::Rejected {
                key: key.to_string(),
                reason: "sequences only accept index or length keys",
            }),
        }
    }

    /// Assigns `input` to `key`.
    ///
    /// Computed inputs (re)bind an updater and store its result, containers
    /// are wrapped and watched, scalars are stored as they are. Listeners run
    /// before this returns; nothing is emitted when the stored value is
    /// identical to the previous one, except for sequence `length` writes.
    pub fn set(&self, key: impl Into<Key>, input: impl Into<Assign>) -> Result<(), StateError> {
        let key = self.normalize(key.into());
        match input.into() {
            Assign::Computed(f) => {
                if key.is_length() && self.is_list() {
                    return Err(StateError::Rejected {
                        key: key.to_string(),
                        reason: "sequence length cannot be computed",
                    });
                }
                self.check_write(&key, None)?;
                if self.context().is_capturing() {
                    return Err(StateError::Collision);
                }
                let old = deep_clone(&self.get(key.clone()));
                let value = updater::bind(self, &key, f)?;
                self.write(key, value, old);
            }
            Assign::Value(value) => {
                self.check_write(&key, Some(&value))?;
                let old = deep_clone(&self.get(key.clone()));
                updater::unbind(self, &key);
                self.write(key, value, old);
            }
        }
        Ok(())
    }

    /// Stores a recomputed value without touching the key's updater binding.
    pub(crate) fn write_computed(&self, key: Key, value: Value) -> Result<(), StateError> {
        self.check_write(&key, Some(&value))?;
        let old = deep_clone(&self.get(key.clone()));
        self.write(key, value, old);
        Ok(())
    }

    fn write(&self, key: Key, value: Value, old: Value) {
        let stored = match wrap_in(value, self.context()) {
            Value::Node(child) => {
                watcher::bind(self, &key, &child);
                Value::Node(child)
            }
            scalar => {
                watcher::unbind(self, &key);
                scalar
            }
        };
        if self.commit(&key, stored.clone()) {
            self.notify(key, stored, old);
        }
    }

    /// Writes into the backing data; returns whether listeners must hear
    /// about it.
    fn commit(&self, key: &Key, value: Value) -> bool {
        let dropped = {
            let mut data = self.0.data.borrow_mut();
            match (&mut *data, key) {
                (Data::Map(props), Key::Name(name)) => {
                    let prev = props.insert(name.clone(), value.clone());
                    return prev.unwrap_or_default() != value;
                }
                (Data::Seq(items), Key::Index(i)) => {
                    let Some(needed) = i.checked_add(1) else {
                        return false;
                    };
                    if needed > items.len() {
                        items.resize(needed, Value::Undefined);
                    }
                    let prev = std::mem::replace(&mut items[*i], value.clone());
                    return prev != value;
                }
                (Data::Seq(items), _) => {
                    let len = value.as_f64().unwrap_or_default() as usize;
                    let old_len = items.len();
                    items.resize(len, Value::Undefined);
                    len..old_len
                }
                // Mapping keys are normalized to names before they get here.
                (Data::Map(_), Key::Index(_)) => return false,
            }
        };
        // Truncated elements take their bindings with them.
        for i in dropped {
            let key = Key::Index(i);
            watcher::unbind(self, &key);
            updater::unbind(self, &key);
        }
        true
    }

    fn channels(&self, key: &Key) -> SmallVec<[Channel; 3]> {
        let mut channels = smallvec![Channel::Key(key.clone())];
        let list = self.is_list();
        if !list || !key.is_index() {
            channels.push(Channel::AnyProperty);
        }
        if list && key.is_index() {
            channels.push(Channel::AnyIndex);
        }
        channels
    }

    fn notify(&self, key: Key, new: Value, old: Value) {
        let channels = self.channels(&key);
        log::trace!("{key}: {old:?} -> {new:?}");
        let change = Change {
            new,
            old,
            key: key.clone(),
            node: self.clone(),
            path: vec![key],
        };
        self.0.listeners.emit(&channels, &change);
    }

    /// Removes `key`. Sequence elements become `Undefined` holes; the length is
    /// unchanged. Bindings are torn down before listeners hear about it.
    pub fn delete(&self, key: impl Into<Key>) -> Result<(), StateError> {
        let key = self.normalize(key.into());
        self.check_write(&key, None)?;
        if key.is_length() && self.is_list() {
            return Err(StateError::Rejected {
                key: key.to_string(),
                reason: "sequence length cannot be deleted",
            });
        }
        let old = deep_clone(&self.get(key.clone()));
        match (&mut *self.0.data.borrow_mut(), &key) {
            (Data::Map(props), Key::Name(name)) => {
                props.remove(name);
            }
            (Data::Seq(items), Key::Index(i)) => {
                if let Some(slot) = items.get_mut(*i) {
                    *slot = Value::Undefined;
                }
            }
            _ => {}
        }
        watcher::unbind(self, &key);
        updater::unbind(self, &key);
        self.notify(key, Value::Undefined, old);
        Ok(())
    }

    // ---- sequence helpers ----

    /// Standard splice: shifts with per-index writes, deletes the trailing
    /// indices, then writes `length`. Returns the removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StateError> {
        if !self.is_list() {
            return Err(StateError::Rejected {
                key: Key::length().to_string(),
                reason: "splice needs a sequence",
            });
        }
        self.check_write(&Key::length(), None)?;

        let len = self.len();
        let start = start.min(len);
        let delete_count = delete_count.min(len - start);
        let item_count = items.len();
        let removed: Vec<Value> = (start..start + delete_count).map(|i| self.get(i)).collect();

        if item_count < delete_count {
            for k in start..len - delete_count {
                self.set(k + item_count, self.get(k + delete_count))?;
            }
            for k in (len - delete_count + item_count..len).rev() {
                self.delete(k)?;
            }
        } else if item_count > delete_count {
            for k in (start..len - delete_count).rev() {
                self.set(k + item_count, self.get(k + delete_count))?;
            }
        }
        for (j, item) in items.into_iter().enumerate() {
            self.set(start + j, item)?;
        }
        self.set(Key::length(), len - delete_count + item_count)?;
        Ok(removed)
    }

    /// Appends and returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> Result<usize, StateError> {
        self.splice(self.len(), 0, vec![value.into()])?;
        Ok(self.len())
    }

    pub fn pop(&self) -> Result<Value, StateError> {
        let len = self.len();
        if len == 0 {
            return Ok(Value::Undefined);
        }
        Ok(self.splice(len - 1, 1, Vec::new())?.pop().unwrap_or_default())
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<(), StateError> {
        self.splice(index, 0, vec![value.into()]).map(drop)
    }

    pub fn remove(&self, index: usize) -> Result<Value, StateError> {
        Ok(self.splice(index, 1, Vec::new())?.pop().unwrap_or_default())
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_list() { "list" } else { "map" };
        write!(f, "State({kind}, len {}, {:p})", self.len(), Rc::as_ptr(&self.0))
    }
}

/// Plain containers become nodes owned by `context`, recursively; nodes and
/// scalars are returned as they are.
pub(crate) fn wrap_in(value: Value, context: &Context) -> Value {
    let (data, entries): (Data, Vec<(Key, Value)>) = match value {
        Value::Map(props) => (
            Data::Map(Props::new()),
            props.into_iter().map(|(k, v)| (Key::Name(k), v)).collect(),
        ),
        Value::List(items) => (
            Data::Seq(Vec::with_capacity(items.len())),
            items.into_iter().enumerate().map(|(i, v)| (Key::Index(i), v)).collect(),
        ),
        other => return other,
    };
    let node = State::empty(data, context.clone());
    for (key, value) in entries {
        let stored = match wrap_in(value, context) {
            Value::Node(child) => {
                watcher::bind(&node, &key, &child);
                Value::Node(child)
            }
            scalar => scalar,
        };
        node.commit(&key, stored);
    }
    Value::Node(node)
}
