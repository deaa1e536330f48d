//! Ordered pub/sub used by every node.
//!
//! A [`Registry`] maps keys to subscriber lists. Emission walks a snapshot of
//! the list taken when the key is reached, so handlers may subscribe or
//! unsubscribe (including themselves) without disturbing the running emit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

/// Shared callback. Identity (for [`Registry::off`]) is pointer identity, so
/// keep the handle returned by `on`/`once` if you want to remove it later.
pub struct Handler<A: ?Sized>(Rc<dyn Fn(&A)>);

impl<A: ?Sized> Handler<A> {
    pub fn new(f: impl Fn(&A) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, arg: &A) {
        (self.0)(arg)
    }

    pub fn same(&self, other: &Handler<A>) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<A: ?Sized> Clone for Handler<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: ?Sized> fmt::Debug for Handler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

struct Entry<A: ?Sized> {
    id: u64,
    handler: Handler<A>,
    once: bool,
}

impl<A: ?Sized> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
            once: self.once,
        }
    }
}

struct Inner<K, A: ?Sized> {
    next_id: u64,
    subs: HashMap<K, Vec<Entry<A>>>,
}

pub struct Registry<K, A: ?Sized> {
    inner: RefCell<Inner<K, A>>,
}

impl<K, A: ?Sized> Default for Registry<K, A> {
    fn default() -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_id: 0,
                subs: HashMap::new(),
            }),
        }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug, A: ?Sized> Registry<K, A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, keys: impl IntoIterator<Item = K>, handler: &Handler<A>, once: bool) {
        let mut inner = self.inner.borrow_mut();
        for key in keys {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subs.entry(key).or_default().push(Entry {
                id,
                handler: handler.clone(),
                once,
            });
        }
    }

    /// Appends `handler` to every key. Registering the same handler twice
    /// makes it fire twice.
    pub fn on(&self, keys: impl IntoIterator<Item = K>, handler: &Handler<A>) {
        self.add(keys, handler, false);
    }

    /// Like `on`, but each registration is dropped before its first call.
    pub fn once(&self, keys: impl IntoIterator<Item = K>, handler: &Handler<A>) {
        self.add(keys, handler, true);
    }

    /// Removes every instance of `handler` under `key`, or every subscriber of
    /// `key` when `handler` is `None`. Returns how many were removed.
    pub fn off(&self, key: &K, handler: Option<&Handler<A>>) -> usize {
        let mut inner = self.inner.borrow_mut();
        let Some(list) = inner.subs.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        match handler {
            Some(h) => list.retain(|e| !e.handler.same(h)),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            inner.subs.remove(key);
        }
        removed
    }

    fn take_once(&self, key: &K, id: u64) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(list) = inner.subs.get_mut(key) else {
            return false;
        };
        let Some(pos) = list.iter().position(|e| e.id == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            inner.subs.remove(key);
        }
        true
    }

    /// Calls the subscribers of each key in turn, in registration order.
    /// Returns the number of handler invocations.
    pub fn emit(&self, keys: &[K], arg: &A) -> usize {
        let mut calls = 0;
        for key in keys {
            let snapshot: Vec<Entry<A>> = match self.inner.borrow().subs.get(key) {
                Some(list) => list.clone(),
                None => continue,
            };
            for entry in snapshot {
                // A once-handler may already have been consumed by a nested emit.
                if entry.once && !self.take_once(key, entry.id) {
                    continue;
                }
                entry.handler.call(arg);
                calls += 1;
            }
        }
        log::trace!("emit {keys:?}: {calls} handler(s)");
        calls
    }

    pub fn listener_count(&self, key: &K) -> usize {
        self.inner.borrow().subs.get(key).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().subs.is_empty()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().subs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Handler<i32>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let make = move |tag: &'static str| {
            let l = l.clone();
            Handler::new(move |_: &i32| l.borrow_mut().push(tag))
        };
        (log, make)
    }

    #[test]
    fn emits_in_registration_order() {
        let reg: Registry<&str, i32> = Registry::new();
        let (log, make) = recorder();
        reg.on(["a"], &make("first"));
        reg.on(["a"], &make("second"));
        reg.on(["b"], &make("other"));

        assert_eq!(reg.emit(&["a"], &1), 2);
        assert_eq!(*log.borrow(), vec!["first", "second"]);

        log.borrow_mut().clear();
        reg.emit(&["b", "a"], &1);
        assert_eq!(*log.borrow(), vec!["other", "first", "second"]);
    }

    #[test]
    fn duplicates_fire_twice_and_off_removes_matching_only() {
        let reg: Registry<&str, i32> = Registry::new();
        let (log, make) = recorder();
        let dup = make("dup");
        reg.on(["a"], &dup);
        reg.on(["a"], &dup);
        reg.on(["a"], &make("keep"));

        reg.emit(&["a"], &0);
        assert_eq!(*log.borrow(), vec!["dup", "dup", "keep"]);

        assert_eq!(reg.off(&"a", Some(&dup)), 2);
        log.borrow_mut().clear();
        reg.emit(&["a"], &0);
        assert_eq!(*log.borrow(), vec!["keep"]);

        assert_eq!(reg.off(&"a", None), 1);
        assert_eq!(reg.emit(&["a"], &0), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn once_fires_a_single_time() {
        let reg: Registry<&str, i32> = Registry::new();
        let hits = Rc::new(Cell::new(0));
        let h = {
            let hits = hits.clone();
            Handler::new(move |_: &i32| hits.set(hits.get() + 1))
        };
        reg.once(["a"], &h);
        reg.emit(&["a"], &0);
        reg.emit(&["a"], &0);
        assert_eq!(hits.get(), 1);
        assert_eq!(reg.listener_count(&"a"), 0);
    }

    #[test]
    fn unsubscribing_during_emit_keeps_iteration_intact() {
        let reg: Rc<Registry<&str, i32>> = Rc::new(Registry::new());
        let (log, make) = recorder();
        let later = make("later");
        let remover = {
            let reg = reg.clone();
            let later = later.clone();
            let log = log.clone();
            Handler::new(move |_: &i32| {
                log.borrow_mut().push("remover");
                reg.off(&"a", Some(&later));
            })
        };
        reg.on(["a"], &remover);
        reg.on(["a"], &later);

        reg.emit(&["a"], &0);
        assert_eq!(*log.borrow(), vec!["remover", "later"]);

        log.borrow_mut().clear();
        reg.emit(&["a"], &0);
        assert_eq!(*log.borrow(), vec!["remover"]);
    }

    #[test]
    fn subscribing_during_emit_waits_for_next_emit() {
        let reg: Rc<Registry<&str, i32>> = Rc::new(Registry::new());
        let (log, make) = recorder();
        let late = make("late");
        let adder = {
            let reg = reg.clone();
            Handler::new(move |_: &i32| reg.on(["a"], &late))
        };
        reg.once(["a"], &adder);
        reg.emit(&["a"], &0);
        assert!(log.borrow().is_empty());
        reg.emit(&["a"], &0);
        assert_eq!(*log.borrow(), vec!["late"]);
    }
}
