use std::fmt;
use std::rc::Rc;

use serde::{Serialize, Serializer};

/// Property address inside a node.
///
/// Mappings only ever hold `Name` keys and sequences only ever hold `Index`
/// keys (plus the `length` name); see [`Key::for_map`] and [`Key::for_seq`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    Name(Rc<str>),
    Index(usize),
}

pub const LENGTH: &str = "length";

impl Key {
    pub fn name(s: &str) -> Self {
        Key::Name(Rc::from(s))
    }

    pub fn length() -> Self {
        Key::name(LENGTH)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Key::Index(_))
    }

    pub fn is_length(&self) -> bool {
        matches!(self, Key::Name(n) if &**n == LENGTH)
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(_) => None,
        }
    }

    /// Mapping keys are always names.
    pub fn for_map(self) -> Key {
        match self {
            Key::Index(i) => Key::Name(Rc::from(i.to_string())),
            name => name,
        }
    }

    /// Numeric names on a sequence address an index.
    pub fn for_seq(self) -> Key {
        match self {
            Key::Name(n) => match n.parse::<usize>() {
                Ok(i) => Key::Index(i),
                Err(_) => Key::Name(n),
            },
            index => index,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(n) => f.write_str(n),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Name(n) => s.serialize_str(n),
            Key::Index(i) => s.serialize_u64(*i as u64),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::name(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Name(Rc::from(s))
    }
}

impl From<Rc<str>> for Key {
    fn from(s: Rc<str>) -> Self {
        Key::Name(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<&Key> for Key {
    fn from(k: &Key) -> Self {
        k.clone()
    }
}

/// Event channel on a node's registry.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Channel {
    /// Changes of one property.
    Key(Key),
    /// Every property of a mapping, and non-index properties of a sequence.
    AnyProperty,
    /// Every index of a sequence (structural changes).
    AnyIndex,
}

impl From<Key> for Channel {
    fn from(k: Key) -> Self {
        Channel::Key(k)
    }
}

impl From<&Key> for Channel {
    fn from(k: &Key) -> Self {
        Channel::Key(k.clone())
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Channel::Key(Key::name(s))
    }
}

impl From<usize> for Channel {
    fn from(i: usize) -> Self {
        Channel::Key(Key::Index(i))
    }
}

impl From<Option<Key>> for Channel {
    fn from(k: Option<Key>) -> Self {
        match k {
            Some(k) => Channel::Key(k),
            None => Channel::AnyProperty,
        }
    }
}
