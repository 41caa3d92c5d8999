//! Interned typevar bindings.
//!
//! A [`Bindings`] value maps typevar names to type expressions. The [`BindingCache`] hands out
//! one shared `Arc` per distinct content, so two requests with equal bindings observe the same
//! object and the object is safe to use as a map key for the lifetime of the session.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

/// Typevar name -> replacement type expression.
pub type TypeArgs = BTreeMap<String, String>;

#[derive(Debug)]
pub struct Bindings {
    binds: TypeArgs,
    key: String,
    shape: String,
}

impl Bindings {
    pub fn binds(&self) -> &TypeArgs {
        &self.binds
    }

    /// Canonical `name=value,` encoding of all pairs, sorted by name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Canonical `name,` encoding of the bound names only.
    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn get(&self, typevar: &str) -> Option<&str> {
        self.binds.get(typevar).map(String::as_str)
    }

    pub fn binds_typevar(&self, typevar: &str) -> bool {
        self.binds.contains_key(typevar)
    }

    pub fn len(&self) -> usize {
        self.binds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
    }
}

// Within one cache equal keys imply the same object, so ordering by key is ordering by identity.
impl PartialEq for Bindings {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Bindings {}

impl PartialOrd for Bindings {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bindings {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for Bindings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[derive(Debug, Default)]
pub struct BindingCache {
    entries: Mutex<HashMap<String, Arc<Bindings>>>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical bindings object for `args`, creating it on first use.
    ///
    /// Empty `args` yield `None`: non-generic types carry no bindings and the empty set is
    /// never interned.
    pub fn intern(&self, args: &TypeArgs) -> Option<Arc<Bindings>> {
        if args.is_empty() {
            return None;
        }
        let (shape, key) = canonical_strings(args);
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let b = entries
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Bindings {
                    binds: args.clone(),
                    key,
                    shape,
                })
            })
            .clone();
        Some(b)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn canonical_strings(args: &TypeArgs) -> (String, String) {
    let mut shape = String::with_capacity(64);
    let mut key = String::with_capacity(64);
    for (name, value) in args {
        key.push_str(name);
        key.push('=');
        key.push_str(value);
        key.push(',');
        shape.push_str(name);
        shape.push(',');
    }
    (shape, key)
}
