//! Global variable table
//!
//! Names are owned copies on the tracked heap and compare by content.
//! Values are [`ObjRef`]s owned by the table once stored.

use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::trace;

use crate::error::{KnitError, KnitResult};
use crate::memory::Heap;
use crate::string::KnitStr;
use crate::value::ObjRef;

#[derive(Debug)]
struct VarEntry {
    name: KnitStr<'static>,
    value: ObjRef,
}

fn already_bound(name: &[u8], value: ObjRef) -> KnitError {
    KnitError::runtime(format!(
        "set(): can't bind '{}', {value} is already bound to another variable",
        String::from_utf8_lossy(name)
    ))
}

fn content_hash(name: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
pub struct VarTable {
    buckets: HashMap<u64, Vec<VarEntry>>,
    /// Every value currently held by a variable.
    bound: HashSet<ObjRef>,
    len: usize,
}

impl VarTable {
    pub fn with_capacity(capacity: usize) -> KnitResult<Self> {
        let mut buckets = HashMap::new();
        buckets
            .try_reserve(capacity)
            .map_err(|_| KnitError::runtime("couldn't initialize the variable table"))?;
        Ok(Self {
            buckets,
            bound: HashSet::new(),
            len: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bind `name` to `value`, taking ownership of `value`.
    ///
    /// Returns the reference previously bound to `name`, which the caller now
    /// owns. A new name is copied into an owned key; an existing key is kept.
    /// An object is owned by at most one variable, so binding `value` while
    /// another name holds it is a runtime error.
    pub fn set(&mut self, heap: &mut Heap, name: &[u8], value: ObjRef) -> KnitResult<Option<ObjRef>> {
        let hash = content_hash(name);
        let slot = self.position(heap, hash, name)?;

        if let Some(entry) = slot.and_then(|index| self.buckets.get_mut(&hash)?.get_mut(index)) {
            if entry.value == value {
                return Ok(Some(value));
            }
            if self.bound.contains(&value) {
                return Err(already_bound(name, value));
            }
            self.bound.try_reserve(1)?;
            let old = std::mem::replace(&mut entry.value, value);
            self.bound.remove(&old);
            self.bound.insert(value);
            trace!(name = %String::from_utf8_lossy(name), %old, %value, "variable overwritten");
            return Ok(Some(old));
        }

        if self.bound.contains(&value) {
            return Err(already_bound(name, value));
        }
        self.bound.try_reserve(1)?;
        self.buckets.try_reserve(1)?;
        let bucket = self.buckets.entry(hash).or_default();
        bucket.try_reserve(1)?;

        let key = KnitStr::from_bytes(heap, name)?;
        bucket.push(VarEntry { name: key, value });
        self.bound.insert(value);
        self.len += 1;
        trace!(name = %String::from_utf8_lossy(name), %value, "variable defined");
        Ok(None)
    }

    /// Look up `name` by content.
    pub fn get(&self, heap: &Heap, name: &[u8]) -> KnitResult<ObjRef> {
        let hash = content_hash(name);
        if let Some(index) = self.position(heap, hash, name)? {
            if let Some(entry) = self.buckets.get(&hash).and_then(|bucket| bucket.get(index)) {
                return Ok(entry.value);
            }
        }
        Err(KnitError::not_found(format!(
            "variable '{}' is undefined",
            String::from_utf8_lossy(name)
        )))
    }

    /// Whether some variable currently holds `value`.
    pub fn is_bound(&self, value: ObjRef) -> bool {
        self.bound.contains(&value)
    }

    fn position(&self, heap: &Heap, hash: u64, name: &[u8]) -> KnitResult<Option<usize>> {
        let Some(bucket) = self.buckets.get(&hash) else {
            return Ok(None);
        };
        for (index, entry) in bucket.iter().enumerate() {
            if entry.name.eq_bytes(heap, name)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Every bound name, sorted.
    pub fn names(&self, heap: &Heap) -> KnitResult<Vec<String>> {
        let mut names = Vec::with_capacity(self.len);
        for entry in self.buckets.values().flatten() {
            names.push(entry.name.to_string_lossy(heap)?.into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Forget every binding without releasing keys or values. Used right
    /// before the heap is torn down in bulk.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.bound.clear();
        self.len = 0;
    }
}
