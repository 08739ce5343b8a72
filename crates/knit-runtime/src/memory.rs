//! Tracked heap for the knit runtime
//!
//! Every block the runtime owns is recorded in an identity-keyed registry.
//! Registry membership decides whether a block may be released by us, and the
//! whole registry is dropped as a unit when the runtime shuts down, so blocks
//! nobody released individually are still reclaimed.
//!
//! Blocks come in three shapes sharing one identity space:
//! - byte blocks backing owned strings
//! - item arrays backing lists
//! - object blocks holding [`Object`] values
//!
//! Identities are never reused. When a reallocation has to move a block, the
//! old identity leaves the registry and a fresh one takes its place in the same
//! call, so a stale identity can always be told apart from a live one.

use std::collections::HashMap;
use std::num::NonZeroU64;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{KnitError, KnitResult};
use crate::string::KnitStr;
use crate::value::{ObjRef, Object};

/// Accounted size of one list item slot.
const ITEM_SIZE: usize = std::mem::size_of::<KnitStr<'static>>();

/// Accounted size of an object block.
const OBJECT_SIZE: usize = std::mem::size_of::<Object>();

/// Identity of a tracked block.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("block#{_0}")]
pub struct BlockId(NonZeroU64);

impl BlockId {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Heap configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Upper bound on live bytes. Allocations past it fail with out-of-memory.
    pub limit: Option<usize>,
    /// Number of registry slots reserved up front.
    pub registry_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            limit: None,
            registry_capacity: 256,
        }
    }
}

/// Allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocations: u64,
    pub reallocations: u64,
    /// Reallocations that had to move the block to a new identity.
    pub moves: u64,
    pub releases: u64,
    pub live_blocks: usize,
    pub peak_blocks: usize,
    pub live_bytes: usize,
}

#[derive(Debug)]
enum Block {
    Bytes(Vec<u8>),
    Items(Vec<KnitStr<'static>>),
    Object(Object),
}

impl Block {
    fn shape(&self) -> &'static str {
        match self {
            Block::Bytes(_) => "byte block",
            Block::Items(_) => "item array",
            Block::Object(_) => "object",
        }
    }
}

#[derive(Debug)]
struct Entry {
    size: usize,
    block: Block,
}

fn untracked(op: &str, id: BlockId) -> KnitError {
    KnitError::runtime(format!("{op}(): {id} is not tracked"))
}

fn wrong_shape(op: &str, id: BlockId, expected: &str, found: &Block) -> KnitError {
    KnitError::runtime(format!(
        "{op}(): {id} is a {}, expected a {expected}",
        found.shape()
    ))
}

/// The tracked allocator.
#[derive(Debug)]
pub struct Heap {
    entries: HashMap<BlockId, Entry>,
    next: NonZeroU64,
    limit: Option<usize>,
    stats: HeapStats,
}

impl Heap {
    /// Create a heap with the default configuration.
    pub fn new() -> KnitResult<Self> {
        Self::with_config(&HeapConfig::default())
    }

    pub fn with_config(config: &HeapConfig) -> KnitResult<Self> {
        let mut entries = HashMap::new();
        entries
            .try_reserve(config.registry_capacity)
            .map_err(|_| KnitError::runtime("couldn't initialize the block registry"))?;

        Ok(Self {
            entries,
            next: NonZeroU64::MIN,
            limit: config.limit,
            stats: HeapStats::default(),
        })
    }

    pub fn stats(&self) -> &HeapStats {
        &self.stats
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of live tracked blocks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Allocate a zero-filled byte block of exactly `size` bytes.
    pub fn allocate(&mut self, size: usize) -> KnitResult<BlockId> {
        if size == 0 {
            return Err(KnitError::runtime("allocate(): zero-size allocation"));
        }
        self.charge(size)?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size)?;
        bytes.resize(size, 0);

        let id = self.track(size, Block::Bytes(bytes))?;
        self.stats.allocations += 1;
        trace!(%id, size, "allocated");
        Ok(id)
    }

    /// Resize a byte block to exactly `new_size` bytes, preserving the
    /// common prefix.
    ///
    /// The returned identity equals `id` when the block could be resized in
    /// place. On failure `id` is still tracked and its bytes are unchanged.
    pub fn reallocate(&mut self, id: BlockId, new_size: usize) -> KnitResult<BlockId> {
        if new_size == 0 {
            return Err(KnitError::runtime(
                "reallocate(): zero-size reallocation, release the block instead",
            ));
        }

        let (old_size, in_place) = match self.entries.get(&id) {
            Some(Entry {
                size,
                block: Block::Bytes(bytes),
            }) => (*size, new_size <= bytes.capacity()),
            Some(entry) => return Err(wrong_shape("reallocate", id, "byte block", &entry.block)),
            None => return Err(untracked("reallocate", id)),
        };
        self.charge(new_size.saturating_sub(old_size))?;

        if in_place {
            if let Some(Entry {
                size,
                block: Block::Bytes(bytes),
            }) = self.entries.get_mut(&id)
            {
                bytes.resize(new_size, 0);
                *size = new_size;
            }
            self.resized(old_size, new_size);
            trace!(%id, old_size, new_size, "reallocated in place");
            return Ok(id);
        }

        let mut moved = Vec::new();
        moved.try_reserve_exact(new_size)?;
        if let Some(Entry {
            block: Block::Bytes(old),
            ..
        }) = self.entries.get(&id)
        {
            moved.extend_from_slice(&old[..old.len().min(new_size)]);
        }
        moved.resize(new_size, 0);

        let new_id = self.replace(id, new_size, Block::Bytes(moved));
        self.resized(old_size, new_size);
        trace!(old = %id, new = %new_id, old_size, new_size, "reallocated");
        Ok(new_id)
    }

    /// Release a tracked block. `None` is a no-op.
    pub fn release(&mut self, id: impl Into<Option<BlockId>>) -> KnitResult<()> {
        let Some(id) = id.into() else {
            return Ok(());
        };
        let entry = self.untrack(id).ok_or_else(|| {
            KnitError::runtime(format!(
                "release(): {id} is not tracked, trying to release an untracked block"
            ))
        })?;
        self.stats.releases += 1;
        trace!(%id, size = entry.size, "released");
        Ok(())
    }

    /// Free every tracked block and empty the registry. Returns the number of
    /// blocks freed.
    pub fn bulk_teardown(&mut self) -> usize {
        let freed = self.entries.len();
        self.entries.clear();
        self.stats.releases += freed as u64;
        self.stats.live_blocks = 0;
        self.stats.live_bytes = 0;
        freed
    }

    pub fn bytes(&self, id: BlockId) -> KnitResult<&[u8]> {
        match self.entries.get(&id) {
            Some(Entry {
                block: Block::Bytes(bytes),
                ..
            }) => Ok(bytes),
            Some(entry) => Err(wrong_shape("bytes", id, "byte block", &entry.block)),
            None => Err(untracked("bytes", id)),
        }
    }

    pub fn bytes_mut(&mut self, id: BlockId) -> KnitResult<&mut [u8]> {
        match self.entries.get_mut(&id) {
            Some(Entry {
                block: Block::Bytes(bytes),
                ..
            }) => Ok(bytes),
            Some(entry) => Err(wrong_shape("bytes_mut", id, "byte block", &entry.block)),
            None => Err(untracked("bytes_mut", id)),
        }
    }

    /// Allocate an empty item array with room for exactly `capacity` strings.
    pub fn allocate_items(&mut self, capacity: usize) -> KnitResult<BlockId> {
        if capacity == 0 {
            return Err(KnitError::runtime("allocate_items(): zero-size allocation"));
        }
        let size = capacity * ITEM_SIZE;
        self.charge(size)?;

        let mut items = Vec::new();
        items.try_reserve_exact(capacity)?;

        let id = self.track(size, Block::Items(items))?;
        self.stats.allocations += 1;
        trace!(%id, capacity, "allocated item array");
        Ok(id)
    }

    /// Resize an item array to room for exactly `capacity` strings. Same
    /// identity rules as [`Heap::reallocate`]. Shrinking below the number of
    /// stored items is refused.
    pub fn reallocate_items(&mut self, id: BlockId, capacity: usize) -> KnitResult<BlockId> {
        let (old_size, stored, in_place) = match self.entries.get(&id) {
            Some(Entry {
                size,
                block: Block::Items(items),
            }) => (*size, items.len(), capacity <= items.capacity()),
            Some(entry) => {
                return Err(wrong_shape("reallocate_items", id, "item array", &entry.block));
            }
            None => return Err(untracked("reallocate_items", id)),
        };
        if capacity == 0 || capacity < stored {
            return Err(KnitError::runtime(format!(
                "reallocate_items(): capacity {capacity} cannot hold {stored} items"
            )));
        }
        let new_size = capacity * ITEM_SIZE;
        self.charge(new_size.saturating_sub(old_size))?;

        if in_place {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.size = new_size;
            }
            self.resized(old_size, new_size);
            return Ok(id);
        }

        let mut moved = Vec::new();
        moved.try_reserve_exact(capacity)?;
        if let Some(Entry {
            block: Block::Items(old),
            ..
        }) = self.entries.get_mut(&id)
        {
            moved.append(old);
        }

        let new_id = self.replace(id, new_size, Block::Items(moved));
        self.resized(old_size, new_size);
        trace!(old = %id, new = %new_id, capacity, "reallocated item array");
        Ok(new_id)
    }

    pub fn items(&self, id: BlockId) -> KnitResult<&Vec<KnitStr<'static>>> {
        match self.entries.get(&id) {
            Some(Entry {
                block: Block::Items(items),
                ..
            }) => Ok(items),
            Some(entry) => Err(wrong_shape("items", id, "item array", &entry.block)),
            None => Err(untracked("items", id)),
        }
    }

    pub fn items_mut(&mut self, id: BlockId) -> KnitResult<&mut Vec<KnitStr<'static>>> {
        match self.entries.get_mut(&id) {
            Some(Entry {
                block: Block::Items(items),
                ..
            }) => Ok(items),
            Some(entry) => Err(wrong_shape("items_mut", id, "item array", &entry.block)),
            None => Err(untracked("items_mut", id)),
        }
    }

    /// Move `object` into a freshly tracked object block.
    pub fn allocate_object(&mut self, object: Object) -> KnitResult<ObjRef> {
        self.charge(OBJECT_SIZE)?;
        let id = self.track(OBJECT_SIZE, Block::Object(object))?;
        self.stats.allocations += 1;
        trace!(%id, "allocated object");
        Ok(ObjRef::new(id))
    }

    pub fn object(&self, obj: ObjRef) -> KnitResult<&Object> {
        let id = obj.block();
        match self.entries.get(&id) {
            Some(Entry {
                block: Block::Object(object),
                ..
            }) => Ok(object),
            Some(entry) => Err(wrong_shape("object", id, "object", &entry.block)),
            None => Err(untracked("object", id)),
        }
    }

    pub fn object_mut(&mut self, obj: ObjRef) -> KnitResult<&mut Object> {
        let id = obj.block();
        match self.entries.get_mut(&id) {
            Some(Entry {
                block: Block::Object(object),
                ..
            }) => Ok(object),
            Some(entry) => Err(wrong_shape("object_mut", id, "object", &entry.block)),
            None => Err(untracked("object_mut", id)),
        }
    }

    /// Untrack an object block and hand its value back. The value's own
    /// sub-buffers stay tracked until the caller deinitializes it.
    pub fn release_object(&mut self, obj: ObjRef) -> KnitResult<Object> {
        let id = obj.block();
        match self.entries.get(&id) {
            Some(Entry {
                block: Block::Object(_),
                ..
            }) => {}
            Some(entry) => return Err(wrong_shape("release_object", id, "object", &entry.block)),
            None => {
                return Err(KnitError::runtime(format!(
                    "release_object(): {id} is not tracked, trying to release an untracked block"
                )));
            }
        }
        match self.untrack(id) {
            Some(Entry {
                block: Block::Object(object),
                ..
            }) => {
                self.stats.releases += 1;
                trace!(%id, "released object");
                Ok(object)
            }
            _ => Err(untracked("release_object", id)),
        }
    }

    fn charge(&self, extra: usize) -> KnitResult<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        if self.stats.live_bytes.saturating_add(extra) > limit {
            return Err(KnitError::out_of_memory(format!(
                "allocating {extra} more bytes exceeds the heap limit of {limit} bytes ({} live)",
                self.stats.live_bytes
            )));
        }
        Ok(())
    }

    fn fresh_id(&mut self) -> BlockId {
        let id = BlockId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    fn track(&mut self, size: usize, block: Block) -> KnitResult<BlockId> {
        self.entries
            .try_reserve(1)
            .map_err(|_| KnitError::runtime("couldn't register a new block"))?;
        let id = self.fresh_id();
        self.entries.insert(id, Entry { size, block });

        self.stats.live_blocks += 1;
        self.stats.peak_blocks = self.stats.peak_blocks.max(self.stats.live_blocks);
        self.stats.live_bytes += size;
        Ok(id)
    }

    fn untrack(&mut self, id: BlockId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.stats.live_blocks -= 1;
        self.stats.live_bytes -= entry.size;
        Some(entry)
    }

    /// Swap the entry for `old` with a new identity holding `block`.
    fn replace(&mut self, old: BlockId, size: usize, block: Block) -> BlockId {
        self.entries.remove(&old);
        let id = self.fresh_id();
        self.entries.insert(id, Entry { size, block });
        self.stats.moves += 1;
        id
    }

    fn resized(&mut self, old_size: usize, new_size: usize) {
        self.stats.reallocations += 1;
        self.stats.live_bytes = self.stats.live_bytes - old_size + new_size;
    }
}
