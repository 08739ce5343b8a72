//! Lists of strings for the knit runtime

use tracing::debug;

use crate::error::{KnitError, KnitResult};
use crate::memory::{BlockId, Heap};
use crate::string::KnitStr;

/// A list payload: a tracked, contiguous array of strings.
///
/// The array is allocated on the first push and grows to exactly the number
/// of items it has to hold.
#[derive(Debug, Default)]
pub struct KnitList {
    len: usize,
    cap: usize,
    items: Option<BlockId>,
}

impl KnitList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// The tracked item array, once one has been allocated.
    pub fn block(&self) -> Option<BlockId> {
        self.items
    }

    /// Append `item`, taking ownership of it. On failure the item is
    /// deinitialized.
    pub fn push(&mut self, heap: &mut Heap, item: KnitStr<'static>) -> KnitResult<()> {
        let block = match self.reserve_one(heap) {
            Ok(block) => block,
            Err(err) => {
                if let Err(cleanup) = item.deinit(heap) {
                    debug!(%cleanup, "couldn't release a rejected list item");
                }
                return Err(err);
            }
        };
        heap.items_mut(block)?.push(item);
        self.len += 1;
        Ok(())
    }

    /// Remove the last item and hand it back to the caller.
    pub fn pop(&mut self, heap: &mut Heap) -> KnitResult<Option<KnitStr<'static>>> {
        let Some(block) = self.items else {
            return Ok(None);
        };
        let item = heap.items_mut(block)?.pop();
        if item.is_some() {
            self.len -= 1;
        }
        Ok(item)
    }

    pub fn get<'s>(&self, heap: &'s Heap, index: usize) -> KnitResult<Option<&'s KnitStr<'static>>> {
        Ok(self.items(heap)?.get(index))
    }

    pub fn items<'s>(&self, heap: &'s Heap) -> KnitResult<&'s [KnitStr<'static>]> {
        match self.items {
            Some(block) => Ok(heap.items(block)?.as_slice()),
            None => Ok(&[]),
        }
    }

    /// Release every item and then the item array itself.
    pub fn deinit(self, heap: &mut Heap) -> KnitResult<()> {
        let Some(block) = self.items else {
            return Ok(());
        };
        let items = std::mem::take(heap.items_mut(block)?);
        let mut first_err = None;
        for item in items {
            if let Err(err) = item.deinit(heap) {
                first_err.get_or_insert(err);
            }
        }
        heap.release(block)?;
        first_err.map_or(Ok(()), Err)
    }

    fn reserve_one(&mut self, heap: &mut Heap) -> KnitResult<BlockId> {
        if self.len < self.cap {
            return self
                .items
                .ok_or_else(|| KnitError::runtime("list has capacity but no item array"));
        }
        let cap = self.len + 1;
        let block = match self.items {
            None => heap.allocate_items(cap)?,
            Some(block) => heap.reallocate_items(block, cap)?,
        };
        self.items = Some(block);
        self.cap = cap;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::HeapConfig;

    fn texts(list: &KnitList, heap: &Heap) -> Vec<String> {
        list.items(heap)
            .unwrap()
            .iter()
            .map(|item| item.to_string_lossy(heap).unwrap().into_owned())
            .collect()
    }

    #[test]
    fn test_push_grows_exactly() {
        let mut heap = Heap::new().unwrap();
        let mut list = KnitList::new();
        assert_eq!(list.block(), None);

        for (i, word) in ["alpha", "beta", "gamma"].into_iter().enumerate() {
            let item = KnitStr::from_bytes(&mut heap, word.as_bytes()).unwrap();
            list.push(&mut heap, item).unwrap();
            assert_eq!(list.len(), i + 1);
            assert_eq!(list.capacity(), i + 1);
        }
        assert_eq!(texts(&list, &heap), ["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_get_and_pop() {
        let mut heap = Heap::new().unwrap();
        let mut list = KnitList::new();
        list.push(&mut heap, KnitStr::borrowed(b"x")).unwrap();
        let y = KnitStr::from_bytes(&mut heap, b"y").unwrap();
        list.push(&mut heap, y).unwrap();

        let second = list.get(&heap, 1).unwrap().unwrap();
        assert!(second.eq_bytes(&heap, b"y").unwrap());
        assert!(list.get(&heap, 2).unwrap().is_none());

        let popped = list.pop(&mut heap).unwrap().unwrap();
        assert!(popped.eq_bytes(&heap, b"y").unwrap());
        assert_eq!(list.len(), 1);
        assert_eq!(list.capacity(), 2);
        popped.deinit(&mut heap).unwrap();

        // Reuses the spare slot without reallocating.
        let block = list.block();
        list.push(&mut heap, KnitStr::borrowed(b"z")).unwrap();
        assert_eq!(list.block(), block);
    }

    #[test]
    fn test_deinit_releases_items_and_array() {
        let mut heap = Heap::new().unwrap();
        let mut list = KnitList::new();
        for word in ["a", "b", "c"] {
            let item = KnitStr::from_bytes(&mut heap, word.as_bytes()).unwrap();
            list.push(&mut heap, item).unwrap();
        }
        assert_eq!(heap.len(), 4);

        list.deinit(&mut heap).unwrap();
        assert!(heap.is_empty());
    }

    #[test]
    fn test_push_failure_releases_item() {
        let mut heap = Heap::with_config(&HeapConfig {
            limit: Some(4),
            ..HeapConfig::default()
        })
        .unwrap();
        let mut list = KnitList::new();
        let item = KnitStr::from_bytes(&mut heap, b"ab").unwrap();
        assert_eq!(heap.len(), 1);

        let err = list.push(&mut heap, item).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(heap.is_empty());
        assert!(list.is_empty());
    }
}
