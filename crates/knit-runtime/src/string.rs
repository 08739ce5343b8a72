//! Growable byte strings backed by the tracked heap
//!
//! A [`KnitStr`] either owns a NUL-terminated block on the [`Heap`] or borrows
//! bytes owned by someone else (typically a literal). Borrowed strings are
//! never written to: the first operation that needs to grow one copies its
//! bytes into a fresh owned block first.
//!
//! Growth is capacity-exact. A string grows to precisely the size it needs,
//! one terminator byte included, never more.

use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::error::{KnitError, KnitResult};
use crate::memory::{BlockId, Heap};

#[derive(Debug, Clone, Copy)]
enum Storage<'a> {
    Owned { block: BlockId, cap: usize },
    Borrowed(&'a [u8]),
}

/// A runtime string.
///
/// Owned strings keep `len < cap` and a zero byte at `len`.
#[derive(Debug)]
pub struct KnitStr<'a> {
    len: usize,
    storage: Storage<'a>,
}

impl<'a> KnitStr<'a> {
    /// An owned empty string holding only its terminator.
    pub fn new_empty(heap: &mut Heap) -> KnitResult<Self> {
        let block = heap.allocate(1)?;
        Ok(Self {
            len: 0,
            storage: Storage::Owned { block, cap: 1 },
        })
    }

    /// A zero-copy view over `view`. Nothing is allocated or tracked.
    pub fn borrowed(view: &'a [u8]) -> Self {
        Self {
            len: view.len(),
            storage: Storage::Borrowed(view),
        }
    }

    /// An owned copy of `bytes`.
    pub fn from_bytes(heap: &mut Heap, bytes: &[u8]) -> KnitResult<Self> {
        let mut string = Self::new_empty(heap)?;
        if let Err(err) = string.assign_copy(heap, bytes) {
            if let Err(cleanup) = string.deinit(heap) {
                debug!(%cleanup, "couldn't release a partially built string");
            }
            return Err(err);
        }
        Ok(string)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the owned block, `None` for borrowed strings.
    pub fn capacity(&self) -> Option<usize> {
        match self.storage {
            Storage::Owned { cap, .. } => Some(cap),
            Storage::Borrowed(_) => None,
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.storage, Storage::Borrowed(_))
    }

    /// The tracked block behind an owned string.
    pub fn block(&self) -> Option<BlockId> {
        match self.storage {
            Storage::Owned { block, .. } => Some(block),
            Storage::Borrowed(_) => None,
        }
    }

    pub fn as_bytes<'s>(&'s self, heap: &'s Heap) -> KnitResult<&'s [u8]> {
        match self.storage {
            Storage::Owned { block, .. } => Ok(&heap.bytes(block)?[..self.len]),
            Storage::Borrowed(view) => Ok(&view[..self.len]),
        }
    }

    /// The contents followed by their terminator. Borrowed strings have none.
    pub fn as_bytes_with_nul<'s>(&'s self, heap: &'s Heap) -> KnitResult<&'s [u8]> {
        match self.storage {
            Storage::Owned { block, .. } => Ok(&heap.bytes(block)?[..=self.len]),
            Storage::Borrowed(_) => Err(KnitError::runtime(
                "as_bytes_with_nul(): borrowed strings carry no terminator",
            )),
        }
    }

    pub fn to_string_lossy<'s>(&'s self, heap: &'s Heap) -> KnitResult<Cow<'s, str>> {
        Ok(String::from_utf8_lossy(self.as_bytes(heap)?))
    }

    /// Compare contents, length first.
    pub fn eq_bytes(&self, heap: &Heap, other: &[u8]) -> KnitResult<bool> {
        Ok(self.len == other.len() && self.as_bytes(heap)? == other)
    }

    /// Replace the contents with a copy of `src`.
    pub fn assign_copy(&mut self, heap: &mut Heap, src: &[u8]) -> KnitResult<()> {
        if self.capacity().is_none_or(|cap| cap <= src.len()) {
            self.set_capacity(heap, src.len() + 1)?;
        }
        let buf = self.buffer_mut(heap)?;
        buf[..src.len()].copy_from_slice(src);
        buf[src.len()] = 0;
        self.len = src.len();
        Ok(())
    }

    /// Append a copy of `src`.
    pub fn append(&mut self, heap: &mut Heap, src: &[u8]) -> KnitResult<()> {
        let len = self.len;
        let needed = len + src.len();
        if self.capacity().is_none_or(|cap| cap <= needed) {
            self.set_capacity(heap, needed + 1)?;
        }
        let buf = self.buffer_mut(heap)?;
        buf[len..needed].copy_from_slice(src);
        buf[needed] = 0;
        self.len = needed;
        Ok(())
    }

    /// Truncate to zero length. Owned strings keep their capacity; borrowed
    /// strings become the empty literal without allocating.
    pub fn clear(&mut self, heap: &mut Heap) -> KnitResult<()> {
        match self.storage {
            Storage::Owned { block, .. } => heap.bytes_mut(block)?[0] = 0,
            Storage::Borrowed(_) => self.storage = Storage::Borrowed(b""),
        }
        self.len = 0;
        Ok(())
    }

    /// Replace the contents with formatted output.
    ///
    /// Formats into the current capacity first. When the output does not fit,
    /// grows to exactly the required size and formats once more.
    pub fn format_assign(&mut self, heap: &mut Heap, args: fmt::Arguments<'_>) -> KnitResult<()> {
        if self.capacity().is_none_or(|cap| cap < 2) {
            self.set_capacity(heap, 2)?;
        }

        let mut needed = self.format_in_place(heap, args)?;
        if let Some(cap) = self.capacity().filter(|&cap| needed >= cap) {
            // The buffer now holds the truncated output, terminated at cap - 1.
            self.len = cap - 1;
            self.set_capacity(heap, needed + 1)?;
            needed = self.format_in_place(heap, args)?;
            debug_assert!(self.capacity().is_some_and(|cap| needed < cap));
        }
        self.len = needed;
        Ok(())
    }

    /// Release the owned block. Borrowed strings release nothing.
    pub fn deinit(self, heap: &mut Heap) -> KnitResult<()> {
        heap.release(self.block())
    }

    /// Write `args` into the owned buffer, truncating at the terminator slot.
    /// Returns the full formatted length.
    fn format_in_place(&self, heap: &mut Heap, args: fmt::Arguments<'_>) -> KnitResult<usize> {
        let mut writer = BoundedWriter {
            buf: self.buffer_mut(heap)?,
            needed: 0,
        };
        fmt::write(&mut writer, args)
            .map_err(|_| KnitError::runtime("format_assign(): a formatting trait failed"))?;

        let BoundedWriter { buf, needed } = writer;
        let end = needed.min(buf.len() - 1);
        buf[end] = 0;
        Ok(needed)
    }

    /// Resize (or promote) to exactly `capacity` bytes.
    fn set_capacity(&mut self, heap: &mut Heap, capacity: usize) -> KnitResult<()> {
        debug_assert!(capacity > 0);
        match self.storage {
            Storage::Borrowed(view) => {
                let block = heap.allocate(capacity)?;
                let keep = self.len.min(capacity - 1);
                let buf = heap.bytes_mut(block)?;
                buf[..keep].copy_from_slice(&view[..keep]);
                buf[keep] = 0;
                self.len = keep;
                self.storage = Storage::Owned {
                    block,
                    cap: capacity,
                };
            }
            Storage::Owned { block, .. } => {
                let block = heap.reallocate(block, capacity)?;
                self.storage = Storage::Owned {
                    block,
                    cap: capacity,
                };
                if self.len >= capacity {
                    self.len = capacity - 1;
                    heap.bytes_mut(block)?[self.len] = 0;
                }
            }
        }
        Ok(())
    }

    fn buffer_mut<'h>(&self, heap: &'h mut Heap) -> KnitResult<&'h mut [u8]> {
        match self.storage {
            Storage::Owned { block, .. } => heap.bytes_mut(block),
            Storage::Borrowed(_) => Err(KnitError::runtime(
                "borrowed strings cannot be written in place",
            )),
        }
    }
}

/// `vsnprintf`-style sink: copies what fits, counts everything.
struct BoundedWriter<'b> {
    buf: &'b mut [u8],
    needed: usize,
}

impl fmt::Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len().saturating_sub(1);
        if self.needed < room {
            let n = (room - self.needed).min(s.len());
            self.buf[self.needed..self.needed + n].copy_from_slice(&s.as_bytes()[..n]);
        }
        self.needed += s.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::HeapConfig;

    fn heap() -> Heap {
        Heap::new().unwrap()
    }

    #[test]
    fn test_new_empty_is_terminated() {
        let mut heap = heap();
        let s = KnitStr::new_empty(&mut heap).unwrap();
        assert_eq!(s.len(), 0);
        assert_eq!(s.capacity(), Some(1));
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap(), b"\0");
    }

    #[test]
    fn test_assign_copy() {
        let mut heap = heap();
        let mut s = KnitStr::new_empty(&mut heap).unwrap();
        s.assign_copy(&mut heap, b"hello").unwrap();

        assert_eq!(s.as_bytes(&heap).unwrap(), b"hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.capacity(), Some(6));
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap(), b"hello\0");
    }

    #[test]
    fn test_assign_shorter_keeps_capacity() {
        let mut heap = heap();
        let mut s = KnitStr::from_bytes(&mut heap, b"longer text").unwrap();
        let block = s.block();
        s.assign_copy(&mut heap, b"tiny").unwrap();

        assert_eq!(s.block(), block);
        assert_eq!(s.capacity(), Some(12));
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap(), b"tiny\0");
    }

    #[test]
    fn test_repeated_append() {
        let mut heap = heap();
        let mut s = KnitStr::new_empty(&mut heap).unwrap();
        let mut expected = Vec::new();
        let chunks: [&[u8]; 5] = [b"a", b"bc", b"", b"def", b"ghij"];
        for chunk in chunks {
            s.append(&mut heap, chunk).unwrap();
            expected.extend_from_slice(chunk);

            assert_eq!(s.as_bytes(&heap).unwrap(), expected.as_slice());
            assert_eq!(heap.bytes(s.block().unwrap()).unwrap()[s.len()], 0);
        }
        assert_eq!(s.capacity(), Some(expected.len() + 1));
    }

    #[test]
    fn test_append_promotes_borrowed() {
        let mut heap = heap();
        let literal: &[u8] = b"lit";
        let mut s = KnitStr::borrowed(literal);
        assert!(s.is_borrowed());
        assert!(heap.is_empty());

        s.append(&mut heap, b"!").unwrap();
        assert!(!s.is_borrowed());
        assert_eq!(s.as_bytes(&heap).unwrap(), b"lit!");
        assert_eq!(s.capacity(), Some(5));
        assert_eq!(literal, b"lit");
    }

    #[test]
    fn test_assign_shorter_over_borrowed() {
        let mut heap = heap();
        let mut s = KnitStr::borrowed(b"a long literal");
        s.assign_copy(&mut heap, b"hi").unwrap();
        assert_eq!(s.as_bytes(&heap).unwrap(), b"hi");
        assert_eq!(s.capacity(), Some(3));
    }

    #[test]
    fn test_clear_owned_keeps_capacity() {
        let mut heap = heap();
        let mut s = KnitStr::from_bytes(&mut heap, b"abc").unwrap();
        s.clear(&mut heap).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.capacity(), Some(4));
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap(), b"\0");
    }

    #[test]
    fn test_clear_borrowed_stays_borrowed() {
        let mut heap = heap();
        let mut s = KnitStr::borrowed(b"abc");
        s.clear(&mut heap).unwrap();
        assert!(s.is_borrowed());
        assert!(s.is_empty());
        assert!(heap.is_empty());
    }

    #[test]
    fn test_format_assign_fits() {
        let mut heap = heap();
        let mut s = KnitStr::from_bytes(&mut heap, b"0123456789").unwrap();
        let block = s.block();
        s.format_assign(&mut heap, format_args!("{}-{}", 4, 2)).unwrap();

        assert_eq!(s.as_bytes(&heap).unwrap(), b"4-2");
        assert_eq!(s.block(), block);
        assert_eq!(heap.stats().reallocations, 1);
    }

    #[test]
    fn test_format_assign_grows_exactly_once() {
        let mut heap = heap();
        let mut s = KnitStr::new_empty(&mut heap).unwrap();
        s.format_assign(&mut heap, format_args!("variable '{}' is undefined", "counter"))
            .unwrap();

        let expected = b"variable 'counter' is undefined";
        assert_eq!(s.as_bytes(&heap).unwrap(), expected);
        assert_eq!(s.capacity(), Some(expected.len() + 1));
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap()[expected.len()], 0);
        // 1 -> 2, then 2 -> exact
        assert_eq!(heap.stats().reallocations, 2);
    }

    #[test]
    fn test_format_assign_failed_growth_keeps_terminator() {
        let mut heap = Heap::with_config(&HeapConfig {
            limit: Some(9),
            ..HeapConfig::default()
        })
        .unwrap();
        let mut s = KnitStr::from_bytes(&mut heap, b"abcdefgh").unwrap();
        s.assign_copy(&mut heap, b"ab").unwrap();

        let err = s
            .format_assign(&mut heap, format_args!("{}", "x".repeat(20)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);

        // Left holding the truncated output.
        assert_eq!(s.capacity(), Some(9));
        assert_eq!(s.len(), 8);
        assert_eq!(s.as_bytes_with_nul(&heap).unwrap(), b"xxxxxxxx\0");
        assert_eq!(heap.bytes(s.block().unwrap()).unwrap()[s.len()], 0);
    }

    #[test]
    fn test_format_assign_on_borrowed() {
        let mut heap = heap();
        let mut s = KnitStr::borrowed(b"x");
        s.format_assign(&mut heap, format_args!("{:>4}", 7)).unwrap();
        assert!(!s.is_borrowed());
        assert_eq!(s.as_bytes(&heap).unwrap(), b"   7");
    }

    #[test]
    fn test_deinit_releases_block() {
        let mut heap = heap();
        let s = KnitStr::from_bytes(&mut heap, b"bye").unwrap();
        assert_eq!(heap.len(), 1);
        s.deinit(&mut heap).unwrap();
        assert!(heap.is_empty());

        KnitStr::borrowed(b"static").deinit(&mut heap).unwrap();
        assert_eq!(heap.stats().releases, 1);
    }

    #[test]
    fn test_eq_bytes() {
        let mut heap = heap();
        let s = KnitStr::from_bytes(&mut heap, b"name").unwrap();
        assert!(s.eq_bytes(&heap, b"name").unwrap());
        assert!(!s.eq_bytes(&heap, b"names").unwrap());
        assert!(!s.eq_bytes(&heap, b"nam").unwrap());
    }
}
