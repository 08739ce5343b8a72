//! Dynamic objects
//!
//! Every value the language manipulates is an [`Object`] living in its own
//! tracked block and addressed through an [`ObjRef`].

use derive_more::Display;
use tracing::debug;

use crate::error::KnitResult;
use crate::list::KnitList;
use crate::memory::{BlockId, Heap};
use crate::string::KnitStr;

/// Handle to a tracked object block.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
#[display("obj@{_0}")]
pub struct ObjRef(BlockId);

impl ObjRef {
    pub(crate) fn new(id: BlockId) -> Self {
        Self(id)
    }

    pub fn block(self) -> BlockId {
        self.0
    }
}

/// Object type tags
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    #[display("null")]
    Null,
    #[display("string")]
    Str,
    #[display("list")]
    List,
}

#[derive(Debug, Default)]
pub enum Object {
    #[default]
    Null,
    Str(KnitStr<'static>),
    List(KnitList),
}

impl Object {
    pub fn new_null(heap: &mut Heap) -> KnitResult<ObjRef> {
        heap.allocate_object(Object::Null)
    }

    /// A string object holding an owned copy of `content`.
    pub fn new_string(heap: &mut Heap, content: &[u8]) -> KnitResult<ObjRef> {
        let obj = Self::new_null(heap)?;
        match KnitStr::from_bytes(heap, content) {
            Ok(string) => {
                *heap.object_mut(obj)? = Object::Str(string);
                Ok(obj)
            }
            Err(err) => {
                if let Err(cleanup) = heap.release_object(obj) {
                    debug!(%obj, %cleanup, "couldn't release a partially built object");
                }
                Err(err)
            }
        }
    }

    /// An empty list object. The item array is allocated on first push.
    pub fn new_list(heap: &mut Heap) -> KnitResult<ObjRef> {
        heap.allocate_object(Object::List(KnitList::new()))
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Null => ObjectKind::Null,
            Object::Str(_) => ObjectKind::Str,
            Object::List(_) => ObjectKind::List,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_str(&self) -> &KnitStr<'static> {
        match self {
            Object::Str(string) => string,
            other => panic!(
                "as_str(): invalid argument type, expected string, found {}",
                other.kind()
            ),
        }
    }

    pub fn as_str_mut(&mut self) -> &mut KnitStr<'static> {
        match self {
            Object::Str(string) => string,
            other => panic!(
                "as_str_mut(): invalid argument type, expected string, found {}",
                other.kind()
            ),
        }
    }

    pub fn as_list(&self) -> &KnitList {
        match self {
            Object::List(list) => list,
            other => panic!(
                "as_list(): invalid argument type, expected list, found {}",
                other.kind()
            ),
        }
    }

    pub fn as_list_mut(&mut self) -> &mut KnitList {
        match self {
            Object::List(list) => list,
            other => panic!(
                "as_list_mut(): invalid argument type, expected list, found {}",
                other.kind()
            ),
        }
    }

    /// Release the owned payload and leave the object `Null`.
    pub fn deinit(&mut self, heap: &mut Heap) -> KnitResult<()> {
        match std::mem::take(self) {
            Object::Null => Ok(()),
            Object::Str(string) => string.deinit(heap),
            Object::List(list) => list.deinit(heap),
        }
    }

    /// Deinitialize the object behind `obj` and release its block.
    ///
    /// Destroying the same reference twice fails: the second call finds the
    /// block untracked.
    pub fn destroy(heap: &mut Heap, obj: ObjRef) -> KnitResult<()> {
        let mut object = heap.release_object(obj)?;
        object.deinit(heap)
    }

    /// Run `f` on the list behind `obj`.
    ///
    /// The list is moved out of its block for the duration of the call so
    /// that `f` can allocate on the same heap, then moved back.
    pub fn with_list_mut<R>(
        heap: &mut Heap,
        obj: ObjRef,
        f: impl FnOnce(&mut KnitList, &mut Heap) -> KnitResult<R>,
    ) -> KnitResult<R> {
        let mut list = std::mem::take(heap.object_mut(obj)?.as_list_mut());
        let result = f(&mut list, heap);
        *heap.object_mut(obj)?.as_list_mut() = list;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::HeapConfig;

    #[test]
    fn test_new_string() {
        let mut heap = Heap::new().unwrap();
        let obj = Object::new_string(&mut heap, b"hello").unwrap();

        let object = heap.object(obj).unwrap();
        assert_eq!(object.kind(), ObjectKind::Str);
        assert!(object.as_str().eq_bytes(&heap, b"hello").unwrap());
        // object block + string bytes
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_new_string_failure_releases_object() {
        let mut heap = Heap::with_config(&HeapConfig {
            limit: Some(std::mem::size_of::<Object>() + 1),
            ..HeapConfig::default()
        })
        .unwrap();

        let err = Object::new_string(&mut heap, b"too long").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_list_push_through_handle() {
        let mut heap = Heap::new().unwrap();
        let obj = Object::new_list(&mut heap).unwrap();

        for word in ["a", "b"] {
            Object::with_list_mut(&mut heap, obj, |list, heap| {
                let item = KnitStr::from_bytes(heap, word.as_bytes())?;
                list.push(heap, item)
            })
            .unwrap();
        }

        let list = heap.object(obj).unwrap().as_list();
        assert_eq!(list.len(), 2);
        assert!(list.get(&heap, 1).unwrap().unwrap().eq_bytes(&heap, b"b").unwrap());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut heap = Heap::new().unwrap();
        let obj = Object::new_list(&mut heap).unwrap();
        Object::with_list_mut(&mut heap, obj, |list, heap| {
            let item = KnitStr::from_bytes(heap, b"item")?;
            list.push(heap, item)
        })
        .unwrap();
        // object + item array + item bytes
        assert_eq!(heap.len(), 3);

        Object::destroy(&mut heap, obj).unwrap();
        assert!(heap.is_empty());
    }

    #[test]
    fn test_double_destroy_is_rejected() {
        let mut heap = Heap::new().unwrap();
        let obj = Object::new_null(&mut heap).unwrap();
        Object::destroy(&mut heap, obj).unwrap();

        let err = Object::destroy(&mut heap, obj).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert!(err.message().contains("untracked"));
    }

    #[test]
    fn test_deinit_leaves_null() {
        let mut heap = Heap::new().unwrap();
        let mut object = Object::Str(KnitStr::from_bytes(&mut heap, b"x").unwrap());
        object.deinit(&mut heap).unwrap();
        assert!(object.is_null());
        assert!(heap.is_empty());
    }

    #[test]
    #[should_panic(expected = "expected string, found list")]
    fn test_as_str_on_list_panics() {
        let object = Object::List(KnitList::new());
        object.as_str();
    }
}
