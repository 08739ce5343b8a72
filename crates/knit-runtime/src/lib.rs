//! Knit runtime library.
//!
//! The substrate the knit interpreter runs on:
//! - a tracked heap whose registry owns every runtime block ([`memory`])
//! - growable NUL-terminated byte strings ([`string`]) and string lists ([`list`])
//! - dynamic objects addressed by handle ([`value`])
//! - the global variable table ([`vars`])
//! - sticky first-error reporting with a configurable policy ([`error`])
//!
//! Embedders drive all of it through [`Runtime`].

pub mod error;
pub mod list;
pub mod memory;
pub mod runtime;
pub mod string;
pub mod value;
pub mod vars;

pub use error::{ErrorContext, ErrorKind, ErrorPolicy, KnitError, KnitResult};
pub use list::KnitList;
pub use memory::{BlockId, Heap, HeapConfig, HeapStats};
pub use runtime::{Runtime, RuntimeConfig, StrView};
pub use string::KnitStr;
pub use value::{ObjRef, Object, ObjectKind};
pub use vars::VarTable;
