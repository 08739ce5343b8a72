//! The runtime context handed to embedders
//!
//! [`Runtime`] owns the heap, the variable table and the error state. Every
//! public operation reports its failure once through the sticky
//! [`ErrorContext`] and hands the resulting [`ErrorKind`] back.

use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ErrorContext, ErrorKind, ErrorPolicy, KnitError, KnitResult};
use crate::memory::{Heap, HeapConfig};
use crate::string::KnitStr;
use crate::value::{ObjRef, Object};
use crate::vars::VarTable;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub policy: ErrorPolicy,
    pub heap: HeapConfig,
    /// Number of variable slots reserved up front.
    pub variable_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: ErrorPolicy::default(),
            heap: HeapConfig::default(),
            variable_capacity: 32,
        }
    }
}

impl RuntimeConfig {
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_heap_limit(mut self, limit: impl Into<Option<usize>>) -> Self {
        self.heap.limit = limit.into();
        self
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.heap.registry_capacity = capacity;
        self
    }

    pub fn with_variable_capacity(mut self, capacity: usize) -> Self {
        self.variable_capacity = capacity;
        self
    }
}

/// Borrowed view of a string variable.
#[derive(Debug, Clone, Copy)]
pub struct StrView<'r> {
    string: &'r KnitStr<'static>,
    bytes: &'r [u8],
}

impl<'r> StrView<'r> {
    pub fn as_bytes(&self) -> &'r [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_str(&self) -> Result<&'r str, std::str::Utf8Error> {
        std::str::from_utf8(self.bytes)
    }

    pub fn to_string_lossy(&self) -> std::borrow::Cow<'r, str> {
        String::from_utf8_lossy(self.bytes)
    }

    /// The underlying runtime string.
    pub fn string(&self) -> &'r KnitStr<'static> {
        self.string
    }
}

impl fmt::Display for StrView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[derive(Debug)]
pub struct Runtime {
    heap: Heap,
    vars: VarTable,
    errors: ErrorContext,
}

impl Runtime {
    /// Create a runtime with the default configuration and `policy`.
    pub fn init(policy: ErrorPolicy) -> Result<Self, ErrorKind> {
        Self::with_config(RuntimeConfig::default().with_policy(policy))
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self, ErrorKind> {
        let mut errors = ErrorContext::new(config.policy);
        let heap = Heap::with_config(&config.heap).map_err(|e| errors.report(e))?;
        let vars = VarTable::with_capacity(config.variable_capacity).map_err(|e| errors.report(e))?;
        debug!(policy = ?config.policy, limit = ?config.heap.limit, "runtime initialized");
        Ok(Self { heap, vars, errors })
    }

    /// Shut down, freeing every tracked block. Returns how many were freed.
    pub fn deinit(mut self) -> usize {
        let variables = self.vars.len();
        self.vars.clear();
        let stats = *self.heap.stats();
        let freed = self.heap.bulk_teardown();
        info!(
            freed,
            variables,
            allocations = stats.allocations,
            reallocations = stats.reallocations,
            peak_blocks = stats.peak_blocks,
            "runtime torn down"
        );
        freed
    }

    /// Capture `error` in the sticky context and return the pending kind.
    pub fn report(&mut self, error: KnitError) -> ErrorKind {
        self.errors.report(error)
    }

    fn check<T>(&mut self, result: KnitResult<T>) -> Result<T, ErrorKind> {
        result.map_err(|e| self.errors.report(e))
    }

    /// Bind `name` to `value`. The runtime takes ownership of `value`; a
    /// previously bound object is destroyed.
    ///
    /// An object is owned by one variable at a time. Binding `value` under a
    /// second name fails with [`ErrorKind::Runtime`] and leaves both names as
    /// they were.
    pub fn set(&mut self, name: &str, value: ObjRef) -> Result<(), ErrorKind> {
        let previous = self.vars.set(&mut self.heap, name.as_bytes(), value);
        let previous = self.check(previous)?;
        self.drop_previous(previous, value)
    }

    /// Bind `name` to a new string object holding `value`.
    pub fn set_string(&mut self, name: &str, value: &str) -> Result<(), ErrorKind> {
        let obj = self.new_string(value)?;
        match self.vars.set(&mut self.heap, name.as_bytes(), obj) {
            Ok(previous) => self.drop_previous(previous, obj),
            Err(err) => {
                if let Err(cleanup) = Object::destroy(&mut self.heap, obj) {
                    debug!(%obj, %cleanup, "couldn't destroy an unbound string");
                }
                Err(self.errors.report(err))
            }
        }
    }

    fn drop_previous(&mut self, previous: Option<ObjRef>, current: ObjRef) -> Result<(), ErrorKind> {
        match previous {
            Some(old) if old != current => {
                let destroyed = Object::destroy(&mut self.heap, old);
                self.check(destroyed)
            }
            _ => Ok(()),
        }
    }

    pub fn get(&mut self, name: &str) -> Result<ObjRef, ErrorKind> {
        let found = self.vars.get(&self.heap, name.as_bytes());
        self.check(found)
    }

    pub fn object(&mut self, obj: ObjRef) -> Result<&Object, ErrorKind> {
        self.heap.object(obj).map_err(|e| self.errors.report(e))
    }

    /// The contents of the string variable `name`.
    ///
    /// Panics if `name` is bound to something other than a string.
    pub fn get_string(&mut self, name: &str) -> Result<StrView<'_>, ErrorKind> {
        let obj = self.get(name)?;
        let heap = &self.heap;
        let view = heap.object(obj).and_then(|object| {
            let string = object.as_str();
            Ok(StrView {
                string,
                bytes: string.as_bytes(heap)?,
            })
        });
        view.map_err(|e| self.errors.report(e))
    }

    pub fn new_string(&mut self, content: &str) -> Result<ObjRef, ErrorKind> {
        let obj = Object::new_string(&mut self.heap, content.as_bytes());
        self.check(obj)
    }

    pub fn new_list(&mut self) -> Result<ObjRef, ErrorKind> {
        let obj = Object::new_list(&mut self.heap);
        self.check(obj)
    }

    pub fn new_null(&mut self) -> Result<ObjRef, ErrorKind> {
        let obj = Object::new_null(&mut self.heap);
        self.check(obj)
    }

    /// Append a copy of `value` to the list object `list`.
    ///
    /// Panics if `list` is not a list.
    pub fn list_push(&mut self, list: ObjRef, value: &str) -> Result<(), ErrorKind> {
        let pushed = Object::with_list_mut(&mut self.heap, list, |items, heap| {
            let item = KnitStr::from_bytes(heap, value.as_bytes())?;
            items.push(heap, item)
        });
        self.check(pushed)
    }

    /// Deinitialize `obj` and release its block. `obj` must not be bound to
    /// a variable.
    pub fn destroy(&mut self, obj: ObjRef) -> Result<(), ErrorKind> {
        let destroyed = Object::destroy(&mut self.heap, obj);
        self.check(destroyed)
    }

    /// Print the variable `name` to stdout.
    pub fn dump_variable(&mut self, name: &str) -> Result<(), ErrorKind> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.dump_variable_to(name, &mut out)
    }

    /// Write `'contents'` for a string, `LIST` for a list and `NULL` for a
    /// null object or an undefined variable, followed by a newline.
    ///
    /// A failed lookup is reported before `NULL` is written.
    pub fn dump_variable_to(&mut self, name: &str, out: &mut impl Write) -> Result<(), ErrorKind> {
        let rendered = self.render(name);
        let (line, lookup) = match rendered {
            Ok(line) => (line, Ok(())),
            Err(err) => ("NULL".to_owned(), Err(self.errors.report(err))),
        };
        let written = writeln!(out, "{line}")
            .map_err(|e| KnitError::runtime(format!("dump_variable(): {e}")));
        self.check(written)?;
        lookup
    }

    fn render(&self, name: &str) -> KnitResult<String> {
        let obj = self.vars.get(&self.heap, name.as_bytes())?;
        Ok(match self.heap.object(obj)? {
            Object::Null => "NULL".to_owned(),
            Object::Str(string) => format!("'{}'", string.to_string_lossy(&self.heap)?),
            Object::List(_) => "LIST".to_owned(),
        })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.errors.kind()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.errors.message()
    }

    pub fn clear_error(&mut self) {
        self.errors.clear();
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.errors.policy()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Every bound variable name, sorted.
    pub fn variable_names(&mut self) -> Result<Vec<String>, ErrorKind> {
        let names = self.vars.names(&self.heap);
        self.check(names)
    }
}
