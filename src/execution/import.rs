use std::{
    collections::HashMap,
    ffi::c_void,
    fmt,
    sync::Arc,
};

use anyhow::Result;

use super::{memory::MemoryView, signature::Signature, value::Value};
use crate::binary::types::FuncType;

pub type HostFunc = Arc<dyn Fn(&mut MemoryView<'_>, &[Value]) -> Result<Vec<Value>> + Send + Sync>;

/// A native callback paired with the signature it is called with.
#[derive(Clone)]
pub struct Func {
    ty: FuncType,
    callback: HostFunc,
}

impl Func {
    pub fn new(
        ty: FuncType,
        callback: impl Fn(&mut MemoryView<'_>, &[Value]) -> Result<Vec<Value>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            ty,
            callback: Arc::new(callback),
        }
    }

    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    pub fn callback(&self) -> &HostFunc {
        &self.callback
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("ty", &self.ty).finish()
    }
}

/// One registered native import.
#[derive(Debug)]
pub struct ImportEntry {
    pub module: String,
    pub name: String,
    pub func: Func,
    pub signature: Signature,
}

impl ImportEntry {
    pub(crate) fn new(module: String, name: String, func: Func, signature: Signature) -> Self {
        Self {
            module,
            name,
            func,
            signature,
        }
    }

    pub fn ty(&self) -> &FuncType {
        &self.func.ty
    }

    /// Opaque data pointer handed to the raw trampoline. Valid while the
    /// entry is alive.
    pub fn context_ptr(self: &Arc<Self>) -> *const c_void {
        Arc::as_ptr(self) as *const c_void
    }
}

/// Native import namespace: module name to import name to entry.
#[derive(Debug, Default)]
pub struct Imports {
    modules: HashMap<String, HashMap<String, Arc<ImportEntry>>>,
}

impl Imports {
    /// Inserts `entry`, replacing any entry already registered under the
    /// same module and name. Returns the replaced entry.
    pub fn insert(&mut self, entry: ImportEntry) -> Option<Arc<ImportEntry>> {
        let module = self.modules.entry(entry.module.clone()).or_default();
        module.insert(entry.name.clone(), Arc::new(entry))
    }

    pub fn get(&self, module: &str, name: &str) -> Option<Arc<ImportEntry>> {
        self.modules.get(module)?.get(name).cloned()
    }

    pub fn module(&self, module: &str) -> Option<&HashMap<String, Arc<ImportEntry>>> {
        self.modules.get(module)
    }

    /// Number of registered imports across all modules.
    pub fn len(&self) -> usize {
        self.modules.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ImportEntry>> {
        self.modules.values().flat_map(HashMap::values)
    }
}
