use std::sync::Arc;

use anyhow::{bail, Result};

use super::{
    engine::Engine,
    import::ImportEntry,
    memory::MemoryInst,
    trampoline::{self, native_trampoline, take_pending_trap, STATUS_SUCCESS},
    value::Value,
};
use crate::{binary::module::Module, error::Error};

/// A function import of a module bound to a preloaded native.
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub func_idx: u32,
    pub entry: Arc<ImportEntry>,
}

impl ResolvedImport {
    /// Calls the import the way a dispatcher does: pack the arguments into
    /// a buffer sized for the signature, run the raw trampoline against the
    /// instance memory, and unpack the results.
    pub fn call(&self, args: &[Value], memory: &mut MemoryInst) -> Result<Vec<Value>> {
        let ty = self.entry.ty();
        let actual: Vec<_> = args.iter().map(Value::ty).collect();
        if actual != ty.params {
            bail!(Error::ArgumentMismatch {
                expected: ty.params(),
                actual,
            });
        }

        let mut buffer = vec![0u8; self.entry.signature.buffer_size()];
        trampoline::encode(args, &mut buffer);

        let pages = memory.pages();
        let status = unsafe {
            native_trampoline(
                self.entry.context_ptr(),
                buffer.as_mut_ptr(),
                pages,
                memory.data.as_mut_ptr(),
            )
        };
        if status != STATUS_SUCCESS {
            let trap = take_pending_trap()
                .map_or_else(|| "unknown trap".to_string(), |trap| trap.to_string());
            bail!(
                "trap in {}.{}: {}",
                self.entry.module,
                self.entry.name,
                trap
            );
        }

        Ok(trampoline::decode(&ty.results, &buffer))
    }
}

/// Resolves the function imports of a decoded module against the native
/// import namespace of an engine.
pub struct Linker<'a> {
    engine: &'a Engine,
}

impl<'a> Linker<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Returns one resolved import per function import, in function index
    /// order. Fails on the first import that is missing or whose declared
    /// type differs from the registered one.
    pub fn link(&self, module: &Module) -> Result<Vec<ResolvedImport>> {
        let mut resolved = vec![];

        for (func_idx, (import, declared)) in module.func_imports().enumerate() {
            let Some(declared) = declared else {
                bail!("not found func type for import {}.{}", import.module, import.field)
            };
            let entry = self
                .engine
                .resolve(&import.module, &import.field)
                .ok_or_else(|| Error::ImportNotFound {
                    module: import.module.clone(),
                    name: import.field.clone(),
                })?;
            if entry.ty() != declared {
                return Err(Error::SignatureMismatch {
                    module: import.module.clone(),
                    name: import.field.clone(),
                    expected: declared.clone(),
                    actual: entry.ty().clone(),
                }
                .into());
            }

            log::debug!("link {}.{} as func {}", import.module, import.field, func_idx);
            resolved.push(ResolvedImport {
                func_idx: func_idx as u32,
                entry,
            });
        }

        Ok(resolved)
    }
}
