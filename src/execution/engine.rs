use std::sync::Arc;

use anyhow::Result;

use super::{
    import::{Func, ImportEntry, Imports},
    signature::serialize,
};

pub const MAX_PAGES: u32 = 65536;

const REFERENCE_TYPES_ENV: &str = "WASMBRIDGE_REFERENCE_TYPES";

/// Capabilities of the embedding the bridge registers imports with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether the dispatcher understands `anyref`/`funcref` signature
    /// tokens. Without it, registering an import that uses a reference
    /// kind fails.
    pub reference_types: bool,
    pub max_memory_pages: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_types: false,
            max_memory_pages: MAX_PAGES,
        }
    }
}

impl Config {
    pub fn reference_types(mut self, enable: bool) -> Self {
        self.reference_types = enable;
        self
    }

    pub fn max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages.min(MAX_PAGES);
        self
    }

    /// Default config, with reference types switched on when
    /// `WASMBRIDGE_REFERENCE_TYPES` is `1` or `true`.
    pub fn from_env() -> Self {
        let enable = std::env::var(REFERENCE_TYPES_ENV)
            .map(|v| matches!(v.trim(), "1" | "true"))
            .unwrap_or(false);
        Self::default().reference_types(enable)
    }
}

/// One embedding instance. Owns the native import namespace, which is
/// created on the first registration and dropped with the engine.
#[derive(Debug, Default)]
pub struct Engine {
    config: Config,
    native_imports: Option<Imports>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            native_imports: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers `func` as the native import `module_name.name`, replacing
    /// any import already registered under that name.
    ///
    /// Fails when the signature uses a kind the embedding cannot encode.
    /// Registration belongs to setup; `&mut self` keeps it from racing
    /// with resolution.
    pub fn preload_native(
        &mut self,
        module_name: impl Into<String>,
        name: impl Into<String>,
        func: Func,
    ) -> Result<()> {
        let module_name = module_name.into();
        let name = name.into();
        let signature = serialize(func.ty(), &self.config)?;

        let imports = self.native_imports.get_or_insert_with(|| {
            log::debug!("create native import namespace");
            Imports::default()
        });

        log::debug!(
            "preload native {}.{}: {:?}",
            module_name,
            name,
            signature.tokens()
        );
        let entry = ImportEntry::new(module_name, name, func, signature);
        if let Some(prev) = imports.insert(entry) {
            log::debug!("replaced native {}.{}", prev.module, prev.name);
        }
        Ok(())
    }

    pub fn resolve(&self, module_name: &str, name: &str) -> Option<Arc<ImportEntry>> {
        self.native_imports.as_ref()?.get(module_name, name)
    }

    pub fn native_imports(&self) -> Option<&Imports> {
        self.native_imports.as_ref()
    }

    /// Drops every registered import. Entries still held by resolved
    /// call targets stay alive until those are dropped.
    pub fn clear_imports(&mut self) {
        self.native_imports = None;
    }
}
