pub mod engine;
pub mod import;
pub mod linker;
pub mod memory;
pub mod signature;
pub mod trampoline;
pub mod value;
