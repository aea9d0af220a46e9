pub mod module;
pub mod section;
pub mod types;
