pub mod binary;
pub mod error;
pub mod execution;
