use thiserror::Error;

use crate::binary::types::{FuncType, ValueType};

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported value type in signature: {0:?}")]
    UnsupportedValueType(ValueType),

    #[error("invalid signature token: {0:#04X}")]
    InvalidSignatureToken(u8),

    #[error("malformed signature: {0}")]
    MalformedSignature(&'static str),

    #[error("not found import {module}.{name}")]
    ImportNotFound { module: String, name: String },

    #[error("signature mismatch for {module}.{name}: {expected:?} != {actual:?}")]
    SignatureMismatch {
        module: String,
        name: String,
        expected: FuncType,
        actual: FuncType,
    },

    #[error("argument mismatch: expected {expected:?}, got {actual:?}")]
    ArgumentMismatch {
        expected: Vec<ValueType>,
        actual: Vec<ValueType>,
    },

    #[error("memory limit exceeded: {pages} pages requested, {max} allowed")]
    MemoryLimit { pages: u32, max: u32 },

    #[error("memory access out of bounds: {len} bytes at {offset}")]
    MemoryAccess { offset: usize, len: usize },
}

/// Raised by a call through the trampoline. The dispatcher turns it into a
/// WebAssembly trap.
#[derive(Error, Debug)]
pub enum Trap {
    #[error("host function failed: {0}")]
    Host(anyhow::Error),

    #[error("host function panicked: {0}")]
    Panic(String),

    #[error("host function returned {actual} results, expected {expected}")]
    ResultArity { expected: usize, actual: usize },

    #[error("host function result {index} has type {actual:?}, expected {expected:?}")]
    ResultType {
        index: usize,
        expected: ValueType,
        actual: ValueType,
    },
}
