use std::mem::size_of;

use num_derive::FromPrimitive;

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub(crate) params: Vec<ValueType>,
    pub(crate) results: Vec<ValueType>,
}

impl FuncType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        Self { params, results }
    }

    pub fn params(&self) -> Vec<ValueType> {
        self.params.clone()
    }

    pub fn results(&self) -> Vec<ValueType> {
        self.results.clone()
    }

    /// Bytes occupied by the parameters in a call buffer.
    pub fn param_width(&self) -> usize {
        self.params.iter().map(ValueType::width).sum()
    }

    /// Bytes occupied by the results in a call buffer.
    pub fn result_width(&self) -> usize {
        self.results.iter().map(ValueType::width).sum()
    }

    /// Minimum size of the argument/result buffer the dispatcher has to
    /// hand to the trampoline. Arguments and results share the buffer.
    pub fn buffer_size(&self) -> usize {
        self.param_width().max(self.result_width())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ValueType {
    I32 = 0x7F,
    I64 = 0x7E,
    F32 = 0x7D,
    F64 = 0x7C,
    FuncRef = 0x70,
    AnyRef = 0x6F,
}

impl ValueType {
    /// Width of the fixed-size slot a value of this kind takes in a call
    /// buffer. References are pointer sized.
    pub fn width(&self) -> usize {
        match self {
            ValueType::I32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::F64 => 8,
            ValueType::AnyRef | ValueType::FuncRef => size_of::<usize>(),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, ValueType::AnyRef | ValueType::FuncRef)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    Func(u32),
    Table(ValueType, Limits),
    Memory(Limits),
    Global { value_type: ValueType, mutable: bool },
}
