use std::num::NonZeroUsize;

use crate::binary::types::ValueType;

/// An opaque reference to a host object. The bridge never dereferences it
/// and never touches a reference count; zero is the null reference.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref(Option<NonZeroUsize>);

impl Ref {
    pub const NULL: Ref = Ref(None);

    pub fn new(addr: usize) -> Self {
        Ref(NonZeroUsize::new(addr))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// The raw address, zero for null.
    pub fn addr(&self) -> usize {
        self.0.map_or(0, NonZeroUsize::get)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    AnyRef(Ref),
    FuncRef(Ref),
}

impl Default for Value {
    fn default() -> Self {
        Value::AnyRef(Ref::NULL)
    }
}

// Floats compare by bit pattern so NaN payloads survive a round trip.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a.to_bits() == b.to_bits(),
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::AnyRef(a), Value::AnyRef(b)) => a == b,
            (Value::FuncRef(a), Value::FuncRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn func_ref(r: Ref) -> Self {
        Value::FuncRef(r)
    }

    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::AnyRef(_) => ValueType::AnyRef,
            Value::FuncRef(_) => ValueType::FuncRef,
        }
    }

    pub fn try_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_ref(&self) -> Option<Ref> {
        match self {
            Value::AnyRef(r) | Value::FuncRef(r) => Some(*r),
            _ => None,
        }
    }

    /// # Panics
    ///
    /// Panics if the value is not an `i32`. A mismatch means the signature
    /// and the callback disagree, which is a bug in the registering code.
    pub fn as_i32(&self) -> i32 {
        self.try_i32()
            .unwrap_or_else(|| panic!("type mismatch: expected I32, found {:?}", self.ty()))
    }

    pub fn as_i64(&self) -> i64 {
        self.try_i64()
            .unwrap_or_else(|| panic!("type mismatch: expected I64, found {:?}", self.ty()))
    }

    pub fn as_f32(&self) -> f32 {
        self.try_f32()
            .unwrap_or_else(|| panic!("type mismatch: expected F32, found {:?}", self.ty()))
    }

    pub fn as_f64(&self) -> f64 {
        self.try_f64()
            .unwrap_or_else(|| panic!("type mismatch: expected F64, found {:?}", self.ty()))
    }

    /// Valid for both `AnyRef` and `FuncRef`.
    pub fn as_ref(&self) -> Ref {
        self.try_ref()
            .unwrap_or_else(|| panic!("type mismatch: expected reference, found {:?}", self.ty()))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<Ref> for Value {
    fn from(value: Ref) -> Self {
        Value::AnyRef(value)
    }
}

impl From<Value> for i32 {
    fn from(value: Value) -> Self {
        value.as_i32()
    }
}

impl From<Value> for i64 {
    fn from(value: Value) -> Self {
        value.as_i64()
    }
}
