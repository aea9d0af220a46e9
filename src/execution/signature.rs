//! Flat signature encoding consumed by the embedding's call dispatch.
//!
//! A signature is laid out as the result tokens, one [`SigToken::Marker`],
//! then the parameter tokens. The dispatcher finds the result arity by
//! scanning to the marker, so no length fields are carried.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use super::engine::Config;
use crate::{
    binary::types::{FuncType, ValueType},
    error::Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum SigToken {
    I32 = 0x7F,
    I64 = 0x7E,
    F32 = 0x7D,
    F64 = 0x7C,
    FuncRef = 0x70,
    AnyRef = 0x6F,
    Marker = 0x40,
}

impl SigToken {
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            SigToken::I32 => Some(ValueType::I32),
            SigToken::I64 => Some(ValueType::I64),
            SigToken::F32 => Some(ValueType::F32),
            SigToken::F64 => Some(ValueType::F64),
            SigToken::FuncRef => Some(ValueType::FuncRef),
            SigToken::AnyRef => Some(ValueType::AnyRef),
            SigToken::Marker => None,
        }
    }
}

fn value_type_to_token(ty: ValueType, config: &Config) -> Result<SigToken, Error> {
    match ty {
        ValueType::I32 => Ok(SigToken::I32),
        ValueType::I64 => Ok(SigToken::I64),
        ValueType::F32 => Ok(SigToken::F32),
        ValueType::F64 => Ok(SigToken::F64),
        ValueType::AnyRef if config.reference_types => Ok(SigToken::AnyRef),
        ValueType::FuncRef if config.reference_types => Ok(SigToken::FuncRef),
        ValueType::AnyRef | ValueType::FuncRef => Err(Error::UnsupportedValueType(ty)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    tokens: Vec<SigToken>,
    marker: usize,
}

/// Encodes `ty` for the dispatcher. Reference kinds are only representable
/// when the engine is configured with reference types.
pub fn serialize(ty: &FuncType, config: &Config) -> Result<Signature, Error> {
    let mut tokens = Vec::with_capacity(ty.params.len() + ty.results.len() + 1);
    for result in ty.results.iter() {
        tokens.push(value_type_to_token(*result, config)?);
    }
    tokens.push(SigToken::Marker);
    for param in ty.params.iter() {
        tokens.push(value_type_to_token(*param, config)?);
    }
    Ok(Signature {
        tokens,
        marker: ty.results.len(),
    })
}

impl Signature {
    /// Rebuilds a signature from its byte form, validating every token.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let tokens = bytes
            .iter()
            .map(|b| SigToken::from_u8(*b).ok_or(Error::InvalidSignatureToken(*b)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut markers = tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| **token == SigToken::Marker)
            .map(|(idx, _)| idx);
        let Some(marker) = markers.next() else {
            return Err(Error::MalformedSignature("missing marker"));
        };
        if markers.next().is_some() {
            return Err(Error::MalformedSignature("more than one marker"));
        }

        Ok(Self { tokens, marker })
    }

    pub fn tokens(&self) -> &[SigToken] {
        &self.tokens
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.tokens.iter().map(|token| *token as u8).collect()
    }

    pub fn results(&self) -> &[SigToken] {
        &self.tokens[..self.marker]
    }

    pub fn params(&self) -> &[SigToken] {
        &self.tokens[self.marker + 1..]
    }

    pub fn to_func_type(&self) -> FuncType {
        let kinds = |tokens: &[SigToken]| {
            tokens
                .iter()
                .filter_map(SigToken::value_type)
                .collect::<Vec<_>>()
        };
        FuncType::new(kinds(self.params()), kinds(self.results()))
    }

    /// Size of the buffer the dispatcher must pass to the trampoline.
    pub fn buffer_size(&self) -> usize {
        let width = |tokens: &[SigToken]| {
            tokens
                .iter()
                .filter_map(SigToken::value_type)
                .map(|ty| ty.width())
                .sum::<usize>()
        };
        width(self.params()).max(width(self.results()))
    }
}
