use super::{
    section::{Import, Memory, SectionCode},
    types::{FuncType, ImportDesc, Limits, ValueType},
};
use nom::{
    bytes::complete::{tag, take},
    error::{Error, ErrorKind},
    multi::count,
    number::complete::{le_u32, le_u8},
    sequence::pair,
    IResult,
};
use nom_leb128::leb128_u32;
use num_traits::FromPrimitive as _;

/// The parts of a WebAssembly binary the import bridge consumes: the
/// declared function types, the imports to resolve against the native
/// registry, and the memory the imports will see. Every other section is
/// skipped; compiling and executing code is left to the embedding VM.
#[derive(Debug, PartialEq, Eq)]
pub struct Module {
    pub magic: String,
    pub version: u32,
    pub type_section: Option<Vec<FuncType>>,
    pub import_section: Option<Vec<Import>>,
    pub memory_section: Option<Vec<Memory>>,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            magic: "\0asm".to_string(),
            version: 1,
            type_section: None,
            import_section: None,
            memory_section: None,
        }
    }
}

impl Module {
    pub fn new(input: &[u8]) -> anyhow::Result<Module> {
        let (_, module) =
            Module::decode(input).map_err(|e| anyhow::anyhow!("failed to parse wasm: {}", e))?;
        log::debug!(
            "decoded module: {} types, {} imports",
            module.type_section.as_ref().map_or(0, Vec::len),
            module.import_section.as_ref().map_or(0, Vec::len),
        );
        Ok(module)
    }

    /// Looks up the function type a type index refers to.
    pub fn func_type(&self, type_idx: u32) -> Option<&FuncType> {
        self.type_section.as_ref()?.get(type_idx as usize)
    }

    /// Function imports paired with the type the module declares for them.
    pub fn func_imports(&self) -> impl Iterator<Item = (&Import, Option<&FuncType>)> {
        self.import_section
            .iter()
            .flatten()
            .filter_map(move |import| match import.desc {
                ImportDesc::Func(type_idx) => Some((import, self.func_type(type_idx))),
                _ => None,
            })
    }

    fn decode(input: &[u8]) -> IResult<&[u8], Module> {
        let (input, _) = tag(b"\0asm")(input)?;
        let (input, version) = le_u32(input)?;

        let mut module = Module {
            magic: "\0asm".into(),
            version,
            ..Default::default()
        };

        let mut remaining = input;

        while !remaining.is_empty() {
            let (input, (code, size)) = decode_section_header(remaining)?;
            let (rest, section_contents) = take(size)(input)?;

            match code {
                SectionCode::Type => {
                    let (_, types) = decode_type_section(section_contents)?;
                    module.type_section = Some(types);
                }
                SectionCode::Import => {
                    let (_, imports) = decode_import_section(section_contents)?;
                    module.import_section = Some(imports);
                }
                SectionCode::Memory => {
                    let (_, memories) = decode_memory_section(section_contents)?;
                    module.memory_section = Some(memories);
                }
                _ => {
                    // skip
                }
            };

            remaining = rest;
        }
        Ok((remaining, module))
    }
}

fn invalid(input: &[u8]) -> nom::Err<Error<&[u8]>> {
    nom::Err::Failure(Error::new(input, ErrorKind::Verify))
}

fn decode_section_header(input: &[u8]) -> IResult<&[u8], (SectionCode, u32)> {
    let (rest, (code, size)) = pair(le_u8, leb128_u32)(input)?;
    let code = SectionCode::from_u8(code).ok_or_else(|| invalid(input))?;
    Ok((rest, (code, size)))
}

fn decode_value_type(input: &[u8]) -> IResult<&[u8], ValueType> {
    let (rest, value_type) = le_u8(input)?;
    let value_type = ValueType::from_u8(value_type).ok_or_else(|| invalid(input))?;
    Ok((rest, value_type))
}

fn decode_value_types(input: &[u8]) -> IResult<&[u8], Vec<ValueType>> {
    let (input, size) = leb128_u32(input)?;
    count(decode_value_type, size as usize)(input)
}

fn decode_type_section(input: &[u8]) -> IResult<&[u8], Vec<FuncType>> {
    let (input, size) = leb128_u32(input)?;
    count(decode_func_type, size as usize)(input)
}

fn decode_func_type(input: &[u8]) -> IResult<&[u8], FuncType> {
    let (input, _) = tag(b"\x60")(input)?;
    let (input, params) = decode_value_types(input)?;
    let (input, results) = decode_value_types(input)?;
    Ok((input, FuncType { params, results }))
}

fn decode_import_section(input: &[u8]) -> IResult<&[u8], Vec<Import>> {
    let (mut input, count) = leb128_u32(input)?;
    let mut imports = vec![];

    for _ in 0..count {
        let (rest, module) = decode_name(input)?;
        let (rest, field) = decode_name(rest)?;
        let (kind_input, import_kind) = le_u8(rest)?;
        let (rest, desc) = match import_kind {
            0x00 => {
                let (rest, idx) = leb128_u32(kind_input)?;
                (rest, ImportDesc::Func(idx))
            }
            0x01 => {
                let (rest, elem_type) = decode_value_type(kind_input)?;
                let (rest, limits) = decode_limits(rest)?;
                (rest, ImportDesc::Table(elem_type, limits))
            }
            0x02 => {
                let (rest, limits) = decode_limits(kind_input)?;
                (rest, ImportDesc::Memory(limits))
            }
            0x03 => {
                let (rest, (value_type, mutable)) = pair(decode_value_type, le_u8)(kind_input)?;
                (
                    rest,
                    ImportDesc::Global {
                        value_type,
                        mutable: mutable == 0x01,
                    },
                )
            }
            _ => return Err(invalid(rest)),
        };

        imports.push(Import {
            module,
            field,
            desc,
        });

        input = rest;
    }

    Ok((input, imports))
}

fn decode_memory_section(input: &[u8]) -> IResult<&[u8], Vec<Memory>> {
    let (input, size) = leb128_u32(input)?;
    let (input, limits) = count(decode_limits, size as usize)(input)?;
    Ok((
        input,
        limits.into_iter().map(|limits| Memory { limits }).collect(),
    ))
}

fn decode_limits(input: &[u8]) -> IResult<&[u8], Limits> {
    let (input, (flags, min)) = pair(leb128_u32, leb128_u32)(input)?;
    let (input, max) = if flags == 0 {
        (input, None)
    } else {
        let (input, max) = leb128_u32(input)?;
        (input, Some(max))
    };

    Ok((input, Limits { min, max }))
}

fn decode_name(input: &[u8]) -> IResult<&[u8], String> {
    let (rest, size) = leb128_u32(input)?;
    let (rest, name) = take(size)(rest)?;
    let name = String::from_utf8(name.to_vec()).map_err(|_| invalid(input))?;
    Ok((rest, name))
}
