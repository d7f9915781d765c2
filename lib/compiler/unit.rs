use std::{
    io::{Cursor, Read},
    rc::Rc,
};

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    object::{CompiledFunction, Object},
    snippet::SnippetId,
};

use super::code::Instructions;

/// Everything the compiler produced for one snippet.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    pub snippet: SnippetId,
    /// Index in the shared constant pool of `constants[0]`.
    pub constants_offset: usize,
    /// Constants introduced by this snippet only.
    pub constants: Vec<Object>,
    pub instructions: Instructions,
    /// Globals this snippet binds, in declaration order.
    pub declarations: Vec<Declaration>,
    /// Number of global slots defined once this snippet has run.
    pub globals_count: usize,
    pub declared_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub index: usize,
}

/// Byte-level form of a compiled unit as handed to checkpoint consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedUnit {
    pub snippet: SnippetId,
    pub data: Vec<u8>,
}

impl SerializedUnit {
    pub fn file_name(&self) -> String {
        format!("Line_{}.bin", self.snippet)
    }
}

const MAGIC: &[u8; 4] = b"SNPU";
const VERSION: u8 = 1;

const TAG_INTEGER: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_FUNCTION: u8 = 2;

#[derive(Debug, Default)]
pub struct CompiledUnitSerializer;

impl CompiledUnitSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize(&self, unit: &CompiledUnit) -> Result<Vec<SerializedUnit>> {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.write_u8(VERSION)?;
        data.write_u32::<BigEndian>(unit.snippet.0)?;
        write_len(&mut data, unit.constants_offset)?;
        write_len(&mut data, unit.globals_count)?;

        write_len(&mut data, unit.constants.len())?;
        for constant in unit.constants.iter() {
            write_constant(&mut data, constant)?;
        }

        write_len(&mut data, unit.declarations.len())?;
        for declaration in unit.declarations.iter() {
            write_string(&mut data, &declaration.name)?;
            write_len(&mut data, declaration.index)?;
        }

        match &unit.declared_type {
            Some(declared_type) => {
                data.write_u8(1)?;
                write_string(&mut data, declared_type)?;
            }
            None => data.write_u8(0)?,
        }

        write_bytes(&mut data, unit.instructions.inner())?;

        Ok(vec![SerializedUnit {
            snippet: unit.snippet,
            data,
        }])
    }

    pub fn deserialize(&self, serialized: &SerializedUnit) -> Result<CompiledUnit> {
        let mut reader = Cursor::new(serialized.data.as_slice());

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).context("missing header")?;
        if &magic != MAGIC {
            bail!("not a serialized unit");
        }
        let version = reader.read_u8()?;
        if version != VERSION {
            bail!("unsupported unit version: {version}");
        }

        let snippet = SnippetId(reader.read_u32::<BigEndian>()?);
        let constants_offset = read_len(&mut reader)?;
        let globals_count = read_len(&mut reader)?;

        let num_constants = read_len(&mut reader)?;
        let mut constants = Vec::with_capacity(num_constants);
        for _ in 0..num_constants {
            constants.push(read_constant(&mut reader, constants_offset)?);
        }

        let num_declarations = read_len(&mut reader)?;
        let mut declarations = Vec::with_capacity(num_declarations);
        for _ in 0..num_declarations {
            let name = read_string(&mut reader)?;
            let index = read_len(&mut reader)?;
            declarations.push(Declaration { name, index });
        }

        let declared_type = match reader.read_u8()? {
            0 => None,
            _ => Some(read_string(&mut reader)?),
        };

        let instructions = Instructions::from_bytes(read_bytes(&mut reader)?);

        Ok(CompiledUnit {
            snippet,
            constants_offset,
            constants,
            instructions,
            declarations,
            globals_count,
            declared_type,
        })
    }
}

fn write_len(data: &mut Vec<u8>, len: usize) -> Result<()> {
    data.write_u32::<BigEndian>(len.try_into()?)?;
    Ok(())
}

fn write_bytes(data: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_len(data, bytes.len())?;
    data.extend_from_slice(bytes);
    Ok(())
}

fn write_string(data: &mut Vec<u8>, value: &str) -> Result<()> {
    write_bytes(data, value.as_bytes())
}

fn write_constant(data: &mut Vec<u8>, constant: &Object) -> Result<()> {
    match constant {
        Object::Integer(value) => {
            data.write_u8(TAG_INTEGER)?;
            data.write_i64::<BigEndian>(*value)?;
        }
        Object::String(value) => {
            data.write_u8(TAG_STRING)?;
            write_string(data, value)?;
        }
        Object::Function(function) => {
            data.write_u8(TAG_FUNCTION)?;
            write_len(data, function.num_locals)?;
            write_len(data, function.num_parameters)?;
            write_bytes(data, function.instructions.inner())?;
        }
        other => bail!("{} values cannot be stored as constants", other.object_type()),
    }
    Ok(())
}

fn read_len(reader: &mut Cursor<&[u8]>) -> Result<usize> {
    Ok(reader.read_u32::<BigEndian>()? as usize)
}

fn read_bytes(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = read_len(reader)?;
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if len > remaining {
        bail!("truncated unit: expected {len} bytes, found {remaining}");
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_string(reader: &mut Cursor<&[u8]>) -> Result<String> {
    Ok(String::from_utf8(read_bytes(reader)?)?)
}

/// Functions are always compiled against the offset of the unit holding them.
fn read_constant(reader: &mut Cursor<&[u8]>, constants_offset: usize) -> Result<Object> {
    let constant = match reader.read_u8()? {
        TAG_INTEGER => Object::Integer(reader.read_i64::<BigEndian>()?),
        TAG_STRING => Object::String(read_string(reader)?),
        TAG_FUNCTION => {
            let num_locals = read_len(reader)?;
            let num_parameters = read_len(reader)?;
            let instructions = Instructions::from_bytes(read_bytes(reader)?);
            Object::Function(Rc::new(CompiledFunction {
                instructions,
                constants_offset,
                num_locals,
                num_parameters,
            }))
        }
        tag => bail!("unknown constant tag: {tag}"),
    };
    Ok(constant)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{compiler::compiler::Compiler, lexer::Lexer, parser::Parser};

    use super::*;

    fn compile(input: &str) -> CompiledUnit {
        let program = Parser::new(Lexer::new(input)).parse_program().unwrap();
        Compiler::new().compile(SnippetId(7), program).unwrap()
    }

    #[test]
    fn test_serialized_unit_decodes_to_the_same_unit() {
        let unit = compile(r#"let greet = fn(name) { "hi " + name }; greet("you")"#);
        let serializer = CompiledUnitSerializer::new();

        let serialized = serializer.serialize(&unit).unwrap();
        assert_eq!(serialized.len(), 1);
        assert_eq!(serialized[0].snippet, SnippetId(7));
        assert_eq!(serialized[0].file_name(), "Line_7.bin");
        assert_eq!(&serialized[0].data[..4], b"SNPU");

        let decoded = serializer.deserialize(&serialized[0]).unwrap();
        assert_eq!(decoded, unit);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let serializer = CompiledUnitSerializer::new();
        let tests = vec![
            (vec![], "missing header"),
            (b"NOPE\x01".to_vec(), "not a serialized unit"),
            (b"SNPU\x09".to_vec(), "unsupported unit version: 9"),
        ];

        for (data, expected) in tests {
            let unit = SerializedUnit {
                snippet: SnippetId(0),
                data,
            };
            let err = serializer.deserialize(&unit).unwrap_err();
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let serializer = CompiledUnitSerializer::new();
        let mut serialized = serializer.serialize(&compile("\"abc\"")).unwrap().remove(0);
        serialized.data.truncate(serialized.data.len() - 2);

        assert!(serializer.deserialize(&serialized).is_err());
    }

    #[test]
    fn test_decoded_functions_keep_unit_offset() {
        let mut compiler = Compiler::new();
        for (snippet, input) in ["1", "2"].iter().enumerate() {
            let program = Parser::new(Lexer::new(input)).parse_program().unwrap();
            compiler.compile(SnippetId(snippet as u32), program).unwrap();
        }
        let program = Parser::new(Lexer::new("fn() { 3 }")).parse_program().unwrap();
        let unit = compiler.compile(SnippetId(2), program).unwrap();

        let serializer = CompiledUnitSerializer::new();
        let serialized = serializer.serialize(&unit).unwrap().remove(0);
        let decoded = serializer.deserialize(&serialized).unwrap();

        match &decoded.constants[1] {
            Object::Function(function) => assert_eq!(function.constants_offset, 2),
            other => panic!("expected a function, got {other:?}"),
        }
        assert_eq!(decoded, unit);
    }
}
