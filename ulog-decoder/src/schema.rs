//! Message schema registry
//!
//! ULog streams are self-describing: `F` frames carry format-declaration
//! strings (`Name:type[count] field;type[count] field;...`) that define the
//! byte layout of subsequent `D` frames with the same id. This module parses
//! those declarations into `MessageSchema` descriptors and holds them keyed
//! by numeric message id.

use crate::types::{Result, UlogError};
use std::collections::HashMap;
use std::rc::Rc;

/// Closed set of primitive field types a schema may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Bool,
    Char,
}

impl FieldType {
    /// Parse a type token. Both bare (`uint64`) and C-style (`uint64_t`)
    /// spellings appear in real logs; accept both.
    pub fn parse(token: &str) -> Result<FieldType> {
        let ty = match token {
            "int8" | "int8_t" => FieldType::Int8,
            "uint8" | "uint8_t" => FieldType::UInt8,
            "int16" | "int16_t" => FieldType::Int16,
            "uint16" | "uint16_t" => FieldType::UInt16,
            "int32" | "int32_t" => FieldType::Int32,
            "uint32" | "uint32_t" => FieldType::UInt32,
            "int64" | "int64_t" => FieldType::Int64,
            "uint64" | "uint64_t" => FieldType::UInt64,
            "float" => FieldType::Float,
            "double" => FieldType::Double,
            "bool" => FieldType::Bool,
            "char" => FieldType::Char,
            other => return Err(UlogError::UnknownFieldType(other.to_string())),
        };
        Ok(ty)
    }

    /// Canonical token name, used as the type string in the field catalog
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Int8 => "int8",
            FieldType::UInt8 => "uint8",
            FieldType::Int16 => "int16",
            FieldType::UInt16 => "uint16",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Char => "char",
        }
    }

    /// Byte width of one element of this type
    pub fn byte_size(&self) -> usize {
        match self {
            FieldType::Int8 | FieldType::UInt8 | FieldType::Bool | FieldType::Char => 1,
            FieldType::Int16 | FieldType::UInt16 => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => 4,
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => 8,
        }
    }
}

/// Prefix marking fields that occupy bytes in the layout but are excluded
/// from field catalogs and exports
pub const PADDING_PREFIX: &str = "_padding";

/// One field of a message schema: `type[count] name`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    /// Array arity; 1 for scalar fields
    pub arity: usize,
}

impl FieldDescriptor {
    /// Parse a single field token, e.g. `float[3] pos` or `uint64 timestamp`.
    /// Info/parameter keys share this shape, so they reuse this parser.
    pub fn parse(token: &str) -> Result<FieldDescriptor> {
        let (type_part, name) = token.trim().split_once(' ').ok_or_else(|| {
            UlogError::MalformedDeclaration(format!("field token without name: {:?}", token))
        })?;

        let (type_token, arity) = match type_part.split_once('[') {
            Some((base, rest)) => {
                let count_str = rest.strip_suffix(']').ok_or_else(|| {
                    UlogError::MalformedDeclaration(format!("unterminated arity: {:?}", token))
                })?;
                let count: usize = count_str.parse().map_err(|_| {
                    UlogError::MalformedDeclaration(format!("bad arity: {:?}", token))
                })?;
                if count == 0 {
                    return Err(UlogError::MalformedDeclaration(format!(
                        "zero arity: {:?}",
                        token
                    )));
                }
                (base, count)
            }
            None => (type_part, 1),
        };

        Ok(FieldDescriptor {
            name: name.trim().to_string(),
            field_type: FieldType::parse(type_token)?,
            arity,
        })
    }

    pub fn is_array(&self) -> bool {
        self.arity > 1
    }

    /// Padding fields are present in the byte layout but hidden from output
    pub fn is_padding(&self) -> bool {
        self.name.starts_with(PADDING_PREFIX)
    }

    /// Total bytes this field occupies in a data payload
    pub fn byte_size(&self) -> usize {
        self.field_type.byte_size() * self.arity
    }
}

/// Registered layout for one message id
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSchema {
    pub id: u16,
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageSchema {
    /// Parse a format-declaration string: `Name:type[count] field;...`
    pub fn parse(id: u16, declaration: &str) -> Result<MessageSchema> {
        let (name, body) = declaration.split_once(':').ok_or_else(|| {
            UlogError::MalformedDeclaration(format!(
                "format declaration without name: {:?}",
                declaration
            ))
        })?;
        if name.is_empty() {
            return Err(UlogError::MalformedDeclaration(
                "empty schema name".to_string(),
            ));
        }

        let mut fields = Vec::new();
        for token in body.split(';') {
            if token.trim().is_empty() {
                continue;
            }
            fields.push(FieldDescriptor::parse(token)?);
        }

        Ok(MessageSchema {
            id,
            name: name.to_string(),
            fields,
        })
    }

    /// Names beginning with `_` are internal bookkeeping messages and are
    /// excluded from the field catalog.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Declared payload bytes for one data record of this schema,
    /// excluding the leading schema-id and instance-id bytes
    pub fn payload_size(&self) -> usize {
        self.fields.iter().map(|f| f.byte_size()).sum()
    }
}

/// Schema table keyed by message id
///
/// Redeclaration of an id replaces the previous schema: last declaration
/// wins for subsequent frames, with no retroactive reinterpretation.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<u16, Rc<MessageSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: MessageSchema) -> Rc<MessageSchema> {
        let schema = Rc::new(schema);
        self.schemas.insert(schema.id, Rc::clone(&schema));
        schema
    }

    pub fn get(&self, id: u16) -> Option<Rc<MessageSchema>> {
        self.schemas.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
