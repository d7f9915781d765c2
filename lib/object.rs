use core::fmt;
use std::rc::Rc;

use anyhow::Result;

use crate::compiler::code::Instructions;

#[derive(Debug, PartialEq, Clone)]
pub enum Object {
    Integer(i64),
    String(String),
    Boolean(bool),
    Null,
    Array(Vec<Object>),
    Function(Rc<CompiledFunction>),
    Builtin(&'static BuiltinFunction),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Integer(_) => ObjectType::Integer,
            Object::String(_) => ObjectType::String,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::Null => ObjectType::Null,
            Object::Array(_) => ObjectType::Array,
            Object::Function(_) => ObjectType::Function,
            Object::Builtin(_) => ObjectType::Builtin,
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Boolean(false) | Object::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Object::Function(_) | Object::Builtin(_))
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{}", value),
            Object::String(value) => write!(f, "{}", value),
            Object::Boolean(value) => write!(f, "{}", value),
            Object::Null => write!(f, "null"),
            Object::Array(values) => {
                let values: Vec<String> = values.iter().map(|v| format!("{}", v)).collect();
                write!(f, "[{}]", values.join(", "))
            }
            Object::Function(function) => write!(f, "fn/{}", function.num_parameters),
            Object::Builtin(builtin) => write!(f, "builtin {}", builtin.name),
        }
    }
}

/// Runtime type descriptor used by renderers to decide whether they apply to
/// a value.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ObjectType {
    Integer,
    String,
    Boolean,
    Null,
    Array,
    Function,
    Builtin,
}

impl ObjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::Integer => "Int",
            ObjectType::String => "String",
            ObjectType::Boolean => "Boolean",
            ObjectType::Null => "Null",
            ObjectType::Array => "Array",
            ObjectType::Function => "Function",
            ObjectType::Builtin => "Builtin",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    /// Pool index of the first constant of the unit this function was
    /// compiled in. `Constant` operands are relative to it.
    pub constants_offset: usize,
    pub num_locals: usize,
    pub num_parameters: usize,
}

pub struct BuiltinFunction {
    pub name: &'static str,
    pub function: fn(Vec<Object>) -> Result<Object>,
}

impl PartialEq for BuiltinFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

/// A raw result paired with the type name the compiler declared for it, if
/// any. This is what flows from the evaluator into the renderers.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct FieldValue {
    pub value: Option<Object>,
    pub declared_type: Option<String>,
}

impl FieldValue {
    pub fn new(value: Option<Object>, declared_type: Option<String>) -> Self {
        Self {
            value,
            declared_type,
        }
    }

    pub fn of(value: Object) -> Self {
        Self::new(Some(value), None)
    }

    pub fn unit() -> Self {
        Self::default()
    }
}
