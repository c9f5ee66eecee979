//! Field and method descriptor parsing.
//!
//! Descriptors use the class-file grammar:
//!
//! ```text
//! FieldType   := BaseType | 'L' InternalName ';' | '[' FieldType
//! BaseType    := 'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z'
//! MethodDesc  := '(' FieldType* ')' (FieldType | 'V')
//! ```
//!
//! Remapping passes use [`map_descriptor`], [`map_method_descriptor`] and
//! [`map_type_name`] to relocate every class name that a descriptor mentions.

use std::fmt;

/// Errors raised while parsing a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("unexpected end of descriptor '{0}'")]
    UnexpectedEnd(String),
    #[error("invalid character '{found}' at offset {offset} in descriptor '{descriptor}'")]
    InvalidChar {
        descriptor: String,
        offset: usize,
        found: char,
    },
    #[error("trailing characters in descriptor '{0}'")]
    Trailing(String),
}

/// Primitive field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'B' => BaseType::Byte,
            'C' => BaseType::Char,
            'D' => BaseType::Double,
            'F' => BaseType::Float,
            'I' => BaseType::Int,
            'J' => BaseType::Long,
            'S' => BaseType::Short,
            'Z' => BaseType::Boolean,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        }
    }
}

/// A parsed field descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Base(BaseType),
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a complete field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut parser = Parser::new(descriptor);
        let field = parser.field_type()?;
        parser.finish()?;
        Ok(field)
    }

    /// Apply `f` to every class name mentioned by this type.
    pub fn map_classes(&self, f: &mut impl FnMut(&str) -> String) -> FieldType {
        match self {
            FieldType::Base(b) => FieldType::Base(*b),
            FieldType::Object(name) => FieldType::Object(f(name)),
            FieldType::Array(inner) => FieldType::Array(Box::new(inner.map_classes(f))),
        }
    }

    /// The innermost element type of an array, or the type itself.
    pub fn element_type(&self) -> &FieldType {
        match self {
            FieldType::Array(inner) => inner.element_type(),
            other => other,
        }
    }

    /// Component type of an array.
    pub fn component_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// The name used for this type in type instructions: the internal name for
    /// classes, the descriptor for arrays and primitives.
    pub fn type_name(&self) -> String {
        match self {
            FieldType::Object(name) => name.clone(),
            other => other.to_string(),
        }
    }

    /// Parse a name as used by type instructions (`java/lang/String` or `[I`).
    pub fn from_type_name(type_name: &str) -> Result<Self, DescriptorError> {
        if type_name.starts_with('[') {
            FieldType::parse(type_name)
        } else {
            Ok(FieldType::Object(type_name.to_string()))
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Base(b) => write!(f, "{}", b.as_char()),
            FieldType::Object(name) => write!(f, "L{};", name),
            FieldType::Array(inner) => write!(f, "[{}", inner),
        }
    }
}

/// A parsed method descriptor. `return_type` is `None` for `void`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut parser = Parser::new(descriptor);
        parser.expect('(')?;
        let mut parameters = Vec::new();
        while parser.peek()? != ')' {
            parameters.push(parser.field_type()?);
        }
        parser.expect(')')?;
        let return_type = if parser.peek()? == 'V' {
            parser.bump();
            None
        } else {
            Some(parser.field_type()?)
        };
        parser.finish()?;
        Ok(Self {
            parameters,
            return_type,
        })
    }

    pub fn map_classes(&self, f: &mut impl FnMut(&str) -> String) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self.parameters.iter().map(|p| p.map_classes(f)).collect(),
            return_type: self.return_type.as_ref().map(|r| r.map_classes(f)),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.parameters {
            write!(f, "{}", p)?;
        }
        f.write_str(")")?;
        match &self.return_type {
            Some(r) => write!(f, "{}", r),
            None => f.write_str("V"),
        }
    }
}

/// Relocate every class name in a field descriptor.
pub fn map_descriptor(
    descriptor: &str,
    mut f: impl FnMut(&str) -> String,
) -> Result<String, DescriptorError> {
    Ok(FieldType::parse(descriptor)?.map_classes(&mut f).to_string())
}

/// Relocate every class name in a method descriptor.
pub fn map_method_descriptor(
    descriptor: &str,
    mut f: impl FnMut(&str) -> String,
) -> Result<String, DescriptorError> {
    Ok(MethodDescriptor::parse(descriptor)?
        .map_classes(&mut f)
        .to_string())
}

/// Relocate a type-instruction operand: a plain internal name or an array descriptor.
pub fn map_type_name(
    type_name: &str,
    mut f: impl FnMut(&str) -> String,
) -> Result<String, DescriptorError> {
    if type_name.starts_with('[') {
        map_descriptor(type_name, f)
    } else {
        Ok(f(type_name))
    }
}

/// The array class name whose components are `type_name`.
pub fn array_of(type_name: &str) -> String {
    if type_name.starts_with('[') {
        format!("[{}", type_name)
    } else {
        format!("[L{};", type_name)
    }
}

struct Parser<'a> {
    descriptor: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(descriptor: &'a str) -> Self {
        Self {
            descriptor,
            chars: descriptor.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Result<char, DescriptorError> {
        self.chars
            .peek()
            .map(|(_, c)| *c)
            .ok_or_else(|| DescriptorError::UnexpectedEnd(self.descriptor.to_string()))
    }

    fn bump(&mut self) {
        self.chars.next();
    }

    fn next(&mut self) -> Result<(usize, char), DescriptorError> {
        self.chars
            .next()
            .ok_or_else(|| DescriptorError::UnexpectedEnd(self.descriptor.to_string()))
    }

    fn expect(&mut self, expected: char) -> Result<(), DescriptorError> {
        let (offset, found) = self.next()?;
        if found == expected {
            Ok(())
        } else {
            Err(self.invalid(offset, found))
        }
    }

    fn invalid(&self, offset: usize, found: char) -> DescriptorError {
        DescriptorError::InvalidChar {
            descriptor: self.descriptor.to_string(),
            offset,
            found,
        }
    }

    fn field_type(&mut self) -> Result<FieldType, DescriptorError> {
        let (offset, c) = self.next()?;
        if let Some(base) = BaseType::from_char(c) {
            return Ok(FieldType::Base(base));
        }
        match c {
            '[' => Ok(FieldType::Array(Box::new(self.field_type()?))),
            'L' => {
                let start = offset + 1;
                loop {
                    let (end, c) = self.next()?;
                    match c {
                        ';' if end > start => {
                            return Ok(FieldType::Object(self.descriptor[start..end].to_string()))
                        }
                        ';' | '(' | ')' | '[' | '.' => return Err(self.invalid(end, c)),
                        _ => {}
                    }
                }
            }
            _ => Err(self.invalid(offset, c)),
        }
    }

    fn finish(&mut self) -> Result<(), DescriptorError> {
        if self.chars.peek().is_some() {
            Err(DescriptorError::Trailing(self.descriptor.to_string()))
        } else {
            Ok(())
        }
    }
}
