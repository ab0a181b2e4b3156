//! Abstract representation of a Java program.
use crate::jvm::{AttributeInfo, CPInfo, JVMClassFile};

use regex::Regex;

/// Primitive types supported by the JVM.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseTypeKind {
    Int,
    Long,
    Float,
    Double,
    Void,
    String,
    List,
}

/// JVM value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub t: BaseTypeKind,
    pub sub_t: Option<Box<Type>>,
}

/// Java class method representation for the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub descriptor: String,
    pub return_type: Type,
    pub arg_types: Vec<Type>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

impl Method {
    /// Number of parameters the method receives in its leading local slots.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.arg_types.len()
    }
}

/// Representation of Java programs that we want to run.
#[derive(Debug, Clone)]
pub struct Program {
    // Constant pool, stored zero-based. Class file indices are one-based.
    pub constant_pool: Vec<CPInfo>,
    // Methods with their names and descriptors resolved.
    pub methods: Vec<Method>,
}

impl Program {
    /// Build a new program from a parsed class file.
    ///
    /// # Panics
    /// Panics if a method is missing its Code attribute or names something
    /// other than a Utf8 pool entry; such a class file was not produced by
    /// a conforming compiler.
    #[must_use]
    pub fn new(class_file: &JVMClassFile) -> Self {
        let constant_pool = class_file.constant_pool();
        let mut methods = Vec::new();
        for method_info in &class_file.methods() {
            let name = utf8_at(&constant_pool, method_info.name_index());
            let descriptor =
                utf8_at(&constant_pool, method_info.descriptor_index());
            let (arg_types, return_type) =
                Self::parse_method_types(&descriptor);
            let (max_stack, max_locals, code) =
                if let Some(AttributeInfo::CodeAttribute {
                    max_stack,
                    max_locals,
                    code,
                }) = method_info.attributes().get("Code")
                {
                    (*max_stack, *max_locals, code.clone())
                } else {
                    panic!("method {name} has no Code attribute")
                };

            methods.push(Method {
                name,
                descriptor,
                return_type,
                arg_types,
                max_stack,
                max_locals,
                code,
            });
        }

        Self {
            constant_pool,
            methods,
        }
    }

    /// Looks up a method by its exact name and descriptor strings.
    #[must_use]
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Resolves a Methodref constant pool entry to the method it names.
    /// `method_ref` is a one-based pool index.
    ///
    /// # Panics
    /// Panics if the entry does not resolve to a method of this class.
    #[must_use]
    pub fn find_method_from_index(&self, method_ref: usize) -> &Method {
        let name_and_type_index = match self.constant_pool[method_ref - 1] {
            CPInfo::ConstantMethodRef {
                name_and_type_index,
                ..
            } => name_and_type_index,
            ref entry => {
                panic!("expected Methodref at pool index {method_ref}, found {entry:?}")
            }
        };
        let (name_index, descriptor_index) =
            match self.constant_pool[usize::from(name_and_type_index) - 1] {
                CPInfo::ConstantNameAndType {
                    name_index,
                    descriptor_index,
                } => (name_index, descriptor_index),
                ref entry => panic!(
                    "expected NameAndType at pool index {name_and_type_index}, found {entry:?}"
                ),
            };
        let name = utf8_at(&self.constant_pool, name_index);
        let descriptor = utf8_at(&self.constant_pool, descriptor_index);
        self.find_method(&name, &descriptor).unwrap_or_else(|| {
            panic!("method {name}{descriptor} is not defined by this class")
        })
    }

    /// Returns the integer literal stored at a one-based pool index.
    ///
    /// # Panics
    /// Panics if the entry is not an Integer constant.
    #[must_use]
    pub fn integer_constant(&self, pool_index: usize) -> i32 {
        match self.constant_pool[pool_index - 1] {
            CPInfo::ConstantInteger { bytes } => bytes,
            ref entry => {
                panic!("expected Integer at pool index {pool_index}, found {entry:?}")
            }
        }
    }

    // Parse a method descriptor, returns a tuple of argument types and
    // return type.
    fn parse_method_types(descriptor: &str) -> (Vec<Type>, Type) {
        let re = Regex::new(r"\(([^\)]*)\)([^$]+)").unwrap();
        let caps = re.captures(descriptor).unwrap();
        let arg_string = caps.get(1).map_or("", |m| m.as_str());
        let return_type_string = caps.get(2).map_or("", |m| m.as_str());
        let ret_type = Self::decode_type(return_type_string);

        let mut types: Vec<Type> = Vec::new();
        let mut arg_string_slice = arg_string;
        while !arg_string_slice.is_empty() {
            let t = Self::decode_type(arg_string_slice);
            let length = Self::decode_type_string_length(&t);
            types.push(t);
            arg_string_slice = &arg_string_slice[length..];
        }
        (types, ret_type)
    }

    /// Returns the type's string representation length.
    #[must_use]
    pub fn decode_type_string_length(t: &Type) -> usize {
        match t.t {
            BaseTypeKind::String => 18,
            BaseTypeKind::List => {
                1 + Self::decode_type_string_length(t.sub_t.as_ref().unwrap())
            }
            _ => 1,
        }
    }

    /// Returns the Java equivalent type from a type's string representation.
    #[must_use]
    pub fn decode_type(type_str: &str) -> Type {
        match &type_str[0..1] {
            "I" => Type {
                t: BaseTypeKind::Int,
                sub_t: None,
            },
            "J" => Type {
                t: BaseTypeKind::Long,
                sub_t: None,
            },
            "F" => Type {
                t: BaseTypeKind::Float,
                sub_t: None,
            },
            "D" => Type {
                t: BaseTypeKind::Double,
                sub_t: None,
            },
            "V" => Type {
                t: BaseTypeKind::Void,
                sub_t: None,
            },
            "[" => {
                let sub_t = Self::decode_type(&type_str[1..]);
                Type {
                    t: BaseTypeKind::List,
                    sub_t: Some(Box::new(sub_t)),
                }
            }
            // Object types; the restricted subset only ever sees String.
            _ => Type {
                t: BaseTypeKind::String,
                sub_t: None,
            },
        }
    }
}

/// Resolves a one-based constant pool index to its Utf8 contents.
///
/// # Panics
/// Panics if the entry is not a Utf8 constant.
fn utf8_at(constant_pool: &[CPInfo], index: u16) -> String {
    match constant_pool[usize::from(index) - 1] {
        CPInfo::ConstantUtf8 { ref bytes } => bytes.clone(),
        ref entry => {
            panic!("expected Utf8 at pool index {index}, found {entry:?}")
        }
    }
}
