//! Lightweight implementation of a parser and decoder for JVM bytecode
//! class files.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

type Result<T> = std::result::Result<T, ParseError>;

/// Every class file starts with this magic number.
const CLASS_FILE_MAGIC: u32 = 0xcafe_babe;

// Constant pool entry tags, per the class file format.
const CONSTANT_UTF8: u8 = 1;
const CONSTANT_INTEGER: u8 = 3;
const CONSTANT_CLASS: u8 = 7;
const CONSTANT_STRING: u8 = 8;
const CONSTANT_FIELD_REF: u8 = 9;
const CONSTANT_METHOD_REF: u8 = 10;
const CONSTANT_NAME_AND_TYPE: u8 = 12;

/// `ParseErrorKind` represents the possible failures when decoding a class
/// file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input does not start with `0xcafebabe`.
    BadMagic(u32),
    /// A constant pool entry carries a tag outside the supported subset.
    UnsupportedConstantTag(u8),
    /// The input ended before a complete structure could be read.
    Truncated,
}

/// `ParseError` is a custom type used to handle and represent class file
/// decoding failures.
#[derive(Debug, Clone)]
pub struct ParseError {
    kind: ParseErrorKind,
}

impl ParseError {
    fn new(kind: ParseErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ParseErrorKind::BadMagic(magic) => {
                write!(f, "not a class file (magic 0x{magic:08x})")
            }
            ParseErrorKind::UnsupportedConstantTag(tag) => {
                write!(f, "unsupported constant pool tag {tag}")
            }
            ParseErrorKind::Truncated => write!(f, "class file is truncated"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    // Reads go through an in-memory cursor, the only way they fail is by
    // running off the end of the input.
    fn from(_: std::io::Error) -> Self {
        Self::new(ParseErrorKind::Truncated)
    }
}

/// Entries of the class file constant pool. Only the tags emitted by the
/// restricted compiler are represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CPInfo {
    ConstantClass {
        name_index: u16,
    },
    ConstantString {
        string_index: u16,
    },
    ConstantInteger {
        bytes: i32,
    },
    ConstantFieldRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantMethodRef {
        class_index: u16,
        name_and_type_index: u16,
    },
    ConstantNameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    ConstantUtf8 {
        bytes: String,
    },
}

/// Decoded method attributes. The interpreter only ever consumes the Code
/// attribute; everything else is skipped at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInfo {
    CodeAttribute {
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    },
}

/// Raw method entry as it appears in the class file, before the program
/// representation resolves names and descriptors.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: HashMap<String, AttributeInfo>,
}

impl MethodInfo {
    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub fn name_index(&self) -> u16 {
        self.name_index
    }

    pub fn descriptor_index(&self) -> u16 {
        self.descriptor_index
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeInfo> {
        &self.attributes
    }
}

/// In-memory representation of a parsed class file.
#[derive(Debug, Clone)]
pub struct JVMClassFile {
    magic: u32,
    minor_version: u16,
    major_version: u16,
    constant_pool: Vec<CPInfo>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    methods: Vec<MethodInfo>,
}

impl JVMClassFile {
    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn version(&self) -> (u16, u16) {
        (self.major_version, self.minor_version)
    }

    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub fn this_class(&self) -> u16 {
        self.this_class
    }

    pub fn super_class(&self) -> u16 {
        self.super_class
    }

    /// Returns a copy of the constant pool. Entries are stored zero-based
    /// while class file indices are one-based.
    pub fn constant_pool(&self) -> Vec<CPInfo> {
        self.constant_pool.clone()
    }

    /// Returns a copy of the class methods.
    pub fn methods(&self) -> Vec<MethodInfo> {
        self.methods.clone()
    }
}

/// `JVMParser` decodes the on-disk class file format into a `JVMClassFile`.
pub struct JVMParser;

impl JVMParser {
    /// Parses a class file from its raw bytes.
    ///
    /// # Errors
    /// Fails if the magic number is wrong, the input is truncated or the
    /// constant pool uses tags outside the supported subset.
    pub fn parse(bytes: &[u8]) -> Result<JVMClassFile> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != CLASS_FILE_MAGIC {
            return Err(ParseError::new(ParseErrorKind::BadMagic(magic)));
        }
        let minor_version = cursor.read_u16::<BigEndian>()?;
        let major_version = cursor.read_u16::<BigEndian>()?;
        let constant_pool = Self::parse_constant_pool(&mut cursor)?;
        let access_flags = cursor.read_u16::<BigEndian>()?;
        let this_class = cursor.read_u16::<BigEndian>()?;
        let super_class = cursor.read_u16::<BigEndian>()?;
        let interfaces_count = cursor.read_u16::<BigEndian>()?;
        cursor.seek(SeekFrom::Current(i64::from(interfaces_count) * 2))?;
        let fields_count = cursor.read_u16::<BigEndian>()?;
        for _ in 0..fields_count {
            // access_flags, name_index and descriptor_index.
            cursor.seek(SeekFrom::Current(6))?;
            Self::skip_attributes(&mut cursor)?;
        }
        let methods = Self::parse_methods(&mut cursor, &constant_pool)?;
        Self::skip_attributes(&mut cursor)?;
        Ok(JVMClassFile {
            magic,
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            methods,
        })
    }

    fn parse_constant_pool(cursor: &mut Cursor<&[u8]>) -> Result<Vec<CPInfo>> {
        // The recorded count is one more than the number of entries.
        let constant_pool_count = cursor.read_u16::<BigEndian>()?;
        let mut constant_pool = Vec::with_capacity(usize::from(
            constant_pool_count.saturating_sub(1),
        ));
        for _ in 1..constant_pool_count {
            let tag = cursor.read_u8()?;
            let entry = match tag {
                CONSTANT_UTF8 => {
                    let length = cursor.read_u16::<BigEndian>()?;
                    let mut bytes = vec![0u8; usize::from(length)];
                    cursor.read_exact(&mut bytes)?;
                    CPInfo::ConstantUtf8 {
                        bytes: String::from_utf8_lossy(&bytes).into_owned(),
                    }
                }
                CONSTANT_INTEGER => CPInfo::ConstantInteger {
                    bytes: cursor.read_i32::<BigEndian>()?,
                },
                CONSTANT_CLASS => CPInfo::ConstantClass {
                    name_index: cursor.read_u16::<BigEndian>()?,
                },
                CONSTANT_STRING => CPInfo::ConstantString {
                    string_index: cursor.read_u16::<BigEndian>()?,
                },
                CONSTANT_FIELD_REF => CPInfo::ConstantFieldRef {
                    class_index: cursor.read_u16::<BigEndian>()?,
                    name_and_type_index: cursor.read_u16::<BigEndian>()?,
                },
                CONSTANT_METHOD_REF => CPInfo::ConstantMethodRef {
                    class_index: cursor.read_u16::<BigEndian>()?,
                    name_and_type_index: cursor.read_u16::<BigEndian>()?,
                },
                CONSTANT_NAME_AND_TYPE => CPInfo::ConstantNameAndType {
                    name_index: cursor.read_u16::<BigEndian>()?,
                    descriptor_index: cursor.read_u16::<BigEndian>()?,
                },
                _ => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnsupportedConstantTag(tag),
                    ))
                }
            };
            constant_pool.push(entry);
        }
        Ok(constant_pool)
    }

    fn parse_methods(
        cursor: &mut Cursor<&[u8]>,
        constant_pool: &[CPInfo],
    ) -> Result<Vec<MethodInfo>> {
        let methods_count = cursor.read_u16::<BigEndian>()?;
        let mut methods = Vec::with_capacity(usize::from(methods_count));
        for _ in 0..methods_count {
            let access_flags = cursor.read_u16::<BigEndian>()?;
            let name_index = cursor.read_u16::<BigEndian>()?;
            let descriptor_index = cursor.read_u16::<BigEndian>()?;
            let attributes_count = cursor.read_u16::<BigEndian>()?;
            let mut attributes = HashMap::new();
            for _ in 0..attributes_count {
                let attribute_name_index = cursor.read_u16::<BigEndian>()?;
                let attribute_length = cursor.read_u32::<BigEndian>()?;
                if pool_utf8(constant_pool, attribute_name_index)
                    == Some("Code")
                {
                    attributes.insert(
                        "Code".to_string(),
                        Self::parse_code_attribute(cursor)?,
                    );
                } else {
                    cursor.seek(SeekFrom::Current(i64::from(
                        attribute_length,
                    )))?;
                }
            }
            methods.push(MethodInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes,
            });
        }
        Ok(methods)
    }

    fn parse_code_attribute(
        cursor: &mut Cursor<&[u8]>,
    ) -> Result<AttributeInfo> {
        let max_stack = cursor.read_u16::<BigEndian>()?;
        let max_locals = cursor.read_u16::<BigEndian>()?;
        let code_length = cursor.read_u32::<BigEndian>()?;
        let mut code = vec![0u8; code_length as usize];
        cursor.read_exact(&mut code)?;
        let exception_table_length = cursor.read_u16::<BigEndian>()?;
        cursor
            .seek(SeekFrom::Current(i64::from(exception_table_length) * 8))?;
        // Nested attributes such as LineNumberTable and StackMapTable.
        Self::skip_attributes(cursor)?;
        Ok(AttributeInfo::CodeAttribute {
            max_stack,
            max_locals,
            code,
        })
    }

    fn skip_attributes(cursor: &mut Cursor<&[u8]>) -> Result<()> {
        let attributes_count = cursor.read_u16::<BigEndian>()?;
        for _ in 0..attributes_count {
            let _attribute_name_index = cursor.read_u16::<BigEndian>()?;
            let attribute_length = cursor.read_u32::<BigEndian>()?;
            cursor.seek(SeekFrom::Current(i64::from(attribute_length)))?;
        }
        Ok(())
    }
}

/// Resolves a one-based constant pool index to its Utf8 contents.
fn pool_utf8(constant_pool: &[CPInfo], index: u16) -> Option<&str> {
    match constant_pool.get(usize::from(index).checked_sub(1)?) {
        Some(CPInfo::ConstantUtf8 { bytes }) => Some(bytes),
        _ => None,
    }
}

/// Reads the raw bytes of a class file from disk.
///
/// # Errors
/// Propagates the underlying I/O error if the file cannot be read.
pub fn read_class_file(path: &Path) -> std::io::Result<Vec<u8>> {
    fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use byteorder::WriteBytesExt;

    // Assembles the smallest class file the parser accepts: one Utf8-named
    // method carrying a Code attribute, plus an Integer constant.
    fn sample_class_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(0xcafe_babe).unwrap();
        buf.write_u16::<BigEndian>(0).unwrap(); // minor
        buf.write_u16::<BigEndian>(55).unwrap(); // major
        buf.write_u16::<BigEndian>(5).unwrap(); // constant_pool_count
        write_utf8(&mut buf, "add"); // 1
        write_utf8(&mut buf, "(II)I"); // 2
        write_utf8(&mut buf, "Code"); // 3
        buf.write_u8(CONSTANT_INTEGER).unwrap(); // 4
        buf.write_i32::<BigEndian>(-77).unwrap();
        buf.write_u16::<BigEndian>(0x0021).unwrap(); // access_flags
        buf.write_u16::<BigEndian>(0).unwrap(); // this_class
        buf.write_u16::<BigEndian>(0).unwrap(); // super_class
        buf.write_u16::<BigEndian>(0).unwrap(); // interfaces_count
        buf.write_u16::<BigEndian>(0).unwrap(); // fields_count
        buf.write_u16::<BigEndian>(1).unwrap(); // methods_count
        buf.write_u16::<BigEndian>(0x0009).unwrap(); // public static
        buf.write_u16::<BigEndian>(1).unwrap(); // name_index
        buf.write_u16::<BigEndian>(2).unwrap(); // descriptor_index
        buf.write_u16::<BigEndian>(1).unwrap(); // attributes_count
        buf.write_u16::<BigEndian>(3).unwrap(); // "Code"
        let code: [u8; 4] = [0x1a, 0x1b, 0x60, 0xac]; // iload_0 iload_1 iadd ireturn
        buf.write_u32::<BigEndian>(12 + code.len() as u32).unwrap();
        buf.write_u16::<BigEndian>(2).unwrap(); // max_stack
        buf.write_u16::<BigEndian>(2).unwrap(); // max_locals
        buf.write_u32::<BigEndian>(code.len() as u32).unwrap();
        buf.extend_from_slice(&code);
        buf.write_u16::<BigEndian>(0).unwrap(); // exception_table_length
        buf.write_u16::<BigEndian>(0).unwrap(); // code attributes_count
        buf.write_u16::<BigEndian>(0).unwrap(); // class attributes_count
        buf
    }

    fn write_utf8(buf: &mut Vec<u8>, s: &str) {
        buf.write_u8(CONSTANT_UTF8).unwrap();
        buf.write_u16::<BigEndian>(s.len() as u16).unwrap();
        buf.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn can_you_read_class_file() {
        let bytes = sample_class_bytes();
        assert_eq!(
            0xcafebabe,
            u32::from_be_bytes(bytes[..4].try_into().unwrap())
        );
        let class_file = JVMParser::parse(&bytes).unwrap();
        assert_eq!(class_file.magic(), 0xcafe_babe);
        assert_eq!(class_file.version(), (55, 0));
    }

    #[test]
    fn parses_constant_pool_entries() {
        let class_file = JVMParser::parse(&sample_class_bytes()).unwrap();
        let pool = class_file.constant_pool();
        assert_eq!(pool.len(), 4);
        assert_eq!(
            pool[0],
            CPInfo::ConstantUtf8 {
                bytes: "add".to_string()
            }
        );
        assert_eq!(pool[3], CPInfo::ConstantInteger { bytes: -77 });
    }

    #[test]
    fn parses_method_code_attribute() {
        let class_file = JVMParser::parse(&sample_class_bytes()).unwrap();
        let methods = class_file.methods();
        assert_eq!(methods.len(), 1);
        let method = &methods[0];
        assert_eq!(method.name_index(), 1);
        assert_eq!(method.descriptor_index(), 2);
        match method.attributes().get("Code") {
            Some(AttributeInfo::CodeAttribute {
                max_stack,
                max_locals,
                code,
            }) => {
                assert_eq!(*max_stack, 2);
                assert_eq!(*max_locals, 2);
                assert_eq!(code, &vec![0x1a, 0x1b, 0x60, 0xac]);
            }
            None => panic!("expected a Code attribute"),
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_class_bytes();
        bytes[0] = 0xde;
        let err = JVMParser::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::BadMagic(0xdefebabe));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = sample_class_bytes();
        let err = JVMParser::parse(&bytes[..bytes.len() - 10]).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::Truncated);
    }
}
