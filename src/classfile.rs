//! Binary class file reader.
//!
//! Reads just enough of the format to drive def-use analysis: the constant
//! pool, the class name and `SourceFile` attribute, and for every method its
//! access flags, name, descriptor and `Code` attribute together with the
//! `LineNumberTable` and `LocalVariableTable` debug tables. Everything else is
//! skipped over.

use crate::error::ClassFormatError;

const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Unused slot: index 0 and the slot after a long or double.
    Unusable,
    Utf8(String),
    Class { name: u16 },
    NameAndType { name: u16, descriptor: u16 },
    FieldRef { class: u16, name_and_type: u16 },
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

/// Resolved `Fieldref` constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl ConstantPool {
    fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(usize::from(index))
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class { name }) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<FieldRef, ClassFormatError> {
        let Some(Constant::FieldRef {
            class,
            name_and_type,
        }) = self.get(index)
        else {
            return Err(ClassFormatError::BadConstant {
                index,
                expected: "Fieldref",
            });
        };
        let Some(Constant::NameAndType { name, descriptor }) = self.get(*name_and_type) else {
            return Err(ClassFormatError::BadConstant {
                index: *name_and_type,
                expected: "NameAndType",
            });
        };
        Ok(FieldRef {
            owner: self.class_name(*class)?.to_string(),
            name: self.utf8(*name)?.to_string(),
            descriptor: self.utf8(*descriptor)?.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClassBinary {
    /// Internal name, e.g. `org/example/Counter`.
    pub internal_name: String,
    /// Declared `SourceFile` attribute, e.g. `Counter.java`.
    pub source_file: Option<String>,
    pub constant_pool: ConstantPool,
    pub methods: Vec<MethodBinary>,
}

impl ClassBinary {
    /// Package part of the internal name, `""` for the default package.
    pub fn package(&self) -> &str {
        self.internal_name
            .rsplit_once('/')
            .map(|(pkg, _)| pkg)
            .unwrap_or("")
    }

    pub fn simple_name(&self) -> &str {
        self.internal_name
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.internal_name)
    }
}

#[derive(Debug, Clone)]
pub struct MethodBinary {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    /// Absent for abstract and native methods.
    pub code: Option<CodeAttribute>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeAttribute {
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
    pub local_variables: Vec<LocalVariableEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name: String,
    pub slot: u16,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::Truncated { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), ClassFormatError> {
        self.bytes(n).map(|_| ())
    }
}

pub fn parse_class(data: &[u8]) -> Result<ClassBinary, ClassFormatError> {
    let mut r = Reader::new(data);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    r.skip(4)?; // minor + major version

    let constant_pool = read_constant_pool(&mut r)?;

    r.skip(2)?; // access flags
    let this_class = r.u16()?;
    r.skip(2)?; // super class
    let internal_name = constant_pool.class_name(this_class)?.to_string();

    let interfaces = r.u16()?;
    r.skip(usize::from(interfaces) * 2)?;

    let fields = r.u16()?;
    for _ in 0..fields {
        r.skip(6)?;
        skip_attributes(&mut r)?;
    }

    let method_count = r.u16()?;
    let mut methods = Vec::with_capacity(usize::from(method_count));
    for _ in 0..method_count {
        methods.push(read_method(&mut r, &constant_pool)?);
    }

    let mut source_file = None;
    let attributes = r.u16()?;
    for _ in 0..attributes {
        let name = constant_pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let body = r.bytes(len)?;
        if name == "SourceFile" {
            let mut sub = Reader::new(body);
            source_file = Some(constant_pool.utf8(sub.u16()?)?.to_string());
        }
    }

    Ok(ClassBinary {
        internal_name,
        source_file,
        constant_pool,
        methods,
    })
}

fn read_constant_pool(r: &mut Reader<'_>) -> Result<ConstantPool, ClassFormatError> {
    let count = usize::from(r.u16()?);
    let mut entries = Vec::with_capacity(count);
    entries.push(Constant::Unusable);

    let mut index = 1usize;
    while index < count {
        let tag = r.u8()?;
        let constant = match tag {
            1 => {
                let len = usize::from(r.u16()?);
                // Modified UTF-8 only differs for NUL and supplementary characters.
                Constant::Utf8(String::from_utf8_lossy(r.bytes(len)?).into_owned())
            }
            3 | 4 => {
                r.skip(4)?;
                Constant::Other
            }
            5 | 6 => {
                r.skip(8)?;
                entries.push(Constant::Other);
                index += 1;
                Constant::Unusable
            }
            7 => Constant::Class { name: r.u16()? },
            8 | 16 | 19 | 20 => {
                r.skip(2)?;
                Constant::Other
            }
            9 => Constant::FieldRef {
                class: r.u16()?,
                name_and_type: r.u16()?,
            },
            10 | 11 | 17 | 18 => {
                r.skip(4)?;
                Constant::Other
            }
            12 => Constant::NameAndType {
                name: r.u16()?,
                descriptor: r.u16()?,
            },
            15 => {
                r.skip(3)?;
                Constant::Other
            }
            _ => return Err(ClassFormatError::UnknownConstantTag { tag, index }),
        };
        entries.push(constant);
        index += 1;
    }

    Ok(ConstantPool { entries })
}

fn skip_attributes(r: &mut Reader<'_>) -> Result<(), ClassFormatError> {
    let count = r.u16()?;
    for _ in 0..count {
        r.skip(2)?;
        let len = r.u32()? as usize;
        r.skip(len)?;
    }
    Ok(())
}

fn read_method(r: &mut Reader<'_>, pool: &ConstantPool) -> Result<MethodBinary, ClassFormatError> {
    let access = r.u16()?;
    let name = pool.utf8(r.u16()?)?.to_string();
    let descriptor = pool.utf8(r.u16()?)?.to_string();

    let mut code = None;
    let attributes = r.u16()?;
    for _ in 0..attributes {
        let attr_name = pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let body = r.bytes(len)?;
        if attr_name == "Code" {
            code = Some(read_code(body, pool)?);
        }
    }

    Ok(MethodBinary {
        access,
        name,
        descriptor,
        code,
    })
}

fn read_code(body: &[u8], pool: &ConstantPool) -> Result<CodeAttribute, ClassFormatError> {
    let mut r = Reader::new(body);
    r.skip(4)?; // max_stack + max_locals
    let code_len = r.u32()? as usize;
    let bytecode = r.bytes(code_len)?.to_vec();

    let handlers = r.u16()?;
    let mut exception_table = Vec::with_capacity(usize::from(handlers));
    for _ in 0..handlers {
        let start_pc = r.u16()?;
        let end_pc = r.u16()?;
        let handler_pc = r.u16()?;
        r.skip(2)?; // catch type
        exception_table.push(ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
        });
    }

    let mut line_numbers = Vec::new();
    let mut local_variables = Vec::new();
    let attributes = r.u16()?;
    for _ in 0..attributes {
        let name = pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let mut sub = Reader::new(r.bytes(len)?);
        match name {
            "LineNumberTable" => {
                let n = sub.u16()?;
                for _ in 0..n {
                    line_numbers.push(LineNumberEntry {
                        start_pc: sub.u16()?,
                        line: sub.u16()?,
                    });
                }
            }
            "LocalVariableTable" => {
                let n = sub.u16()?;
                for _ in 0..n {
                    let start_pc = sub.u16()?;
                    let length = sub.u16()?;
                    let name = pool.utf8(sub.u16()?)?.to_string();
                    sub.skip(2)?; // descriptor
                    let slot = sub.u16()?;
                    local_variables.push(LocalVariableEntry {
                        start_pc,
                        length,
                        name,
                        slot,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(CodeAttribute {
        bytecode,
        exception_table,
        line_numbers,
        local_variables,
    })
}
