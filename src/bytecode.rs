//! Instruction decoding.
//!
//! A method body becomes a flat list of [`Insn`]s that opens with an entry
//! label and in which every bytecode offset referenced by a branch, a switch,
//! an exception range, a line entry or a local-variable scope is marked by a
//! [`Insn::Label`] placed right before the instruction at that offset. All
//! positions handed to the rest of the pipeline (line annotations, scopes,
//! chain endpoints) are indices into this list, not bytecode offsets.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::classfile::{ACC_STATIC, ConstantPool, FieldRef, LocalVariableEntry, MethodBinary};
use crate::error::AnalysisError;

/// Index of the entry label every decoded body starts with. Nothing
/// branches to it, so it is where parameters are defined.
pub const ENTRY: usize = 0;

pub mod op {
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ALOAD_3: u8 = 0x2d;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const ISTORE_0: u8 = 0x3b;
    pub const ASTORE_3: u8 = 0x4e;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IF_ACMPNE: u8 = 0xa6;
    pub const GOTO: u8 = 0xa7;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const ATHROW: u8 = 0xbf;
    pub const WIDE: u8 = 0xc4;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

/// Decoded operand, reduced to what data-flow analysis needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Local(u16),
    Increment { slot: u16, delta: i16 },
    /// Branch target as an instruction-list index.
    Jump(usize),
    Switch { default: usize, targets: Vec<usize> },
    Field(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    Label { offset: u32 },
    Op { offset: u32, opcode: u8, operand: Operand },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAnnotation {
    pub index: usize,
    pub line: u32,
}

/// Lexical scope of a local: `slot` is named `name` over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalScope {
    pub slot: u16,
    pub name: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
}

/// A method body in instruction-list form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBody {
    pub is_static: bool,
    pub descriptor: String,
    pub instructions: Vec<Insn>,
    pub line_annotations: Vec<LineAnnotation>,
    pub local_scopes: Vec<LocalScope>,
    pub handlers: Vec<Handler>,
}

impl MethodBody {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Decodes `method`'s `Code` attribute. Methods without code decode to
    /// an empty body.
    pub fn decode(method: &MethodBinary, pool: &ConstantPool) -> Result<Self, AnalysisError> {
        let is_static = method.access & ACC_STATIC != 0;
        let Some(code) = method.code.as_ref() else {
            return Ok(Self {
                is_static,
                descriptor: method.descriptor.clone(),
                ..Self::default()
            });
        };

        let raw = decode_raw(&code.bytecode)?;
        let code_len = code.bytecode.len() as u32;

        let mut label_offsets: BTreeSet<u32> = BTreeSet::new();
        for r in &raw {
            match &r.target {
                RawTarget::None => {}
                RawTarget::Jump(t) => {
                    label_offsets.insert(*t);
                }
                RawTarget::Switch { default, targets } => {
                    label_offsets.insert(*default);
                    label_offsets.extend(targets.iter().copied());
                }
            }
        }
        for e in &code.exception_table {
            label_offsets.extend([
                u32::from(e.start_pc),
                u32::from(e.end_pc),
                u32::from(e.handler_pc),
            ]);
        }
        // Debug tables that point inside an instruction are ignored rather
        // than failing the method.
        let boundaries: HashSet<u32> = raw.iter().map(|r| r.offset).chain([code_len]).collect();
        let line_numbers: Vec<_> = code
            .line_numbers
            .iter()
            .filter(|l| on_boundary(&boundaries, u32::from(l.start_pc), "line entry"))
            .collect();
        let local_variables: Vec<_> = code
            .local_variables
            .iter()
            .filter(|v| {
                let (start, end) = scope_offsets(v);
                on_boundary(&boundaries, start, "local scope start")
                    && on_boundary(&boundaries, end, "local scope end")
            })
            .collect();
        for l in &line_numbers {
            label_offsets.insert(u32::from(l.start_pc));
        }
        for v in &local_variables {
            let (start, end) = scope_offsets(v);
            label_offsets.insert(start);
            label_offsets.insert(end);
        }

        // Lay out labels and instructions; remember where each label landed.
        let mut labels: HashMap<u32, usize> = HashMap::new();
        let mut slots: Vec<Slot<'_>> = Vec::with_capacity(raw.len() + label_offsets.len() + 1);
        slots.push(Slot::Label(0));
        for r in &raw {
            if label_offsets.contains(&r.offset) {
                labels.insert(r.offset, slots.len());
                slots.push(Slot::Label(r.offset));
            }
            slots.push(Slot::Op(r));
        }
        if label_offsets.contains(&code_len) {
            labels.insert(code_len, slots.len());
            slots.push(Slot::Label(code_len));
        }
        if let Some(stray) = label_offsets.iter().find(|o| !labels.contains_key(o)) {
            return Err(AnalysisError::BadTarget {
                target: i64::from(*stray),
                offset: 0,
            });
        }

        let label_at = |offset: u32, from: u32| {
            labels.get(&offset).copied().ok_or(AnalysisError::BadTarget {
                target: i64::from(offset),
                offset: from,
            })
        };

        let mut instructions = Vec::with_capacity(slots.len());
        for slot in slots {
            let r = match slot {
                Slot::Label(offset) => {
                    instructions.push(Insn::Label { offset });
                    continue;
                }
                Slot::Op(r) => r,
            };
            let operand = match &r.target {
                RawTarget::Jump(t) => Operand::Jump(label_at(*t, r.offset)?),
                RawTarget::Switch { default, targets } => Operand::Switch {
                    default: label_at(*default, r.offset)?,
                    targets: targets
                        .iter()
                        .map(|t| label_at(*t, r.offset))
                        .collect::<Result<_, _>>()?,
                },
                RawTarget::None => match r.operand {
                    RawOperand::None => Operand::None,
                    RawOperand::Local(slot) => Operand::Local(slot),
                    RawOperand::Increment { slot, delta } => Operand::Increment { slot, delta },
                    RawOperand::Field(index) => Operand::Field(pool.field_ref(index)?),
                },
            };
            instructions.push(Insn::Op {
                offset: r.offset,
                opcode: r.opcode,
                operand,
            });
        }

        // The line of offset 0 also covers the entry slot.
        let line_annotations = line_numbers
            .iter()
            .map(|l| {
                let index = match l.start_pc {
                    0 => ENTRY,
                    pc => label_at(u32::from(pc), 0)?,
                };
                Ok(LineAnnotation {
                    index,
                    line: u32::from(l.line),
                })
            })
            .collect::<Result<_, AnalysisError>>()?;

        let local_scopes = local_variables
            .iter()
            .map(|v| {
                let (start, end) = scope_offsets(v);
                Ok(LocalScope {
                    slot: v.slot,
                    name: v.name.clone(),
                    start: label_at(start, 0)?,
                    end: label_at(end, 0)?,
                })
            })
            .collect::<Result<_, AnalysisError>>()?;

        let handlers = code
            .exception_table
            .iter()
            .map(|e| {
                Ok(Handler {
                    start: label_at(u32::from(e.start_pc), 0)?,
                    end: label_at(u32::from(e.end_pc), 0)?,
                    handler: label_at(u32::from(e.handler_pc), 0)?,
                })
            })
            .collect::<Result<_, AnalysisError>>()?;

        Ok(Self {
            is_static,
            descriptor: method.descriptor.clone(),
            instructions,
            line_annotations,
            local_scopes,
            handlers,
        })
    }
}

fn scope_offsets(v: &LocalVariableEntry) -> (u32, u32) {
    let start = u32::from(v.start_pc);
    (start, start + u32::from(v.length))
}

fn on_boundary(boundaries: &HashSet<u32>, offset: u32, what: &str) -> bool {
    let ok = boundaries.contains(&offset);
    if !ok {
        debug!(offset, what, "debug table offset is not an instruction boundary, ignored");
    }
    ok
}

#[derive(Debug)]
enum RawOperand {
    None,
    Local(u16),
    Increment { slot: u16, delta: i16 },
    Field(u16),
}

#[derive(Debug)]
enum RawTarget {
    None,
    Jump(u32),
    Switch { default: u32, targets: Vec<u32> },
}

enum Slot<'a> {
    Label(u32),
    Op(&'a RawInsn),
}

#[derive(Debug)]
struct RawInsn {
    offset: u32,
    opcode: u8,
    operand: RawOperand,
    target: RawTarget,
}

struct CodeReader<'a> {
    code: &'a [u8],
    pc: usize,
    start: u32,
}

impl CodeReader<'_> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], AnalysisError> {
        let end = self.pc + N;
        let slice = self
            .code
            .get(self.pc..end)
            .ok_or(AnalysisError::TruncatedInstruction { offset: self.start })?;
        self.pc = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, AnalysisError> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, AnalysisError> {
        Ok(u16::from_be_bytes(self.bytes()?))
    }

    fn i16(&mut self) -> Result<i16, AnalysisError> {
        Ok(i16::from_be_bytes(self.bytes()?))
    }

    fn i32(&mut self) -> Result<i32, AnalysisError> {
        Ok(i32::from_be_bytes(self.bytes()?))
    }

    fn skip(&mut self, n: usize) -> Result<(), AnalysisError> {
        if self.pc + n > self.code.len() {
            return Err(AnalysisError::TruncatedInstruction { offset: self.start });
        }
        self.pc += n;
        Ok(())
    }

    fn target(&self, delta: i64) -> Result<u32, AnalysisError> {
        let t = i64::from(self.start) + delta;
        u32::try_from(t).map_err(|_| AnalysisError::BadTarget {
            target: t,
            offset: self.start,
        })
    }
}

fn decode_raw(code: &[u8]) -> Result<Vec<RawInsn>, AnalysisError> {
    let mut out = Vec::new();
    let mut r = CodeReader {
        code,
        pc: 0,
        start: 0,
    };

    while r.pc < code.len() {
        r.start = r.pc as u32;
        let opcode = r.u8()?;
        let mut operand = RawOperand::None;
        let mut target = RawTarget::None;

        match opcode {
            0x00..=0x0f | 0x1a..=0x35 | 0x3b..=0x83 | 0x85..=0x98 | 0xac..=0xb1 | 0xbe
            | 0xbf | 0xc2 | 0xc3 => {
                if let Some(slot) = implicit_slot(opcode) {
                    operand = RawOperand::Local(slot);
                }
            }
            0x10 | 0x12 | 0xbc => r.skip(1)?,
            0x11 | 0x13 | 0x14 | 0xb6..=0xb8 | 0xbb | 0xbd | 0xc0 | 0xc1 => r.skip(2)?,
            0xb9 | 0xba => r.skip(4)?,
            0xc5 => r.skip(3)?,
            op::ILOAD..=op::ALOAD | op::ISTORE..=op::ASTORE | op::RET => {
                operand = RawOperand::Local(u16::from(r.u8()?));
            }
            op::IINC => {
                let slot = u16::from(r.u8()?);
                let delta = i16::from(r.u8()? as i8);
                operand = RawOperand::Increment { slot, delta };
            }
            op::IFEQ..=op::JSR | op::IFNULL | op::IFNONNULL => {
                let delta = r.i16()?;
                target = RawTarget::Jump(r.target(i64::from(delta))?);
            }
            op::GOTO_W | op::JSR_W => {
                let delta = r.i32()?;
                target = RawTarget::Jump(r.target(i64::from(delta))?);
            }
            op::GETSTATIC..=op::PUTFIELD => operand = RawOperand::Field(r.u16()?),
            op::TABLESWITCH => {
                r.skip((4 - r.pc % 4) % 4)?;
                let delta = r.i32()?;
                let default = r.target(i64::from(delta))?;
                let low = r.i32()?;
                let high = r.i32()?;
                let count = i64::from(high) - i64::from(low) + 1;
                if count < 0 {
                    return Err(AnalysisError::TruncatedInstruction { offset: r.start });
                }
                let mut targets = Vec::new();
                for _ in 0..count {
                    let delta = r.i32()?;
                    targets.push(r.target(i64::from(delta))?);
                }
                target = RawTarget::Switch { default, targets };
            }
            op::LOOKUPSWITCH => {
                r.skip((4 - r.pc % 4) % 4)?;
                let delta = r.i32()?;
                let default = r.target(i64::from(delta))?;
                let pairs = r.i32()?;
                if pairs < 0 {
                    return Err(AnalysisError::TruncatedInstruction { offset: r.start });
                }
                let mut targets = Vec::new();
                for _ in 0..pairs {
                    r.skip(4)?; // match key
                    let delta = r.i32()?;
                    targets.push(r.target(i64::from(delta))?);
                }
                target = RawTarget::Switch { default, targets };
            }
            op::WIDE => {
                let inner = r.u8()?;
                let slot = r.u16()?;
                operand = match inner {
                    op::IINC => RawOperand::Increment {
                        slot,
                        delta: r.i16()?,
                    },
                    op::ILOAD..=op::ALOAD | op::ISTORE..=op::ASTORE | op::RET => {
                        RawOperand::Local(slot)
                    }
                    _ => {
                        return Err(AnalysisError::UnsupportedOpcode {
                            opcode: inner,
                            offset: r.start,
                        });
                    }
                };
                out.push(RawInsn {
                    offset: r.start,
                    opcode: inner,
                    operand,
                    target,
                });
                continue;
            }
            _ => {
                return Err(AnalysisError::UnsupportedOpcode {
                    opcode,
                    offset: r.start,
                });
            }
        }

        out.push(RawInsn {
            offset: r.start,
            opcode,
            operand,
            target,
        });
    }

    Ok(out)
}

/// Slot of `xload_n` / `xstore_n`.
fn implicit_slot(opcode: u8) -> Option<u16> {
    match opcode {
        op::ILOAD_0..=op::ALOAD_3 => Some(u16::from((opcode - op::ILOAD_0) % 4)),
        op::ISTORE_0..=op::ASTORE_3 => Some(u16::from((opcode - op::ISTORE_0) % 4)),
        _ => None,
    }
}

/// `xload` and `xload_n`.
pub fn is_load(opcode: u8) -> bool {
    matches!(opcode, op::ILOAD..=op::ALOAD_3)
}

pub fn is_store(opcode: u8) -> bool {
    matches!(opcode, op::ISTORE..=op::ASTORE_3)
}

/// True for instructions after which control never falls through.
pub fn ends_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        op::GOTO | op::GOTO_W | op::TABLESWITCH | op::LOOKUPSWITCH | op::IRETURN..=op::RETURN | op::ATHROW
    )
}
