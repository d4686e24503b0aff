//! Data-flow facts for one method.
//!
//! [`DataFlowAnalyzer`] is the seam to the def/use analysis proper. The
//! shipped [`BytecodeAnalyzer`] works directly on a decoded [`MethodBody`]:
//! per-instruction def/use frames, the variables they refer to, and the
//! instruction-level control-flow graph with its basic blocks.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::bytecode::{self, Insn, MethodBody, Operand, op};
use crate::classfile::FieldRef;
use crate::error::AnalysisError;

/// A variable whose definitions and uses are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variable {
    Field {
        owner: String,
        name: String,
        descriptor: String,
    },
    Local {
        slot: u16,
    },
}

impl From<FieldRef> for Variable {
    fn from(f: FieldRef) -> Self {
        Variable::Field {
            owner: f.owner,
            name: f.name,
            descriptor: f.descriptor,
        }
    }
}

/// Generic identifier, used when no better name is known.
impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Field { owner, name, .. } => write!(f, "{owner}.{name}"),
            Variable::Local { slot } => write!(f, "L@{slot}"),
        }
    }
}

/// Variables (as indices into [`FlowAnalysis::variables`]) defined and used
/// by one instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUseFrame {
    pub defs: Vec<usize>,
    pub uses: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowAnalysis {
    /// One frame per instruction.
    pub frames: Vec<DefUseFrame>,
    pub variables: Vec<Variable>,
    /// Basic block index of every instruction.
    pub leaders: Vec<usize>,
    /// Instructions of every basic block, in order.
    pub basic_blocks: Vec<Vec<usize>>,
    pub successors: Vec<Vec<usize>>,
    pub predecessors: Vec<Vec<usize>>,
}

pub trait DataFlowAnalyzer {
    fn analyze(&self, body: &MethodBody) -> Result<FlowAnalysis, AnalysisError>;
}

/// Def/use analysis straight off decoded bytecode.
///
/// Parameters (and `this`) are defined at instruction 0. Fields are tracked
/// by owner, name and descriptor regardless of the receiver object.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytecodeAnalyzer;

impl DataFlowAnalyzer for BytecodeAnalyzer {
    fn analyze(&self, body: &MethodBody) -> Result<FlowAnalysis, AnalysisError> {
        let n = body.len();
        if n == 0 {
            return Ok(FlowAnalysis::default());
        }

        let mut vars = VariableTable::default();
        let mut frames = vec![DefUseFrame::default(); n];

        for slot in parameter_slots(body)? {
            let v = vars.intern(Variable::Local { slot });
            frames[bytecode::ENTRY].defs.push(v);
        }

        for (i, insn) in body.instructions.iter().enumerate() {
            let Insn::Op {
                offset,
                opcode,
                operand,
            } = insn
            else {
                continue;
            };
            let frame = &mut frames[i];
            match (opcode, operand) {
                (&op::JSR | &op::JSR_W | &op::RET, _) => {
                    return Err(AnalysisError::Subroutine { offset: *offset });
                }
                (code, Operand::Local(slot)) if bytecode::is_load(*code) => {
                    frame.uses.push(vars.intern(Variable::Local { slot: *slot }));
                }
                (code, Operand::Local(slot)) if bytecode::is_store(*code) => {
                    frame.defs.push(vars.intern(Variable::Local { slot: *slot }));
                }
                (_, Operand::Increment { slot, .. }) => {
                    let v = vars.intern(Variable::Local { slot: *slot });
                    frame.uses.push(v);
                    frame.defs.push(v);
                }
                (&op::GETSTATIC | &op::GETFIELD, Operand::Field(field)) => {
                    frame.uses.push(vars.intern(field.clone().into()));
                }
                (&op::PUTSTATIC | &op::PUTFIELD, Operand::Field(field)) => {
                    frame.defs.push(vars.intern(field.clone().into()));
                }
                _ => {}
            }
        }

        let successors = control_flow(body)?;
        let mut predecessors = vec![Vec::new(); n];
        for (i, succ) in successors.iter().enumerate() {
            for &s in succ {
                predecessors[s].push(i);
            }
        }

        let (leaders, basic_blocks) = basic_blocks(body, &successors);

        Ok(FlowAnalysis {
            frames,
            variables: vars.into_vec(),
            leaders,
            basic_blocks,
            successors,
            predecessors,
        })
    }
}

#[derive(Default)]
struct VariableTable {
    index: HashMap<Variable, usize>,
    order: Vec<Variable>,
}

impl VariableTable {
    fn intern(&mut self, var: Variable) -> usize {
        if let Some(&i) = self.index.get(&var) {
            return i;
        }
        let i = self.order.len();
        self.index.insert(var.clone(), i);
        self.order.push(var);
        i
    }

    fn into_vec(self) -> Vec<Variable> {
        self.order
    }
}

/// Local slots holding `this` and the declared parameters on entry.
fn parameter_slots(body: &MethodBody) -> Result<Vec<u16>, AnalysisError> {
    let bad = || AnalysisError::BadDescriptor(body.descriptor.clone());
    let params = body
        .descriptor
        .strip_prefix('(')
        .and_then(|d| d.split_once(')'))
        .map(|(params, _)| params)
        .ok_or_else(bad)?;

    let mut slots = Vec::new();
    let mut next: u16 = 0;
    if !body.is_static {
        slots.push(next);
        next += 1;
    }

    let mut chars = params.chars();
    while let Some(mut c) = chars.next() {
        let mut array = false;
        while c == '[' {
            array = true;
            c = chars.next().ok_or_else(bad)?;
        }
        match c {
            'L' => {
                chars.by_ref().find(|ch| *ch == ';').ok_or_else(bad)?;
            }
            'B' | 'C' | 'F' | 'I' | 'S' | 'Z' | 'J' | 'D' => {}
            _ => return Err(bad()),
        }
        slots.push(next);
        next += if !array && matches!(c, 'J' | 'D') { 2 } else { 1 };
    }
    Ok(slots)
}

fn control_flow(body: &MethodBody) -> Result<Vec<Vec<usize>>, AnalysisError> {
    let n = body.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, insn) in body.instructions.iter().enumerate() {
        let succ = &mut successors[i];
        match insn {
            Insn::Label { .. } => {
                if i + 1 < n {
                    succ.push(i + 1);
                }
            }
            Insn::Op {
                opcode, operand, ..
            } => {
                if !bytecode::ends_flow(*opcode) {
                    if i + 1 >= n {
                        return Err(AnalysisError::FallOffEnd);
                    }
                    succ.push(i + 1);
                }
                match operand {
                    Operand::Jump(t) => push_unique(succ, *t),
                    Operand::Switch { default, targets } => {
                        push_unique(succ, *default);
                        for t in targets {
                            push_unique(succ, *t);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    for h in &body.handlers {
        for succ in successors.iter_mut().take(h.end).skip(h.start) {
            push_unique(succ, h.handler);
        }
    }

    Ok(successors)
}

fn push_unique(v: &mut Vec<usize>, x: usize) {
    if !v.contains(&x) {
        v.push(x);
    }
}

/// Returns the block index of every instruction and the blocks themselves.
fn basic_blocks(body: &MethodBody, successors: &[Vec<usize>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    let n = body.len();
    let mut starts = vec![false; n];
    starts[0] = true;

    for (i, insn) in body.instructions.iter().enumerate() {
        if let Insn::Op { opcode, operand, .. } = insn {
            let branches = matches!(operand, Operand::Jump(_) | Operand::Switch { .. })
                || bytecode::ends_flow(*opcode);
            if branches {
                for &s in &successors[i] {
                    starts[s] = true;
                }
                if i + 1 < n {
                    starts[i + 1] = true;
                }
            }
        }
    }
    for h in &body.handlers {
        starts[h.handler] = true;
    }

    let mut leaders = Vec::with_capacity(n);
    let mut blocks: Vec<Vec<usize>> = Vec::new();
    for (i, start) in starts.into_iter().enumerate() {
        if start {
            blocks.push(Vec::new());
        }
        let b = blocks.len() - 1;
        blocks[b].push(i);
        leaders.push(b);
    }
    (leaders, blocks)
}
