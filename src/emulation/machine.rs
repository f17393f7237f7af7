//! Concrete evaluation of straight-line code.
//!
//! [`StackMachine`] executes a branch-free run of instructions against an isolated state:
//! an evaluation stack, a local-variable table and whatever the supplied
//! [`AuxiliaryData`] declarations establish. Construction performs the static
//! initialization those declarations describe: byte tables are populated and memory cells
//! are written once, truncated to their declared width.
//!
//! Nothing else is visible to evaluated code. In particular, calls are limited to the
//! [`Intrinsic`] set and control flow is rejected, which keeps verification of a rewrite
//! independent of the surrounding method.

use std::collections::HashMap;

use crate::{
    assembly::{
        AuxId, AuxiliaryData, CallTarget, CellWidth, Instruction, Intrinsic, Opcode, Operand,
    },
    emulation::{BinaryOp, ConversionType, EmValue, EmulationError, EvaluationStack, UnaryOp},
    Error, Result,
};

/// A native memory cell as established at initialization time.
#[derive(Debug, Clone, Copy)]
struct Cell {
    width: CellWidth,
    bits: u32,
}

/// Isolated stack machine for straight-line code.
///
/// # Examples
///
/// ```rust
/// use litcloak::assembly::{Instruction, Intrinsic};
/// use litcloak::emulation::{EmValue, StackMachine};
///
/// let code = vec![
///     Instruction::iconst(9989),
///     Instruction::sconst("abcdefghij"),
///     Instruction::intrinsic(Intrinsic::StringLength),
///     Instruction::simple(litcloak::assembly::Opcode::IAdd)?,
/// ];
/// let mut machine = StackMachine::new(&[]);
/// machine.run(&code)?;
/// assert_eq!(machine.stack().values(), &[EmValue::I32(9999)]);
/// # Ok::<(), litcloak::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StackMachine {
    stack: EvaluationStack,
    locals: HashMap<u16, EmValue>,
    tables: HashMap<AuxId, Vec<i8>>,
    cells: HashMap<AuxId, Cell>,
}

impl StackMachine {
    /// Creates a machine initialized from `auxiliary`.
    #[must_use]
    pub fn new(auxiliary: &[AuxiliaryData]) -> Self {
        Self::with_stack(auxiliary, EvaluationStack::default())
    }

    /// Creates a machine with a custom stack depth limit.
    #[must_use]
    pub fn with_max_depth(auxiliary: &[AuxiliaryData], max_depth: usize) -> Self {
        Self::with_stack(auxiliary, EvaluationStack::new(max_depth))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn with_stack(auxiliary: &[AuxiliaryData], stack: EvaluationStack) -> Self {
        let mut tables = HashMap::new();
        let mut cells = HashMap::new();
        for data in auxiliary {
            match data {
                AuxiliaryData::ByteTable { id, bytes } => {
                    tables.insert(*id, bytes.clone());
                }
                AuxiliaryData::MemoryCell { id, width, value } => {
                    let bits = match width {
                        CellWidth::Byte => u32::from(*value as u8),
                        CellWidth::Short => u32::from(*value as u16),
                        CellWidth::Int => *value as u32,
                    };
                    cells.insert(*id, Cell { width: *width, bits });
                }
            }
        }
        StackMachine {
            stack,
            locals: HashMap::new(),
            tables,
            cells,
        }
    }

    /// The evaluation stack.
    #[must_use]
    pub fn stack(&self) -> &EvaluationStack {
        &self.stack
    }

    /// Sets a local variable before running.
    pub fn set_local(&mut self, index: u16, value: EmValue) {
        self.locals.insert(index, value);
    }

    /// Executes `instructions` in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if an instruction pops from an empty stack, and
    /// [`Error::Evaluation`] for every other failure (type mismatch, out-of-range table
    /// index, undeclared auxiliary data, width mismatch, unsupported instruction). The
    /// position is the index within `instructions`.
    pub fn run(&mut self, instructions: &[Instruction]) -> Result<()> {
        for (position, instr) in instructions.iter().enumerate() {
            self.execute(instr).map_err(|err| match err {
                EmulationError::StackUnderflow => Error::StackUnderflow {
                    position,
                    strategy: None,
                },
                other => Error::Evaluation {
                    position,
                    message: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    /// Runs `instructions` on a fresh machine and returns the final stack.
    ///
    /// # Errors
    ///
    /// See [`StackMachine::run`].
    pub fn evaluate(
        instructions: &[Instruction],
        auxiliary: &[AuxiliaryData],
    ) -> Result<Vec<EmValue>> {
        let mut machine = StackMachine::new(auxiliary);
        machine.run(instructions)?;
        Ok(machine.stack.values().to_vec())
    }

    /// Executes a single instruction.
    ///
    /// # Errors
    ///
    /// Returns the [`EmulationError`] describing why the instruction could not be evaluated.
    pub fn execute(&mut self, instr: &Instruction) -> std::result::Result<(), EmulationError> {
        let opcode = instr.opcode();
        match (opcode, instr.operand()) {
            (Opcode::Nop, _) => {}
            (Opcode::IConst | Opcode::LConst, Operand::Immediate(imm)) => {
                let value = match instr.int_literal() {
                    Some(v) => EmValue::I32(v),
                    None => EmValue::I64(imm.as_i64()),
                };
                self.stack.push(value)?;
            }
            (Opcode::SConst, Operand::String(s)) => self.stack.push(EmValue::Str(s.clone()))?,
            (Opcode::LdTable, Operand::Aux(id)) => {
                let bytes = self
                    .tables
                    .get(id)
                    .ok_or(EmulationError::UnknownAuxiliary(*id))?;
                self.stack.push(EmValue::ByteArray(bytes.clone()))?;
            }
            (Opcode::LdHandle, Operand::Aux(id)) => {
                if !self.cells.contains_key(id) {
                    return Err(EmulationError::UnknownAuxiliary(*id));
                }
                self.stack.push(EmValue::Handle(*id))?;
            }
            (
                Opcode::IAdd
                | Opcode::ISub
                | Opcode::IMul
                | Opcode::IAnd
                | Opcode::IOr
                | Opcode::IXor
                | Opcode::IShl
                | Opcode::IShr
                | Opcode::IUshr
                | Opcode::LAnd
                | Opcode::LOr
                | Opcode::LXor
                | Opcode::LShl
                | Opcode::LShr
                | Opcode::LUshr,
                _,
            ) => {
                let op = match opcode {
                    Opcode::IAdd => BinaryOp::Add,
                    Opcode::ISub => BinaryOp::Sub,
                    Opcode::IMul => BinaryOp::Mul,
                    Opcode::IAnd | Opcode::LAnd => BinaryOp::And,
                    Opcode::IOr | Opcode::LOr => BinaryOp::Or,
                    Opcode::IXor | Opcode::LXor => BinaryOp::Xor,
                    Opcode::IShl | Opcode::LShl => BinaryOp::Shl,
                    Opcode::IShr | Opcode::LShr => BinaryOp::Shr,
                    _ => BinaryOp::ShrUn,
                };
                let (left, right) = self.stack.pop_pair()?;
                self.stack.push(left.binary_op(&right, op)?)?;
            }
            (Opcode::INeg | Opcode::INot, _) => {
                let op = if opcode == Opcode::INeg {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Not
                };
                let value = self.stack.pop()?;
                self.stack.push(value.unary_op(op)?)?;
            }
            (Opcode::L2I | Opcode::I2L | Opcode::I2S | Opcode::I2B, _) => {
                let conversion = match opcode {
                    Opcode::L2I => ConversionType::L2I,
                    Opcode::I2L => ConversionType::I2L,
                    Opcode::I2S => ConversionType::I2S,
                    _ => ConversionType::I2B,
                };
                let value = self.stack.pop()?;
                self.stack.push(value.convert(conversion)?)?;
            }
            (Opcode::BaLoad, _) => {
                let index = self.stack.pop_i32()?;
                let byte = match self.stack.pop()? {
                    EmValue::ByteArray(bytes) => usize::try_from(index)
                        .ok()
                        .and_then(|i| bytes.get(i).copied())
                        .ok_or(EmulationError::ArrayIndexOutOfBounds {
                            index: i64::from(index),
                            length: bytes.len(),
                        })?,
                    other => {
                        return Err(EmulationError::StackTypeMismatch {
                            expected: "byte[]",
                            found: other.type_name(),
                        })
                    }
                };
                self.stack.push(EmValue::I32(i32::from(byte)))?;
            }
            (Opcode::ArrayLength, _) => match self.stack.pop()? {
                EmValue::ByteArray(bytes) => {
                    let len = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
                    self.stack.push(EmValue::I32(len))?;
                }
                other => {
                    return Err(EmulationError::StackTypeMismatch {
                        expected: "byte[]",
                        found: other.type_name(),
                    })
                }
            },
            (Opcode::InvokeStatic | Opcode::InvokeVirtual, Operand::Call(CallTarget::Intrinsic(i))) => {
                let result = self.call_intrinsic(*i)?;
                self.stack.push(result)?;
            }
            (Opcode::ILoad, Operand::Local(index)) => {
                let value = self
                    .locals
                    .get(index)
                    .cloned()
                    .ok_or(EmulationError::UninitializedLocal(*index))?;
                self.stack.push(value)?;
            }
            (Opcode::IStore, Operand::Local(index)) => {
                let value = self.stack.pop_i32()?;
                self.locals.insert(*index, EmValue::I32(value));
            }
            (Opcode::Dup, _) => {
                let top = self.stack.peek()?.clone();
                self.stack.push(top)?;
            }
            (Opcode::Pop, _) => {
                self.stack.pop()?;
            }
            (Opcode::Swap, _) => {
                let (left, right) = self.stack.pop_pair()?;
                self.stack.push(right)?;
                self.stack.push(left)?;
            }
            _ => return Err(EmulationError::UnsupportedInstruction(instr.mnemonic())),
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn call_intrinsic(&mut self, intrinsic: Intrinsic) -> std::result::Result<EmValue, EmulationError> {
        let value = match intrinsic {
            Intrinsic::Min | Intrinsic::Max => {
                let b = self.stack.pop_i32()?;
                let a = self.stack.pop_i32()?;
                if intrinsic == Intrinsic::Min {
                    a.min(b)
                } else {
                    a.max(b)
                }
            }
            Intrinsic::StringLength => match self.stack.pop()? {
                EmValue::Str(s) => i32::try_from(s.chars().count()).unwrap_or(i32::MAX),
                other => {
                    return Err(EmulationError::StackTypeMismatch {
                        expected: "string",
                        found: other.type_name(),
                    })
                }
            },
            Intrinsic::ReverseBytes16 => {
                let v = self.stack.pop_i32()?;
                i32::from((v as i16).swap_bytes())
            }
            Intrinsic::ReadMemory16 => match self.stack.pop()? {
                EmValue::Handle(id) => {
                    let cell = self
                        .cells
                        .get(&id)
                        .ok_or(EmulationError::UnknownAuxiliary(id))?;
                    if cell.width != CellWidth::Short {
                        return Err(EmulationError::WidthMismatch {
                            read: CellWidth::Short,
                            declared: cell.width,
                        });
                    }
                    i32::from(cell.bits as u16 as i16)
                }
                other => {
                    return Err(EmulationError::StackTypeMismatch {
                        expected: "handle",
                        found: other.type_name(),
                    })
                }
            },
        };
        Ok(EmValue::I32(value))
    }
}
