//! Label-based construction of instruction sequences.
//!
//! [`SequenceBuilder`] lets callers (tests, the fuzz harness, and container decoders that
//! work label-first) write branches against symbolic labels. Labels are resolved to
//! positions when [`SequenceBuilder::build`] is called.
//!
//! # Usage Examples
//!
//! ```rust
//! use litcloak::assembly::{Opcode, SequenceBuilder};
//!
//! let mut builder = SequenceBuilder::new("select");
//! builder
//!     .iload(0)?
//!     .branch(Opcode::IfEq, "zero")?
//!     .push_int(9999)?
//!     .ret_value()?
//!     .label("zero")?
//!     .push_int(-1)?
//!     .ret_value()?;
//!
//! let sequence = builder.build()?;
//! assert_eq!(sequence.len(), 6);
//! assert_eq!(sequence.get(1).unwrap().branch_targets(), vec![4]);
//! # Ok::<(), litcloak::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        AuxiliaryData, ExceptionHandler, Instruction, InstructionSequence, Opcode, Operand,
        SequenceId,
    },
    Error, Result,
};

/// Pending reference from an instruction to a label.
#[derive(Debug, Clone)]
struct LabelFixup {
    /// Position of the branch instruction
    position: usize,
    /// Target labels (one for branches, several for switches)
    labels: Vec<String>,
}

/// Pending exception handler expressed with labels.
#[derive(Debug, Clone)]
struct HandlerFixup {
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
}

/// Builds an [`InstructionSequence`] with symbolic labels.
#[derive(Debug, Clone)]
pub struct SequenceBuilder {
    id: SequenceId,
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
    fixups: Vec<LabelFixup>,
    handlers: Vec<HandlerFixup>,
    auxiliary: Vec<AuxiliaryData>,
}

impl SequenceBuilder {
    /// Creates an empty builder for the sequence `id`.
    #[must_use]
    pub fn new(id: impl Into<SequenceId>) -> Self {
        SequenceBuilder {
            id: id.into(),
            instructions: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            auxiliary: Vec::new(),
        }
    }

    /// Current position, i.e. the index the next instruction will get.
    #[must_use]
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Appends a fully constructed instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] for branch instructions, which must be emitted
    /// through [`SequenceBuilder::branch`] or [`SequenceBuilder::switch`].
    pub fn emit(&mut self, instruction: Instruction) -> Result<&mut Self> {
        if instruction.is_branch() {
            return Err(malformed_operand!(
                instruction.mnemonic(),
                "branches must be emitted against labels"
            ));
        }
        self.instructions.push(instruction);
        Ok(self)
    }

    /// Appends an instruction built from `opcode` and `operand`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] if the operand does not match the opcode.
    pub fn op(&mut self, opcode: Opcode, operand: Operand) -> Result<&mut Self> {
        let instruction = Instruction::new(opcode, operand)?;
        self.emit(instruction)
    }

    /// Appends an operand-less instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] if `opcode` requires an operand.
    pub fn simple(&mut self, opcode: Opcode) -> Result<&mut Self> {
        self.op(opcode, Operand::None)
    }

    /// Pushes a 32-bit integer constant.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn push_int(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(Instruction::iconst(value))
    }

    /// Loads a local integer variable.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn iload(&mut self, local: u16) -> Result<&mut Self> {
        self.op(Opcode::ILoad, Operand::Local(local))
    }

    /// Stores into a local integer variable.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn istore(&mut self, local: u16) -> Result<&mut Self> {
        self.op(Opcode::IStore, Operand::Local(local))
    }

    /// Returns the integer on top of the stack.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn ret_value(&mut self) -> Result<&mut Self> {
        self.simple(Opcode::IReturn)
    }

    /// Returns without a value.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.simple(Opcode::Return)
    }

    /// Emits a branch to `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] if `opcode` is not a single-target branch.
    pub fn branch(&mut self, opcode: Opcode, label: &str) -> Result<&mut Self> {
        // Placeholder target, resolved in `build`
        let instruction = Instruction::new(opcode, Operand::Target(0))?;
        self.fixups.push(LabelFixup {
            position: self.instructions.len(),
            labels: vec![label.to_string()],
        });
        self.instructions.push(instruction);
        Ok(self)
    }

    /// Emits a switch over `labels`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] if `labels` is empty.
    pub fn switch(&mut self, labels: &[&str]) -> Result<&mut Self> {
        let instruction = Instruction::new(Opcode::Switch, Operand::Switch(vec![0; labels.len()]))?;
        self.fixups.push(LabelFixup {
            position: self.instructions.len(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        });
        self.instructions.push(instruction);
        Ok(self)
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedOperand`] if the label is already defined.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.contains_key(name) {
            return Err(malformed_operand!("label", "duplicate label '{}'", name));
        }
        self.labels.insert(name.to_string(), self.instructions.len());
        Ok(self)
    }

    /// Declares an exception handler by labels. Ends are exclusive.
    ///
    /// # Errors
    ///
    /// Never fails; labels are checked in [`SequenceBuilder::build`].
    pub fn handler(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> Result<&mut Self> {
        self.handlers.push(HandlerFixup {
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.to_string(),
        });
        Ok(self)
    }

    /// Declares auxiliary data referenced by emitted instructions.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for chaining.
    pub fn auxiliary(&mut self, data: AuxiliaryData) -> Result<&mut Self> {
        self.auxiliary.push(data);
        Ok(self)
    }

    fn resolve(&self, label: &str, position: usize) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::InvalidReference {
                position,
                target: usize::MAX,
                len: self.instructions.len(),
            })
    }

    /// Resolves all labels and produces the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] for undefined labels or labels that resolve past
    /// the last instruction.
    pub fn build(&self) -> Result<InstructionSequence> {
        let mut instructions = self.instructions.clone();
        for fixup in &self.fixups {
            let targets = fixup
                .labels
                .iter()
                .map(|label| self.resolve(label, fixup.position))
                .collect::<Result<Vec<_>>>()?;
            let instr = &mut instructions[fixup.position];
            let operand = if targets.len() == 1 && instr.opcode() != Opcode::Switch {
                Operand::Target(targets[0])
            } else {
                Operand::Switch(targets)
            };
            *instr = Instruction::new(instr.opcode(), operand)?;
        }

        let handlers = self
            .handlers
            .iter()
            .enumerate()
            .map(|(index, h)| {
                Ok(ExceptionHandler {
                    try_start: self.resolve(&h.try_start, index)?,
                    try_end: self.resolve(&h.try_end, index)?,
                    handler_start: self.resolve(&h.handler_start, index)?,
                    handler_end: self.resolve(&h.handler_end, index)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sequence = InstructionSequence::from_parts(
            self.id.clone(),
            instructions,
            handlers,
            self.auxiliary.clone(),
        )?;
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{AuxId, CellWidth};

    #[test]
    fn test_forward_and_backward_labels() {
        let mut builder = SequenceBuilder::new("loop");
        builder
            .push_int(10)
            .unwrap()
            .istore(0)
            .unwrap()
            .label("head")
            .unwrap()
            .iload(0)
            .unwrap()
            .branch(Opcode::IfEq, "done")
            .unwrap()
            .iload(0)
            .unwrap()
            .push_int(1)
            .unwrap()
            .simple(Opcode::ISub)
            .unwrap()
            .istore(0)
            .unwrap()
            .branch(Opcode::Goto, "head")
            .unwrap()
            .label("done")
            .unwrap()
            .ret()
            .unwrap();

        let seq = builder.build().unwrap();
        assert_eq!(seq.get(3).unwrap().branch_targets(), vec![9]);
        assert_eq!(seq.get(8).unwrap().branch_targets(), vec![2]);
    }

    #[test]
    fn test_switch_and_handlers() {
        let mut builder = SequenceBuilder::new("switch");
        builder
            .label("start")
            .unwrap()
            .iload(0)
            .unwrap()
            .switch(&["a", "b"])
            .unwrap()
            .label("a")
            .unwrap()
            .ret()
            .unwrap()
            .label("b")
            .unwrap()
            .ret()
            .unwrap()
            .label("catch")
            .unwrap()
            .simple(Opcode::Throw)
            .unwrap()
            .label("end")
            .unwrap()
            .handler("start", "catch", "catch", "end")
            .unwrap();

        let seq = builder.build().unwrap();
        assert_eq!(seq.get(1).unwrap().branch_targets(), vec![2, 3]);
        let handler = seq.handlers()[0];
        assert_eq!((handler.try_start, handler.try_end), (0, 4));
        assert_eq!((handler.handler_start, handler.handler_end), (4, 5));
    }

    #[test]
    fn test_undefined_label() {
        let mut builder = SequenceBuilder::new("broken");
        builder.branch(Opcode::Goto, "nowhere").unwrap();
        assert!(matches!(
            builder.build(),
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_label_and_raw_branch_rejected() {
        let mut builder = SequenceBuilder::new("dup");
        builder.label("x").unwrap();
        assert!(builder.label("x").is_err());

        let raw = Instruction::new(Opcode::Goto, Operand::Target(0)).unwrap();
        assert!(builder.emit(raw).is_err());
    }

    #[test]
    fn test_auxiliary_declarations_carried() {
        let mut builder = SequenceBuilder::new("aux");
        builder
            .auxiliary(AuxiliaryData::MemoryCell {
                id: AuxId(0),
                width: CellWidth::Short,
                value: 5,
            })
            .unwrap()
            .op(Opcode::LdHandle, Operand::Aux(AuxId(0)))
            .unwrap()
            .simple(Opcode::Pop)
            .unwrap();
        let seq = builder.build().unwrap();
        assert!(seq.auxiliary(AuxId(0)).is_some());
    }
}
