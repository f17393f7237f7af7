//! Ordered instruction sequences with structural cross-references.
//!
//! An [`InstructionSequence`] is the unit of work of the obfuscation engine: conceptually one
//! method body. Besides the instructions it owns every structure that refers to positions
//! within it:
//!
//! - branch and switch targets (stored in the instructions' operands)
//! - exception handler ranges ([`ExceptionHandler`])
//! - regions produced by earlier rewrites ([`RewrittenRegion`])
//!
//! plus the [`AuxiliaryData`] declarations rewritten code depends on.
//!
//! # Splicing
//!
//! [`InstructionSequence::splice`] replaces one instruction with a non-empty sequence. Every
//! position strictly after the replaced instruction moves by the length delta; positions at or
//! before it are unchanged. A branch that targeted the replaced instruction therefore lands
//! on the first instruction of the replacement, and a handler range whose exclusive end lay
//! just after it grows to cover the whole replacement.

use std::fmt;

use crate::{
    assembly::{AuxId, AuxiliaryData, Instruction},
    Error, Result,
};

/// Identity of a sequence, used to merge results of parallel runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(pub String);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceId {
    fn from(value: &str) -> Self {
        SequenceId(value.to_string())
    }
}

impl From<String> for SequenceId {
    fn from(value: String) -> Self {
        SequenceId(value)
    }
}

/// A protected range and its handler, as half-open position ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// First protected position
    pub try_start: usize,
    /// Position after the last protected instruction
    pub try_end: usize,
    /// First handler position
    pub handler_start: usize,
    /// Position after the last handler instruction
    pub handler_end: usize,
}

impl ExceptionHandler {
    pub(crate) fn remap(&mut self, remap: impl Fn(usize) -> usize) {
        self.try_start = remap(self.try_start);
        self.try_end = remap(self.try_end);
        self.handler_start = remap(self.handler_start);
        self.handler_end = remap(self.handler_end);
    }
}

/// A span of instructions produced by a previous rewrite.
///
/// Regions mark code that must not be rewritten again and let
/// [`crate::obfuscation::verify`] align a rewritten sequence with its original.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RewrittenRegion {
    /// First position of the replacement
    pub start: usize,
    /// Number of instructions in the replacement
    pub len: usize,
    /// The literal the region reconstructs
    pub value: i16,
    /// Rendered strategy tree that produced it
    pub strategy: String,
}

impl RewrittenRegion {
    /// Returns `true` if `position` lies inside this region.
    #[must_use]
    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && position < self.start + self.len
    }
}

/// An ordered list of instructions plus every structure that references positions in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSequence {
    id: SequenceId,
    instructions: Vec<Instruction>,
    handlers: Vec<ExceptionHandler>,
    regions: Vec<RewrittenRegion>,
    auxiliary: Vec<AuxiliaryData>,
}

impl InstructionSequence {
    /// Creates a sequence without exception handlers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if a branch target is out of range.
    pub fn new(id: impl Into<SequenceId>, instructions: Vec<Instruction>) -> Result<Self> {
        Self::with_handlers(id, instructions, Vec::new())
    }

    /// Creates a sequence with exception handlers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if a branch target or handler range is out of range.
    pub fn with_handlers(
        id: impl Into<SequenceId>,
        instructions: Vec<Instruction>,
        handlers: Vec<ExceptionHandler>,
    ) -> Result<Self> {
        Self::from_parts(id.into(), instructions, handlers, Vec::new())
    }

    /// Creates a sequence that already carries auxiliary declarations.
    pub(crate) fn from_parts(
        id: SequenceId,
        instructions: Vec<Instruction>,
        handlers: Vec<ExceptionHandler>,
        auxiliary: Vec<AuxiliaryData>,
    ) -> Result<Self> {
        let sequence = InstructionSequence {
            id,
            instructions,
            handlers,
            regions: Vec::new(),
            auxiliary,
        };
        sequence.validate()?;
        Ok(sequence)
    }

    /// Checks that every cross-reference resolves to a valid position.
    ///
    /// Branch targets and handler starts must name an instruction; exclusive range ends may
    /// equal the sequence length. Regions must lie inside the sequence and every auxiliary
    /// reference must be declared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] for the first reference that does not resolve.
    pub fn validate(&self) -> Result<()> {
        let len = self.instructions.len();
        let invalid = |position, target| Error::InvalidReference {
            position,
            target,
            len,
        };

        for (position, instr) in self.instructions.iter().enumerate() {
            for target in instr.branch_targets() {
                if target >= len {
                    return Err(invalid(position, target));
                }
            }
            if let crate::assembly::Operand::Aux(id) = instr.operand() {
                if self.auxiliary(*id).is_none() {
                    return Err(invalid(position, id.0 as usize));
                }
            }
        }

        for (index, handler) in self.handlers.iter().enumerate() {
            if handler.try_start >= len || handler.handler_start >= len {
                return Err(invalid(index, handler.try_start.max(handler.handler_start)));
            }
            if handler.try_end > len
                || handler.handler_end > len
                || handler.try_end <= handler.try_start
                || handler.handler_end <= handler.handler_start
            {
                return Err(invalid(index, handler.try_end.max(handler.handler_end)));
            }
        }

        for region in &self.regions {
            if region.len == 0 || region.start + region.len > len {
                return Err(invalid(region.start, region.start + region.len));
            }
        }

        Ok(())
    }

    /// Identity of this sequence.
    #[must_use]
    pub fn id(&self) -> &SequenceId {
        &self.id
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if the sequence has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instructions in order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The instruction at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Instruction> {
        self.instructions.get(position)
    }

    /// Exception handler ranges.
    #[must_use]
    pub fn handlers(&self) -> &[ExceptionHandler] {
        &self.handlers
    }

    /// Regions produced by previous rewrites, ordered by start position.
    #[must_use]
    pub fn regions(&self) -> &[RewrittenRegion] {
        &self.regions
    }

    /// The region starting at `position`, if any.
    #[must_use]
    pub fn region_at(&self, position: usize) -> Option<&RewrittenRegion> {
        self.regions.iter().find(|region| region.start == position)
    }

    /// Returns `true` if `position` is part of a previous rewrite.
    #[must_use]
    pub fn is_rewritten(&self, position: usize) -> bool {
        self.regions.iter().any(|region| region.contains(position))
    }

    /// Auxiliary declarations, the explicit output for the container encoder.
    #[must_use]
    pub fn auxiliary_data(&self) -> &[AuxiliaryData] {
        &self.auxiliary
    }

    /// Looks up one auxiliary declaration.
    #[must_use]
    pub fn auxiliary(&self, id: AuxId) -> Option<&AuxiliaryData> {
        self.auxiliary.iter().find(|data| data.id() == id)
    }

    /// Replaces the instruction at `position` with `replacement`.
    ///
    /// Every cross-reference to a position after `position` is shifted by
    /// `replacement.len() - 1`. References to `position` itself or earlier are unchanged.
    ///
    /// # Arguments
    ///
    /// * `position` - Index of the instruction to replace
    /// * `replacement` - Non-empty sequence taking its place
    ///
    /// # Returns
    ///
    /// The length delta applied to later positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] if `position` is out of range or the replacement
    /// is empty, since references to `position` would then have nothing to resolve to.
    pub fn splice(&mut self, position: usize, replacement: Vec<Instruction>) -> Result<usize> {
        let len = self.instructions.len();
        if position >= len || replacement.is_empty() {
            return Err(Error::InvalidReference {
                position,
                target: position,
                len,
            });
        }

        let delta = replacement.len() - 1;
        let remap = |target: usize| {
            if target > position {
                target + delta
            } else {
                target
            }
        };

        for instr in &mut self.instructions {
            instr.remap_targets(remap);
        }
        for handler in &mut self.handlers {
            handler.remap(remap);
        }
        for region in &mut self.regions {
            region.start = remap(region.start);
        }

        self.instructions.splice(position..=position, replacement);
        Ok(delta)
    }

    /// Records a region produced by a rewrite.
    pub(crate) fn mark_region(&mut self, region: RewrittenRegion) {
        let index = self
            .regions
            .partition_point(|existing| existing.start < region.start);
        self.regions.insert(index, region);
    }

    /// Adds auxiliary declarations produced by a rewrite.
    pub(crate) fn extend_auxiliary(&mut self, data: impl IntoIterator<Item = AuxiliaryData>) {
        self.auxiliary.extend(data);
    }
}

impl fmt::Display for InstructionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sequence {}:", self.id)?;
        for (position, instr) in self.instructions.iter().enumerate() {
            let marker = if self.is_rewritten(position) { '*' } else { ' ' };
            writeln!(f, "{marker}{position:>5}: {instr}")?;
        }
        for data in &self.auxiliary {
            writeln!(f, "  {}", data.describe())?;
        }
        Ok(())
    }
}
