//! Indirect memory load: the target is read back from a native memory cell.
//!
//! The cell is an [`AuxiliaryData::MemoryCell`] of width [`CellWidth::Short`] written once at
//! initialization. The rewritten code holds only the cell's handle:
//!
//! ```text
//! ldhandle C
//! invokestatic memory.read_i16
//! ```

use crate::{
    assembly::{AuxId, AuxiliaryData, CellWidth, Instruction, Intrinsic, Opcode, Operand},
    strategy::{ConstantStrategy, Expansion, StrategyContext},
    Result,
};

/// Reconstructs a value by reading it from initialization-time memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndirectMemoryLoad;

impl IndirectMemoryLoad {
    /// Emits the load of `target` from a cell declared under `id`.
    ///
    /// # Errors
    ///
    /// Never fails for the opcodes used; returns `Result` for instruction construction.
    pub fn emit(target: i16, id: AuxId) -> Result<Expansion> {
        let mut expansion = Expansion::new("indirect-memory-load");
        expansion
            .instruction(Instruction::new(Opcode::LdHandle, Operand::Aux(id))?)
            .instruction(Instruction::intrinsic(Intrinsic::ReadMemory16))
            .auxiliary(AuxiliaryData::MemoryCell {
                id,
                width: CellWidth::Short,
                value: i64::from(target),
            });
        Ok(expansion)
    }
}

impl ConstantStrategy for IndirectMemoryLoad {
    fn name(&self) -> &'static str {
        "indirect-memory-load"
    }

    fn description(&self) -> &'static str {
        "16-bit read from a native cell written at initialization"
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        Self::emit(target, ctx.aux.allocate())
    }
}
