//! Byte-split reconstruction: the target's two bytes live in a static table.
//!
//! The table is an [`AuxiliaryData::ByteTable`] holding the high and low byte at two random
//! indices among decoy bytes. The code reads both, masks them to unsigned, and recombines:
//!
//! ```text
//! ldtable T   iconst HI   baload   iconst 0xFF   iand   iconst 8   ishl
//! ldtable T   iconst LO   baload   iconst 0xFF   iand
//! ior
//! i2s
//! ```

use rand::{seq::SliceRandom, Rng};

use crate::{
    assembly::{AuxId, AuxiliaryData, Instruction, Opcode, Operand},
    strategy::{exhausted, ConstantStrategy, Expansion, StrategyContext, MAX_RESAMPLES},
    Result,
};

const MIN_TABLE: usize = 4;
const MAX_TABLE: usize = 12;

/// Table layout of one byte split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteSplitParams {
    /// Table contents, decoys included
    pub table: Vec<i8>,
    /// Index of the high byte
    pub hi_index: i32,
    /// Index of the low byte
    pub lo_index: i32,
}

impl ByteSplitParams {
    /// Places the bytes of `target` at the given indices of `decoys`.
    ///
    /// Returns `None` if the indices coincide or fall outside the table.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn place(target: i16, mut decoys: Vec<i8>, hi_index: usize, lo_index: usize) -> Option<Self> {
        if hi_index == lo_index || hi_index >= decoys.len() || lo_index >= decoys.len() {
            return None;
        }
        let [hi, lo] = target.to_be_bytes();
        decoys[hi_index] = hi as i8;
        decoys[lo_index] = lo as i8;
        Some(ByteSplitParams {
            table: decoys,
            hi_index: i32::try_from(hi_index).ok()?,
            lo_index: i32::try_from(lo_index).ok()?,
        })
    }
}

/// Reconstructs a value from two bytes of a static table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSplitReconstruction;

impl ByteSplitReconstruction {
    /// Emits the template for fixed parameters, declaring the table under `id`.
    ///
    /// # Errors
    ///
    /// Never fails for the opcodes used; returns `Result` for instruction construction.
    pub fn emit(params: &ByteSplitParams, id: AuxId) -> Result<Expansion> {
        let load = Instruction::new(Opcode::LdTable, Operand::Aux(id))?;
        let baload = Instruction::simple(Opcode::BaLoad)?;
        let and = Instruction::simple(Opcode::IAnd)?;

        let mut expansion = Expansion::new("byte-split-reconstruction");
        expansion
            .instruction(load.clone())
            .literal(params.hi_index)
            .instruction(baload.clone())
            .literal(0xFF)
            .instruction(and.clone())
            .literal(8)
            .instruction(Instruction::simple(Opcode::IShl)?)
            .instruction(load)
            .literal(params.lo_index)
            .instruction(baload)
            .literal(0xFF)
            .instruction(and)
            .instruction(Instruction::simple(Opcode::IOr)?)
            .instruction(Instruction::simple(Opcode::I2S)?)
            .auxiliary(AuxiliaryData::ByteTable {
                id,
                bytes: params.table.clone(),
            });
        Ok(expansion)
    }
}

impl ConstantStrategy for ByteSplitReconstruction {
    fn name(&self) -> &'static str {
        "byte-split-reconstruction"
    }

    fn description(&self) -> &'static str {
        "high and low byte read from a static table"
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        let len = ctx.rng.random_range(MIN_TABLE..=MAX_TABLE);
        let mut indices: Vec<usize> = (0..len).collect();
        let t = i32::from(target);

        for _ in 0..MAX_RESAMPLES {
            indices.shuffle(&mut *ctx.rng);
            let (hi, lo) = (indices[0], indices[1]);
            if i32::try_from(hi).ok() == Some(t) || i32::try_from(lo).ok() == Some(t) {
                continue;
            }

            let decoys: Vec<i8> = (0..len).map(|_| ctx.rng.random()).collect();
            if let Some(params) = ByteSplitParams::place(target, decoys, hi, lo) {
                let id = ctx.aux.allocate();
                return Self::emit(&params, id);
            }
        }
        Err(exhausted(self.name(), target))
    }
}
