//! Auxiliary data declarations required by rewritten code.
//!
//! Some reconstruction strategies depend on data that must exist before the rewritten code
//! runs: byte tables populated by a static initializer, or native memory cells written once
//! at load time. Instead of hiding this in process-wide state, every such requirement is an
//! [`AuxiliaryData`] value attached to the rewrite that needs it and, after splicing, to the
//! [`crate::assembly::InstructionSequence`]. The container encoder places these declarations
//! into the initialization machinery of the output format.

use std::fmt;

/// Identifier of an auxiliary declaration, unique within one instruction sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuxId(pub u32);

impl fmt::Display for AuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aux#{}", self.0)
    }
}

/// Width of a native memory cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellWidth {
    /// 8-bit cell
    Byte,
    /// 16-bit cell
    Short,
    /// 32-bit cell
    Int,
}

impl CellWidth {
    /// Size of the cell in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            CellWidth::Byte => 1,
            CellWidth::Short => 2,
            CellWidth::Int => 4,
        }
    }
}

/// Data that must be established before rewritten code executes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuxiliaryData {
    /// A static byte array populated once at initialization time.
    ///
    /// Loaded with `ldtable` and read with `baload`; elements are signed bytes.
    ByteTable {
        /// Declaration identifier
        id: AuxId,
        /// Table contents
        bytes: Vec<i8>,
    },
    /// A native memory cell allocated and written once at initialization time.
    ///
    /// Loaded with `ldhandle` (pushes the cell's handle) and read through an indirect read
    /// intrinsic of the same width. The cell lives for the lifetime of the program.
    MemoryCell {
        /// Declaration identifier
        id: AuxId,
        /// Width used for both the initial write and every read
        width: CellWidth,
        /// Value written at initialization, truncated to `width`
        value: i64,
    },
}

impl AuxiliaryData {
    /// Identifier of this declaration.
    #[must_use]
    pub fn id(&self) -> AuxId {
        match self {
            AuxiliaryData::ByteTable { id, .. } | AuxiliaryData::MemoryCell { id, .. } => *id,
        }
    }

    /// Short description used in reports and listings.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            AuxiliaryData::ByteTable { id, bytes } => format!("{id}: byte[{}]", bytes.len()),
            AuxiliaryData::MemoryCell { id, width, .. } => {
                format!("{id}: cell({} bytes)", width.bytes())
            }
        }
    }
}

/// Hands out auxiliary identifiers that do not collide with existing declarations.
#[derive(Debug, Clone, Default)]
pub struct AuxAllocator {
    next: u32,
}

impl AuxAllocator {
    /// Creates an allocator whose first identifier follows every id in `existing`.
    #[must_use]
    pub fn after<'a>(existing: impl IntoIterator<Item = &'a AuxiliaryData>) -> Self {
        let next = existing
            .into_iter()
            .map(|data| data.id().0.saturating_add(1))
            .max()
            .unwrap_or(0);
        AuxAllocator { next }
    }

    /// Returns a fresh identifier.
    pub fn allocate(&mut self) -> AuxId {
        let id = AuxId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}
