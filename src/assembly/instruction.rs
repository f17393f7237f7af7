//! Stack-machine instruction representation, operand types, and stack-effect metadata.
//!
//! This module defines the type system for the instructions the obfuscation engine operates
//! on. It is deliberately independent of any container format: an [`Instruction`] is an
//! [`Opcode`] plus a typed [`Operand`], and everything else (category, control-flow behavior,
//! stack effect) is derived from those two values.
//!
//! # Key Components
//!
//! - [`Opcode`] - Closed vocabulary of operations
//! - [`Operand`] - Type-safe operand representation
//! - [`Immediate`] - Integer immediates embedded in instructions
//! - [`CallTarget`] / [`Intrinsic`] - Call operands with known or declared signatures
//! - [`StackBehavior`] - Pops, pushes and net depth change
//! - [`InstructionCategory`] / [`FlowType`] - Classification used by analysis passes
//!
//! # Invariants
//!
//! The stack effect of an instruction is a pure function of its opcode and operand. It never
//! depends on runtime data, which is what allows [`crate::analysis::StackAnalyzer`] to validate
//! replacement sequences without executing them.
//!
//! # Usage Examples
//!
//! ```rust
//! use litcloak::assembly::{Instruction, Opcode, Operand, Immediate};
//!
//! let push = Instruction::iconst(9999);
//! assert_eq!(push.int_literal(), Some(9999));
//! assert_eq!(push.stack_behavior().net_effect, 1);
//!
//! // Operands must match the opcode
//! assert!(Instruction::new(Opcode::IXor, Operand::Immediate(Immediate::Int32(1))).is_err());
//! # Ok::<(), litcloak::Error>(())
//! ```

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

use crate::{assembly::AuxId, Result};

/// Static type of a value slot on the operand stack.
///
/// Each value occupies one slot regardless of its width; the type records what kind of
/// value the slot holds so analysis can confirm a replacement pushes the same kind of value
/// as the literal load it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotType {
    /// 32-bit integer (also carries 8- and 16-bit values, sign-extended)
    Int,
    /// 64-bit integer, including native memory handles
    Long,
    /// Object reference (strings, arrays)
    Reference,
    /// Value produced by an opaque instruction whose type is not tracked
    Any,
}

impl SlotType {
    /// Returns `true` if a value of type `other` may occupy a slot declared as `self`.
    #[must_use]
    pub fn accepts(self, other: SlotType) -> bool {
        self == other || self == SlotType::Any || other == SlotType::Any
    }
}

/// Types of operands for instructions.
///
/// Every [`Opcode`] declares exactly one operand type; [`Instruction::new`] rejects any
/// operand that does not match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 32-bit integer immediate
    Int32,
    /// Signed 64-bit integer immediate
    Int64,
    /// Pooled string constant
    String,
    /// Single branch target position
    Target,
    /// Switch table of target positions
    Switch,
    /// Local variable index
    Local,
    /// Call target
    Call,
    /// Reference to an auxiliary data declaration
    Aux,
    /// Declared effect of an opaque instruction
    Opaque,
}

/// Integer immediates embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
}

impl Immediate {
    /// Returns the immediate sign-extended to 64 bits.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Immediate::Int32(value) => i64::from(value),
            Immediate::Int64(value) => value,
        }
    }
}

impl fmt::UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
        }
    }
}

/// Well-known calls whose semantics the simulator implements directly.
///
/// These are the library routines the reconstruction strategies rely on. The encoder maps
/// each one to the concrete method reference of the target container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
pub enum Intrinsic {
    /// `min(int, int) -> int`
    #[strum(serialize = "math.min")]
    Min,
    /// `max(int, int) -> int`
    #[strum(serialize = "math.max")]
    Max,
    /// `string.length() -> int` (virtual, receiver popped)
    #[strum(serialize = "string.length")]
    StringLength,
    /// `reverse_bytes(short) -> short`, result sign-extended to int
    #[strum(serialize = "short.reverse_bytes")]
    ReverseBytes16,
    /// `read_i16(handle: long) -> short`, result sign-extended to int
    #[strum(serialize = "memory.read_i16")]
    ReadMemory16,
}

impl Intrinsic {
    /// Returns the qualified name used in listings.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Types popped by this call, bottom of stack first.
    #[must_use]
    pub fn params(self) -> &'static [SlotType] {
        match self {
            Intrinsic::Min | Intrinsic::Max => &[SlotType::Int, SlotType::Int],
            Intrinsic::StringLength => &[SlotType::Reference],
            Intrinsic::ReverseBytes16 => &[SlotType::Int],
            Intrinsic::ReadMemory16 => &[SlotType::Long],
        }
    }

    /// Returns `true` if the call is dispatched on a receiver.
    #[must_use]
    pub fn is_virtual(self) -> bool {
        matches!(self, Intrinsic::StringLength)
    }
}

/// Reference to a method the engine treats as a black box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Qualified method name
    pub name: String,
    /// Parameter slot types (including the receiver for virtual calls)
    pub params: Vec<SlotType>,
    /// Return slot type, `None` for void
    pub returns: Option<SlotType>,
}

/// Target of a call instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A call the simulator can evaluate
    Intrinsic(Intrinsic),
    /// Any other method
    Method(MethodRef),
}

impl CallTarget {
    /// Number of values the call pops.
    #[must_use]
    pub fn param_count(&self) -> usize {
        match self {
            CallTarget::Intrinsic(intrinsic) => intrinsic.params().len(),
            CallTarget::Method(method) => method.params.len(),
        }
    }

    /// Slot type of the returned value, `None` for void calls.
    #[must_use]
    pub fn returns(&self) -> Option<SlotType> {
        match self {
            CallTarget::Intrinsic(_) => Some(SlotType::Int),
            CallTarget::Method(method) => method.returns,
        }
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Intrinsic(intrinsic) => f.write_str(intrinsic.name()),
            CallTarget::Method(method) => f.write_str(&method.name),
        }
    }
}

/// Declared stack effect of an opaque instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueEffect {
    /// Number of values popped
    pub pops: u8,
    /// Number of values pushed (typed as [`SlotType::Any`])
    pub pushes: u8,
}

/// Represents an operand in a structured way.
///
/// Branch targets are positions (instruction indices) within the owning
/// [`crate::assembly::InstructionSequence`], not byte offsets, so a splice only needs to
/// renumber indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Pooled string constant
    String(String),
    /// Branch target position
    Target(usize),
    /// Switch table of target positions
    Switch(Vec<usize>),
    /// Local variable index
    Local(u16),
    /// Call target
    Call(CallTarget),
    /// Auxiliary data declaration
    Aux(AuxId),
    /// Declared effect of an opaque instruction
    Opaque(OpaqueEffect),
}

impl Operand {
    /// Returns the [`OperandType`] this operand satisfies.
    #[must_use]
    pub fn operand_type(&self) -> OperandType {
        match self {
            Operand::None => OperandType::None,
            Operand::Immediate(Immediate::Int32(_)) => OperandType::Int32,
            Operand::Immediate(Immediate::Int64(_)) => OperandType::Int64,
            Operand::String(_) => OperandType::String,
            Operand::Target(_) => OperandType::Target,
            Operand::Switch(_) => OperandType::Switch,
            Operand::Local(_) => OperandType::Local,
            Operand::Call(_) => OperandType::Call,
            Operand::Aux(_) => OperandType::Aux,
            Operand::Opaque(_) => OperandType::Opaque,
        }
    }

    /// Returns a formatted string representation of the operand.
    ///
    /// # Returns
    ///
    /// - `None` for [`Operand::None`]
    /// - A formatted string for all other operand types
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        match self {
            Operand::None => None,
            Operand::Immediate(imm) => Some(imm.as_i64().to_string()),
            Operand::String(s) => Some(format!("{s:?}")),
            Operand::Target(t) => Some(format!("@{t}")),
            Operand::Switch(targets) => Some(format!(
                "[{}]",
                targets
                    .iter()
                    .map(|t| format!("@{t}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Operand::Local(l) => Some(format!("V_{l}")),
            Operand::Call(call) => Some(call.to_string()),
            Operand::Aux(id) => Some(id.to_string()),
            Operand::Opaque(effect) => Some(format!("-{}/+{}", effect.pops, effect.pushes)),
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
}

/// Stack effect of an instruction.
///
/// Describes how an instruction modifies the evaluation stack, in value slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

impl StackBehavior {
    /// Creates a stack behavior from pop and push counts.
    ///
    /// Counts are bounded by [`StackBehavior::MAX_SLOTS`] at instruction construction.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(pops: u8, pushes: u8) -> Self {
        StackBehavior {
            pops,
            pushes,
            net_effect: (pushes as i16 - pops as i16) as i8,
        }
    }

    /// Largest pop or push count a single instruction may declare.
    pub const MAX_SLOTS: u8 = 127;
}

/// Categorization of instructions by their primary function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionCategory {
    /// Pushes a constant (integer, string, auxiliary reference)
    Constant,
    /// Arithmetic and bitwise binary operations
    Binary,
    /// Unary operations (neg, not) and width conversions
    Unary,
    /// Shift operations
    Shift,
    /// Static or virtual calls
    Call,
    /// Comparisons, branches, returns and throws
    ControlFlow,
    /// Everything else (locals, stack shuffling, array access, opaque)
    Other,
}

/// Closed vocabulary of operations.
///
/// Integer operations work on [`SlotType::Int`] values unless prefixed with `L`, which work
/// on [`SlotType::Long`]. Conditional branches compare against zero (`If*`) or against a
/// second operand (`IfICmp*`).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Opcode {
    Nop,
    IConst,
    LConst,
    SConst,
    LdTable,
    LdHandle,
    IAdd,
    ISub,
    IMul,
    IAnd,
    IOr,
    IXor,
    INeg,
    INot,
    IShl,
    IShr,
    IUshr,
    LAnd,
    LOr,
    LXor,
    LShl,
    LShr,
    LUshr,
    L2I,
    I2L,
    I2S,
    I2B,
    BaLoad,
    ArrayLength,
    InvokeStatic,
    InvokeVirtual,
    ILoad,
    IStore,
    Dup,
    Pop,
    Swap,
    IfEq,
    IfNe,
    IfLt,
    IfGe,
    IfGt,
    IfLe,
    IfICmpEq,
    IfICmpNe,
    IfICmpLt,
    IfICmpGe,
    IfICmpGt,
    IfICmpLe,
    Goto,
    Switch,
    Return,
    IReturn,
    Throw,
    Opaque,
}

impl Opcode {
    /// Human-readable mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::IConst => "iconst",
            Opcode::LConst => "lconst",
            Opcode::SConst => "sconst",
            Opcode::LdTable => "ldtable",
            Opcode::LdHandle => "ldhandle",
            Opcode::IAdd => "iadd",
            Opcode::ISub => "isub",
            Opcode::IMul => "imul",
            Opcode::IAnd => "iand",
            Opcode::IOr => "ior",
            Opcode::IXor => "ixor",
            Opcode::INeg => "ineg",
            Opcode::INot => "inot",
            Opcode::IShl => "ishl",
            Opcode::IShr => "ishr",
            Opcode::IUshr => "iushr",
            Opcode::LAnd => "land",
            Opcode::LOr => "lor",
            Opcode::LXor => "lxor",
            Opcode::LShl => "lshl",
            Opcode::LShr => "lshr",
            Opcode::LUshr => "lushr",
            Opcode::L2I => "l2i",
            Opcode::I2L => "i2l",
            Opcode::I2S => "i2s",
            Opcode::I2B => "i2b",
            Opcode::BaLoad => "baload",
            Opcode::ArrayLength => "arraylength",
            Opcode::InvokeStatic => "invokestatic",
            Opcode::InvokeVirtual => "invokevirtual",
            Opcode::ILoad => "iload",
            Opcode::IStore => "istore",
            Opcode::Dup => "dup",
            Opcode::Pop => "pop",
            Opcode::Swap => "swap",
            Opcode::IfEq => "ifeq",
            Opcode::IfNe => "ifne",
            Opcode::IfLt => "iflt",
            Opcode::IfGe => "ifge",
            Opcode::IfGt => "ifgt",
            Opcode::IfLe => "ifle",
            Opcode::IfICmpEq => "if_icmpeq",
            Opcode::IfICmpNe => "if_icmpne",
            Opcode::IfICmpLt => "if_icmplt",
            Opcode::IfICmpGe => "if_icmpge",
            Opcode::IfICmpGt => "if_icmpgt",
            Opcode::IfICmpLe => "if_icmple",
            Opcode::Goto => "goto",
            Opcode::Switch => "switch",
            Opcode::Return => "return",
            Opcode::IReturn => "ireturn",
            Opcode::Throw => "throw",
            Opcode::Opaque => "opaque",
        }
    }

    /// The operand type this opcode requires.
    #[must_use]
    pub fn operand_type(self) -> OperandType {
        match self {
            Opcode::IConst => OperandType::Int32,
            Opcode::LConst => OperandType::Int64,
            Opcode::SConst => OperandType::String,
            Opcode::LdTable | Opcode::LdHandle => OperandType::Aux,
            Opcode::InvokeStatic | Opcode::InvokeVirtual => OperandType::Call,
            Opcode::ILoad | Opcode::IStore => OperandType::Local,
            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe
            | Opcode::Goto => OperandType::Target,
            Opcode::Switch => OperandType::Switch,
            Opcode::Opaque => OperandType::Opaque,
            _ => OperandType::None,
        }
    }

    /// Functional category of this opcode.
    #[must_use]
    pub fn category(self) -> InstructionCategory {
        match self {
            Opcode::IConst | Opcode::LConst | Opcode::SConst | Opcode::LdTable | Opcode::LdHandle => {
                InstructionCategory::Constant
            }
            Opcode::IAdd
            | Opcode::ISub
            | Opcode::IMul
            | Opcode::IAnd
            | Opcode::IOr
            | Opcode::IXor
            | Opcode::LAnd
            | Opcode::LOr
            | Opcode::LXor => InstructionCategory::Binary,
            Opcode::INeg | Opcode::INot | Opcode::L2I | Opcode::I2L | Opcode::I2S | Opcode::I2B => {
                InstructionCategory::Unary
            }
            Opcode::IShl
            | Opcode::IShr
            | Opcode::IUshr
            | Opcode::LShl
            | Opcode::LShr
            | Opcode::LUshr => InstructionCategory::Shift,
            Opcode::InvokeStatic | Opcode::InvokeVirtual => InstructionCategory::Call,
            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe
            | Opcode::Goto
            | Opcode::Switch
            | Opcode::Return
            | Opcode::IReturn
            | Opcode::Throw => InstructionCategory::ControlFlow,
            Opcode::Nop
            | Opcode::BaLoad
            | Opcode::ArrayLength
            | Opcode::ILoad
            | Opcode::IStore
            | Opcode::Dup
            | Opcode::Pop
            | Opcode::Swap
            | Opcode::Opaque => InstructionCategory::Other,
        }
    }

    /// How this opcode affects control flow.
    #[must_use]
    pub fn flow_type(self) -> FlowType {
        match self {
            Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe => FlowType::ConditionalBranch,
            Opcode::Goto => FlowType::UnconditionalBranch,
            Opcode::Switch => FlowType::Switch,
            Opcode::Return | Opcode::IReturn => FlowType::Return,
            Opcode::Throw => FlowType::Throw,
            Opcode::InvokeStatic | Opcode::InvokeVirtual => FlowType::Call,
            _ => FlowType::Sequential,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single stack-machine instruction.
///
/// Instructions are immutable values; the only way to obtain one is through a validating
/// constructor, so every instruction in a sequence has an operand matching its opcode.
///
/// # Examples
///
/// ```rust
/// use litcloak::assembly::{CallTarget, Instruction, Intrinsic, Opcode, Operand};
///
/// let max = Instruction::new(
///     Opcode::InvokeStatic,
///     Operand::Call(CallTarget::Intrinsic(Intrinsic::Max)),
/// )?;
/// assert_eq!(max.stack_behavior().pops, 2);
/// assert_eq!(max.to_string(), "invokestatic math.max");
/// # Ok::<(), litcloak::Error>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    opcode: Opcode,
    operand: Operand,
}

impl Instruction {
    /// Constructs an instruction, validating the operand against the opcode.
    ///
    /// # Arguments
    ///
    /// * `opcode` - The operation
    /// * `operand` - Its operand, [`Operand::None`] for operand-less opcodes
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedOperand`] if the operand type does not match, if a
    /// call is emitted with the wrong invoke kind for an intrinsic, or if a switch has no
    /// targets.
    pub fn new(opcode: Opcode, operand: Operand) -> Result<Self> {
        let expected = opcode.operand_type();
        let found = operand.operand_type();
        if expected != found {
            return Err(malformed_operand!(
                opcode.mnemonic(),
                "expected {:?} operand, found {:?}",
                expected,
                found
            ));
        }

        match (&opcode, &operand) {
            (Opcode::InvokeStatic, Operand::Call(CallTarget::Intrinsic(i))) if i.is_virtual() => {
                return Err(malformed_operand!(
                    opcode.mnemonic(),
                    "'{}' requires a virtual call",
                    i.name()
                ));
            }
            (Opcode::InvokeVirtual, Operand::Call(CallTarget::Intrinsic(i))) if !i.is_virtual() => {
                return Err(malformed_operand!(
                    opcode.mnemonic(),
                    "'{}' requires a static call",
                    i.name()
                ));
            }
            (Opcode::InvokeVirtual, Operand::Call(CallTarget::Method(m))) if m.params.is_empty() => {
                return Err(malformed_operand!(
                    opcode.mnemonic(),
                    "virtual call '{}' has no receiver",
                    m.name
                ));
            }
            (_, Operand::Call(call))
                if call.param_count() > usize::from(StackBehavior::MAX_SLOTS) =>
            {
                return Err(malformed_operand!(opcode.mnemonic(), "too many parameters"));
            }
            (_, Operand::Opaque(effect))
                if effect.pops > StackBehavior::MAX_SLOTS
                    || effect.pushes > StackBehavior::MAX_SLOTS =>
            {
                return Err(malformed_operand!(
                    opcode.mnemonic(),
                    "declared effect -{}/+{} out of range",
                    effect.pops,
                    effect.pushes
                ));
            }
            (Opcode::Switch, Operand::Switch(targets)) if targets.is_empty() => {
                return Err(malformed_operand!(opcode.mnemonic(), "empty switch table"));
            }
            _ => {}
        }

        Ok(Instruction { opcode, operand })
    }

    /// Constructs an operand-less instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedOperand`] if `opcode` requires an operand.
    pub fn simple(opcode: Opcode) -> Result<Self> {
        Self::new(opcode, Operand::None)
    }

    /// Pushes a 32-bit integer constant.
    #[must_use]
    pub fn iconst(value: i32) -> Self {
        Instruction {
            opcode: Opcode::IConst,
            operand: Operand::Immediate(Immediate::Int32(value)),
        }
    }

    /// Pushes a 64-bit integer constant.
    #[must_use]
    pub fn lconst(value: i64) -> Self {
        Instruction {
            opcode: Opcode::LConst,
            operand: Operand::Immediate(Immediate::Int64(value)),
        }
    }

    /// Pushes a pooled string constant.
    #[must_use]
    pub fn sconst(value: impl Into<String>) -> Self {
        Instruction {
            opcode: Opcode::SConst,
            operand: Operand::String(value.into()),
        }
    }

    /// Calls an intrinsic with the invoke kind it requires.
    #[must_use]
    pub fn intrinsic(intrinsic: Intrinsic) -> Self {
        let opcode = if intrinsic.is_virtual() {
            Opcode::InvokeVirtual
        } else {
            Opcode::InvokeStatic
        };
        Instruction {
            opcode,
            operand: Operand::Call(CallTarget::Intrinsic(intrinsic)),
        }
    }

    /// The opcode of this instruction.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The operand of this instruction.
    #[must_use]
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Human-readable mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.opcode.mnemonic()
    }

    /// Functional category of this instruction.
    #[must_use]
    pub fn category(&self) -> InstructionCategory {
        self.opcode.category()
    }

    /// How this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Computes the stack effect from opcode and operand.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn stack_behavior(&self) -> StackBehavior {
        match self.opcode {
            Opcode::Nop | Opcode::Goto | Opcode::Return => StackBehavior::new(0, 0),
            Opcode::IConst
            | Opcode::LConst
            | Opcode::SConst
            | Opcode::LdTable
            | Opcode::LdHandle
            | Opcode::ILoad => StackBehavior::new(0, 1),
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
            | Opcode::LUshr
            | Opcode::BaLoad => StackBehavior::new(2, 1),
            Opcode::INeg
            | Opcode::INot
            | Opcode::L2I
            | Opcode::I2L
            | Opcode::I2S
            | Opcode::I2B
            | Opcode::ArrayLength => StackBehavior::new(1, 1),
            Opcode::IStore
            | Opcode::Pop
            | Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::Switch
            | Opcode::IReturn
            | Opcode::Throw => StackBehavior::new(1, 0),
            Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe => StackBehavior::new(2, 0),
            Opcode::Dup => StackBehavior::new(1, 2),
            Opcode::Swap => StackBehavior::new(2, 2),
            Opcode::InvokeStatic | Opcode::InvokeVirtual => match &self.operand {
                // Parameter count is bounded by the constructor
                Operand::Call(call) => StackBehavior::new(
                    call.param_count() as u8,
                    u8::from(call.returns().is_some()),
                ),
                _ => StackBehavior::new(0, 0),
            },
            Opcode::Opaque => match &self.operand {
                Operand::Opaque(effect) => StackBehavior::new(effect.pops, effect.pushes),
                _ => StackBehavior::new(0, 0),
            },
        }
    }

    /// Slot types consumed by this instruction, bottom of stack first.
    ///
    /// Returns `None` for instructions whose consumed types depend on the stack contents
    /// (`dup`, `pop`, `swap`, `opaque`).
    #[must_use]
    pub fn popped_types(&self) -> Option<Vec<SlotType>> {
        use SlotType::{Int, Long, Reference};

        let types = match self.opcode {
            Opcode::IAdd
            | Opcode::ISub
            | Opcode::IMul
            | Opcode::IAnd
            | Opcode::IOr
            | Opcode::IXor
            | Opcode::IfICmpEq
            | Opcode::IfICmpNe
            | Opcode::IfICmpLt
            | Opcode::IfICmpGe
            | Opcode::IfICmpGt
            | Opcode::IfICmpLe
            | Opcode::IShl
            | Opcode::IShr
            | Opcode::IUshr => vec![Int, Int],
            Opcode::LAnd | Opcode::LOr | Opcode::LXor => vec![Long, Long],
            Opcode::LShl | Opcode::LShr | Opcode::LUshr => vec![Long, Int],
            Opcode::INeg
            | Opcode::INot
            | Opcode::I2L
            | Opcode::I2S
            | Opcode::I2B
            | Opcode::IStore
            | Opcode::IfEq
            | Opcode::IfNe
            | Opcode::IfLt
            | Opcode::IfGe
            | Opcode::IfGt
            | Opcode::IfLe
            | Opcode::Switch
            | Opcode::IReturn => vec![Int],
            Opcode::L2I => vec![Long],
            Opcode::BaLoad => vec![Reference, Int],
            Opcode::ArrayLength | Opcode::Throw => vec![Reference],
            Opcode::InvokeStatic | Opcode::InvokeVirtual => match &self.operand {
                Operand::Call(CallTarget::Intrinsic(i)) => i.params().to_vec(),
                Operand::Call(CallTarget::Method(m)) => m.params.clone(),
                _ => Vec::new(),
            },
            Opcode::Dup | Opcode::Pop | Opcode::Swap | Opcode::Opaque => return None,
            _ => Vec::new(),
        };
        Some(types)
    }

    /// Slot type pushed by this instruction, for instructions that push a single new value.
    ///
    /// Returns `None` for instructions that push nothing or re-push existing values
    /// (`dup`, `swap`).
    #[must_use]
    pub fn pushed_type(&self) -> Option<SlotType> {
        match self.opcode {
            Opcode::IConst
            | Opcode::ILoad
            | Opcode::IAdd
            | Opcode::ISub
            | Opcode::IMul
            | Opcode::IAnd
            | Opcode::IOr
            | Opcode::IXor
            | Opcode::INeg
            | Opcode::INot
            | Opcode::IShl
            | Opcode::IShr
            | Opcode::IUshr
            | Opcode::L2I
            | Opcode::I2S
            | Opcode::I2B
            | Opcode::BaLoad
            | Opcode::ArrayLength => Some(SlotType::Int),
            Opcode::LConst
            | Opcode::LdHandle
            | Opcode::LAnd
            | Opcode::LOr
            | Opcode::LXor
            | Opcode::LShl
            | Opcode::LShr
            | Opcode::LUshr
            | Opcode::I2L => Some(SlotType::Long),
            Opcode::SConst | Opcode::LdTable => Some(SlotType::Reference),
            Opcode::InvokeStatic | Opcode::InvokeVirtual => match &self.operand {
                Operand::Call(call) => call.returns(),
                _ => None,
            },
            Opcode::Opaque => match &self.operand {
                Operand::Opaque(effect) if effect.pushes > 0 => Some(SlotType::Any),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the value pushed if this is a 32-bit integer literal load.
    #[must_use]
    pub fn int_literal(&self) -> Option<i32> {
        match (self.opcode, &self.operand) {
            (Opcode::IConst, Operand::Immediate(Immediate::Int32(value))) => Some(*value),
            _ => None,
        }
    }

    /// Returns the integer immediate embedded in this instruction, if any.
    #[must_use]
    pub fn immediate(&self) -> Option<Immediate> {
        match &self.operand {
            Operand::Immediate(imm) => Some(*imm),
            _ => None,
        }
    }

    /// Check if this instruction can transfer control to a target position.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Switch
        )
    }

    /// Check if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::UnconditionalBranch | FlowType::Return | FlowType::Throw
        )
    }

    /// Branch target positions referenced by this instruction.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Rewrites every branch target through `remap`.
    pub(crate) fn remap_targets(&mut self, remap: impl Fn(usize) -> usize) {
        match &mut self.operand {
            Operand::Target(target) => *target = remap(*target),
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = remap(*target);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand.as_string() {
            Some(operand) => write!(f, "{} {}", self.opcode.mnemonic(), operand),
            None => f.write_str(self.opcode.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::Error;

    #[test]
    fn test_operand_validation() {
        assert!(Instruction::new(Opcode::IConst, Operand::Immediate(Immediate::Int32(1))).is_ok());
        assert!(Instruction::new(Opcode::IConst, Operand::Immediate(Immediate::Int64(1))).is_err());
        assert!(Instruction::new(Opcode::Goto, Operand::None).is_err());
        assert!(Instruction::simple(Opcode::IAdd).is_ok());

        let err = Instruction::new(Opcode::IXor, Operand::Local(3)).unwrap_err();
        assert!(matches!(err, Error::MalformedOperand { opcode: "ixor", .. }));
    }

    #[test]
    fn test_call_kind_validation() {
        let length = Operand::Call(CallTarget::Intrinsic(Intrinsic::StringLength));
        assert!(Instruction::new(Opcode::InvokeStatic, length.clone()).is_err());
        assert!(Instruction::new(Opcode::InvokeVirtual, length).is_ok());

        let min = Operand::Call(CallTarget::Intrinsic(Intrinsic::Min));
        assert!(Instruction::new(Opcode::InvokeVirtual, min).is_err());

        let no_receiver = Operand::Call(CallTarget::Method(MethodRef {
            name: "Foo.bar".into(),
            params: vec![],
            returns: None,
        }));
        assert!(Instruction::new(Opcode::InvokeVirtual, no_receiver).is_err());
    }

    #[test]
    fn test_empty_switch_rejected() {
        assert!(Instruction::new(Opcode::Switch, Operand::Switch(vec![])).is_err());
        assert!(Instruction::new(Opcode::Switch, Operand::Switch(vec![0, 1])).is_ok());
    }

    #[test]
    fn test_stack_behavior_consistent_with_types() {
        for opcode in Opcode::iter() {
            let operand = match opcode.operand_type() {
                OperandType::None => Operand::None,
                OperandType::Int32 => Operand::Immediate(Immediate::Int32(0)),
                OperandType::Int64 => Operand::Immediate(Immediate::Int64(0)),
                OperandType::String => Operand::String("x".into()),
                OperandType::Target => Operand::Target(0),
                OperandType::Switch => Operand::Switch(vec![0]),
                OperandType::Local => Operand::Local(0),
                OperandType::Call => Operand::Call(CallTarget::Intrinsic(
                    if opcode == Opcode::InvokeVirtual {
                        Intrinsic::StringLength
                    } else {
                        Intrinsic::Max
                    },
                )),
                OperandType::Aux => Operand::Aux(AuxId(0)),
                OperandType::Opaque => Operand::Opaque(OpaqueEffect { pops: 1, pushes: 1 }),
            };
            let instr = Instruction::new(opcode, operand).unwrap();
            let behavior = instr.stack_behavior();

            if let Some(popped) = instr.popped_types() {
                assert_eq!(popped.len(), usize::from(behavior.pops), "{opcode}");
            }
            if instr.pushed_type().is_some() {
                assert_eq!(behavior.pushes, 1, "{opcode}");
            }
        }
    }

    #[test]
    fn test_flow_classification() {
        let goto = Instruction::new(Opcode::Goto, Operand::Target(4)).unwrap();
        assert!(goto.is_branch());
        assert!(goto.is_terminal());
        assert_eq!(goto.branch_targets(), vec![4]);

        let cond = Instruction::new(Opcode::IfNe, Operand::Target(2)).unwrap();
        assert!(cond.is_branch());
        assert!(!cond.is_terminal());

        let ret = Instruction::simple(Opcode::IReturn).unwrap();
        assert!(ret.is_terminal());
        assert_eq!(ret.category(), InstructionCategory::ControlFlow);
    }

    #[test]
    fn test_literals_and_display() {
        let push = Instruction::iconst(-27282);
        assert_eq!(push.int_literal(), Some(-27282));
        assert_eq!(push.to_string(), "iconst -27282");
        assert_eq!(Instruction::lconst(5).int_literal(), None);
        assert_eq!(
            Instruction::lconst(5).immediate(),
            Some(Immediate::Int64(5))
        );
        assert_eq!(format!("{:X}", Immediate::Int32(-1)), "FFFFFFFF");
        assert_eq!(
            Instruction::intrinsic(Intrinsic::StringLength).to_string(),
            "invokevirtual string.length"
        );
    }

    #[test]
    fn test_remap_targets() {
        let mut switch = Instruction::new(Opcode::Switch, Operand::Switch(vec![1, 5, 9])).unwrap();
        switch.remap_targets(|t| if t > 4 { t + 3 } else { t });
        assert_eq!(switch.branch_targets(), vec![1, 8, 12]);
    }
}
