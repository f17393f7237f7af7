//! Static stack-effect analysis.
//!
//! [`StackAnalyzer`] tracks the depth and slot types of the operand stack without executing
//! anything. It answers two kinds of questions:
//!
//! - For a straight-line block (typically a candidate replacement): what is the depth before
//!   every instruction, what is the net delta, and does it ever underflow?
//! - For a whole [`InstructionSequence`]: following branch edges and exception handler
//!   entries, does every merge point agree on the stack depth?
//!
//! A replacement for a literal load must have the exact effect of that load: pop nothing,
//! push one [`SlotType::Int`]. [`StackAnalyzer::validate_replacement`] checks this.

use std::collections::VecDeque;
use std::fmt;

use crate::{
    assembly::{Instruction, InstructionSequence, Opcode, SlotType},
    Error, Result,
};

/// Abstract operand stack: one [`SlotType`] per occupied slot, bottom first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackState {
    slots: Vec<SlotType>,
}

impl StackState {
    /// An empty stack.
    #[must_use]
    pub fn empty() -> Self {
        StackState { slots: Vec::new() }
    }

    /// A stack holding `slots`, bottom first.
    #[must_use]
    pub fn from_slots(slots: Vec<SlotType>) -> Self {
        StackState { slots }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots, bottom first.
    #[must_use]
    pub fn slots(&self) -> &[SlotType] {
        &self.slots
    }

    /// Type of the top slot.
    #[must_use]
    pub fn top(&self) -> Option<SlotType> {
        self.slots.last().copied()
    }

    /// Combines two states reaching the same position.
    ///
    /// Returns `None` if the depths differ. Slots whose types disagree become
    /// [`SlotType::Any`].
    #[must_use]
    pub fn merge(&self, other: &StackState) -> Option<StackState> {
        if self.depth() != other.depth() {
            return None;
        }
        let slots = self
            .slots
            .iter()
            .zip(&other.slots)
            .map(|(a, b)| if a == b { *a } else { SlotType::Any })
            .collect();
        Some(StackState { slots })
    }

    /// Applies `instr` assuming the depth check has already passed.
    fn apply(&mut self, instr: &Instruction) {
        let behavior = instr.stack_behavior();
        match instr.opcode() {
            Opcode::Dup => {
                if let Some(top) = self.top() {
                    self.slots.push(top);
                }
            }
            Opcode::Swap => {
                let len = self.slots.len();
                self.slots.swap(len - 2, len - 1);
            }
            _ => {
                let base = self.slots.len() - usize::from(behavior.pops);
                self.slots.truncate(base);
                let pushed = instr.pushed_type().unwrap_or(SlotType::Any);
                for _ in 0..behavior.pushes {
                    self.slots.push(pushed);
                }
            }
        }
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, slot) in self.slots.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot:?}")?;
        }
        write!(f, "]")
    }
}

/// Net effect of a straight-line run of instructions, in the `(popped, pushed)` form.
///
/// `popped` is how many values the run consumes from below its own entry point; `pushed` is
/// how many values it leaves on top of that. A literal load has the effect `(0, 1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEffect {
    /// Values consumed from the caller's stack
    pub popped: usize,
    /// Values left for the caller
    pub pushed: usize,
    /// Types of the pushed values, bottom first ([`SlotType::Any`] where unknown)
    pub pushed_types: Vec<SlotType>,
}

impl StackEffect {
    /// Computes the effect of `instructions` executed in order.
    ///
    /// Never fails: values taken from below the entry point count towards `popped`.
    #[must_use]
    pub fn of(instructions: &[Instruction]) -> Self {
        let mut popped = 0;
        let mut state = StackState::empty();
        for instr in instructions {
            let needed = usize::from(instr.stack_behavior().pops);
            if state.depth() < needed {
                let deficit = needed - state.depth();
                popped += deficit;
                let mut slots = vec![SlotType::Any; deficit];
                slots.append(&mut state.slots);
                state.slots = slots;
            }
            state.apply(instr);
        }
        StackEffect {
            popped,
            pushed: state.depth(),
            pushed_types: state.slots,
        }
    }

    /// Returns `true` for the effect of a single integer literal load.
    #[must_use]
    pub fn is_int_push(&self) -> bool {
        self.popped == 0 && self.pushed_types == [SlotType::Int]
    }
}

/// Per-position result of analyzing a straight-line block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAnalysis {
    /// Depth before each instruction, followed by the depth after the last one
    pub depths: Vec<usize>,
    /// Deepest point reached
    pub max_depth: usize,
    /// Stack after the last instruction
    pub exit: StackState,
}

impl BlockAnalysis {
    /// Net change in depth across the whole block.
    #[must_use]
    pub fn net_delta(&self) -> i64 {
        let first = self.depths.first().copied().unwrap_or(0);
        let last = self.depths.last().copied().unwrap_or(0);
        i64::try_from(last).unwrap_or(i64::MAX) - i64::try_from(first).unwrap_or(i64::MAX)
    }
}

/// Result of analyzing a full sequence along its control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceAnalysis {
    states: Vec<Option<StackState>>,
    max_depth: usize,
}

impl SequenceAnalysis {
    /// Stack on entry to `position`, `None` if the position is unreachable.
    #[must_use]
    pub fn state_at(&self, position: usize) -> Option<&StackState> {
        self.states.get(position).and_then(Option::as_ref)
    }

    /// Depth on entry to `position`, `None` if the position is unreachable.
    #[must_use]
    pub fn depth_at(&self, position: usize) -> Option<usize> {
        self.state_at(position).map(StackState::depth)
    }

    /// Deepest point reached on any path.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Positions not reached from the entry point or any handler.
    #[must_use]
    pub fn unreachable(&self) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(position, state)| state.is_none().then_some(position))
            .collect()
    }
}

/// Static analyzer for operand-stack depth and slot types.
///
/// # Examples
///
/// ```rust
/// use litcloak::analysis::StackAnalyzer;
/// use litcloak::assembly::{Instruction, Opcode};
///
/// let block = vec![
///     Instruction::iconst(3),
///     Instruction::iconst(4),
///     Instruction::simple(Opcode::IAdd)?,
/// ];
/// let analysis = StackAnalyzer::new().validate_replacement(&block)?;
/// assert_eq!(analysis.depths, vec![0, 1, 2, 1]);
/// assert_eq!(analysis.max_depth, 2);
/// # Ok::<(), litcloak::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct StackAnalyzer {
    strategy: Option<String>,
}

impl StackAnalyzer {
    /// Creates an analyzer for arbitrary code.
    #[must_use]
    pub fn new() -> Self {
        StackAnalyzer { strategy: None }
    }

    /// Creates an analyzer whose errors name `strategy` as the producer of the code.
    #[must_use]
    pub fn for_strategy(strategy: impl Into<String>) -> Self {
        StackAnalyzer {
            strategy: Some(strategy.into()),
        }
    }

    fn context(&self) -> String {
        self.strategy
            .clone()
            .unwrap_or_else(|| "sequence".to_string())
    }

    /// Applies one instruction to `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if the instruction pops more values than `state`
    /// holds, and [`Error::StackImbalance`] if a consumed slot has the wrong type.
    pub fn step(&self, state: &mut StackState, instr: &Instruction, position: usize) -> Result<()> {
        let pops = usize::from(instr.stack_behavior().pops);
        if state.depth() < pops {
            return Err(Error::StackUnderflow {
                position,
                strategy: self.strategy.clone(),
            });
        }

        if let Some(expected) = instr.popped_types() {
            let base = state.depth() - pops;
            for (want, have) in expected.iter().zip(&state.slots()[base..]) {
                if !want.accepts(*have) {
                    return Err(Error::StackImbalance {
                        context: self.context(),
                        position,
                        expected: format!("{want:?} operand for {}", instr.mnemonic()),
                        actual: format!("{have:?}"),
                    });
                }
            }
        }

        state.apply(instr);
        Ok(())
    }

    /// Analyzes straight-line code starting from `entry`, ignoring branch edges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] or [`Error::StackImbalance`] from [`Self::step`].
    pub fn analyze_block(
        &self,
        instructions: &[Instruction],
        entry: StackState,
    ) -> Result<BlockAnalysis> {
        let mut state = entry;
        let mut depths = Vec::with_capacity(instructions.len() + 1);
        let mut max_depth = state.depth();

        for (position, instr) in instructions.iter().enumerate() {
            depths.push(state.depth());
            self.step(&mut state, instr, position)?;
            max_depth = max_depth.max(state.depth());
        }
        depths.push(state.depth());

        Ok(BlockAnalysis {
            depths,
            max_depth,
            exit: state,
        })
    }

    /// Checks that `instructions` can stand in for a single integer literal load.
    ///
    /// Starting from an empty stack, the block must never underflow and must finish with
    /// exactly one [`SlotType::Int`] on the stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if the block reaches below its entry point, or
    /// [`Error::StackImbalance`] if it leaves anything other than one integer.
    pub fn validate_replacement(&self, instructions: &[Instruction]) -> Result<BlockAnalysis> {
        let analysis = self.analyze_block(instructions, StackState::empty())?;
        if analysis.exit.slots() != [SlotType::Int] {
            return Err(Error::StackImbalance {
                context: self.context(),
                position: instructions.len(),
                expected: "[Int]".to_string(),
                actual: analysis.exit.to_string(),
            });
        }
        Ok(analysis)
    }

    /// Analyzes a whole sequence along its control flow.
    ///
    /// Position 0 is entered with an empty stack; every handler start is entered with a
    /// single [`SlotType::Reference`] (the thrown value). States are propagated along
    /// fall-through and branch edges until a fixpoint is reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnderflow`] if any reachable instruction underflows, or
    /// [`Error::StackImbalance`] if two paths reach a position with different depths.
    pub fn analyze_sequence(&self, sequence: &InstructionSequence) -> Result<SequenceAnalysis> {
        let len = sequence.len();
        let mut states: Vec<Option<StackState>> = vec![None; len];
        let mut worklist = VecDeque::new();

        if len > 0 {
            self.merge_into(&mut states, &mut worklist, 0, StackState::empty())?;
        }
        for handler in sequence.handlers() {
            let entry = StackState::from_slots(vec![SlotType::Reference]);
            self.merge_into(&mut states, &mut worklist, handler.handler_start, entry)?;
        }

        let mut max_depth = 0;
        while let Some(position) = worklist.pop_front() {
            let Some(mut state) = states[position].clone() else {
                continue;
            };
            let instr = &sequence.instructions()[position];
            self.step(&mut state, instr, position)?;
            max_depth = max_depth.max(state.depth());

            let mut successors = instr.branch_targets();
            if !instr.is_terminal() && position + 1 < len {
                successors.push(position + 1);
            }
            for successor in successors {
                self.merge_into(&mut states, &mut worklist, successor, state.clone())?;
            }
        }

        Ok(SequenceAnalysis { states, max_depth })
    }

    fn merge_into(
        &self,
        states: &mut [Option<StackState>],
        worklist: &mut VecDeque<usize>,
        position: usize,
        incoming: StackState,
    ) -> Result<()> {
        match &states[position] {
            None => {
                states[position] = Some(incoming);
                worklist.push_back(position);
            }
            Some(existing) => {
                let merged = existing.merge(&incoming).ok_or_else(|| Error::StackImbalance {
                    context: self.context(),
                    position,
                    expected: format!("depth {}", existing.depth()),
                    actual: format!("depth {}", incoming.depth()),
                })?;
                if &merged != existing {
                    states[position] = Some(merged);
                    worklist.push_back(position);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{
        ExceptionHandler, Intrinsic, OpaqueEffect, Operand, SequenceBuilder,
    };

    fn simple(opcode: Opcode) -> Instruction {
        Instruction::simple(opcode).unwrap()
    }

    #[test]
    fn test_block_depths_and_delta() {
        let block = vec![
            Instruction::iconst(-27282),
            simple(Opcode::INot),
            Instruction::iconst(19604),
            Instruction::iconst(16782),
            simple(Opcode::IOr),
            simple(Opcode::IXor),
        ];
        let analysis = StackAnalyzer::new()
            .analyze_block(&block, StackState::empty())
            .unwrap();
        assert_eq!(analysis.depths, vec![0, 1, 1, 2, 3, 2, 1]);
        assert_eq!(analysis.max_depth, 3);
        assert_eq!(analysis.net_delta(), 1);
    }

    #[test]
    fn test_underflow_names_strategy() {
        let block = vec![Instruction::iconst(1), simple(Opcode::IAdd)];
        let err = StackAnalyzer::for_strategy("broken")
            .validate_replacement(&block)
            .unwrap_err();
        assert_eq!(
            err,
            Error::StackUnderflow {
                position: 1,
                strategy: Some("broken".into())
            }
        );
    }

    #[test]
    fn test_replacement_must_leave_one_int() {
        let analyzer = StackAnalyzer::for_strategy("test");

        let two = vec![Instruction::iconst(1), Instruction::iconst(2)];
        assert!(matches!(
            analyzer.validate_replacement(&two),
            Err(Error::StackImbalance { .. })
        ));

        let long = vec![Instruction::lconst(1)];
        assert!(matches!(
            analyzer.validate_replacement(&long),
            Err(Error::StackImbalance { .. })
        ));

        let widened = vec![Instruction::lconst(1), simple(Opcode::L2I)];
        assert!(analyzer.validate_replacement(&widened).is_ok());
    }

    #[test]
    fn test_operand_type_mismatch() {
        let block = vec![
            Instruction::sconst("abc"),
            Instruction::intrinsic(Intrinsic::ReverseBytes16),
        ];
        assert!(matches!(
            StackAnalyzer::new().validate_replacement(&block),
            Err(Error::StackImbalance { position: 1, .. })
        ));
    }

    #[test]
    fn test_stack_effect_counts_values_from_below() {
        let effect = StackEffect::of(&[Instruction::iconst(1)]);
        assert!(effect.is_int_push());

        let effect = StackEffect::of(&[simple(Opcode::IAdd)]);
        assert_eq!((effect.popped, effect.pushed), (2, 1));

        let effect = StackEffect::of(&[simple(Opcode::Dup), simple(Opcode::Pop)]);
        assert_eq!((effect.popped, effect.pushed), (1, 1));

        let opaque = Instruction::new(
            Opcode::Opaque,
            Operand::Opaque(OpaqueEffect { pops: 3, pushes: 2 }),
        )
        .unwrap();
        let effect = StackEffect::of(&[Instruction::iconst(0), opaque]);
        assert_eq!((effect.popped, effect.pushed), (2, 2));
        assert_eq!(effect.pushed_types, vec![SlotType::Any, SlotType::Any]);
    }

    #[test]
    fn test_sequence_merge_points_agree() {
        let mut builder = SequenceBuilder::new("select");
        builder
            .iload(0)
            .unwrap()
            .branch(Opcode::IfEq, "other")
            .unwrap()
            .push_int(1)
            .unwrap()
            .branch(Opcode::Goto, "join")
            .unwrap()
            .label("other")
            .unwrap()
            .push_int(2)
            .unwrap()
            .label("join")
            .unwrap()
            .ret_value()
            .unwrap();
        let seq = builder.build().unwrap();

        let analysis = StackAnalyzer::new().analyze_sequence(&seq).unwrap();
        assert_eq!(analysis.depth_at(5), Some(1));
        assert_eq!(analysis.max_depth(), 1);
        assert!(analysis.unreachable().is_empty());
    }

    #[test]
    fn test_sequence_depth_conflict() {
        let mut builder = SequenceBuilder::new("conflict");
        builder
            .iload(0)
            .unwrap()
            .branch(Opcode::IfEq, "join")
            .unwrap()
            .push_int(1)
            .unwrap()
            .label("join")
            .unwrap()
            .ret()
            .unwrap();
        let seq = builder.build().unwrap();

        assert!(matches!(
            StackAnalyzer::new().analyze_sequence(&seq),
            Err(Error::StackImbalance { position: 3, .. })
        ));
    }

    #[test]
    fn test_handler_entry_and_unreachable() {
        let instructions = vec![
            Instruction::iconst(1),
            simple(Opcode::Pop),
            simple(Opcode::Return),
            simple(Opcode::Throw),
            simple(Opcode::Nop),
        ];
        let handler = ExceptionHandler {
            try_start: 0,
            try_end: 2,
            handler_start: 3,
            handler_end: 4,
        };
        let seq = InstructionSequence::with_handlers("eh", instructions, vec![handler]).unwrap();

        let analysis = StackAnalyzer::new().analyze_sequence(&seq).unwrap();
        assert_eq!(
            analysis.state_at(3).unwrap().slots(),
            &[SlotType::Reference]
        );
        assert_eq!(analysis.unreachable(), vec![4]);
    }

    #[test]
    fn test_merge_widens_types() {
        let a = StackState::from_slots(vec![SlotType::Int, SlotType::Long]);
        let b = StackState::from_slots(vec![SlotType::Int, SlotType::Reference]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.slots(), &[SlotType::Int, SlotType::Any]);
        assert!(a.merge(&StackState::empty()).is_none());
        assert_eq!(merged.to_string(), "[Int, Any]");
    }
}
