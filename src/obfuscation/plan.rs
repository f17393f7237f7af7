//! Strategy trees and the flattened rewrites they produce.
//!
//! A [`RewritePlan`] is the selector's answer for one site: a tree of strategy applications
//! whose leaves are plain literals. Flattening the tree in operand order yields the
//! replacement instruction sequence, since every nested subtree pushes exactly the value the
//! literal it stands in for would have pushed.

use std::fmt;

use crate::assembly::{AuxiliaryData, Instruction};

/// One node of a strategy tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    /// A literal emitted as `iconst`
    Literal(i32),
    /// A strategy application
    Strategy {
        /// Strategy name
        strategy: String,
        /// Value this subtree computes
        target: i16,
        /// Template with nested operands
        parts: Vec<PlanPart>,
        /// Declarations required by this node's own instructions
        auxiliary: Vec<AuxiliaryData>,
    },
}

/// One element of a [`PlanNode::Strategy`] template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanPart {
    /// A fixed instruction of the template
    Instruction(Instruction),
    /// An operand slot, either a literal or a nested strategy
    Operand(PlanNode),
}

impl PlanNode {
    /// Depth of the tree; a literal has depth 0.
    #[must_use]
    pub fn depth(&self) -> u32 {
        match self {
            PlanNode::Literal(_) => 0,
            PlanNode::Strategy { parts, .. } => {
                1 + parts
                    .iter()
                    .filter_map(|part| match part {
                        PlanPart::Operand(node) => Some(node.depth()),
                        PlanPart::Instruction(_) => None,
                    })
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    /// Strategy name at this node, `None` for literals.
    #[must_use]
    pub fn strategy(&self) -> Option<&str> {
        match self {
            PlanNode::Literal(_) => None,
            PlanNode::Strategy { strategy, .. } => Some(strategy),
        }
    }

    /// Renders the tree, e.g. `bitwise-composition(byte-reversal, 19604, 16782)`.
    ///
    /// Operand-less strategies render as their bare name.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            PlanNode::Literal(value) => value.to_string(),
            PlanNode::Strategy {
                strategy, parts, ..
            } => {
                let operands: Vec<String> = parts
                    .iter()
                    .filter_map(|part| match part {
                        PlanPart::Operand(node) => Some(node.render()),
                        PlanPart::Instruction(_) => None,
                    })
                    .collect();
                if operands.is_empty() {
                    strategy.clone()
                } else {
                    format!("{strategy}({})", operands.join(", "))
                }
            }
        }
    }

    fn flatten(&self, instructions: &mut Vec<Instruction>, auxiliary: &mut Vec<AuxiliaryData>) {
        match self {
            PlanNode::Literal(value) => instructions.push(Instruction::iconst(*value)),
            PlanNode::Strategy {
                parts,
                auxiliary: own,
                ..
            } => {
                auxiliary.extend(own.iter().cloned());
                for part in parts {
                    match part {
                        PlanPart::Instruction(instr) => instructions.push(instr.clone()),
                        PlanPart::Operand(node) => node.flatten(instructions, auxiliary),
                    }
                }
            }
        }
    }
}

/// The complete rewrite of one literal site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    /// Position of the site in the sequence being rewritten
    pub position: usize,
    /// The literal value
    pub target: i16,
    /// Strategy tree
    pub root: PlanNode,
    instructions: Vec<Instruction>,
    auxiliary: Vec<AuxiliaryData>,
}

impl RewritePlan {
    /// Flattens `root` into a plan for the site at `position`.
    #[must_use]
    pub fn new(position: usize, target: i16, root: PlanNode) -> Self {
        let mut instructions = Vec::new();
        let mut auxiliary = Vec::new();
        root.flatten(&mut instructions, &mut auxiliary);
        RewritePlan {
            position,
            target,
            root,
            instructions,
            auxiliary,
        }
    }

    /// The replacement sequence.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Declarations required by the replacement.
    #[must_use]
    pub fn auxiliary(&self) -> &[AuxiliaryData] {
        &self.auxiliary
    }

    /// Consumes the plan, returning the replacement and its declarations.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Instruction>, Vec<AuxiliaryData>) {
        (self.instructions, self.auxiliary)
    }

    /// Name of the strategy at the root.
    #[must_use]
    pub fn root_strategy(&self) -> &str {
        self.root.strategy().unwrap_or("literal")
    }

    /// Rendered strategy tree.
    #[must_use]
    pub fn render(&self) -> String {
        self.root.render()
    }

    /// Depth of the strategy tree.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }

    /// Returns `true` if any emitted immediate equals the target sign-extended.
    #[must_use]
    pub fn leaks(&self) -> bool {
        let target = i64::from(self.target);
        self.instructions
            .iter()
            .filter_map(Instruction::immediate)
            .any(|imm| imm.as_i64() == target)
    }
}

impl fmt::Display for RewritePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} {} = {}", self.position, self.target, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{Intrinsic, Opcode};

    fn op(opcode: Opcode) -> PlanPart {
        PlanPart::Instruction(Instruction::simple(opcode).unwrap())
    }

    /// bitwise-composition(byte-reversal, 19604, 16782) for 9999
    fn nested() -> PlanNode {
        let reversal = PlanNode::Strategy {
            strategy: "byte-reversal".into(),
            target: -27282,
            parts: vec![
                PlanPart::Operand(PlanNode::Literal(0x6E95)),
                PlanPart::Instruction(Instruction::intrinsic(Intrinsic::ReverseBytes16)),
            ],
            auxiliary: Vec::new(),
        };
        PlanNode::Strategy {
            strategy: "bitwise-composition".into(),
            target: 9999,
            parts: vec![
                PlanPart::Operand(reversal),
                op(Opcode::INot),
                PlanPart::Operand(PlanNode::Literal(19604)),
                PlanPart::Operand(PlanNode::Literal(16782)),
                op(Opcode::IOr),
                op(Opcode::IXor),
            ],
            auxiliary: Vec::new(),
        }
    }

    #[test]
    fn test_render_and_depth() {
        let plan = RewritePlan::new(3, 9999, nested());
        assert_eq!(
            plan.render(),
            "bitwise-composition(byte-reversal(28309), 19604, 16782)"
        );
        assert_eq!(plan.depth(), 2);
        assert_eq!(plan.root_strategy(), "bitwise-composition");
        assert_eq!(plan.to_string(), format!("@3 9999 = {}", plan.render()));
    }

    #[test]
    fn test_flatten_in_operand_order() {
        let plan = RewritePlan::new(0, 9999, nested());
        let code = plan.instructions();
        assert_eq!(code.len(), 7);
        assert_eq!(code[0], Instruction::iconst(0x6E95));
        assert_eq!(code[1], Instruction::intrinsic(Intrinsic::ReverseBytes16));
        assert_eq!(code[3], Instruction::iconst(19604));
        assert!(!plan.leaks());
    }

    #[test]
    fn test_leak_detection_covers_wide_immediates() {
        let node = PlanNode::Strategy {
            strategy: "shift-reconstruction".into(),
            target: -1,
            parts: vec![PlanPart::Instruction(Instruction::lconst(-1))],
            auxiliary: Vec::new(),
        };
        assert!(RewritePlan::new(0, -1, node).leaks());
        assert!(RewritePlan::new(0, 5, PlanNode::Literal(5)).leaks());
    }

    #[test]
    fn test_leaf_renders_bare_name() {
        let leaf = PlanNode::Strategy {
            strategy: "indirect-memory-load".into(),
            target: 1,
            parts: vec![PlanPart::Instruction(Instruction::intrinsic(
                Intrinsic::ReadMemory16,
            ))],
            auxiliary: Vec::new(),
        };
        assert_eq!(leaf.render(), "indirect-memory-load");
        assert_eq!(leaf.depth(), 1);
    }
}
