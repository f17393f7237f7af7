use thiserror::Error;

macro_rules! malformed_operand {
    // Single string version
    ($opcode:expr, $msg:expr) => {
        crate::Error::MalformedOperand {
            opcode: $opcode,
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($opcode:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::MalformedOperand {
            opcode: $opcode,
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the lifecycle of a rewrite: construction of instructions, stack analysis
/// of candidate sequences, strategy selection, verification and finally the per-site outcome.
///
/// # Error Categories
///
/// ## Construction Errors
/// - [`Error::MalformedOperand`] - Operand does not match the opcode's declared operand type
/// - [`Error::InvalidReference`] - A branch target or handler range points outside the sequence
///
/// ## Strategy Defects (fatal for the whole call)
/// - [`Error::StackUnderflow`] - A sequence pops more values than are available
/// - [`Error::StackImbalance`] - A replacement does not leave exactly one integer
///
/// ## Recoverable Selection Errors
/// - [`Error::UnsupportedWidth`] - The target does not satisfy a strategy's preconditions
/// - [`Error::RewriteMismatch`] - The replacement evaluates to a different value or shape
/// - [`Error::ImmediateLeak`] - The replacement still embeds the target as an immediate
/// - [`Error::ExcessiveGrowth`] - The replacement exceeds the per-site size limit
///
/// ## Site and Pass Outcomes
/// - [`Error::ObfuscationFailed`] - The retry budget for one site has been exhausted
/// - [`Error::Cancelled`] - The pass was aborted between two sites
///
/// # Examples
///
/// ```rust
/// use litcloak::{Error, obfuscation::{obfuscate, Policy}};
/// use litcloak::assembly::SequenceBuilder;
///
/// let mut builder = SequenceBuilder::new("answer");
/// builder.push_int(42)?.ret_value()?;
/// let sequence = builder.build()?;
///
/// match obfuscate(&sequence, &Policy::default()) {
///     Ok(output) => println!("{}", output.report.summary()),
///     Err(Error::StackUnderflow { strategy, .. }) => eprintln!("defective strategy {strategy:?}"),
///     Err(e) => eprintln!("Other error: {e}"),
/// }
/// # Ok::<(), litcloak::Error>(())
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An instruction was constructed with an operand that does not fit its opcode.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed operand for '{opcode}' - {file}:{line}: {message}")]
    MalformedOperand {
        /// Mnemonic of the opcode being constructed
        opcode: &'static str,
        /// Description of the mismatch
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A structural cross-reference does not resolve to a valid position.
    #[error("Cross-reference at {position} points to {target}, sequence has {len} instructions")]
    InvalidReference {
        /// Position of the instruction or handler holding the reference
        position: usize,
        /// The unresolved target position
        target: usize,
        /// Length of the sequence
        len: usize,
    },

    /// The stack depth would become negative.
    ///
    /// When raised while validating a strategy expansion this indicates a defect in that
    /// strategy and aborts the whole obfuscation call.
    #[error("Stack underflow at position {position} (strategy: {strategy:?})")]
    StackUnderflow {
        /// Instruction position within the analyzed sequence
        position: usize,
        /// Strategy whose output was being analyzed, if any
        strategy: Option<String>,
    },

    /// A sequence leaves the stack in a different shape than required.
    ///
    /// Raised for replacements that do not push exactly one integer, for operands of the
    /// wrong slot type, and for control-flow merge points that disagree on stack depth.
    #[error("Stack imbalance in {context} at position {position}: expected {expected}, got {actual}")]
    StackImbalance {
        /// Strategy or sequence being analyzed
        context: String,
        /// Instruction position where the mismatch was found
        position: usize,
        /// Expected stack shape
        expected: String,
        /// Observed stack shape
        actual: String,
    },

    /// The target value does not satisfy the preconditions of a strategy.
    #[error("Value {value} is not supported by strategy '{strategy}'")]
    UnsupportedWidth {
        /// The value that could not be handled
        value: i64,
        /// Strategy that rejected it
        strategy: String,
    },

    /// A rewritten region does not reproduce the original value or stack shape.
    #[error("Rewrite mismatch at position {position} (strategy: {strategy:?}): expected {expected:?}, got {actual:?} - {reason}")]
    RewriteMismatch {
        /// Position in the original sequence
        position: usize,
        /// Strategy tree of the rejected rewrite, if known
        strategy: Option<String>,
        /// Value of the original literal, if the mismatch concerns a value
        expected: Option<i64>,
        /// Value produced by the replacement, if it produced one
        actual: Option<i64>,
        /// Why the comparison failed
        reason: String,
    },

    /// A replacement still contains the original literal as an immediate.
    #[error("Strategy '{strategy}' emitted the target {value} as an immediate")]
    ImmediateLeak {
        /// Root strategy of the leaking plan
        strategy: String,
        /// The leaked value
        value: i64,
    },

    /// A replacement is longer than the policy allows for a single site.
    #[error("Strategy '{strategy}' expanded to {len} instructions, limit is {limit}")]
    ExcessiveGrowth {
        /// Root strategy of the rejected plan
        strategy: String,
        /// Length of the replacement
        len: usize,
        /// Configured limit
        limit: usize,
    },

    /// Every attempt for one site failed.
    #[error("Obfuscation of {value} at position {position} failed after {attempts} attempts: {last}")]
    ObfuscationFailed {
        /// Position of the site in the original sequence
        position: usize,
        /// Literal value of the site
        value: i64,
        /// Number of attempts made
        attempts: u32,
        /// The error of the last attempt
        last: Box<Error>,
    },

    /// The simulator could not evaluate an instruction.
    #[error("Evaluation failed at position {position}: {message}")]
    Evaluation {
        /// Position of the failing instruction
        position: usize,
        /// Description of the failure
        message: String,
    },

    /// Two sequences passed to one parallel run share an identity.
    #[error("Sequence '{0}' was submitted more than once")]
    DuplicateSequence(String),

    /// A policy field is out of range.
    #[error("Invalid policy - {0}")]
    InvalidPolicy(String),

    /// The pass was aborted through its cancellation flag.
    #[error("Obfuscation pass was cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for errors that only invalidate one attempt at one site.
    ///
    /// The selector and the engine retry on these; every other error either ends the site
    /// or the whole call.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedWidth { .. }
                | Error::RewriteMismatch { .. }
                | Error::ImmediateLeak { .. }
                | Error::ExcessiveGrowth { .. }
        )
    }

    /// Returns `true` for errors that reveal a defect in a strategy implementation.
    #[must_use]
    pub fn is_strategy_defect(&self) -> bool {
        matches!(
            self,
            Error::StackUnderflow { .. } | Error::StackImbalance { .. }
        )
    }
}
