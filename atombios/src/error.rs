//! Error types for ROM construction and command invocation.
//!
//! Split along the severity boundary of the interpreter: failures while
//! building an [`crate::AtomBios`] from a ROM image are fatal to
//! construction, failures while running a command are fatal to that single
//! invocation only. Everything else (unimplemented I/O modes, malformed
//! SWITCH tables, out-of-range `SET_DATA_TABLE`, ...) is a warning logged
//! through the host's [`crate::host::LogSink`] and does not appear here.

use thiserror::Error;

/// Failures that abort [`crate::AtomBios::new`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructError {
    /// `ROM[0..2] != 0xAA55`.
    #[error("ROM is missing the 0xAA55 BIOS magic")]
    BadMagic,
    /// `ROM[0x30..0x3A] != " 761295520"`.
    #[error("ROM is missing the ATI \" 761295520\" magic")]
    BadAtiMagic,
    /// The AtomRomTable's 4-byte magic is not "ATOM".
    #[error("AtomRomTable is missing the \"ATOM\" magic")]
    BadAtomMagic,
    /// A structure pointer or declared size runs past the end of the ROM.
    #[error("ROM is truncated: a structure extends past the end of the image")]
    TruncatedRom,
}

/// Failures that abort the current top-level [`crate::AtomBios::run_command`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationError {
    /// Decoded a byte that does not correspond to any known opcode.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// An instruction fetch or operand read ran past the command's bytecode region.
    #[error("bytecode access out of range")]
    BytecodeOutOfRange,
    /// `CALL_TABLE` referenced a command index with no bytecode.
    #[error("CALL_TABLE referenced missing command index {0}")]
    MissingCallee(u8),
    /// `CALL_TABLE` recursion exceeded [`crate::vm::MAX_CALL_DEPTH`].
    #[error("CALL_TABLE recursion limit exceeded")]
    RecursionLimit,
    /// The top-level call executed more than [`crate::vm::MAX_INSTRUCTION_BUDGET`] opcodes.
    #[error("instruction budget exhausted")]
    InstructionBudget,
    /// The requested command table has no bytecode in this ROM.
    #[error("command table {0:?} is absent from this ROM")]
    CommandAbsent(crate::tables::CommandTableId),
}
