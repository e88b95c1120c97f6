//! The bytecode virtual machine: instruction decode, the address-space
//! model, flags, and control flow (spec §4.6), grounded on
//! `examples/original_source/src/atom-private.hpp` (encodings, `DST_TO_SRC`,
//! mask/shift tables) with per-opcode semantics per spec §4.6.4.

use alloc::vec;
use alloc::vec::Vec;

use crate::command::{CommandDirectory, CommandRecord};
use crate::error::InvocationError;
use crate::host::{log, Host, LogLevel};
use crate::iio::IioDirectory;
use crate::io::{self, IoMode};
use crate::rom::RomImage;
use crate::tables::{CommandTableId, DATA_TABLE_ENTRY_COUNT};

/// Recursion depth `CALL_TABLE` is allowed to reach before the top-level
/// invocation aborts.
pub const MAX_CALL_DEPTH: u32 = 32;

/// Upper bound on opcodes executed by a single `run` call, guarding against
/// runaway loops in malformed or hostile bytecode.
pub const MAX_INSTRUCTION_BUDGET: u64 = 1 << 24;

const WS_QUOTIENT: u32 = 0x40;
const WS_REMAINDER: u32 = 0x41;
const WS_DATAPTR: u32 = 0x42;
const WS_SHIFT: u32 = 0x43;
const WS_OR_MASK: u32 = 0x44;
const WS_AND_MASK: u32 = 0x45;
const WS_FB_WINDOW: u32 = 0x46;
const WS_ATTRIBUTES: u32 = 0x47;
const WS_REGPTR: u32 = 0x48;

/// Poison value FB/PLL/MC reads yield: these address spaces are accepted by
/// the encoding but have no backing store modeled in this core (spec
/// §4.6.2), matching the original's uninitialized-accumulator convention.
const UNMODELED_SPACE_POISON: u32 = 0xCDCD_CDCD;

/// The eight operand address spaces an attribute byte can name, in the
/// original's `OpcodeArgEncoding` order so `attr & 7` converts directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressSpace {
    Reg = 0,
    Ps = 1,
    Ws = 2,
    Fb = 3,
    Id = 4,
    Imm = 5,
    Pll = 6,
    Mc = 7,
}

impl AddressSpace {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => AddressSpace::Reg,
            1 => AddressSpace::Ps,
            2 => AddressSpace::Ws,
            3 => AddressSpace::Fb,
            4 => AddressSpace::Id,
            5 => AddressSpace::Imm,
            6 => AddressSpace::Pll,
            _ => AddressSpace::Mc,
        }
    }

    /// Destination spaces a generic opcode family can target, in the
    /// declared order `MOVE_TO_REG..MOVE_TO_MC`.
    const WRITABLE: [AddressSpace; 6] = [
        AddressSpace::Reg,
        AddressSpace::Ps,
        AddressSpace::Ws,
        AddressSpace::Fb,
        AddressSpace::Pll,
        AddressSpace::Mc,
    ];

    /// Whether operand indices into this space are a 16-bit word (`Reg`,
    /// `Id`) or a single byte (everything else).
    fn index_is_word(self) -> bool {
        matches!(self, AddressSpace::Reg | AddressSpace::Id)
    }
}

/// The eight source/destination alignments an attribute byte's two 3-bit
/// fields select, in the original's `SrcEncoding` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Align {
    Dword = 0,
    Word0 = 1,
    Word8 = 2,
    Word16 = 3,
    Byte0 = 4,
    Byte8 = 5,
    Byte16 = 6,
    Byte24 = 7,
}

impl Align {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => Align::Dword,
            1 => Align::Word0,
            2 => Align::Word8,
            3 => Align::Word16,
            4 => Align::Byte0,
            5 => Align::Byte8,
            6 => Align::Byte16,
            _ => Align::Byte24,
        }
    }

    /// Width in bytes of a value at this alignment.
    fn width(self) -> usize {
        match self {
            Align::Dword => 4,
            Align::Word0 | Align::Word8 | Align::Word16 => 2,
            _ => 1,
        }
    }
}

const MASK: [u32; 8] = [
    0xFFFF_FFFF,
    0x0000_FFFF,
    0x00FF_FF00,
    0xFFFF_0000,
    0x0000_00FF,
    0x0000_FF00,
    0x00FF_0000,
    0xFF00_0000,
];

const SHIFT: [u32; 8] = [0, 0, 8, 16, 0, 8, 16, 24];

/// `DST_TO_SRC[src_align][dst_selector] -> dst_align`, verbatim from
/// `atom-private.hpp`'s `atom_dst_to_src`.
const DST_TO_SRC: [[u8; 4]; 8] = [
    [0, 0, 0, 0],
    [1, 2, 3, 0],
    [1, 2, 3, 0],
    [1, 2, 3, 0],
    [4, 5, 6, 7],
    [4, 5, 6, 7],
    [4, 5, 6, 7],
    [4, 5, 6, 7],
];

fn swizzle(raw: u32, align: Align) -> u32 {
    let i = align as usize;
    (raw & MASK[i]) >> SHIFT[i]
}

/// Folds a swizzled `new_val` back into the bits of `saved` that `align`
/// doesn't cover, so a byte/word write only disturbs its own lane.
fn combine_saved(new_val: u32, saved: u32, align: Align) -> u32 {
    let i = align as usize;
    (saved & !MASK[i]) | ((new_val << SHIFT[i]) & MASK[i])
}

mod opcode {
    pub const MOVE_TO_REG: u8 = 0x01;
    pub const MOVE_TO_MC: u8 = 0x06;
    pub const AND_INTO_REG: u8 = 0x07;
    pub const AND_INTO_MC: u8 = 0x0C;
    pub const OR_INTO_REG: u8 = 0x0D;
    pub const OR_INTO_MC: u8 = 0x12;
    pub const SHIFT_LEFT_REG: u8 = 0x13;
    pub const SHIFT_LEFT_MC: u8 = 0x18;
    pub const SHIFT_RIGHT_REG: u8 = 0x19;
    pub const SHIFT_RIGHT_MC: u8 = 0x1E;
    pub const MUL_REG: u8 = 0x1F;
    pub const MUL_MC: u8 = 0x24;
    pub const DIV_REG: u8 = 0x25;
    pub const DIV_MC: u8 = 0x2A;
    pub const ADD_INTO_REG: u8 = 0x2B;
    pub const ADD_INTO_MC: u8 = 0x30;
    pub const SUB_INTO_REG: u8 = 0x31;
    pub const SUB_INTO_MC: u8 = 0x36;
    pub const SET_ATI_PORT: u8 = 0x37;
    pub const SET_PCI_PORT: u8 = 0x38;
    pub const SET_SYSIO_PORT: u8 = 0x39;
    pub const SET_REG_BLOCK: u8 = 0x3A;
    pub const COMPARE_FROM_REG: u8 = 0x3C;
    pub const COMPARE_FROM_MC: u8 = 0x41;
    pub const SWITCH: u8 = 0x42;
    pub const JUMP_ALWAYS: u8 = 0x43;
    pub const JUMP_EQUAL: u8 = 0x44;
    pub const JUMP_BELOW: u8 = 0x45;
    pub const JUMP_ABOVE: u8 = 0x46;
    pub const JUMP_BELOW_OR_EQUAL: u8 = 0x47;
    pub const JUMP_ABOVE_OR_EQUAL: u8 = 0x48;
    pub const JUMP_NOT_EQUAL: u8 = 0x49;
    pub const TEST_FROM_REG: u8 = 0x4A;
    pub const TEST_FROM_MC: u8 = 0x4F;
    pub const DELAY_MICROSECONDS: u8 = 0x51;
    pub const CALL_TABLE: u8 = 0x52;
    pub const CLEAR_IN_REG: u8 = 0x54;
    pub const CLEAR_IN_MC: u8 = 0x59;
    pub const END_OF_TABLE: u8 = 0x5B;
    pub const MASK_INTO_REG: u8 = 0x5C;
    pub const MASK_INTO_MC: u8 = 0x61;
    pub const SET_DATA_TABLE: u8 = 0x66;
    pub const XOR_INTO_REG: u8 = 0x67;
    pub const XOR_INTO_MC: u8 = 0x6C;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Move,
    And,
    Or,
    ShiftLeft,
    ShiftRight,
    Mul,
    Div,
    Add,
    Sub,
    Compare,
    Test,
    Clear,
    Mask,
    Xor,
}

impl Family {
    fn decode(op: u8) -> Option<(Family, AddressSpace)> {
        use opcode::*;
        const RANGES: [(u8, u8, Family); 14] = [
            (MOVE_TO_REG, MOVE_TO_MC, Family::Move),
            (AND_INTO_REG, AND_INTO_MC, Family::And),
            (OR_INTO_REG, OR_INTO_MC, Family::Or),
            (SHIFT_LEFT_REG, SHIFT_LEFT_MC, Family::ShiftLeft),
            (SHIFT_RIGHT_REG, SHIFT_RIGHT_MC, Family::ShiftRight),
            (MUL_REG, MUL_MC, Family::Mul),
            (DIV_REG, DIV_MC, Family::Div),
            (ADD_INTO_REG, ADD_INTO_MC, Family::Add),
            (SUB_INTO_REG, SUB_INTO_MC, Family::Sub),
            (COMPARE_FROM_REG, COMPARE_FROM_MC, Family::Compare),
            (TEST_FROM_REG, TEST_FROM_MC, Family::Test),
            (CLEAR_IN_REG, CLEAR_IN_MC, Family::Clear),
            (MASK_INTO_REG, MASK_INTO_MC, Family::Mask),
            (XOR_INTO_REG, XOR_INTO_MC, Family::Xor),
        ];
        for (lo, hi, family) in RANGES {
            if op >= lo && op <= hi {
                let space = AddressSpace::WRITABLE[(op - lo) as usize];
                return Some((family, space));
            }
        }
        None
    }

    fn writes_back(self) -> bool {
        !matches!(self, Family::Mul | Family::Div | Family::Compare | Family::Test)
    }
}

/// One level of the `CALL_TABLE` stack: its own work space and its window
/// onto the caller-supplied parameter space.
struct Frame {
    base: u32,
    ip: u32,
    end: u32,
    work_space: Vec<u32>,
    params_shift: u32,
}

/// The interpreter's mutable state across one top-level [`Vm::run`] call
/// (and any `CALL_TABLE`s it makes): I/O routing, flags, and telemetry.
/// Borrows the ROM and the directories built at construction time; the host
/// collaborators are passed into `run` rather than stored, so `Vm` itself
/// carries no lifetime tied to them.
pub struct Vm<'r> {
    rom: &'r RomImage,
    commands: &'r CommandDirectory,
    iio: &'r IioDirectory,
    data_table_entries: [u16; DATA_TABLE_ENTRY_COUNT],
    io_mode: IoMode,
    iio_port: u16,
    reg_block: u32,
    fb_block: u32,
    data_block: u32,
    flag_above: bool,
    flag_equal: bool,
    flag_below: bool,
    div_quotient: u32,
    div_remainder: u32,
    work_space_mask_shift: u32,
    iio_attr: u32,
    call_depth: u32,
    instructions_executed: u64,
    max_ps_index: u32,
    max_ws_index: u32,
}

impl<'r> Vm<'r> {
    pub fn new(
        rom: &'r RomImage,
        commands: &'r CommandDirectory,
        iio: &'r IioDirectory,
        data_table_entries: [u16; DATA_TABLE_ENTRY_COUNT],
    ) -> Self {
        Vm {
            rom,
            commands,
            iio,
            data_table_entries,
            io_mode: IoMode::Mmio,
            iio_port: 0,
            reg_block: 0,
            fb_block: 0,
            data_block: 0,
            flag_above: false,
            flag_equal: false,
            flag_below: false,
            div_quotient: 0,
            div_remainder: 0,
            work_space_mask_shift: 0,
            iio_attr: 0,
            call_depth: 0,
            instructions_executed: 0,
            max_ps_index: 0,
            max_ws_index: 0,
        }
    }

    pub fn max_ps_index(&self) -> u32 {
        self.max_ps_index
    }

    pub fn max_ws_index(&self) -> u32 {
        self.max_ws_index
    }

    /// Runs `table`'s bytecode to completion against `params`, per spec
    /// §4.7. `params` is shared read/write state across the whole call
    /// chain; nested `CALL_TABLE`s see the same array.
    pub fn run(
        &mut self,
        host: &mut Host,
        table: CommandTableId,
        params: &mut [u32],
    ) -> Result<(), InvocationError> {
        let record = *self
            .commands
            .get(&table.index())
            .ok_or(InvocationError::CommandAbsent(table))?;
        self.call_depth = 0;
        self.instructions_executed = 0;
        self.exec_command(host, &record, params, 0)
    }

    fn exec_command(
        &mut self,
        host: &mut Host,
        record: &CommandRecord,
        params: &mut [u32],
        params_shift: u32,
    ) -> Result<(), InvocationError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(InvocationError::RecursionLimit);
        }
        self.call_depth += 1;
        let mut frame = Frame {
            base: record.bytecode_offset,
            ip: record.bytecode_offset,
            end: record.bytecode_offset + record.bytecode_len,
            work_space: vec![0u32; record.work_space_size as usize],
            params_shift,
        };
        let result = self.run_frame(host, &mut frame, params);
        self.call_depth -= 1;
        result
    }

    fn run_frame(
        &mut self,
        host: &mut Host,
        frame: &mut Frame,
        params: &mut [u32],
    ) -> Result<(), InvocationError> {
        loop {
            if frame.ip >= frame.end {
                return Err(InvocationError::BytecodeOutOfRange);
            }
            self.instructions_executed += 1;
            if self.instructions_executed > MAX_INSTRUCTION_BUDGET {
                return Err(InvocationError::InstructionBudget);
            }

            let op = self.fetch_u8(frame)?;

            match op {
                opcode::END_OF_TABLE => return Ok(()),
                opcode::SET_DATA_TABLE => {
                    let id = self.fetch_u8(frame)?;
                    if id == 0xFF {
                        self.data_block = 0;
                        log!(host, LogLevel::Warning, "SET_DATA_TABLE(0xFF): data block cleared");
                    } else if let Some(&offset) = self.data_table_entries.get(id as usize) {
                        self.data_block = offset as u32;
                    } else {
                        log!(host, LogLevel::Warning, "SET_DATA_TABLE: index {} out of range", id);
                    }
                    continue;
                }
                opcode::SET_REG_BLOCK => {
                    self.reg_block = self.fetch_u16(frame)? as u32;
                    continue;
                }
                opcode::SET_ATI_PORT => {
                    let port = self.fetch_u8(frame)? as u16;
                    if port == 0 {
                        self.io_mode = IoMode::Mmio;
                    } else {
                        self.io_mode = IoMode::Iio;
                        self.iio_port = port;
                    }
                    continue;
                }
                opcode::SET_PCI_PORT => {
                    self.io_mode = IoMode::Pci;
                    continue;
                }
                opcode::SET_SYSIO_PORT => {
                    self.io_mode = IoMode::SysIo;
                    continue;
                }
                opcode::DELAY_MICROSECONDS => {
                    let us = self.fetch_u8(frame)? as u32;
                    host.delay.delay_us(us);
                    continue;
                }
                opcode::CALL_TABLE => {
                    let callee = self.fetch_u8(frame)?;
                    CommandTableId::from_index(callee).ok_or(InvocationError::MissingCallee(callee))?;
                    let record = *self
                        .commands
                        .get(&callee)
                        .ok_or(InvocationError::MissingCallee(callee))?;
                    self.exec_command(host, &record, params, frame.params_shift)?;
                    continue;
                }
                opcode::SWITCH => {
                    self.exec_switch(host, frame, params)?;
                    continue;
                }
                opcode::JUMP_ALWAYS..=opcode::JUMP_NOT_EQUAL => {
                    self.exec_jump(frame, op)?;
                    continue;
                }
                _ => {}
            }

            if let Some((family, space)) = Family::decode(op) {
                self.exec_generic(host, frame, params, family, space)?;
                continue;
            }

            return Err(InvocationError::UnknownOpcode(op));
        }
    }

    fn exec_jump(&mut self, frame: &mut Frame, op: u8) -> Result<(), InvocationError> {
        let target = self.fetch_u16(frame)?;
        let taken = match op {
            opcode::JUMP_ALWAYS => true,
            opcode::JUMP_EQUAL => self.flag_equal,
            opcode::JUMP_BELOW => self.flag_below,
            opcode::JUMP_ABOVE => self.flag_above,
            opcode::JUMP_BELOW_OR_EQUAL => self.flag_below || self.flag_equal,
            opcode::JUMP_ABOVE_OR_EQUAL => self.flag_above || self.flag_equal,
            opcode::JUMP_NOT_EQUAL => !self.flag_equal,
            _ => unreachable!("exec_jump called with a non-jump opcode"),
        };
        if taken {
            let new_ip = frame.base + target as u32;
            if new_ip >= frame.end {
                return Err(InvocationError::BytecodeOutOfRange);
            }
            frame.ip = new_ip;
        }
        Ok(())
    }

    fn exec_switch(
        &mut self,
        host: &mut Host,
        frame: &mut Frame,
        params: &mut [u32],
    ) -> Result<(), InvocationError> {
        let attr = self.fetch_u8(frame)?;
        let src_arg = AddressSpace::from_bits(attr);
        let src_align = Align::from_bits(attr >> 3);
        let value = self.read_operand(host, frame, params, src_arg, src_align)?;

        let case_count = self.fetch_u16(frame)?;
        let mut matched_target = None;
        for _ in 0..case_count {
            let case_value = self.fetch_u16(frame)? as u32;
            let target = self.fetch_u16(frame)?;
            if matched_target.is_none() && case_value == value {
                matched_target = Some(target);
            }
        }
        if let Some(target) = matched_target {
            let new_ip = frame.base + target as u32;
            if new_ip >= frame.end {
                return Err(InvocationError::BytecodeOutOfRange);
            }
            frame.ip = new_ip;
        }
        Ok(())
    }

    fn exec_generic(
        &mut self,
        host: &mut Host,
        frame: &mut Frame,
        params: &mut [u32],
        family: Family,
        dest_space: AddressSpace,
    ) -> Result<(), InvocationError> {
        let attr = self.fetch_u8(frame)?;
        let src_arg = AddressSpace::from_bits(attr);
        let src_align = Align::from_bits(attr >> 3);
        let dst_selector = ((attr >> 6) & 0x3) as usize;
        let dst_align = Align::from_bits(DST_TO_SRC[src_align as usize][dst_selector]);

        let dst_idx = self.fetch_index(frame, dest_space)?;

        let mask_imm = if family == Family::Mask {
            Some(self.fetch_width(frame, dst_align.width())?)
        } else {
            None
        };

        let shift_amount = if matches!(family, Family::ShiftLeft | Family::ShiftRight) {
            Some(self.fetch_u8(frame)? as u32)
        } else {
            None
        };

        let src_val = self.read_operand(host, frame, params, src_arg, src_align)?;

        let saved = self.read_space(host, params, frame, dest_space, dst_idx)?;
        let dst = swizzle(saved, dst_align);

        let new_val = match family {
            Family::Move => src_val,
            Family::And => dst & src_val,
            Family::Or => dst | src_val,
            Family::Xor => dst ^ src_val,
            Family::Add => dst.wrapping_add(src_val),
            Family::Sub => dst.wrapping_sub(src_val),
            Family::ShiftLeft => dst.wrapping_shl(shift_amount.unwrap_or(0)),
            Family::ShiftRight => dst.wrapping_shr(shift_amount.unwrap_or(0)),
            Family::Clear => 0,
            Family::Mask => (dst & mask_imm.unwrap_or(0)) | src_val,
            Family::Mul => {
                let product = (dst as u64) * (src_val as u64);
                self.div_quotient = product as u32;
                self.div_remainder = (product >> 32) as u32;
                0
            }
            Family::Div => {
                if src_val == 0 {
                    log!(host, LogLevel::Warning, "DIV by zero; quotient/remainder left unchanged");
                } else {
                    self.div_quotient = dst / src_val;
                    self.div_remainder = dst % src_val;
                }
                0
            }
            Family::Compare => {
                self.flag_equal = dst == src_val;
                self.flag_above = dst > src_val;
                self.flag_below = dst < src_val;
                0
            }
            Family::Test => {
                let result = dst & src_val;
                self.flag_equal = result == 0;
                self.flag_above = false;
                self.flag_below = false;
                0
            }
        };

        if family.writes_back() {
            let combined = combine_saved(new_val, saved, dst_align);
            self.write_space(host, params, frame, dest_space, dst_idx, combined)?;
        }

        Ok(())
    }

    fn fetch_u8(&self, frame: &mut Frame) -> Result<u8, InvocationError> {
        let v = self.rom.read_u8(frame.ip as usize).map_err(|_| InvocationError::BytecodeOutOfRange)?;
        frame.ip += 1;
        Ok(v)
    }

    fn fetch_u16(&self, frame: &mut Frame) -> Result<u16, InvocationError> {
        let v = self.rom.read_u16(frame.ip as usize).map_err(|_| InvocationError::BytecodeOutOfRange)?;
        frame.ip += 2;
        Ok(v)
    }

    fn fetch_width(&self, frame: &mut Frame, width: usize) -> Result<u32, InvocationError> {
        match width {
            1 => Ok(self.fetch_u8(frame)? as u32),
            2 => Ok(self.fetch_u16(frame)? as u32),
            _ => {
                let lo = self.fetch_u16(frame)? as u32;
                let hi = self.fetch_u16(frame)? as u32;
                Ok(lo | (hi << 16))
            }
        }
    }

    fn fetch_index(&self, frame: &mut Frame, space: AddressSpace) -> Result<u32, InvocationError> {
        if space.index_is_word() {
            Ok(self.fetch_u16(frame)? as u32)
        } else {
            Ok(self.fetch_u8(frame)? as u32)
        }
    }

    fn read_operand(
        &mut self,
        host: &mut Host,
        frame: &mut Frame,
        params: &mut [u32],
        space: AddressSpace,
        align: Align,
    ) -> Result<u32, InvocationError> {
        if space == AddressSpace::Imm {
            self.fetch_width(frame, align.width())
        } else {
            let idx = self.fetch_index(frame, space)?;
            let raw = self.read_space(host, params, frame, space, idx)?;
            Ok(swizzle(raw, align))
        }
    }

    fn read_space(
        &mut self,
        host: &mut Host,
        params: &mut [u32],
        frame: &Frame,
        space: AddressSpace,
        idx: u32,
    ) -> Result<u32, InvocationError> {
        match space {
            AddressSpace::Reg => io::do_io_read(
                host,
                self.io_mode,
                self.rom,
                self.iio,
                self.reg_block,
                self.iio_port,
                self.iio_attr,
                idx,
            ),
            AddressSpace::Ps => {
                self.max_ps_index = self.max_ps_index.max(idx);
                Ok(params.get((frame.params_shift + idx) as usize).copied().unwrap_or(0))
            }
            AddressSpace::Ws => Ok(self.read_work_space(frame, idx)),
            AddressSpace::Id => self
                .rom
                .read_u32((idx + self.data_block) as usize)
                .map_err(|_| InvocationError::BytecodeOutOfRange),
            AddressSpace::Imm => Ok(0),
            AddressSpace::Fb => {
                log!(host, LogLevel::Warning, "FB space is not backed by this core; read ignored");
                Ok(UNMODELED_SPACE_POISON)
            }
            AddressSpace::Pll => {
                log!(host, LogLevel::Warning, "PLL space is not backed by this core; read ignored");
                Ok(UNMODELED_SPACE_POISON)
            }
            AddressSpace::Mc => {
                log!(host, LogLevel::Warning, "MC space is not backed by this core; read ignored");
                Ok(UNMODELED_SPACE_POISON)
            }
        }
    }

    fn write_space(
        &mut self,
        host: &mut Host,
        params: &mut [u32],
        frame: &mut Frame,
        space: AddressSpace,
        idx: u32,
        value: u32,
    ) -> Result<(), InvocationError> {
        match space {
            AddressSpace::Reg => {
                io::do_io_write(
                    host,
                    self.io_mode,
                    self.rom,
                    self.iio,
                    self.reg_block,
                    self.iio_port,
                    self.iio_attr,
                    idx,
                    value,
                )?;
            }
            AddressSpace::Ps => {
                self.max_ps_index = self.max_ps_index.max(idx);
                if let Some(slot) = params.get_mut((frame.params_shift + idx) as usize) {
                    *slot = value;
                }
            }
            AddressSpace::Ws => self.write_work_space(host, frame, idx, value),
            AddressSpace::Id => {
                log!(host, LogLevel::Warning, "ID space is read-only; write ignored");
            }
            AddressSpace::Imm => {}
            AddressSpace::Fb => {
                log!(host, LogLevel::Warning, "FB space is not backed by this core; write ignored");
            }
            AddressSpace::Pll => {
                log!(host, LogLevel::Warning, "PLL space is not backed by this core; write ignored");
            }
            AddressSpace::Mc => {
                log!(host, LogLevel::Warning, "MC space is not backed by this core; write ignored");
            }
        }
        Ok(())
    }

    fn read_work_space(&mut self, frame: &Frame, idx: u32) -> u32 {
        self.max_ws_index = self.max_ws_index.max(idx);
        match idx {
            WS_QUOTIENT => self.div_quotient,
            WS_REMAINDER => self.div_remainder,
            WS_DATAPTR => self.data_block,
            WS_SHIFT => self.work_space_mask_shift,
            WS_OR_MASK => 1u32.wrapping_shl(self.work_space_mask_shift),
            WS_AND_MASK => !1u32.wrapping_shl(self.work_space_mask_shift),
            WS_FB_WINDOW => self.fb_block,
            WS_ATTRIBUTES => self.iio_attr,
            WS_REGPTR => self.reg_block,
            other => frame.work_space.get(other as usize).copied().unwrap_or(0),
        }
    }

    fn write_work_space(&mut self, host: &mut Host, frame: &mut Frame, idx: u32, value: u32) {
        self.max_ws_index = self.max_ws_index.max(idx);
        match idx {
            WS_QUOTIENT => self.div_quotient = value,
            WS_REMAINDER => self.div_remainder = value,
            WS_DATAPTR => self.data_block = value,
            WS_SHIFT => self.work_space_mask_shift = value,
            WS_OR_MASK => {
                log!(host, LogLevel::Warning, "WS_OR_MASK is read-only; write ignored");
            }
            WS_AND_MASK => {
                log!(host, LogLevel::Warning, "WS_AND_MASK is read-only; write ignored");
            }
            WS_FB_WINDOW => self.fb_block = value,
            WS_ATTRIBUTES => self.iio_attr = value,
            WS_REGPTR => self.reg_block = value,
            other => {
                let i = other as usize;
                if i >= frame.work_space.len() {
                    frame.work_space.resize(i + 1, 0);
                }
                frame.work_space[i] = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DelaySource, LogSink, McIo, PllIo, RegisterIo};
    use alloc::collections::BTreeMap;

    struct FakeRegs(BTreeMap<u32, u32>);
    impl RegisterIo for FakeRegs {
        fn reg_read(&mut self, reg: u32) -> u32 {
            *self.0.get(&reg).unwrap_or(&0)
        }
        fn reg_write(&mut self, reg: u32, val: u32) {
            self.0.insert(reg, val);
        }
    }
    struct NoMc;
    impl McIo for NoMc {
        fn mc_read(&mut self, _reg: u32) -> u32 {
            0
        }
        fn mc_write(&mut self, _reg: u32, _val: u32) {}
    }
    struct NoPll;
    impl PllIo for NoPll {
        fn pll_read(&mut self, _reg: u32) -> u32 {
            0
        }
        fn pll_write(&mut self, _reg: u32, _val: u32) {}
    }
    struct NoDelay;
    impl DelaySource for NoDelay {
        fn delay_us(&mut self, _us: u32) {}
        fn delay_ms(&mut self, _ms: u32) {}
    }
    struct NoLog;
    impl LogSink for NoLog {
        fn log(&mut self, _level: LogLevel, _args: core::fmt::Arguments) {}
    }

    fn push_u16(buf: &mut alloc::vec::Vec<u8>, v: u16) {
        buf.push((v & 0xFF) as u8);
        buf.push((v >> 8) as u8);
    }

    fn attr(src_arg: u8, src_align: u8, dst_selector: u8) -> u8 {
        (src_arg & 0x7) | ((src_align & 0x7) << 3) | ((dst_selector & 0x3) << 6)
    }

    /// S1: `MOVE_TO_PS` from an immediate writes straight into parameter space.
    #[test]
    fn move_immediate_to_parameter_space() {
        let imm: u32 = 0xCAFE_BABE;
        let mut code = alloc::vec::Vec::new();
        code.push(opcode::MOVE_TO_REG + 1); // MOVE_TO_PS
        code.push(attr(AddressSpace::Imm as u8, 0 /* Dword */, 0));
        code.push(0); // dst_idx (PS index 0, byte width)
        push_u16(&mut code, (imm & 0xFFFF) as u16);
        push_u16(&mut code, ((imm >> 16) & 0xFFFF) as u16);
        code.push(opcode::END_OF_TABLE);

        let rom = RomImage::new(&code);
        let mut commands = CommandDirectory::new();
        commands.insert(
            0,
            CommandRecord {
                work_space_size: 0,
                parameter_space_size: 1,
                updated_by_utility: false,
                bytecode_offset: 0,
                bytecode_len: code.len() as u32,
            },
        );
        let iio = IioDirectory::new();
        let mut vm = Vm::new(&rom, &commands, &iio, [0u16; DATA_TABLE_ENTRY_COUNT]);

        let mut regs = FakeRegs(BTreeMap::new());
        let mut mc = NoMc;
        let mut pll = NoPll;
        let mut delay = NoDelay;
        let mut logsink = NoLog;
        let mut host = Host::new(&mut regs, &mut mc, &mut pll, &mut delay, &mut logsink);

        let mut params = [0u32; 1];
        vm.run(&mut host, CommandTableId::AsicInit, &mut params).unwrap();
        assert_eq!(params[0], imm);
    }

    /// S4: dividing by zero leaves quotient/remainder unchanged and does not trap.
    #[test]
    fn div_by_zero_does_not_trap() {
        let mut code = alloc::vec::Vec::new();
        // DIV_WITH_PS dst=PS[0] (value irrelevant), src=Imm Dword 0
        code.push(opcode::DIV_REG + 1);
        code.push(attr(AddressSpace::Imm as u8, 0, 0));
        code.push(0);
        push_u16(&mut code, 0);
        push_u16(&mut code, 0);
        code.push(opcode::END_OF_TABLE);

        let rom = RomImage::new(&code);
        let mut commands = CommandDirectory::new();
        commands.insert(
            0,
            CommandRecord {
                work_space_size: 0,
                parameter_space_size: 1,
                updated_by_utility: false,
                bytecode_offset: 0,
                bytecode_len: code.len() as u32,
            },
        );
        let iio = IioDirectory::new();
        let mut vm = Vm::new(&rom, &commands, &iio, [0u16; DATA_TABLE_ENTRY_COUNT]);
        vm.div_quotient = 0x11;
        vm.div_remainder = 0x22;

        let mut regs = FakeRegs(BTreeMap::new());
        let mut mc = NoMc;
        let mut pll = NoPll;
        let mut delay = NoDelay;
        let mut logsink = NoLog;
        let mut host = Host::new(&mut regs, &mut mc, &mut pll, &mut delay, &mut logsink);

        let mut params = [0u32; 1];
        vm.run(&mut host, CommandTableId::AsicInit, &mut params).unwrap();
        assert_eq!(vm.div_quotient, 0x11);
        assert_eq!(vm.div_remainder, 0x22);
    }

    /// CALL_TABLE deeper than MAX_CALL_DEPTH aborts with RecursionLimit.
    #[test]
    fn recursion_limit_is_enforced() {
        let mut code = alloc::vec::Vec::new();
        code.push(opcode::CALL_TABLE);
        code.push(0); // calls itself (table 0)
        code.push(opcode::END_OF_TABLE);

        let rom = RomImage::new(&code);
        let mut commands = CommandDirectory::new();
        commands.insert(
            0,
            CommandRecord {
                work_space_size: 0,
                parameter_space_size: 0,
                updated_by_utility: false,
                bytecode_offset: 0,
                bytecode_len: code.len() as u32,
            },
        );
        let iio = IioDirectory::new();
        let mut vm = Vm::new(&rom, &commands, &iio, [0u16; DATA_TABLE_ENTRY_COUNT]);

        let mut regs = FakeRegs(BTreeMap::new());
        let mut mc = NoMc;
        let mut pll = NoPll;
        let mut delay = NoDelay;
        let mut logsink = NoLog;
        let mut host = Host::new(&mut regs, &mut mc, &mut pll, &mut delay, &mut logsink);

        let mut params: [u32; 0] = [];
        let err = vm.run(&mut host, CommandTableId::AsicInit, &mut params).unwrap_err();
        assert_eq!(err, InvocationError::RecursionLimit);
    }
}
