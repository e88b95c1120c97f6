//! The nested Indirect I/O micro-interpreter (spec §4.3–4.4), grounded on
//! `examples/original_source/src/iio.cpp`.

use alloc::collections::BTreeMap;

use crate::error::{ConstructError, InvocationError};
use crate::host::{log, Host, LogLevel};
use crate::rom::RomImage;

mod opcode {
    pub const NOP: u8 = 0;
    pub const START: u8 = 1;
    pub const READ: u8 = 2;
    pub const WRITE: u8 = 3;
    pub const CLEAR: u8 = 4;
    pub const SET: u8 = 5;
    pub const MOVE_INDEX: u8 = 6;
    pub const MOVE_ATTR: u8 = 7;
    pub const MOVE_DATA: u8 = 8;
    pub const END: u8 = 9;
}

/// Byte length of each IIO opcode's encoding (opcode byte included), indexed
/// by opcode value. Used while indexing to skip an instruction without
/// individually decoding its operands.
const IIO_INSTRUCTION_LENGTHS: [u32; 10] = [1, 2, 3, 3, 3, 3, 4, 4, 4, 3];

/// Maps an IIO table id (the `SET_ATI_PORT`/`iioPort` selector) to the ROM
/// offset of its first instruction after the `START` header.
pub type IioDirectory = BTreeMap<u8, u32>;

/// Scans the IIO blob pointed to by `DataTableId::IndirectIoAccess`,
/// recording the start offset of each sub-table keyed by its id byte.
///
/// Mirrors `AtomBiosImpl::_indexIIO`: the blob is a flat sequence of
/// `START <id>` headers followed by instructions up to `END`, repeated
/// until the table runs out — there is no outer length field, so scanning
/// stops as soon as a byte that isn't `START` is seen where a header is
/// expected.
pub fn index_iio(rom: &RomImage, base: u32) -> Result<IioDirectory, ConstructError> {
    let mut directory = IioDirectory::new();
    let mut ptr = base;

    while let Ok(op) = rom.read_u8(ptr as usize) {
        if op != opcode::START {
            break;
        }
        let id = rom.read_u8(ptr as usize + 1)?;
        directory.insert(id, ptr + 2);

        let mut scan = ptr + 2;
        loop {
            let instr_op = rom.read_u8(scan as usize)?;
            if instr_op == opcode::END {
                break;
            }
            let len = *IIO_INSTRUCTION_LENGTHS
                .get(instr_op as usize)
                .ok_or(ConstructError::TruncatedRom)?;
            scan += len;
        }
        // +1 for END itself, +2 for the trailing index/attr bytes the
        // original leaves between consecutive sub-tables.
        ptr = scan + 3;
    }

    Ok(directory)
}

/// Runs one IIO routine starting at `offset` (already resolved by the
/// caller, per [`index_iio`]'s directory), mirroring `_runIIO(offset,
/// indexReg, dataReg)`: `index_reg`/`data_reg` are the two operand values
/// `MOVE_INDEX`/`MOVE_DATA` can splice into the accumulator, and `iio_attr`
/// is the interpreter's persistent `iioIOAttr` state `MOVE_ATTR` splices in.
///
/// The accumulator starts at the poison value `0xCDCDCDCD`, exactly as the
/// original leaves it unset until a `READ` or `MOVE_*` first touches it.
pub fn run_iio(
    host: &mut Host,
    rom: &RomImage,
    offset: u32,
    index_reg: u32,
    data_reg: u32,
    iio_attr: u32,
) -> Result<u32, InvocationError> {
    let mut temp: u32 = 0xCDCD_CDCD;
    let mut ptr = offset;

    loop {
        let op = fetch_u8(rom, ptr)?;
        match op {
            opcode::NOP => ptr += 1,
            opcode::END => break,
            opcode::READ => {
                let addr = fetch_u16(rom, ptr + 1)? as u32;
                temp = host.reg.reg_read(addr);
                ptr += 3;
            }
            opcode::WRITE => {
                let addr = fetch_u16(rom, ptr + 1)? as u32;
                host.reg.reg_write(addr, temp);
                ptr += 3;
            }
            opcode::CLEAR => {
                let mask = splice_mask(fetch_u8(rom, ptr + 1)?).wrapping_shl(fetch_u8(rom, ptr + 2)? as u32);
                temp &= !mask;
                ptr += 3;
            }
            opcode::SET => {
                let mask = splice_mask(fetch_u8(rom, ptr + 1)?).wrapping_shl(fetch_u8(rom, ptr + 2)? as u32);
                temp |= mask;
                ptr += 3;
            }
            opcode::MOVE_INDEX => {
                temp = splice(rom, ptr, temp, index_reg)?;
                ptr += 4;
            }
            opcode::MOVE_ATTR => {
                temp = splice(rom, ptr, temp, iio_attr)?;
                ptr += 4;
            }
            opcode::MOVE_DATA => {
                temp = splice(rom, ptr, temp, data_reg)?;
                ptr += 4;
            }
            opcode::START => {
                log!(host, LogLevel::Warning, "IIO routine hit START mid-routine; aborting");
                break;
            }
            other => {
                log!(host, LogLevel::Warning, "unknown IIO opcode {:#04x}; aborting routine", other);
                break;
            }
        }
    }

    Ok(temp)
}

fn fetch_u8(rom: &RomImage, offset: u32) -> Result<u8, InvocationError> {
    rom.read_u8(offset as usize).map_err(|_| InvocationError::BytecodeOutOfRange)
}

fn fetch_u16(rom: &RomImage, offset: u32) -> Result<u16, InvocationError> {
    rom.read_u16(offset as usize).map_err(|_| InvocationError::BytecodeOutOfRange)
}

/// `MASK(width) = 0xFFFFFFFF >> (32 - width)`, guarded against the shift
/// overflow a width of 0 or ≥32 would otherwise cause.
fn splice_mask(width: u8) -> u32 {
    match width {
        0 => 0,
        w if w >= 32 => 0xFFFF_FFFF,
        w => 0xFFFF_FFFF >> (32 - w as u32),
    }
}

/// `temp := (temp & ~(MASK(width)<<dstShift)) | (((src>>srcShift) & MASK(width))<<dstShift)`,
/// the splice `MOVE_INDEX`/`MOVE_ATTR`/`MOVE_DATA` all share (`moveTemp` in
/// the original), reading `(width, srcShift, dstShift)` from the three bytes
/// following the opcode.
fn splice(rom: &RomImage, ptr: u32, temp: u32, src: u32) -> Result<u32, InvocationError> {
    let width = fetch_u8(rom, ptr + 1)?;
    let src_shift = fetch_u8(rom, ptr + 2)?;
    let dst_shift = fetch_u8(rom, ptr + 3)?;
    let mask = splice_mask(width);
    let extracted = src.wrapping_shr(src_shift as u32) & mask;
    let shifted_mask = mask.wrapping_shl(dst_shift as u32);
    Ok((temp & !shifted_mask) | (extracted.wrapping_shl(dst_shift as u32) & shifted_mask))
}
