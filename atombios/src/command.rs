//! Command directory: locating and describing the bytecode region for each
//! entry of the ROM's command table.

use alloc::collections::BTreeMap;

use crate::error::ConstructError;
use crate::rom::RomImage;
use crate::tables::{CommonHeader, COMMAND_TABLE_COUNT, COMMON_HEADER_SIZE};

/// One entry of the command table, decoded per spec §4.2: a common header
/// followed by a 2-byte "info" word (workSpaceSize, parameterSpaceSize,
/// updatedByUtility) and then the raw bytecode.
#[derive(Debug, Clone, Copy)]
pub struct CommandRecord {
    pub work_space_size: u8,
    pub parameter_space_size: u8,
    pub updated_by_utility: bool,
    /// Byte offset of the bytecode region within the ROM image.
    pub bytecode_offset: u32,
    /// Length of the bytecode region in bytes (structure size minus the
    /// header and info word).
    pub bytecode_len: u32,
}

impl CommandRecord {
    const INFO_WORD_SIZE: usize = 2;

    fn parse(rom: &RomImage, offset: usize) -> Result<Self, ConstructError> {
        let common_header = CommonHeader::parse(rom, offset)?;
        let info = rom.read_u16(offset + COMMON_HEADER_SIZE)?;

        // Per atom-private.hpp: bits 0-7 workSpaceSize, 8-14 parameterSpaceSize,
        // bit 15 updatedByUtility.
        let work_space_size = (info & 0x00FF) as u8;
        let parameter_space_size = ((info >> 8) & 0x7F) as u8;
        let updated_by_utility = (info & 0x8000) != 0;

        let header_and_info = (COMMON_HEADER_SIZE + Self::INFO_WORD_SIZE) as u16;
        let bytecode_len = common_header.structure_size.saturating_sub(header_and_info) as u32;
        let bytecode_offset = (offset + COMMON_HEADER_SIZE + Self::INFO_WORD_SIZE) as u32;

        // Validate the bytecode region actually lies inside the ROM.
        rom.read_u8((bytecode_offset + bytecode_len).saturating_sub(1) as usize)
            .map_err(|_| ConstructError::TruncatedRom)?;

        Ok(CommandRecord {
            work_space_size,
            parameter_space_size,
            updated_by_utility,
            bytecode_offset,
            bytecode_len,
        })
    }
}

/// Maps command table index (0..=80) to its [`CommandRecord`], built once at
/// construction time by walking the ROM's command table pointer array.
pub type CommandDirectory = BTreeMap<u8, CommandRecord>;

/// Builds the directory by reading the command table's array of 2-byte
/// offsets (one per [`crate::tables::CommandTableId`] slot) and parsing
/// whichever ones are non-zero, per spec §4.2.
///
/// The slot count is derived from the table's own `structureSize` rather
/// than assumed to always be [`COMMAND_TABLE_COUNT`]: an older ROM can
/// declare a shorter command table, and walking past its declared end would
/// misread whatever ROM content follows it as command pointers.
pub fn read_commands(
    rom: &RomImage,
    command_table_base: usize,
) -> Result<CommandDirectory, ConstructError> {
    let header = CommonHeader::parse(rom, command_table_base)?;
    let declared_slots =
        (header.structure_size as usize).saturating_sub(COMMON_HEADER_SIZE) / 2;
    let entry_count = declared_slots.min(COMMAND_TABLE_COUNT);
    let mut directory = CommandDirectory::new();

    for index in 0..entry_count {
        let pointer_offset = command_table_base + COMMON_HEADER_SIZE + index * 2;
        let entry_offset = rom.read_u16(pointer_offset)?;
        if entry_offset == 0 {
            continue;
        }
        let record = CommandRecord::parse(rom, entry_offset as usize)?;
        directory.insert(index as u8, record);
    }

    Ok(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn push_u16(buf: &mut alloc::vec::Vec<u8>, v: u16) {
        buf.push((v & 0xFF) as u8);
        buf.push((v >> 8) as u8);
    }

    #[test]
    fn parses_a_single_command_record() {
        let mut data = vec![0u8; 0x20];
        // command table header at 0x00: size=8 (header + 4 pointer slots for 2 entries)
        push_u16(&mut data, 8);
        data[2] = 1;
        data[3] = 0;
        // one pointer slot at offset 4 pointing at 0x10, one empty slot
        let record_offset = 0x10usize;
        push_u16(&mut data, record_offset as u16);
        push_u16(&mut data, 0);

        data.resize(0x20, 0);
        // record header at 0x10: structure_size = 4(header) + 2(info) + 3(bytecode) = 9
        let mut rec = alloc::vec::Vec::new();
        push_u16(&mut rec, 9);
        rec.push(1);
        rec.push(0);
        // info word: work_space_size=2, parameter_space_size=1, not updated
        push_u16(&mut rec, 0x0102);
        rec.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        data[record_offset..record_offset + rec.len()].copy_from_slice(&rec);

        let rom = RomImage::new(&data);
        let dir = read_commands(&rom, 0).unwrap();
        assert_eq!(dir.len(), 1);
        let cmd = dir.get(&0).unwrap();
        assert_eq!(cmd.work_space_size, 2);
        assert_eq!(cmd.parameter_space_size, 1);
        assert!(!cmd.updated_by_utility);
        assert_eq!(cmd.bytecode_len, 3);
    }

    #[test]
    fn empty_pointer_slots_are_skipped() {
        let mut data = vec![0u8; 0x10];
        push_u16(&mut data, 8);
        data[2] = 1;
        data[3] = 0;
        push_u16(&mut data, 0);
        push_u16(&mut data, 0);

        let rom = RomImage::new(&data);
        let dir = read_commands(&rom, 0).unwrap();
        assert!(dir.is_empty());
    }

    /// A command table declaring fewer slots than `COMMAND_TABLE_COUNT` must
    /// not have its pointer-array walk read past its own declared end.
    #[test]
    fn walk_is_bounded_by_declared_structure_size() {
        // header(4) + 1 pointer slot(2) = 6; anything past offset 6 is not
        // part of this table and must never be read as a pointer.
        let mut data = vec![0xFFu8; 0x10];
        push_u16(&mut data, 6);
        data[2] = 1;
        data[3] = 0;
        push_u16(&mut data, 0); // the one declared slot is empty

        let rom = RomImage::new(&data);
        let dir = read_commands(&rom, 0).unwrap();
        assert!(dir.is_empty());
    }
}
