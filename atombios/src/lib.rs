//! Interpreter for AMD/ATI AtomBIOS command-table bytecode.
//!
//! An [`AtomBios`] is constructed once from a ROM image and a [`host::Host`]
//! bundle of platform collaborators, then asked to run named command tables
//! against a caller-owned parameter array via [`AtomBios::run_command`].
//! Everything effectful — register I/O, delays, logging — goes through the
//! host; this crate never touches hardware or an allocator on its own.
#![no_std]

extern crate alloc;

pub mod command;
pub mod error;
pub mod host;
pub mod iio;
pub mod io;
pub mod rom;
pub mod tables;
pub mod vm;

pub use error::{ConstructError, InvocationError};
pub use host::{DelaySource, Host, LogLevel, LogSink, McIo, PllIo, RegisterIo};
pub use tables::{CommandTableId, DataTableId};
pub use vm::{MAX_CALL_DEPTH, MAX_INSTRUCTION_BUDGET};

use command::CommandDirectory;
use iio::IioDirectory;
use rom::RomImage;
use tables::{AtomRomTable, DataTable, DATA_TABLE_ENTRY_COUNT};
use vm::Vm;

const BIOS_MAGIC_OFFSET: usize = 0;
const ATI_MAGIC_OFFSET: usize = 0x30;
const ATI_MAGIC: &[u8] = b" 761295520";
const ROM_TABLE_POINTER_OFFSET: usize = 0x48;

/// A constructed AtomBIOS interpreter, ready to run command tables.
pub struct AtomBios {
    rom: RomImage,
    commands: CommandDirectory,
    iio: IioDirectory,
    data_table_entries: [u16; DATA_TABLE_ENTRY_COUNT],
    max_ps_index: u32,
    max_ws_index: u32,
}

impl AtomBios {
    /// Builds an interpreter from a raw ROM image, per spec §4.1:
    /// checks the `0xAA55` and `" 761295520"` magics, locates the
    /// `AtomRomTable`, parses the data table, indexes the IIO blob, and
    /// builds the command directory.
    pub fn new(data: &[u8]) -> Result<Self, ConstructError> {
        let rom = RomImage::new(data);

        if rom.read_u8(BIOS_MAGIC_OFFSET)? != 0x55 || rom.read_u8(BIOS_MAGIC_OFFSET + 1)? != 0xAA {
            return Err(ConstructError::BadMagic);
        }
        for (i, expected) in ATI_MAGIC.iter().enumerate() {
            if rom.read_u8(ATI_MAGIC_OFFSET + i)? != *expected {
                return Err(ConstructError::BadAtiMagic);
            }
        }

        let rom_table_base = rom.read_u16(ROM_TABLE_POINTER_OFFSET)? as usize;
        let atom_rom_table = AtomRomTable::parse(&rom, rom_table_base)?;

        let (data_table, _truncated) =
            DataTable::parse(&rom, atom_rom_table.data_table_base as usize)?;

        let iio_base = data_table.entry(tables::DataTableId::IndirectIoAccess) as u32;
        let iio = if iio_base == 0 {
            IioDirectory::new()
        } else {
            iio::index_iio(&rom, iio_base)?
        };

        let commands =
            command::read_commands(&rom, atom_rom_table.command_table_base as usize)?;

        Ok(AtomBios {
            rom,
            commands,
            iio,
            data_table_entries: data_table.entries,
            max_ps_index: 0,
            max_ws_index: 0,
        })
    }

    /// Runs `table` against `params`, per spec §4.7. `params` is both input
    /// and output: the command reads its call arguments from it and writes
    /// results back into the same slots.
    pub fn run_command(
        &mut self,
        host: &mut Host,
        table: CommandTableId,
        params: &mut [u32],
    ) -> Result<(), InvocationError> {
        let mut vm = Vm::new(&self.rom, &self.commands, &self.iio, self.data_table_entries);
        let result = vm.run(host, table, params);
        self.max_ps_index = self.max_ps_index.max(vm.max_ps_index());
        self.max_ws_index = self.max_ws_index.max(vm.max_ws_index());
        result
    }

    /// High-water mark of parameter-space indices touched across every
    /// [`AtomBios::run_command`] call so far.
    pub fn max_ps_index(&self) -> u32 {
        self.max_ps_index
    }

    /// High-water mark of work-space indices touched across every
    /// [`AtomBios::run_command`] call so far.
    pub fn max_ws_index(&self) -> u32 {
        self.max_ws_index
    }

    /// Whether `table` has any bytecode in this ROM.
    pub fn has_command(&self, table: CommandTableId) -> bool {
        self.commands.contains_key(&table.index())
    }
}
