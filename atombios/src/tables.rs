//! ROM header structures and the two closed enumerations (data tables,
//! command tables) the bytecode addresses by index.

use crate::error::ConstructError;
use crate::rom::RomImage;

/// The 4-byte header prepended to almost every structured region in the ROM.
#[derive(Debug, Clone, Copy)]
pub struct CommonHeader {
    pub structure_size: u16,
    pub table_format_revision: u8,
    pub table_content_revision: u8,
}

pub const COMMON_HEADER_SIZE: usize = 4;

impl CommonHeader {
    pub fn parse(rom: &RomImage, offset: usize) -> Result<Self, ConstructError> {
        Ok(CommonHeader {
            structure_size: rom.read_u16(offset)?,
            table_format_revision: rom.read_u8(offset + 2)?,
            table_content_revision: rom.read_u8(offset + 3)?,
        })
    }
}

/// The top-level ROM table: magic, layout words, and the two pointers that
/// locate everything else (command table, data table).
#[derive(Debug, Clone, Copy)]
pub struct AtomRomTable {
    pub common_header: CommonHeader,
    pub command_table_base: u16,
    pub data_table_base: u16,
}

impl AtomRomTable {
    pub fn parse(rom: &RomImage, offset: usize) -> Result<Self, ConstructError> {
        let common_header = CommonHeader::parse(rom, offset)?;

        let mut magic = [0u8; 4];
        for (i, byte) in magic.iter_mut().enumerate() {
            *byte = rom.read_u8(offset + COMMON_HEADER_SIZE + i)?;
        }
        if &magic != b"ATOM" {
            return Err(ConstructError::BadAtomMagic);
        }

        // Field layout per the original AtomRomTable struct: after the 4-byte
        // magic come nine u16 words before commandTableBase/dataTableBase.
        let base = offset + COMMON_HEADER_SIZE + 4;
        let command_table_base = rom.read_u16(base + 9 * 2)?;
        let data_table_base = rom.read_u16(base + 10 * 2)?;

        Ok(AtomRomTable { common_header, command_table_base, data_table_base })
    }
}

/// The 34 named sub-table slots of spec §3, in declared order. `repr(u8)` so
/// `SET_DATA_TABLE`'s operand byte converts directly via [`DataTableId::from_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataTableId {
    UtilityPipeline = 0,
    MultimediaCapabilityInfo,
    MultimediaConfigInfo,
    StandardVesaTiming,
    FirmwareInfo,
    PaletteData,
    LcdInfo,
    DigTransmitterInfo,
    AnalogTvInfo,
    SupportedDevicesInfo,
    GpioI2cInfo,
    VramUsageByFirmware,
    GpioPinLut,
    VesaToInternalModeLut,
    ComponentVideoInfo,
    PowerPlayInfo,
    CompassionateData,
    SaveRestoreInfo,
    PpllSsInfo,
    OemInfo,
    XtmdsInfo,
    MclkSsInfo,
    ObjectHeader,
    IndirectIoAccess,
    McInitParameter,
    AsicVddcInfo,
    AsicInternalSsInfo,
    TvVideoMode,
    VramInfo,
    MemoryTrainingInfo,
    IntegratedSystemInfo,
    AsicProfilingInfo,
    VoltageObjectInfo,
    PowerSourceInfo,
}

/// Number of entries in a [`DataTable`].
pub const DATA_TABLE_ENTRY_COUNT: usize = 34;

impl DataTableId {
    pub fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < DATA_TABLE_ENTRY_COUNT {
            // SAFETY: `DataTableId` is `repr(u8)` with consecutive discriminants
            // 0..DATA_TABLE_ENTRY_COUNT, checked above.
            Some(unsafe { core::mem::transmute::<u8, DataTableId>(index) })
        } else {
            None
        }
    }
}

/// The data table: a common header plus 34 ROM offsets to named sub-tables.
/// Entry [`DataTableId::IndirectIoAccess`] points at the IIO blob (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct DataTable {
    pub common_header: CommonHeader,
    pub entries: [u16; DATA_TABLE_ENTRY_COUNT],
}

impl DataTable {
    /// Size of the full fixed layout: header plus 34 u16 entries.
    pub const LAYOUT_SIZE: usize = COMMON_HEADER_SIZE + DATA_TABLE_ENTRY_COUNT * 2;

    /// Parses the data table, honoring the bounded-copy rule: an older ROM
    /// whose header claims a shorter structure than the fixed layout leaves
    /// the remaining entries zeroed, and the caller is told so it can warn.
    pub fn parse(rom: &RomImage, offset: usize) -> Result<(Self, bool), ConstructError> {
        let common_header = CommonHeader::parse(rom, offset)?;
        let declared = common_header.structure_size as usize;
        let mut entries = [0u16; DATA_TABLE_ENTRY_COUNT];

        let available_entries =
            declared.saturating_sub(COMMON_HEADER_SIZE).min(DATA_TABLE_ENTRY_COUNT * 2) / 2;
        for (i, slot) in entries.iter_mut().enumerate().take(available_entries) {
            *slot = rom.read_u16(offset + COMMON_HEADER_SIZE + i * 2)?;
        }

        let truncated = declared < Self::LAYOUT_SIZE;
        Ok((DataTable { common_header, entries }, truncated))
    }

    pub fn entry(&self, id: DataTableId) -> u16 {
        self.entries[id as usize]
    }
}

/// The closed command-table enumeration, numbered identically to the linux
/// amdgpu driver (spec §6). See DESIGN.md for why this has 81 entries
/// (0..=80) rather than spec.md's summarized "80 names, 0..79".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTableId {
    AsicInit = 0,
    GetDisplaySurfaceSize,
    AsicRegistersInit,
    VramBlockVenderDetection,
    DigxEncoderControl,
    MemoryControllerInit,
    EnableCrtcMemReq,
    MemoryParamAdjust,
    DvoEncoderControl,
    GpioPinControl,
    SetEngineClock,
    SetMemoryClock,
    SetPixelClock,
    EnableDispPowerGating,
    ResetMemoryDll,
    ResetMemoryDevice,
    MemoryPllInit,
    AdjustDisplayPll,
    AdjustMemoryController,
    EnableAsicStaticPwrMgt,
    SetUniphyInstance,
    DacLoadDetection,
    LvtmaEncoderControl,
    HwMiscOperation,
    Dac1EncoderControl,
    Dac2EncoderControl,
    DvoOutputControl,
    Cv1OutputControl,
    GetConditionalGoldenSetting,
    TvEncoderControl,
    PatchMcSetting,
    McSeqControl,
    GfxHarvesting,
    EnableScaler,
    BlankCrtc,
    EnableCrtc,
    GetPixelClock,
    EnableVgaRender,
    GetSclkOverMclkRatio,
    SetCrtcTiming,
    SetCrtcOverScan,
    SetCrtcReplication,
    SelectCrtcSource,
    EnableGraphSurfaces,
    UpdateCrtcDoubleBufferRegisters,
    LutAutoFill,
    EnableHwIconCursor,
    GetMemoryClock,
    GetEngineClock,
    SetCrtcUsingDtdTiming,
    ExternalEncoderControl,
    LvtmaOutputControl,
    VramBlockDetectionByStrap,
    MemoryCleanUp,
    ProcessI2cChannelTransaction,
    WriteOneByteToHwAssistedI2c,
    ReadHwAssistedI2cStatus,
    SpeedFanControl,
    PowerConnectorDetection,
    McSynchronization,
    ComputeMemoryEnginePll,
    MemoryRefreshConversion,
    VramGetCurrentInfoBlock,
    DynamicMemorySettings,
    MemoryTraining,
    EnableSpreadSpectrumOnPpll,
    TmdsaOutputControl,
    SetVoltage,
    Dac1OutputControl,
    Dac2OutputControl,
    ComputeMemoryClockParam,
    ClockSource,
    MemoryDeviceInit,
    GetDispObjectInfo,
    Dig1EncoderControl,
    Dig2EncoderControl,
    Dig1TransmitterControl,
    Dig2TransmitterControl,
    ProcessAuxChannelTransaction,
    DpEncoderService,
    GetVoltageInfo,
}

/// Number of distinct command table identifiers.
pub const COMMAND_TABLE_COUNT: usize = 81;

impl CommandTableId {
    pub fn from_index(index: u8) -> Option<Self> {
        if (index as usize) < COMMAND_TABLE_COUNT {
            // SAFETY: `CommandTableId` is `repr(u8)` with consecutive
            // discriminants 0..COMMAND_TABLE_COUNT, checked above.
            Some(unsafe { core::mem::transmute::<u8, CommandTableId>(index) })
        } else {
            None
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_table_id_round_trips_through_index() {
        for i in 0..COMMAND_TABLE_COUNT as u8 {
            let id = CommandTableId::from_index(i).unwrap();
            assert_eq!(id.index(), i);
        }
        assert!(CommandTableId::from_index(COMMAND_TABLE_COUNT as u8).is_none());
    }

    #[test]
    fn data_table_id_round_trips_through_index() {
        for i in 0..DATA_TABLE_ENTRY_COUNT as u8 {
            assert!(DataTableId::from_index(i).is_some());
        }
        assert!(DataTableId::from_index(DATA_TABLE_ENTRY_COUNT as u8).is_none());
    }

    #[test]
    fn indirect_io_access_is_entry_23() {
        assert_eq!(DataTableId::IndirectIoAccess as u8, 23);
    }
}
