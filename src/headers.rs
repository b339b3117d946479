//! Raw PE structures as they appear on disk and in memory.
//!
//! Objects taken directly from the PE/COFF layout are prefixed with "Image"
//! and closely resemble the names of their C counterparts, renamed to
//! conform to Rust standards. All of them are plain `repr(C)` records that
//! can be cast out of an image's byte region.

use bitflags::bitflags;

use pkbuffer::Castable;

use crate::types::*;

pub const DOS_SIGNATURE: u16 = 0x5A4D;
pub const NT_SIGNATURE: u32 = 0x0000_4550;

pub const HDR32_MAGIC: u16 = 0x010B;
pub const HDR64_MAGIC: u16 = 0x020B;

/// The smallest section alignment a normally laid out image can carry.
/// Images below this (object-style images) translate addresses with raw,
/// unaligned section fields.
pub const MINIMAL_SECTION_ALIGNMENT: u32 = 512;

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageDOSHeader {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    pub e_lfanew: Offset,
}
impl Default for ImageDOSHeader {
    fn default() -> Self {
        Self {
            e_magic: DOS_SIGNATURE,
            e_cblp: 0x90,
            e_cp: 0x03,
            e_crlc: 0x0,
            e_cparhdr: 0x04,
            e_minalloc: 0x0,
            e_maxalloc: 0xFFFF,
            e_ss: 0x0,
            e_sp: 0xB8,
            e_csum: 0x0,
            e_ip: 0x0,
            e_cs: 0x0,
            e_lfarlc: 0x40,
            e_ovno: 0x0,
            e_res: [0u16; 4],
            e_oemid: 0x0,
            e_oeminfo: 0x0,
            e_res2: [0u16; 10],
            e_lfanew: Offset(0x40),
        }
    }
}

bitflags! {
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED         = 0x0001;
        const EXECUTABLE_IMAGE        = 0x0002;
        const LINE_NUMS_STRIPPED      = 0x0004;
        const LOCAL_SYMS_STRIPPED     = 0x0008;
        const AGGRESSIVE_WS_TRIM      = 0x0010;
        const LARGE_ADDRESS_AWARE     = 0x0020;
        const BYTES_REVERSED_LO       = 0x0080;
        const MACHINE_32BIT           = 0x0100;
        const DEBUG_STRIPPED          = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP       = 0x0800;
        const SYSTEM                  = 0x1000;
        const DLL                     = 0x2000;
        const UP_SYSTEM_ONLY          = 0x4000;
        const BYTES_REVERSED_HI       = 0x8000;
    }
}
unsafe impl Castable for FileCharacteristics {}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: Offset,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: FileCharacteristics,
}
impl Default for ImageFileHeader {
    fn default() -> Self {
        Self {
            machine: 0x014C, // i386
            number_of_sections: 0,
            time_date_stamp: 0,
            pointer_to_symbol_table: Offset(0),
            number_of_symbols: 0,
            size_of_optional_header: std::mem::size_of::<ImageOptionalHeader32>() as u16,
            characteristics: FileCharacteristics::EXECUTABLE_IMAGE
                | FileCharacteristics::MACHINE_32BIT,
        }
    }
}
impl ImageFileHeader {
    pub fn default_x64() -> Self {
        Self {
            machine: 0x8664, // AMD64
            size_of_optional_header: std::mem::size_of::<ImageOptionalHeader64>() as u16,
            characteristics: FileCharacteristics::EXECUTABLE_IMAGE
                | FileCharacteristics::LARGE_ADDRESS_AWARE,
            ..Self::default()
        }
    }
}

bitflags! {
    pub struct DLLCharacteristics: u16 {
        const HIGH_ENTROPY_VA       = 0x0020;
        const DYNAMIC_BASE          = 0x0040;
        const FORCE_INTEGRITY       = 0x0080;
        const NX_COMPAT             = 0x0100;
        const NO_ISOLATION          = 0x0200;
        const NO_SEH                = 0x0400;
        const NO_BIND               = 0x0800;
        const APPCONTAINER          = 0x1000;
        const WDM_DRIVER            = 0x2000;
        const GUARD_CF              = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}
unsafe impl Castable for DLLCharacteristics {}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageDataDirectory {
    pub virtual_address: RVA,
    pub size: u32,
}
impl ImageDataDirectory {
    /// A directory is present when its size is nonzero.
    pub fn present(&self) -> bool {
        self.size != 0
    }
}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageOptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: RVA,
    pub base_of_code: RVA,
    pub base_of_data: RVA,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: DLLCharacteristics,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [ImageDataDirectory; 16],
}
impl Default for ImageOptionalHeader32 {
    fn default() -> Self {
        Self {
            magic: HDR32_MAGIC,
            major_linker_version: 0xE,
            minor_linker_version: 0x0,
            size_of_code: 0x0,
            size_of_initialized_data: 0x0,
            size_of_uninitialized_data: 0x0,
            address_of_entry_point: RVA(0x1000),
            base_of_code: RVA(0x1000),
            base_of_data: RVA(0),
            image_base: 0x40_0000,
            section_alignment: 0x1000,
            file_alignment: 0x400,
            major_operating_system_version: 4,
            minor_operating_system_version: 0,
            major_image_version: 4,
            minor_image_version: 0,
            major_subsystem_version: 4,
            minor_subsystem_version: 0,
            win32_version_value: 0,
            size_of_image: 0,
            size_of_headers: 0,
            checksum: 0,
            subsystem: 2, // Windows GUI
            dll_characteristics: DLLCharacteristics::DYNAMIC_BASE
                | DLLCharacteristics::NX_COMPAT
                | DLLCharacteristics::TERMINAL_SERVER_AWARE,
            size_of_stack_reserve: 0x40000,
            size_of_stack_commit: 0x2000,
            size_of_heap_reserve: 0x100000,
            size_of_heap_commit: 0x1000,
            loader_flags: 0,
            number_of_rva_and_sizes: 0x10,
            data_directory: [ImageDataDirectory::default(); 16],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageOptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: RVA,
    pub base_of_code: RVA,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: DLLCharacteristics,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [ImageDataDirectory; 16],
}
impl Default for ImageOptionalHeader64 {
    fn default() -> Self {
        Self {
            magic: HDR64_MAGIC,
            major_linker_version: 0xE,
            minor_linker_version: 0x0,
            size_of_code: 0x0,
            size_of_initialized_data: 0x0,
            size_of_uninitialized_data: 0x0,
            address_of_entry_point: RVA(0x1000),
            base_of_code: RVA(0x1000),
            image_base: 0x1_4000_0000,
            section_alignment: 0x1000,
            file_alignment: 0x400,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            win32_version_value: 0,
            size_of_image: 0,
            size_of_headers: 0,
            checksum: 0,
            subsystem: 2,
            dll_characteristics: DLLCharacteristics::DYNAMIC_BASE
                | DLLCharacteristics::NX_COMPAT
                | DLLCharacteristics::TERMINAL_SERVER_AWARE,
            size_of_stack_reserve: 0x100000,
            size_of_stack_commit: 0x1000,
            size_of_heap_reserve: 0x100000,
            size_of_heap_commit: 0x1000,
            loader_flags: 0,
            number_of_rva_and_sizes: 0x10,
            data_directory: [ImageDataDirectory::default(); 16],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageNTHeaders32 {
    pub signature: u32,
    pub file_header: ImageFileHeader,
    pub optional_header: ImageOptionalHeader32,
}
impl Default for ImageNTHeaders32 {
    fn default() -> Self {
        Self {
            signature: NT_SIGNATURE,
            file_header: ImageFileHeader::default(),
            optional_header: ImageOptionalHeader32::default(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageNTHeaders64 {
    pub signature: u32,
    pub file_header: ImageFileHeader,
    pub optional_header: ImageOptionalHeader64,
}
impl Default for ImageNTHeaders64 {
    fn default() -> Self {
        Self {
            signature: NT_SIGNATURE,
            file_header: ImageFileHeader::default_x64(),
            optional_header: ImageOptionalHeader64::default(),
        }
    }
}

/// A width-erased reference to the validated NT headers of an image.
pub enum NtHeaders<'data> {
    X32(&'data ImageNTHeaders32),
    X64(&'data ImageNTHeaders64),
}
impl NtHeaders<'_> {
    pub fn file_header(&self) -> &ImageFileHeader {
        match self {
            Self::X32(h) => &h.file_header,
            Self::X64(h) => &h.file_header,
        }
    }
    pub fn entry_point(&self) -> RVA {
        match self {
            Self::X32(h) => h.optional_header.address_of_entry_point,
            Self::X64(h) => h.optional_header.address_of_entry_point,
        }
    }
    pub fn image_base(&self) -> u64 {
        match self {
            Self::X32(h) => h.optional_header.image_base as u64,
            Self::X64(h) => h.optional_header.image_base,
        }
    }
    pub fn image_size(&self) -> u32 {
        match self {
            Self::X32(h) => h.optional_header.size_of_image,
            Self::X64(h) => h.optional_header.size_of_image,
        }
    }
    pub fn section_alignment(&self) -> u32 {
        match self {
            Self::X32(h) => h.optional_header.section_alignment,
            Self::X64(h) => h.optional_header.section_alignment,
        }
    }
    pub fn file_alignment(&self) -> u32 {
        match self {
            Self::X32(h) => h.optional_header.file_alignment,
            Self::X64(h) => h.optional_header.file_alignment,
        }
    }
    pub fn size_of_optional_header(&self) -> u16 {
        self.file_header().size_of_optional_header
    }
    pub fn data_directories(&self) -> &[ImageDataDirectory] {
        let (table, declared) = match self {
            Self::X32(h) => (
                &h.optional_header.data_directory[..],
                h.optional_header.number_of_rva_and_sizes as usize,
            ),
            Self::X64(h) => (
                &h.optional_header.data_directory[..],
                h.optional_header.number_of_rva_and_sizes as usize,
            ),
        };
        &table[..declared.min(table.len())]
    }
}

bitflags! {
    pub struct SectionCharacteristics: u32 {
        const TYPE_NO_PAD            = 0x0000_0008;
        const CNT_CODE               = 0x0000_0020;
        const CNT_INITIALIZED_DATA   = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_INFO               = 0x0000_0200;
        const LNK_REMOVE             = 0x0000_0800;
        const LNK_COMDAT             = 0x0000_1000;
        const GPREL                  = 0x0000_8000;
        const ALIGN_1BYTES           = 0x0010_0000;
        const ALIGN_2BYTES           = 0x0020_0000;
        const ALIGN_4BYTES           = 0x0030_0000;
        const ALIGN_8BYTES           = 0x0040_0000;
        const ALIGN_16BYTES          = 0x0050_0000;
        const ALIGN_MASK             = 0x00F0_0000;
        const LNK_NRELOC_OVFL        = 0x0100_0000;
        const MEM_DISCARDABLE        = 0x0200_0000;
        const MEM_NOT_CACHED         = 0x0400_0000;
        const MEM_NOT_PAGED          = 0x0800_0000;
        const MEM_SHARED             = 0x1000_0000;
        const MEM_EXECUTE            = 0x2000_0000;
        const MEM_READ               = 0x4000_0000;
        const MEM_WRITE              = 0x8000_0000;
    }
}
unsafe impl Castable for SectionCharacteristics {}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageSectionHeader {
    pub name: [CChar; 8],
    pub virtual_size: u32,
    pub virtual_address: RVA,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: Offset,
    pub pointer_to_relocations: Offset,
    pub pointer_to_linenumbers: Offset,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: SectionCharacteristics,
}
impl ImageSectionHeader {
    pub fn set_name(&mut self, name: &str) {
        let mut buf = [CChar(0); 8];
        for (dst, src) in buf.iter_mut().zip(name.bytes()) {
            *dst = CChar(src);
        }
        self.name = buf;
    }
}
impl Default for ImageSectionHeader {
    fn default() -> Self {
        Self {
            name: [CChar(0); 8],
            virtual_size: 0,
            virtual_address: RVA(0),
            size_of_raw_data: 0,
            pointer_to_raw_data: Offset(0),
            pointer_to_relocations: Offset(0),
            pointer_to_linenumbers: Offset(0),
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: SectionCharacteristics::empty(),
        }
    }
}

/// Indices into the optional header's data directory array.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageDirectoryEntry {
    Export = 0,
    Import = 1,
    Resource = 2,
    Exception = 3,
    Security = 4,
    BaseReloc = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPTR = 8,
    TLS = 9,
    LoadConfig = 10,
    BoundImport = 11,
    IAT = 12,
    DelayImport = 13,
    COMDescriptor = 14,
    Reserved = 15,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageExportDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub name: RVA,
    pub base: u32,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub address_of_functions: RVA,     // [RVA; number_of_functions]
    pub address_of_names: RVA,         // [RVA; number_of_names]
    pub address_of_name_ordinals: RVA, // [u16; number_of_names]
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageImportDescriptor {
    /// The `Characteristics`/`OriginalFirstThunk` union: RVA of the import
    /// lookup table. Zero terminates the descriptor array.
    pub original_first_thunk: RVA,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name: RVA,
    pub first_thunk: RVA,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageDelayloadDescriptor {
    pub attributes: u32,
    pub dll_name_rva: RVA,
    pub module_handle_rva: RVA,
    pub import_address_table_rva: RVA,
    pub import_name_table_rva: RVA,
    pub bound_import_address_table_rva: RVA,
    pub unload_information_table_rva: RVA,
    pub time_date_stamp: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageBoundImportDescriptor {
    pub time_date_stamp: u32,
    /// Offset of the module name, relative to the start of the bound-import
    /// directory. Zero terminates the descriptor list.
    pub offset_module_name: u16,
    pub number_of_module_forwarder_refs: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageBoundForwarderRef {
    pub time_date_stamp: u32,
    pub offset_module_name: u16,
    pub reserved: u16,
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageBaseRelocation {
    pub virtual_address: RVA,
    pub size_of_block: u32,
}
impl ImageBaseRelocation {
    /// Number of packed relocation words in this block.
    pub fn relocations(&self) -> usize {
        let header_size = std::mem::size_of::<Self>();
        let word_size = std::mem::size_of::<u16>();

        (self.size_of_block as usize).saturating_sub(header_size) / word_size
    }
}

/// An exception directory entry (the x86-compatible layout).
#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct RuntimeFunction {
    pub begin_address: RVA,
    pub end_address: RVA,
    pub unwind_info: RVA,
}

bitflags! {
    pub struct TLSCharacteristics: u32 {
        const ALIGN_1BYTES  = 0x0010_0000;
        const ALIGN_2BYTES  = 0x0020_0000;
        const ALIGN_4BYTES  = 0x0030_0000;
        const ALIGN_8BYTES  = 0x0040_0000;
        const ALIGN_16BYTES = 0x0050_0000;
        const ALIGN_32BYTES = 0x0060_0000;
        const ALIGN_64BYTES = 0x0070_0000;
        const ALIGN_MASK    = 0x00F0_0000;
    }
}
unsafe impl Castable for TLSCharacteristics {}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageTLSDirectory32 {
    pub start_address_of_raw_data: VA32,
    pub end_address_of_raw_data: VA32,
    pub address_of_index: VA32,
    pub address_of_callbacks: VA32,
    pub size_of_zero_fill: u32,
    pub characteristics: TLSCharacteristics,
}

#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq, Castable, Debug)]
pub struct ImageTLSDirectory64 {
    pub start_address_of_raw_data: VA64,
    pub end_address_of_raw_data: VA64,
    pub address_of_index: VA64,
    pub address_of_callbacks: VA64,
    pub size_of_zero_fill: u32,
    pub characteristics: TLSCharacteristics,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ImageDebugType {
    Unknown = 0,
    COFF = 1,
    CodeView = 2,
    FPO = 3,
    Misc = 4,
    Exception = 5,
    FixUp = 6,
    Borland = 9,
}
impl ImageDebugType {
    /// Convert the raw `u32` value to an `ImageDebugType` enum variant.
    pub fn from_u32(u: u32) -> Self {
        match u {
            1 => Self::COFF,
            2 => Self::CodeView,
            3 => Self::FPO,
            4 => Self::Misc,
            5 => Self::Exception,
            6 => Self::FixUp,
            9 => Self::Borland,
            _ => Self::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Castable, Debug)]
pub struct ImageDebugDirectory {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub type_: u32,
    pub size_of_data: u32,
    pub address_of_raw_data: RVA,
    pub pointer_to_raw_data: Offset,
}
