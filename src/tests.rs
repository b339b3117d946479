use std::io::Cursor;
use std::mem;
use std::slice;

use crate::download::{stream_body, DownloadAction, Downloader, FileDownloader};
use crate::headers::*;
use crate::image::{classify, Image};
use crate::imports::ImportData;
use crate::pdbinfo::{pdb_base_name, Guid, PdbIdentity};
use crate::provider::{PdbError, Prov};
use crate::symbols::{Module, Variant};
use crate::types::*;

fn write_struct<T: Copy>(data: &mut [u8], offset: usize, value: &T) {
    let size = mem::size_of::<T>();
    let bytes = unsafe { slice::from_raw_parts(value as *const T as *const u8, size) };
    data[offset..offset + size].copy_from_slice(bytes);
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn write_cstr(data: &mut [u8], offset: usize, value: &str) {
    data[offset..offset + value.len()].copy_from_slice(value.as_bytes());
    data[offset + value.len()] = 0;
}

const IMAGE_BASE: u64 = 0x1_4000_0000;

/// Lay out a small but complete PE32+ file image:
///
/// - headers in the first 0x400 bytes, file alignment 0x200;
/// - `.rdata` at RVA 0x1000 (file 0x400), holding every directory;
/// - `.text` at RVA 0x2000 (file 0x800), the target of exports and relocs.
fn build_file_image() -> Vec<u8> {
    let mut data = vec![0u8; 0xC00];

    write_struct(&mut data, 0, &ImageDOSHeader::default());

    let mut nt = ImageNTHeaders64::default();
    nt.file_header.number_of_sections = 2;
    nt.optional_header.file_alignment = 0x200;
    nt.optional_header.size_of_image = 0x3000;
    nt.optional_header.size_of_headers = 0x400;
    nt.optional_header.data_directory[ImageDirectoryEntry::Export as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1000), size: 0x100 };
    nt.optional_header.data_directory[ImageDirectoryEntry::Import as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1100), size: 0x3C };
    nt.optional_header.data_directory[ImageDirectoryEntry::Exception as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1380), size: 36 };
    nt.optional_header.data_directory[ImageDirectoryEntry::BaseReloc as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1300), size: 24 };
    nt.optional_header.data_directory[ImageDirectoryEntry::Debug as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1200), size: 28 };
    nt.optional_header.data_directory[ImageDirectoryEntry::TLS as usize] =
        ImageDataDirectory { virtual_address: RVA(0x1260), size: 40 };
    nt.optional_header.data_directory[ImageDirectoryEntry::BoundImport as usize] =
        ImageDataDirectory { virtual_address: RVA(0x13C0), size: 0x30 };
    nt.optional_header.data_directory[ImageDirectoryEntry::DelayImport as usize] =
        ImageDataDirectory { virtual_address: RVA(0x11C0), size: 0x40 };
    write_struct(&mut data, 0x40, &nt);

    let mut rdata = ImageSectionHeader::default();
    rdata.set_name(".rdata");
    rdata.virtual_size = 0x400;
    rdata.virtual_address = RVA(0x1000);
    rdata.size_of_raw_data = 0x400;
    rdata.pointer_to_raw_data = Offset(0x400);
    rdata.characteristics = SectionCharacteristics::CNT_INITIALIZED_DATA
        | SectionCharacteristics::MEM_READ;
    write_struct(&mut data, 0x148, &rdata);

    let mut text = ImageSectionHeader::default();
    text.set_name(".text");
    text.virtual_size = 0x400;
    text.virtual_address = RVA(0x2000);
    text.size_of_raw_data = 0x400;
    text.pointer_to_raw_data = Offset(0x800);
    text.characteristics =
        SectionCharacteristics::CNT_CODE | SectionCharacteristics::MEM_EXECUTE;
    write_struct(&mut data, 0x148 + 40, &text);

    // export directory: four EAT slots, three of them named, ordinal base 5,
    // slot 1 forwarding into the directory's own range
    let exports = ImageExportDirectory {
        characteristics: 0,
        time_date_stamp: 0,
        major_version: 0,
        minor_version: 0,
        name: RVA(0x1098),
        base: 5,
        number_of_functions: 4,
        number_of_names: 3,
        address_of_functions: RVA(0x1028),
        address_of_names: RVA(0x1038),
        address_of_name_ordinals: RVA(0x1044),
    };
    write_struct(&mut data, 0x400, &exports);
    write_u32(&mut data, 0x428, 0x2000); // alpha
    write_u32(&mut data, 0x42C, 0x10C0); // beta -> forwarder string
    write_u32(&mut data, 0x430, 0x2010); // unnamed
    write_u32(&mut data, 0x434, 0x2020); // gamma
    write_u32(&mut data, 0x438, 0x1080);
    write_u32(&mut data, 0x43C, 0x1088);
    write_u32(&mut data, 0x440, 0x1090);
    write_u16(&mut data, 0x444, 0);
    write_u16(&mut data, 0x446, 1);
    write_u16(&mut data, 0x448, 3);
    write_cstr(&mut data, 0x480, "alpha");
    write_cstr(&mut data, 0x488, "beta");
    write_cstr(&mut data, 0x490, "gamma");
    write_cstr(&mut data, 0x498, "test.dll");
    write_cstr(&mut data, 0x4C0, "OTHER.Func");

    // imports: kernel32 (not bound) and user32 (bound)
    let kernel32 = ImageImportDescriptor {
        original_first_thunk: RVA(0x1140),
        time_date_stamp: 0,
        forwarder_chain: 0,
        name: RVA(0x1190),
        first_thunk: RVA(0x1158),
    };
    write_struct(&mut data, 0x500, &kernel32);
    let user32 = ImageImportDescriptor {
        original_first_thunk: RVA(0x1170),
        time_date_stamp: 0x5EAD_BEEF,
        forwarder_chain: 0,
        name: RVA(0x11A0),
        first_thunk: RVA(0x1180),
    };
    write_struct(&mut data, 0x514, &user32);
    // kernel32 lookup table: one hint/name import, one ordinal import
    write_u64(&mut data, 0x540, 0x11B0);
    write_u64(&mut data, 0x548, 0x8000_0000_0000_0007);
    // kernel32 address table
    write_u64(&mut data, 0x558, 0x7FF8_0000_1000);
    write_u64(&mut data, 0x560, 0x7FF8_0000_2000);
    // user32 lookup table: one ordinal import
    write_u64(&mut data, 0x570, 0x8000_0000_0000_0021);
    // user32 address table
    write_u64(&mut data, 0x580, 0x7FFA_1234_5678);
    write_cstr(&mut data, 0x590, "kernel32.dll");
    write_cstr(&mut data, 0x5A0, "user32.dll");
    write_u16(&mut data, 0x5B0, 0x12);
    write_cstr(&mut data, 0x5B2, "ExitProcess");

    // delay imports: comctl32, one ordinal import
    let comctl32 = ImageDelayloadDescriptor {
        attributes: 1,
        dll_name_rva: RVA(0x1340),
        module_handle_rva: RVA(0),
        import_address_table_rva: RVA(0x1330),
        import_name_table_rva: RVA(0x1320),
        bound_import_address_table_rva: RVA(0),
        unload_information_table_rva: RVA(0),
        time_date_stamp: 0,
    };
    write_struct(&mut data, 0x5C0, &comctl32);

    // debug directory with an RSDS record
    let debug_entry = ImageDebugDirectory {
        characteristics: 0,
        time_date_stamp: 0,
        major_version: 0,
        minor_version: 0,
        type_: ImageDebugType::CodeView as u32,
        size_of_data: 0x30,
        address_of_raw_data: RVA(0x1220),
        pointer_to_raw_data: Offset(0x620),
    };
    write_struct(&mut data, 0x600, &debug_entry);
    data[0x620..0x624].copy_from_slice(b"RSDS");
    write_u32(&mut data, 0x624, 0x1122_3344);
    write_u16(&mut data, 0x628, 0x5566);
    write_u16(&mut data, 0x62A, 0x7788);
    data[0x62C..0x634].copy_from_slice(&[0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00]);
    write_u32(&mut data, 0x634, 3);
    write_cstr(&mut data, 0x638, "foo.pdb");

    // TLS directory; the callback array address is a VA
    let tls = ImageTLSDirectory64 {
        start_address_of_raw_data: VA64(0),
        end_address_of_raw_data: VA64(0),
        address_of_index: VA64(0),
        address_of_callbacks: VA64(IMAGE_BASE + 0x1290),
        size_of_zero_fill: 0,
        characteristics: TLSCharacteristics::empty(),
    };
    write_struct(&mut data, 0x660, &tls);
    write_u64(&mut data, 0x690, IMAGE_BASE + 0x2000);
    write_u64(&mut data, 0x698, IMAGE_BASE + 0x2010);

    // two relocation pages, two entries each
    write_u32(&mut data, 0x700, 0x2000);
    write_u32(&mut data, 0x704, 12);
    write_u16(&mut data, 0x708, (10 << 12) | 0x10); // dir64
    write_u16(&mut data, 0x70A, 0); // absolute padding
    write_u32(&mut data, 0x70C, 0x1000);
    write_u32(&mut data, 0x710, 12);
    write_u16(&mut data, 0x714, (3 << 12) | 0x20); // highlow
    write_u16(&mut data, 0x716, 0);

    // delay-load lookup/address tables and name
    write_u64(&mut data, 0x720, 0x8000_0000_0000_0005);
    write_u64(&mut data, 0x730, 0x7FFB_0000_AAAA);
    write_cstr(&mut data, 0x740, "comctl32.dll");

    // exception directory: two runtime functions and a terminator
    let first = RuntimeFunction {
        begin_address: RVA(0x2000),
        end_address: RVA(0x2010),
        unwind_info: RVA(0x1390),
    };
    write_struct(&mut data, 0x780, &first);
    let second = RuntimeFunction {
        begin_address: RVA(0x2010),
        end_address: RVA(0x2020),
        unwind_info: RVA(0x1390),
    };
    write_struct(&mut data, 0x78C, &second);

    // bound imports: ntdll with one forwarder; names are relative to the
    // directory base
    write_u32(&mut data, 0x7C0, 0x1111_1111);
    write_u16(&mut data, 0x7C4, 0x18);
    write_u16(&mut data, 0x7C6, 1);
    write_u32(&mut data, 0x7C8, 0x2222_2222);
    write_u16(&mut data, 0x7CC, 0x22);
    write_u16(&mut data, 0x7CE, 0);
    write_cstr(&mut data, 0x7D8, "ntdll.dll");
    write_cstr(&mut data, 0x7E2, "kb.dll");

    data
}

const S_CONSTANT: u16 = 0x1107;
const S_GDATA32: u16 = 0x110C;
const S_PUB32: u16 = 0x110E;

/// Append one symbol record: a u16 length (excluding the length field
/// itself), the u16 kind and the payload, kept 4-aligned.
fn push_symbol(stream: &mut Vec<u8>, kind: u16, payload: &[u8]) {
    let mut length = 2 + payload.len();
    let padding = (4 - (length + 2) % 4) % 4;
    length += padding;

    stream.extend_from_slice(&(length as u16).to_le_bytes());
    stream.extend_from_slice(&kind.to_le_bytes());
    stream.extend_from_slice(payload);
    stream.resize(stream.len() + padding, 0);
}

/// Hand-assemble a minimal PDB: an MSF container holding an empty type
/// stream and a global symbol stream with one public, one constant and one
/// data symbol.
fn build_pdb_fixture() -> Vec<u8> {
    const PAGE: usize = 4096;
    let mut data = vec![0u8; 8 * PAGE];

    let mut symbols = Vec::new();

    let mut public = Vec::new();
    public.extend_from_slice(&2u32.to_le_bytes()); // function flag
    public.extend_from_slice(&0x1234u32.to_le_bytes()); // section offset
    public.extend_from_slice(&1u16.to_le_bytes()); // section
    public.extend_from_slice(b"main\0");
    push_symbol(&mut symbols, S_PUB32, &public);

    let mut constant = Vec::new();
    constant.extend_from_slice(&0x74u32.to_le_bytes()); // type: int
    constant.extend_from_slice(&42u16.to_le_bytes()); // direct numeric leaf
    constant.extend_from_slice(b"answer\0");
    push_symbol(&mut symbols, S_CONSTANT, &constant);

    let mut global = Vec::new();
    global.extend_from_slice(&0x74u32.to_le_bytes()); // type: int
    global.extend_from_slice(&0x40u32.to_le_bytes()); // section offset
    global.extend_from_slice(&2u16.to_le_bytes()); // section
    global.extend_from_slice(b"g_state\0");
    push_symbol(&mut symbols, S_GDATA32, &global);

    // page 0: the container superblock
    data[..32].copy_from_slice(b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0");
    write_u32(&mut data, 32, PAGE as u32); // page size
    write_u32(&mut data, 36, 1); // free page map
    write_u32(&mut data, 40, 8); // pages in the file
    write_u32(&mut data, 44, 36); // stream directory size in bytes
    write_u32(&mut data, 48, 0);
    write_u32(&mut data, 52, 3); // page listing the directory pages

    // page 3: the directory occupies page 4
    write_u32(&mut data, 3 * PAGE, 4);

    // page 4: stream directory: count, stream sizes, then page lists
    write_u32(&mut data, 4 * PAGE, 5);
    write_u32(&mut data, 4 * PAGE + 4, 0); // old directory
    write_u32(&mut data, 4 * PAGE + 8, 0); // pdb info (never read here)
    write_u32(&mut data, 4 * PAGE + 12, 56); // type stream
    write_u32(&mut data, 4 * PAGE + 16, 64); // debug info stream
    write_u32(&mut data, 4 * PAGE + 20, symbols.len() as u32);
    write_u32(&mut data, 4 * PAGE + 24, 5); // type stream page
    write_u32(&mut data, 4 * PAGE + 28, 6); // debug info page
    write_u32(&mut data, 4 * PAGE + 32, 7); // symbol records page

    // page 5: type stream header declaring no types
    let tpi = 5 * PAGE;
    write_u32(&mut data, tpi, 20040203); // stream version
    write_u32(&mut data, tpi + 4, 56); // header size
    write_u32(&mut data, tpi + 8, 0x1000); // first type index
    write_u32(&mut data, tpi + 12, 0x1000); // one past the last type index
    write_u32(&mut data, tpi + 16, 0); // type record bytes
    write_u16(&mut data, tpi + 20, 0xFFFF); // hash stream
    write_u16(&mut data, tpi + 22, 0xFFFF); // auxiliary hash stream
    write_u32(&mut data, tpi + 24, 4); // hash key size
    write_u32(&mut data, tpi + 28, 0x3_FFFF); // hash buckets
    // hash buffer offsets and lengths stay zero

    // page 6: debug info header naming the symbol records stream
    let dbi = 6 * PAGE;
    write_u32(&mut data, dbi, 0xFFFF_FFFF); // signature
    write_u32(&mut data, dbi + 4, 19990903); // stream version
    write_u32(&mut data, dbi + 8, 1); // age
    write_u16(&mut data, dbi + 12, 0xFFFF); // global symbol index stream
    write_u16(&mut data, dbi + 14, 0); // build number
    write_u16(&mut data, dbi + 16, 0xFFFF); // public symbol index stream
    write_u16(&mut data, dbi + 18, 0); // dll version
    write_u16(&mut data, dbi + 20, 4); // symbol records stream
    write_u16(&mut data, dbi + 22, 0); // dll rebuild number
    // substream sizes stay zero
    write_u16(&mut data, dbi + 58, 0x8664); // machine

    // page 7: the symbol records
    data[7 * PAGE..7 * PAGE + symbols.len()].copy_from_slice(&symbols);

    data
}

/// The same image in its mapped layout: sections moved to their RVAs.
fn build_module_image() -> Vec<u8> {
    let file = build_file_image();
    let mut data = vec![0u8; 0x3000];

    data[..0x400].copy_from_slice(&file[..0x400]);
    data[0x1000..0x1400].copy_from_slice(&file[0x400..0x800]);
    data[0x2000..0x2400].copy_from_slice(&file[0x800..0xC00]);

    data
}

#[test]
fn test_classify() {
    let file = build_file_image();
    assert_eq!(classify(&file), Arch::X64);

    let image = Image::from_file(&file);
    assert!(image.valid());
    assert_eq!(image.arch(), Arch::X64);
    assert_eq!(image.image_base(), IMAGE_BASE);

    // breaking any of the three magics declassifies the image
    let mut broken = file.clone();
    broken[0] = b'Z';
    assert_eq!(classify(&broken), Arch::Unknown);

    let mut broken = file.clone();
    write_u32(&mut broken, 0x40, 0xDEAD_BEEF);
    assert_eq!(classify(&broken), Arch::Unknown);

    let mut broken = file.clone();
    write_u16(&mut broken, 0x40 + 4 + 20, 0x0107);
    assert_eq!(classify(&broken), Arch::Unknown);

    assert_eq!(classify(b"garbage"), Arch::Unknown);
}

#[test]
fn test_unknown_image_views_are_empty() {
    let junk = vec![0u8; 0x200];
    let image = Image::from_file(&junk);

    assert!(!image.valid());
    assert!(!image.imports().valid());
    assert!(!image.exports().valid());
    assert!(!image.relocs().valid());
    assert!(!image.tls().valid());
    assert!(!image.debug().valid());
    assert!(image.imports().iter().next().is_none());
    assert!(!image.exports().find_name("anything").found());
}

#[test]
fn test_sections() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let sections = image.sections();

    assert!(sections.valid());
    assert_eq!(sections.count(), 2);

    let names: Vec<&str> = sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec![".rdata", ".text"]);
}

#[test]
fn test_rva_translation() {
    let file = build_file_image();
    let module = build_module_image();

    let file_image = Image::from_file(&file);
    let module_image = Image::from_module(&module);

    // module mode: the identity
    assert_eq!(module_image.rva_to_offset(RVA(0x1005)), Some(0x1005));
    assert_eq!(module_image.rva_to_offset(RVA(0x2345)), Some(0x2345));

    // file mode: through the covering section
    assert_eq!(file_image.rva_to_offset(RVA(0x1005)), Some(0x405));
    assert_eq!(file_image.rva_to_offset(RVA(0x2000)), Some(0x800));
    assert_eq!(file_image.rva_to_offset(RVA(0x23FF)), Some(0xBFF));

    // no covering section
    assert_eq!(file_image.rva_to_offset(RVA(0x5000)), None);
    assert!(file_image.by_rva::<u8>(RVA(0x5000)).is_none());

    // the same bytes are visible through both modes
    let via_file = file_image.cstring_by_rva(RVA(0x1080)).unwrap();
    let via_module = module_image.cstring_by_rva(RVA(0x1080)).unwrap();
    assert_eq!(via_file, "alpha");
    assert_eq!(via_file, via_module);
}

fn import_pairs(image: &Image) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for library in &image.imports() {
        let library_name = library.name().unwrap().to_string();
        for function in &library {
            let what = match function.data().unwrap() {
                ImportData::Ordinal(ordinal) => format!("#{}", ordinal),
                ImportData::Name { hint, name } => format!("{}@{}", name, hint),
            };
            out.push((library_name.clone(), what));
        }
    }
    out
}

#[test]
fn test_imports() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let imports = image.imports();

    assert!(imports.valid());
    assert!(!imports.empty());

    let pairs = import_pairs(&image);
    assert_eq!(
        pairs,
        vec![
            ("kernel32.dll".to_string(), "ExitProcess@18".to_string()),
            ("kernel32.dll".to_string(), "#7".to_string()),
            ("user32.dll".to_string(), "#33".to_string()),
        ]
    );

    let libraries: Vec<_> = imports.iter().collect();
    assert!(!libraries[0].bound());
    assert!(libraries[1].bound());
}

#[test]
fn test_import_addresses() {
    let file = build_file_image();
    let module = build_module_image();

    let file_image = Image::from_file(&file);
    let module_image = Image::from_module(&module);

    // module mode exposes the live address table everywhere
    let addresses: Vec<u64> = module_image
        .imports()
        .iter()
        .flat_map(|lib| lib.functions().map(|f| f.address()).collect::<Vec<_>>())
        .collect();
    assert_eq!(addresses, vec![0x7FF8_0000_1000, 0x7FF8_0000_2000, 0x7FFA_1234_5678]);

    // file mode exposes it only for bound libraries
    let addresses: Vec<u64> = file_image
        .imports()
        .iter()
        .flat_map(|lib| lib.functions().map(|f| f.address()).collect::<Vec<_>>())
        .collect();
    assert_eq!(addresses, vec![0, 0, 0x7FFA_1234_5678]);
}

#[test]
fn test_file_module_parity() {
    let file = build_file_image();
    let module = build_module_image();

    let file_image = Image::from_file(&file);
    let module_image = Image::from_module(&module);

    assert_eq!(import_pairs(&file_image), import_pairs(&module_image));

    let file_ordinals: Vec<u32> = file_image.exports().iter().map(|e| e.ordinal()).collect();
    let module_ordinals: Vec<u32> =
        module_image.exports().iter().map(|e| e.ordinal()).collect();
    assert_eq!(file_ordinals, module_ordinals);

    fn reloc_tuples(image: &Image) -> Vec<(u32, u16, RelocKind)> {
        image
            .relocs()
            .iter()
            .flat_map(|page| {
                page.iter()
                    .map(|r| (page.page_rva().0, r.offset_in_page(), r.kind()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
    assert_eq!(reloc_tuples(&file_image), reloc_tuples(&module_image));
}

#[test]
fn test_exports() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let exports = image.exports();

    assert!(exports.valid());
    assert_eq!(exports.count(), 4);
    assert_eq!(exports.ordinal_base(), 5);
    assert_eq!(exports.module_name(), Some("test.dll"));

    let entries: Vec<_> = exports.iter().collect();
    assert_eq!(entries.len(), 4);

    assert_eq!(entries[0].name(), Some("alpha"));
    assert_eq!(entries[0].kind(), ExportKind::Exact);
    assert_eq!(entries[0].ordinal(), 5);

    assert_eq!(entries[1].name(), Some("beta"));
    assert_eq!(entries[1].kind(), ExportKind::Forwarder);
    assert_eq!(entries[1].forwarder(), Some("OTHER.Func"));

    assert!(!entries[2].has_name());
    assert_eq!(entries[2].name(), None);
    assert_eq!(entries[2].kind(), ExportKind::Exact);
    assert_eq!(entries[2].ordinal(), 7);

    assert_eq!(entries[3].name(), Some("gamma"));
    assert_eq!(entries[3].ordinal(), 8);
}

#[test]
fn test_export_lookup() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let exports = image.exports();

    let alpha = exports.find_name("alpha");
    assert!(alpha.found());
    assert_eq!(alpha.kind(), ExportKind::Exact);
    assert_eq!(alpha.ordinal(), 5);
    assert_eq!(alpha.rva(), RVA(0x2000));
    assert!(alpha.address().is_some());

    let beta = exports.find_name("beta");
    assert_eq!(beta.kind(), ExportKind::Forwarder);
    assert_eq!(beta.forwarder(), Some("OTHER.Func"));
    assert!(beta.address().is_none());

    let gamma = exports.find_name("gamma");
    assert_eq!(gamma.ordinal(), 8);

    assert!(!exports.find_name("delta").found());
    assert!(!exports.find_name("").found());

    // ordinal round trip over every entry
    for entry in &exports {
        let by_ordinal = exports.find_ordinal(entry.ordinal());
        assert!(by_ordinal.found());
        assert_eq!(by_ordinal.kind(), entry.kind());
        assert_eq!(by_ordinal.ordinal(), entry.ordinal());

        if let Some(name) = entry.name() {
            let by_name = exports.find_name(name);
            assert_eq!(by_name.ordinal(), entry.ordinal());
            assert_eq!(by_name.kind(), entry.kind());
        }
    }

    // out of range on either side
    assert!(!exports.find_ordinal(4).found());
    assert!(!exports.find_ordinal(9).found());
}

#[test]
fn test_forwarder_containment() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let exports = image.exports();

    for entry in &exports {
        let contained = exports.contains(entry.rva());
        assert_eq!(entry.kind() == ExportKind::Forwarder, contained);
    }
}

#[test]
fn test_relocations() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let relocs = image.relocs();

    assert!(relocs.valid());

    let pages: Vec<_> = relocs.iter().collect();
    assert_eq!(pages.len(), 2);

    let mut total = 0;
    for page in &pages {
        assert_eq!(
            page.count(),
            (page.size_of_block() as usize - 8) / 2
        );
        total += page.size_of_block();
    }
    assert_eq!(
        total,
        image
            .data_directory(ImageDirectoryEntry::BaseReloc)
            .unwrap()
            .size
    );

    let kinds: Vec<RelocKind> = pages
        .iter()
        .flat_map(|p| p.iter().map(|r| r.kind()).collect::<Vec<_>>())
        .collect();
    assert_eq!(
        kinds,
        vec![
            RelocKind::Dir64,
            RelocKind::Absolute,
            RelocKind::HighLow,
            RelocKind::Absolute
        ]
    );

    assert_eq!(pages[0].iter().next().unwrap().rva(), RVA(0x2010));
    assert!(pages[0].iter().next().unwrap().target().is_some());
}

#[test]
fn test_relocations_zero_block_terminates() {
    // rewrite the second page header to zeroes; iteration must stop after
    // the first page even though the directory size says otherwise
    let mut file = build_file_image();
    write_u32(&mut file, 0x70C, 0);
    write_u32(&mut file, 0x710, 0);

    let image = Image::from_file(&file);
    assert_eq!(image.relocs().iter().count(), 1);
}

#[test]
fn test_exceptions() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let exceptions = image.exceptions();

    assert!(exceptions.valid());

    let functions: Vec<_> = exceptions.iter().collect();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0].begin_address, RVA(0x2000));
    assert_eq!(functions[1].begin_address, RVA(0x2010));
}

#[test]
fn test_tls_callbacks() {
    let file = build_file_image();
    let module = build_module_image();

    for image in [Image::from_file(&file), Image::from_module(&module)] {
        let tls = image.tls();
        assert!(tls.valid());

        let callbacks: Vec<u64> = tls.callbacks().collect();
        assert_eq!(callbacks, vec![IMAGE_BASE + 0x2000, IMAGE_BASE + 0x2010]);
    }
}

#[test]
fn test_tls_unreachable_callbacks() {
    // an address-of-callbacks below the image base cannot be converted
    let mut file = build_file_image();
    write_u64(&mut file, 0x678, 0x1000);

    let image = Image::from_file(&file);
    assert!(image.tls().valid());
    assert_eq!(image.tls().callbacks().count(), 0);
}

#[test]
fn test_delay_imports() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let delayed = image.delay_imports();

    assert!(delayed.valid());

    let libraries: Vec<_> = delayed.iter().collect();
    assert_eq!(libraries.len(), 1);
    assert_eq!(libraries[0].name(), Some("comctl32.dll"));

    let functions: Vec<_> = libraries[0].functions().collect();
    assert_eq!(functions.len(), 1);
    assert_eq!(functions[0].ordinal(), Some(5));
    assert_eq!(functions[0].address(), 0x7FFB_0000_AAAA);
}

#[test]
fn test_bound_imports() {
    let file = build_file_image();
    let image = Image::from_file(&file);
    let bound = image.bound_imports();

    assert!(bound.valid());

    let libraries: Vec<_> = bound.iter().collect();
    assert_eq!(libraries.len(), 1);
    assert_eq!(libraries[0].name(), Some("ntdll.dll"));
    assert_eq!(libraries[0].timestamp(), 0x1111_1111);
    assert_eq!(libraries[0].forwarder_count(), 1);

    let forwarders: Vec<_> = libraries[0].forwarders().collect();
    assert_eq!(forwarders[0].name(), Some("kb.dll"));
    assert_eq!(forwarders[0].timestamp(), 0x2222_2222);
}

#[test]
fn test_debug_directory() {
    let file = build_file_image();
    let module = build_module_image();

    for image in [Image::from_file(&file), Image::from_module(&module)] {
        let debug = image.debug();
        assert!(debug.valid());
        assert_eq!(debug.count(), 1);

        let identity = debug.pdb_identity().unwrap();
        match &identity {
            PdbIdentity::Pdb70 {
                guid,
                age,
                pdb_name,
            } => {
                assert_eq!(guid.data1, 0x1122_3344);
                assert_eq!(guid.data2, 0x5566);
                assert_eq!(guid.data3, 0x7788);
                assert_eq!(guid.data4, [0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00]);
                assert_eq!(*age, 3);
                assert_eq!(pdb_name, "foo.pdb");
            }
            _ => panic!("expected a PDB 7.0 identity"),
        }
    }
}

#[test]
fn test_pdb70_signature() {
    let identity = PdbIdentity::Pdb70 {
        guid: Guid {
            data1: 0x1122_3344,
            data2: 0x5566,
            data3: 0x7788,
            data4: [0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00],
        },
        age: 3,
        pdb_name: "foo.pdb".to_string(),
    };

    assert_eq!(identity.sig(), "112233445566778899AABBCCDDEEFF003");
    assert_eq!(
        identity.symbol_url(),
        "foo.pdb/112233445566778899AABBCCDDEEFF003/foo.pdb"
    );
    assert_eq!(
        identity.server_url("https://msdl.microsoft.com/download/symbols"),
        "https://msdl.microsoft.com/download/symbols/foo.pdb/112233445566778899AABBCCDDEEFF003/foo.pdb"
    );
}

#[test]
fn test_pdb20_signature() {
    let identity = PdbIdentity::Pdb20 {
        signature: 0xDEAD_BEEF,
        age: 1,
        pdb_name: "bar.pdb".to_string(),
    };

    assert_eq!(identity.sig(), "DEADBEEF1");
    assert_eq!(identity.symbol_path(), "bar.pdb\\DEADBEEF1\\bar.pdb");
}

#[test]
fn test_pdb_identity_from_index_info() {
    // signature mirrored into data1 with the rest zeroed means PDB 2.0
    let pdb20 = PdbIdentity::from_index_info(
        0xDEAD_BEEF,
        Guid {
            data1: 0xDEAD_BEEF,
            data2: 0,
            data3: 0,
            data4: [0u8; 8],
        },
        1,
        "bar.pdb".to_string(),
    );
    assert!(matches!(pdb20, PdbIdentity::Pdb20 { .. }));

    let pdb70 = PdbIdentity::from_index_info(
        0xDEAD_BEEF,
        Guid {
            data1: 0xDEAD_BEEF,
            data2: 1,
            data3: 0,
            data4: [0u8; 8],
        },
        1,
        "bar.pdb".to_string(),
    );
    assert!(matches!(pdb70, PdbIdentity::Pdb70 { .. }));
}

#[test]
fn test_pdb_url_round_trip() {
    let identity = PdbIdentity::Pdb70 {
        guid: Guid {
            data1: 0xAB,
            data2: 0,
            data3: 0xFFFF,
            data4: [1, 2, 3, 4, 5, 6, 7, 8],
        },
        age: 0x1F,
        pdb_name: "dir/sub/thing.pdb".to_string(),
    };

    let url = identity.symbol_url();
    let parts: Vec<&str> = url.split('/').collect();
    assert_eq!(parts[0], pdb_base_name(identity.pdb_name()));
    assert_eq!(parts[1], identity.sig());
    assert_eq!(parts[2..].join("/"), identity.pdb_name());
}

#[derive(Default)]
struct RecordingDownloader {
    cancel_on_first: bool,
    started: usize,
    chunks: Vec<usize>,
    finished: usize,
    errors: Vec<u16>,
    cancelled: usize,
}

impl Downloader for RecordingDownloader {
    fn on_start(&mut self, _url: &str, _content_length: Option<u64>) {
        self.started += 1;
    }

    fn on_receive(&mut self, chunk: &[u8]) -> DownloadAction {
        self.chunks.push(chunk.len());
        if self.cancel_on_first {
            DownloadAction::Cancel
        } else {
            DownloadAction::Proceed
        }
    }

    fn on_finish(&mut self) {
        self.finished += 1;
    }

    fn on_error(&mut self, http_code: u16) {
        self.errors.push(http_code);
    }

    fn on_cancel(&mut self) {
        self.cancelled += 1;
    }
}

#[test]
fn test_download_stream_finish() {
    let body = vec![7u8; 1000];
    let mut downloader = RecordingDownloader::default();

    assert!(stream_body(Cursor::new(body), &mut downloader));
    assert_eq!(downloader.chunks, vec![1000]);
    assert_eq!(downloader.finished, 1);
    assert_eq!(downloader.cancelled, 0);
    assert!(downloader.errors.is_empty());
}

#[test]
fn test_download_cancellation() {
    let body = vec![7u8; 1000];
    let mut downloader = RecordingDownloader {
        cancel_on_first: true,
        ..Default::default()
    };

    assert!(!stream_body(Cursor::new(body), &mut downloader));
    assert_eq!(downloader.chunks.len(), 1);
    assert_eq!(downloader.cancelled, 1);
    assert_eq!(downloader.finished, 0);
    assert!(downloader.errors.is_empty());
}

#[test]
fn test_file_downloader_writes_target() {
    let root = std::env::temp_dir().join(format!("pesym-dl-{}", std::process::id()));
    let target = root.join("a").join("b").join("out.pdb");

    let mut downloader = FileDownloader::create(&target);
    assert!(downloader.valid());
    assert_eq!(downloader.path(), target.as_path());

    let body = b"pdb contents".to_vec();
    assert!(stream_body(Cursor::new(body), &mut downloader));

    assert_eq!(std::fs::read(&target).unwrap(), b"pdb contents");
    std::fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_file_downloader_rolls_back_created_directories() {
    let root = std::env::temp_dir().join(format!("pesym-rb-{}", std::process::id()));
    assert!(!root.exists());

    // a trailing separator makes the final create fail after the directories
    // were made; everything this call created must be gone again
    let target = format!("{}/a/b/", root.display());
    let downloader = FileDownloader::create(&target);

    assert!(!downloader.valid());
    assert!(!root.exists());
}

#[test]
fn test_symbol_provider_lifecycle() {
    // everything touching the process-wide session lives in this one test
    // so runs cannot interleave
    assert!(matches!(Prov::uid(), Err(PdbError::NotInitialized)));
    assert!(matches!(
        Module::new("/nonexistent.pdb"),
        Err(PdbError::NotInitialized)
    ));

    {
        let prov = Prov::with_sym_path("srv*cache*https://example.invalid").unwrap();
        assert!(Prov::uid().is_ok());
        assert_eq!(prov.get_sym_path().unwrap(), "srv*cache*https://example.invalid");

        prov.set_sym_path("srv*elsewhere*https://example.invalid").unwrap();
        assert_eq!(
            prov.get_sym_path().unwrap(),
            "srv*elsewhere*https://example.invalid"
        );

        // nested handles keep the same session alive
        let uid = Prov::uid().unwrap();
        {
            let _second = Prov::new().unwrap();
            assert_eq!(Prov::uid().unwrap(), uid);
        }
        assert_eq!(Prov::uid().unwrap(), uid);

        // identity extraction goes through the file-mode parser
        let image_path =
            std::env::temp_dir().join(format!("pesym-img-{}.dll", std::process::id()));
        std::fs::write(&image_path, build_file_image()).unwrap();

        let identity = prov.get_pdb_info(&image_path).unwrap();
        assert_eq!(identity.pdb_name(), "foo.pdb");
        assert_eq!(identity.sig(), "112233445566778899AABBCCDDEEFF003");

        std::fs::remove_file(&image_path).unwrap();

        // a garbage image surfaces an engine failure
        let junk_path =
            std::env::temp_dir().join(format!("pesym-junk-{}.bin", std::process::id()));
        std::fs::write(&junk_path, b"not a pe").unwrap();
        assert!(matches!(
            prov.get_pdb_info(&junk_path),
            Err(PdbError::EngineFailure(_))
        ));
        std::fs::remove_file(&junk_path).unwrap();

        // typed queries against a hand-assembled PDB
        let pdb_path =
            std::env::temp_dir().join(format!("pesym-fix-{}.pdb", std::process::id()));
        std::fs::write(&pdb_path, build_pdb_fixture()).unwrap();

        let module = Module::with_base(&pdb_path, 0x1_0000, 0).unwrap();
        assert_eq!(module.base(), 0x1_0000);

        let main = module.find("main").unwrap();
        assert_eq!(main.name(), "main");
        assert!(matches!(main.as_udt(), Err(PdbError::BadCast(_))));
        let public = main.as_public().unwrap();
        assert!(public.is_function());
        // no section map in the fixture, so the symbol sits at the load base
        assert_eq!(public.address(), 0x1_0000);

        let answer = module.find("answer").unwrap();
        assert!(matches!(
            answer.as_constant().unwrap().value(),
            Variant::U16(42)
        ));

        let state = module.find("g_state").unwrap();
        let state = state.as_static_member().unwrap();
        assert_eq!(state.name(), "g_state");
        assert_eq!(state.address(), Some(0x1_0000));

        assert!(matches!(
            module.find("missing"),
            Err(PdbError::SymbolNotFound(_))
        ));

        std::fs::remove_file(&pdb_path).unwrap();
    }

    // the last drop tears the session down
    assert!(matches!(Prov::uid(), Err(PdbError::NotInitialized)));
}
