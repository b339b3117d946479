//! The image abstraction: a borrowed byte region plus its layout mode, with
//! header access and RVA translation on top.

use std::marker::PhantomData;
use std::mem;

use log::debug;
use pkbuffer::{Buffer, Castable, PtrBuffer};

use crate::headers::*;
use crate::types::*;

use crate::bound_imports::BoundImports;
use crate::debug_dir::DebugDirectory;
use crate::delay_imports::DelayedImports;
use crate::exceptions::Exceptions;
use crate::exports::Exports;
use crate::imports::Imports;
use crate::relocs::Relocations;
use crate::sections::Sections;
use crate::tls::Tls;

/// Classify a byte region by trying both header layouts; the first whose
/// three magics (DOS, NT, optional-header) all match wins.
pub fn classify(data: &[u8]) -> Arch {
    let probe = Image::with_arch(ImageType::File, Arch::Unknown, data);

    if probe.validate_arch(Arch::X32) {
        Arch::X32
    } else if probe.validate_arch(Arch::X64) {
        Arch::X64
    } else {
        debug!("image did not validate as PE32 or PE32+");
        Arch::Unknown
    }
}

/// A read-only view of a PE image over a caller-owned byte region.
///
/// The image never owns its bytes and never mutates them; directory views
/// and their iterators borrow from it. Translation behaviour is fixed by the
/// [`ImageType`] chosen at construction, the address width by classification
/// of the headers.
#[derive(Clone)]
pub struct Image<'data> {
    buffer: PtrBuffer,
    image_type: ImageType,
    arch: Arch,
    _data: PhantomData<&'data [u8]>,
}

impl<'data> Image<'data> {
    fn with_arch(image_type: ImageType, arch: Arch, data: &'data [u8]) -> Self {
        Self {
            buffer: PtrBuffer::new(data.as_ptr(), data.len()),
            image_type,
            arch,
            _data: PhantomData,
        }
    }

    /// Interpret `data` as a mapped module: sections sit at their RVAs.
    pub fn from_module(data: &'data [u8]) -> Self {
        let arch = classify(data);
        Self::with_arch(ImageType::Module, arch, data)
    }

    /// Interpret `data` as an on-disk file: sections sit at their file
    /// offsets.
    pub fn from_file(data: &'data [u8]) -> Self {
        let arch = classify(data);
        Self::with_arch(ImageType::File, arch, data)
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// All three header magics matched at construction.
    pub fn valid(&self) -> bool {
        self.arch != Arch::Unknown
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    fn validate_arch(&self, arch: Arch) -> bool {
        let dos = match self.get_ref::<ImageDOSHeader>(0) {
            Some(d) => d,
            None => return false,
        };

        if dos.e_magic != DOS_SIGNATURE {
            return false;
        }

        let lfanew = dos.e_lfanew.0 as usize;

        match arch {
            Arch::X32 => match self.get_ref::<ImageNTHeaders32>(lfanew) {
                Some(nt) => {
                    nt.signature == NT_SIGNATURE && nt.optional_header.magic == HDR32_MAGIC
                }
                None => false,
            },
            Arch::X64 => match self.get_ref::<ImageNTHeaders64>(lfanew) {
                Some(nt) => {
                    nt.signature == NT_SIGNATURE && nt.optional_header.magic == HDR64_MAGIC
                }
                None => false,
            },
            Arch::Unknown => false,
        }
    }

    /* bounded reads over the byte region; a failed cast is an absence,
     * never an error */

    pub(crate) fn get_ref<T: Castable>(&self, offset: usize) -> Option<&T> {
        self.buffer.get_ref::<T>(offset).ok()
    }

    pub(crate) fn get_slice_ref<T: Castable>(&self, offset: usize, count: usize) -> Option<&[T]> {
        self.buffer.get_slice_ref::<T>(offset, count).ok()
    }

    // Import thunk arrays are not always naturally aligned, so they get
    // force-cast instead of the checked cast.
    pub(crate) fn force_get_ref<T: Castable>(&self, offset: usize) -> Option<&T> {
        unsafe { self.buffer.force_get_ref::<T>(offset).ok() }
    }

    pub(crate) fn read(&self, offset: usize, size: usize) -> Option<&[u8]> {
        self.buffer.read(offset, size).ok()
    }

    /// Read a zero-terminated C string at a buffer offset.
    pub(crate) fn cstring_at(&self, offset: usize) -> Option<&str> {
        let slice = self.buffer.as_slice();
        let tail = slice.get(offset..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..len]).ok()
    }

    pub fn dos_header(&self) -> Option<&ImageDOSHeader> {
        let dos = self.get_ref::<ImageDOSHeader>(0)?;
        if dos.e_magic != DOS_SIGNATURE {
            return None;
        }
        Some(dos)
    }

    /// The validated NT headers in their classified width, or `None` for an
    /// unknown image.
    pub fn nt_headers(&self) -> Option<NtHeaders> {
        let lfanew = self.dos_header()?.e_lfanew.0 as usize;

        match self.arch {
            Arch::X32 => self.get_ref::<ImageNTHeaders32>(lfanew).map(NtHeaders::X32),
            Arch::X64 => self.get_ref::<ImageNTHeaders64>(lfanew).map(NtHeaders::X64),
            Arch::Unknown => None,
        }
    }

    pub fn image_base(&self) -> u64 {
        self.nt_headers().map(|h| h.image_base()).unwrap_or(0)
    }

    pub fn image_size(&self) -> u32 {
        self.nt_headers().map(|h| h.image_size()).unwrap_or(0)
    }

    pub fn entry_point(&self) -> RVA {
        self.nt_headers().map(|h| h.entry_point()).unwrap_or(RVA(0))
    }

    /// The section table declared by the file header.
    pub(crate) fn section_table(&self) -> Option<&[ImageSectionHeader]> {
        let dos = self.dos_header()?;
        let headers = self.nt_headers()?;

        let offset = dos.e_lfanew.0 as usize
            + mem::size_of::<u32>()
            + mem::size_of::<ImageFileHeader>()
            + headers.size_of_optional_header() as usize;

        let count = headers.file_header().number_of_sections as usize;
        self.get_slice_ref::<ImageSectionHeader>(offset, count)
    }

    /// The data directory header at `entry`, whether or not it is present.
    pub fn data_directory(&self, entry: ImageDirectoryEntry) -> Option<&ImageDataDirectory> {
        let headers = self.nt_headers()?;
        let index = entry as usize;
        // the lifetime of the directory slice is tied to self, not to the
        // temporary NtHeaders wrapper
        let table: &[ImageDataDirectory] = match headers {
            NtHeaders::X32(h) => {
                let declared = h.optional_header.number_of_rva_and_sizes as usize;
                &h.optional_header.data_directory[..declared.min(16)]
            }
            NtHeaders::X64(h) => {
                let declared = h.optional_header.number_of_rva_and_sizes as usize;
                &h.optional_header.data_directory[..declared.min(16)]
            }
        };
        table.get(index)
    }

    /// Resolve a present directory to its typed contents.
    pub(crate) fn directory<T: Castable>(&self, entry: ImageDirectoryEntry) -> Option<&T> {
        let dir = self.data_directory(entry)?;
        if !dir.present() {
            return None;
        }
        self.by_rva::<T>(dir.virtual_address)
    }

    /// Translate an RVA to an offset into this byte region.
    ///
    /// In module mode the region is laid out by RVA, so the translation is
    /// the identity. In file mode the covering section maps the RVA back to
    /// its file offset; a minimally aligned image (section alignment of at
    /// least 512) uses the aligned section spans, an object-style image the
    /// raw ones. `None` means no section covers the RVA in this mode.
    pub fn rva_to_offset(&self, rva: RVA) -> Option<usize> {
        match self.image_type {
            ImageType::Module => Some(rva.0 as usize),
            ImageType::File => {
                let headers = self.nt_headers()?;
                let file_alignment = (headers.file_alignment() as u64).max(1);
                let section_alignment = (headers.section_alignment() as u64).max(1);
                let rva = rva.0 as u64;

                for section in self.section_table()? {
                    let size_on_disk = section.size_of_raw_data as u64;
                    let size_in_mem = section.virtual_size as u64;

                    let (section_base, section_size, section_offset) =
                        if section_alignment >= MINIMAL_SECTION_ALIGNMENT as u64 {
                            let base = align_down(
                                section.virtual_address.0 as u64,
                                section_alignment,
                            );
                            let aligned_file_size = align_up(size_on_disk, file_alignment);
                            let aligned_virtual_size = align_up(size_in_mem, section_alignment);
                            let offset = align_down(
                                section.pointer_to_raw_data.0 as u64,
                                MINIMAL_SECTION_ALIGNMENT as u64,
                            );
                            (base, aligned_file_size.min(aligned_virtual_size), offset)
                        } else {
                            (
                                section.virtual_address.0 as u64,
                                size_on_disk.min(size_in_mem),
                                section.pointer_to_raw_data.0 as u64,
                            )
                        };

                    if rva >= section_base && rva < section_base + section_size {
                        return Some((section_offset + (rva - section_base)) as usize);
                    }
                }

                None
            }
        }
    }

    /// Get a typed reference at an RVA; `None` when the RVA is unreachable
    /// in this mode or the cast does not fit.
    pub fn by_rva<T: Castable>(&self, rva: RVA) -> Option<&T> {
        let offset = self.rva_to_offset(rva)?;
        self.get_ref::<T>(offset)
    }

    /// Get a typed slice at an RVA.
    pub fn slice_by_rva<T: Castable>(&self, rva: RVA, count: usize) -> Option<&[T]> {
        let offset = self.rva_to_offset(rva)?;
        self.get_slice_ref::<T>(offset, count)
    }

    /// Read a zero-terminated C string at an RVA.
    pub fn cstring_by_rva(&self, rva: RVA) -> Option<&str> {
        let offset = self.rva_to_offset(rva)?;
        self.cstring_at(offset)
    }

    /// Get a typed reference at a raw offset into the region. Used by views
    /// whose structures carry offsets they have already derived.
    pub fn by_offset<T: Castable>(&self, offset: usize) -> Option<&T> {
        self.get_ref::<T>(offset)
    }

    /// Convert an absolute virtual address into an RVA against this image's
    /// preferred base. `None` when the VA lies outside the image span.
    pub fn va_to_rva(&self, va: u64) -> Option<RVA> {
        let base = self.image_base();
        let size = self.image_size() as u64;
        if va < base || va >= base + size {
            return None;
        }
        Some(RVA((va - base) as u32))
    }

    /* directory views */

    pub fn sections(&self) -> Sections<'_> {
        Sections::new(self)
    }

    pub fn imports(&self) -> Imports<'_> {
        Imports::new(self)
    }

    pub fn delay_imports(&self) -> DelayedImports<'_> {
        DelayedImports::new(self)
    }

    pub fn bound_imports(&self) -> BoundImports<'_> {
        BoundImports::new(self)
    }

    pub fn exports(&self) -> Exports<'_> {
        Exports::new(self)
    }

    pub fn relocs(&self) -> Relocations<'_> {
        Relocations::new(self)
    }

    pub fn exceptions(&self) -> Exceptions<'_> {
        Exceptions::new(self)
    }

    pub fn tls(&self) -> Tls<'_> {
        Tls::new(self)
    }

    pub fn debug(&self) -> DebugDirectory<'_> {
        DebugDirectory::new(self)
    }
}
