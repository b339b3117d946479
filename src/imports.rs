//! The import directory view: libraries and the functions they pull in.

use std::mem;

use crate::headers::*;
use crate::image::Image;
use crate::types::*;

/// A decoded import lookup entry.
#[derive(Copy, Clone, Debug)]
pub enum ImportData<'a> {
    Ordinal(u16),
    Name { hint: u16, name: &'a str },
}

pub(crate) fn thunk_at<'a>(image: &'a Image<'a>, table: RVA, index: usize) -> Option<Thunk<'a>> {
    let base = image.rva_to_offset(table)?;

    match image.arch() {
        Arch::X32 => {
            let offset = base + index * mem::size_of::<Thunk32>();
            image.force_get_ref::<Thunk32>(offset).map(Thunk::X32)
        }
        Arch::X64 => {
            let offset = base + index * mem::size_of::<Thunk64>();
            image.force_get_ref::<Thunk64>(offset).map(Thunk::X64)
        }
        Arch::Unknown => None,
    }
}

/// The import directory: a zero-terminated array of library descriptors.
#[derive(Copy, Clone)]
pub struct Imports<'a> {
    image: &'a Image<'a>,
    base_offset: Option<usize>,
}

impl<'a> Imports<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let base_offset = image
            .data_directory(ImageDirectoryEntry::Import)
            .filter(|dir| dir.present())
            .and_then(|dir| image.rva_to_offset(dir.virtual_address));

        Self { image, base_offset }
    }

    fn descriptor_at(&self, index: usize) -> Option<&'a ImageImportDescriptor> {
        let offset = self.base_offset? + index * mem::size_of::<ImageImportDescriptor>();
        self.image.by_offset::<ImageImportDescriptor>(offset)
    }

    /// The directory is present and reachable in this mode.
    pub fn valid(&self) -> bool {
        self.base_offset.is_some()
    }

    /// Present but without a single live descriptor.
    pub fn empty(&self) -> bool {
        match self.descriptor_at(0) {
            Some(descriptor) => descriptor.first_thunk.0 == 0,
            None => true,
        }
    }

    pub fn iter(&self) -> ImportIterator<'a> {
        ImportIterator {
            imports: *self,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &Imports<'a> {
    type Item = ImportedLibrary<'a>;
    type IntoIter = ImportIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ImportIterator<'a> {
    imports: Imports<'a>,
    index: usize,
}

impl<'a> Iterator for ImportIterator<'a> {
    type Item = ImportedLibrary<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let descriptor = self.imports.descriptor_at(self.index)?;

        // terminated by a descriptor whose Characteristics union is zero
        if descriptor.original_first_thunk.0 == 0 {
            return None;
        }

        self.index += 1;

        Some(ImportedLibrary {
            image: self.imports.image,
            descriptor,
        })
    }
}

/// One imported library and its parallel lookup/address tables.
#[derive(Copy, Clone)]
pub struct ImportedLibrary<'a> {
    image: &'a Image<'a>,
    descriptor: &'a ImageImportDescriptor,
}

impl<'a> ImportedLibrary<'a> {
    pub fn descriptor(&self) -> &'a ImageImportDescriptor {
        self.descriptor
    }

    pub fn name(&self) -> Option<&'a str> {
        self.image.cstring_by_rva(self.descriptor.name)
    }

    /// The import address table was pre-resolved at link time.
    pub fn bound(&self) -> bool {
        self.descriptor.time_date_stamp != 0
    }

    /// RVA of the import lookup table, falling back to the address table
    /// for descriptors that carry no separate lookup table.
    fn lookup_table(&self) -> RVA {
        if self.descriptor.original_first_thunk.0 != 0 {
            self.descriptor.original_first_thunk
        } else {
            self.descriptor.first_thunk
        }
    }

    pub fn functions(&self) -> ImportFunctionIterator<'a> {
        ImportFunctionIterator {
            image: self.image,
            lookup_table: self.lookup_table(),
            address_table: self.descriptor.first_thunk,
            bound: self.bound(),
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &ImportedLibrary<'a> {
    type Item = ImportedFunction<'a>;
    type IntoIter = ImportFunctionIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.functions()
    }
}

pub struct ImportFunctionIterator<'a> {
    image: &'a Image<'a>,
    lookup_table: RVA,
    address_table: RVA,
    bound: bool,
    index: usize,
}

impl<'a> Iterator for ImportFunctionIterator<'a> {
    type Item = ImportedFunction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let lookup = thunk_at(self.image, self.lookup_table, self.index)?;

        // the lookup table is terminated by a zero slot
        if lookup.is_zero() {
            return None;
        }

        let entry = ImportedFunction {
            image: self.image,
            lookup,
            address_table: self.address_table,
            bound: self.bound,
            index: self.index,
        };

        self.index += 1;
        Some(entry)
    }
}

/// One imported function inside a library's tables.
#[derive(Copy, Clone)]
pub struct ImportedFunction<'a> {
    image: &'a Image<'a>,
    lookup: Thunk<'a>,
    address_table: RVA,
    bound: bool,
    index: usize,
}

impl<'a> ImportedFunction<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ImportKind {
        if self.lookup.is_zero() {
            ImportKind::Unknown
        } else if self.lookup.is_ordinal() {
            ImportKind::Ordinal
        } else {
            ImportKind::Name
        }
    }

    /// The ordinal for by-ordinal imports.
    pub fn ordinal(&self) -> Option<u16> {
        match self.kind() {
            ImportKind::Ordinal => Some(self.lookup.ordinal()),
            _ => None,
        }
    }

    /// The hint/name record for by-name imports.
    pub fn import_by_name(&self) -> Option<(u16, &'a str)> {
        if self.kind() != ImportKind::Name {
            return None;
        }

        let rva = self.lookup.hint_name_rva();
        let offset = self.image.rva_to_offset(rva)?;
        let hint = *self.image.force_get_ref::<u16>(offset)?;
        let name = self.image.cstring_at(offset + mem::size_of::<u16>())?;
        Some((hint, name))
    }

    /// The decoded lookup entry.
    pub fn data(&self) -> Option<ImportData<'a>> {
        match self.kind() {
            ImportKind::Ordinal => Some(ImportData::Ordinal(self.lookup.ordinal())),
            ImportKind::Name => {
                let (hint, name) = self.import_by_name()?;
                Some(ImportData::Name { hint, name })
            }
            ImportKind::Unknown => None,
        }
    }

    /// The raw import address table slot: a live resolved address in module
    /// mode, and on disk only meaningful when the library is bound.
    pub fn address(&self) -> u64 {
        if self.image.image_type() == ImageType::File && !self.bound {
            return 0;
        }

        thunk_at(self.image, self.address_table, self.index)
            .map(|t| t.raw())
            .unwrap_or(0)
    }
}
