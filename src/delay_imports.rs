//! The delay-load import directory view.

use std::mem;

use crate::headers::*;
use crate::image::Image;
use crate::imports::{thunk_at, ImportData};
use crate::types::*;

/// The delay-load directory: descriptors terminated by a zero DLL-name RVA.
#[derive(Copy, Clone)]
pub struct DelayedImports<'a> {
    image: &'a Image<'a>,
    base_offset: Option<usize>,
}

impl<'a> DelayedImports<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let base_offset = image
            .data_directory(ImageDirectoryEntry::DelayImport)
            .filter(|dir| dir.present())
            .and_then(|dir| image.rva_to_offset(dir.virtual_address));

        Self { image, base_offset }
    }

    fn descriptor_at(&self, index: usize) -> Option<&'a ImageDelayloadDescriptor> {
        let offset = self.base_offset? + index * mem::size_of::<ImageDelayloadDescriptor>();
        self.image.by_offset::<ImageDelayloadDescriptor>(offset)
    }

    pub fn valid(&self) -> bool {
        self.base_offset.is_some()
    }

    pub fn empty(&self) -> bool {
        match self.descriptor_at(0) {
            Some(descriptor) => descriptor.dll_name_rva.0 == 0,
            None => true,
        }
    }

    pub fn iter(&self) -> DelayedImportIterator<'a> {
        DelayedImportIterator {
            imports: *self,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &DelayedImports<'a> {
    type Item = DelayedLibrary<'a>;
    type IntoIter = DelayedImportIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct DelayedImportIterator<'a> {
    imports: DelayedImports<'a>,
    index: usize,
}

impl<'a> Iterator for DelayedImportIterator<'a> {
    type Item = DelayedLibrary<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let descriptor = self.imports.descriptor_at(self.index)?;

        if descriptor.dll_name_rva.0 == 0 {
            return None;
        }

        self.index += 1;

        Some(DelayedLibrary {
            image: self.imports.image,
            descriptor,
        })
    }
}

/// One delay-loaded library.
#[derive(Copy, Clone)]
pub struct DelayedLibrary<'a> {
    image: &'a Image<'a>,
    descriptor: &'a ImageDelayloadDescriptor,
}

impl<'a> DelayedLibrary<'a> {
    pub fn descriptor(&self) -> &'a ImageDelayloadDescriptor {
        self.descriptor
    }

    pub fn name(&self) -> Option<&'a str> {
        self.image.cstring_by_rva(self.descriptor.dll_name_rva)
    }

    pub fn functions(&self) -> DelayedFunctionIterator<'a> {
        DelayedFunctionIterator {
            image: self.image,
            name_table: self.descriptor.import_name_table_rva,
            address_table: self.descriptor.import_address_table_rva,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &DelayedLibrary<'a> {
    type Item = DelayedFunction<'a>;
    type IntoIter = DelayedFunctionIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.functions()
    }
}

pub struct DelayedFunctionIterator<'a> {
    image: &'a Image<'a>,
    name_table: RVA,
    address_table: RVA,
    index: usize,
}

impl<'a> Iterator for DelayedFunctionIterator<'a> {
    type Item = DelayedFunction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let lookup = thunk_at(self.image, self.name_table, self.index)?;

        if lookup.is_zero() {
            return None;
        }

        let entry = DelayedFunction {
            image: self.image,
            lookup,
            address_table: self.address_table,
            index: self.index,
        };

        self.index += 1;
        Some(entry)
    }
}

/// One delay-imported function.
#[derive(Copy, Clone)]
pub struct DelayedFunction<'a> {
    image: &'a Image<'a>,
    lookup: Thunk<'a>,
    address_table: RVA,
    index: usize,
}

impl<'a> DelayedFunction<'a> {
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

    pub fn ordinal(&self) -> Option<u16> {
        match self.kind() {
            ImportKind::Ordinal => Some(self.lookup.ordinal()),
            _ => None,
        }
    }

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

    /// The raw delay-load address table slot.
    pub fn address(&self) -> u64 {
        thunk_at(self.image, self.address_table, self.index)
            .map(|t| t.raw())
            .unwrap_or(0)
    }
}
