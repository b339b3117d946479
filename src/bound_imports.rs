//! The bound-import directory view.
//!
//! Bound-import records have a variable stride: each descriptor is followed
//! immediately by its module-forwarder records, and every name offset is
//! relative to the start of the directory rather than an RVA.

use std::mem;

use crate::headers::*;
use crate::image::Image;

/// The bound-import directory.
#[derive(Copy, Clone)]
pub struct BoundImports<'a> {
    image: &'a Image<'a>,
    base_offset: Option<usize>,
}

impl<'a> BoundImports<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let base_offset = image
            .data_directory(ImageDirectoryEntry::BoundImport)
            .filter(|dir| dir.present())
            .and_then(|dir| image.rva_to_offset(dir.virtual_address));

        Self { image, base_offset }
    }

    fn first_descriptor(&self) -> Option<&'a ImageBoundImportDescriptor> {
        self.image
            .by_offset::<ImageBoundImportDescriptor>(self.base_offset?)
    }

    pub fn valid(&self) -> bool {
        match self.first_descriptor() {
            Some(descriptor) => descriptor.offset_module_name != 0,
            None => false,
        }
    }

    pub fn empty(&self) -> bool {
        !self.valid()
    }

    pub fn iter(&self) -> BoundImportIterator<'a> {
        BoundImportIterator {
            image: self.image,
            base_offset: self.base_offset,
            cursor: 0,
        }
    }
}

impl<'a> IntoIterator for &BoundImports<'a> {
    type Item = BoundLibrary<'a>;
    type IntoIter = BoundImportIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct BoundImportIterator<'a> {
    image: &'a Image<'a>,
    base_offset: Option<usize>,
    cursor: usize,
}

impl<'a> Iterator for BoundImportIterator<'a> {
    type Item = BoundLibrary<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let base = self.base_offset?;
        let offset = base + self.cursor;

        let descriptor = self.image.by_offset::<ImageBoundImportDescriptor>(offset)?;
        if descriptor.offset_module_name == 0 {
            return None;
        }

        let forwarder_count = descriptor.number_of_module_forwarder_refs as usize;
        let forwarders = self.image.get_slice_ref::<ImageBoundForwarderRef>(
            offset + mem::size_of::<ImageBoundImportDescriptor>(),
            forwarder_count,
        )?;

        // the next descriptor sits past this one's forwarder records
        self.cursor += mem::size_of::<ImageBoundImportDescriptor>()
            + forwarder_count * mem::size_of::<ImageBoundForwarderRef>();

        Some(BoundLibrary {
            image: self.image,
            directory_base: base,
            descriptor,
            forwarders,
        })
    }
}

/// One bound library descriptor with its forwarder records.
#[derive(Copy, Clone)]
pub struct BoundLibrary<'a> {
    image: &'a Image<'a>,
    directory_base: usize,
    descriptor: &'a ImageBoundImportDescriptor,
    forwarders: &'a [ImageBoundForwarderRef],
}

impl<'a> BoundLibrary<'a> {
    pub fn descriptor(&self) -> &'a ImageBoundImportDescriptor {
        self.descriptor
    }

    /// The timestamp the import address table was bound against.
    pub fn timestamp(&self) -> u32 {
        self.descriptor.time_date_stamp
    }

    pub fn name(&self) -> Option<&'a str> {
        self.image
            .cstring_at(self.directory_base + self.descriptor.offset_module_name as usize)
    }

    pub fn forwarder_count(&self) -> usize {
        self.forwarders.len()
    }

    pub fn forwarders(&self) -> impl Iterator<Item = BoundForwarder<'a>> + '_ {
        let image = self.image;
        let directory_base = self.directory_base;

        self.forwarders.iter().map(move |descriptor| BoundForwarder {
            image,
            directory_base,
            descriptor,
        })
    }
}

/// A module-forwarder record of a bound library.
#[derive(Copy, Clone)]
pub struct BoundForwarder<'a> {
    image: &'a Image<'a>,
    directory_base: usize,
    descriptor: &'a ImageBoundForwarderRef,
}

impl<'a> BoundForwarder<'a> {
    pub fn timestamp(&self) -> u32 {
        self.descriptor.time_date_stamp
    }

    pub fn name(&self) -> Option<&'a str> {
        self.image
            .cstring_at(self.directory_base + self.descriptor.offset_module_name as usize)
    }
}
