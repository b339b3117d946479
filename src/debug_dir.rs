//! The debug directory view and the CodeView record inside it.

use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::headers::*;
use crate::image::Image;
use crate::pdbinfo::{Guid, PdbIdentity};
use crate::types::*;

/// CodeView PDB 7.0 magic (`RSDS`).
pub const CODEVIEW_PDB70_MAGIC: u32 = 0x5344_5352;
/// CodeView PDB 2.0 magic (`NB10`).
pub const CODEVIEW_PDB20_MAGIC: u32 = 0x3031_424E;

/// The debug directory: an array of fixed-size entries.
#[derive(Copy, Clone)]
pub struct DebugDirectory<'a> {
    image: &'a Image<'a>,
    entries: Option<&'a [ImageDebugDirectory]>,
}

impl<'a> DebugDirectory<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let entries = image
            .data_directory(ImageDirectoryEntry::Debug)
            .copied()
            .filter(|dir| dir.present())
            .and_then(|dir| {
                let count = dir.size as usize / mem::size_of::<ImageDebugDirectory>();
                image.slice_by_rva::<ImageDebugDirectory>(dir.virtual_address, count)
            });

        Self { image, entries }
    }

    pub fn valid(&self) -> bool {
        self.entries.is_some()
    }

    pub fn empty(&self) -> bool {
        self.count() == 0
    }

    pub fn count(&self) -> usize {
        self.entries.map(|e| e.len()).unwrap_or(0)
    }

    pub fn iter(&self) -> std::slice::Iter<'a, ImageDebugDirectory> {
        self.entries.unwrap_or(&[]).iter()
    }

    /// Locate the blob of a debug entry. On-disk images address it by file
    /// offset, mapped modules by RVA.
    fn blob_offset(&self, entry: &ImageDebugDirectory) -> Option<usize> {
        match self.image.image_type() {
            ImageType::Module => self.image.rva_to_offset(entry.address_of_raw_data),
            ImageType::File => Some(entry.pointer_to_raw_data.0 as usize),
        }
    }

    /// Find the CodeView entry and decode the PDB identity it names.
    pub fn pdb_identity(&self) -> Option<PdbIdentity> {
        for entry in self.iter() {
            if ImageDebugType::from_u32(entry.type_) != ImageDebugType::CodeView {
                continue;
            }

            let offset = match self.blob_offset(entry) {
                Some(o) => o,
                None => continue,
            };

            // the blob's file position is not necessarily aligned, so the
            // fields are decoded out of a byte read rather than cast
            let magic = match self.image.read(offset, 4) {
                Some(bytes) => LittleEndian::read_u32(bytes),
                None => continue,
            };

            match magic {
                CODEVIEW_PDB70_MAGIC => {
                    let blob = self.image.read(offset, 24)?;

                    let mut data4 = [0u8; 8];
                    data4.copy_from_slice(&blob[12..20]);
                    let guid = Guid {
                        data1: LittleEndian::read_u32(&blob[4..8]),
                        data2: LittleEndian::read_u16(&blob[8..10]),
                        data3: LittleEndian::read_u16(&blob[10..12]),
                        data4,
                    };
                    let age = LittleEndian::read_u32(&blob[20..24]);
                    let name = self.image.cstring_at(offset + 24)?;

                    debug!("RSDS record: {} age {} \"{}\"", guid, age, name);
                    return Some(PdbIdentity::Pdb70 {
                        guid,
                        age,
                        pdb_name: name.to_string(),
                    });
                }
                CODEVIEW_PDB20_MAGIC => {
                    let blob = self.image.read(offset, 16)?;

                    let signature = LittleEndian::read_u32(&blob[8..12]);
                    let age = LittleEndian::read_u32(&blob[12..16]);
                    let name = self.image.cstring_at(offset + 16)?;

                    debug!("NB10 record: {:08X} age {} \"{}\"", signature, age, name);
                    return Some(PdbIdentity::Pdb20 {
                        signature,
                        age,
                        pdb_name: name.to_string(),
                    });
                }
                _ => continue,
            }
        }

        None
    }
}

impl<'a> IntoIterator for &DebugDirectory<'a> {
    type Item = &'a ImageDebugDirectory;
    type IntoIter = std::slice::Iter<'a, ImageDebugDirectory>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
