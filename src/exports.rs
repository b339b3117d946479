//! The export directory view: EAT-ordered iteration and name/ordinal lookup.
//!
//! Three parallel tables make up the directory: the export address table
//! (one slot per exported thing), the name-pointer table (sorted ascending
//! by the pointed-to ASCII name) and the name-ordinal table mapping each
//! name position to an unbiased EAT index. An EAT slot whose value lands
//! inside the directory's own RVA range is a forwarder string, not an
//! address; that containment test is the only correct discriminator.

use crate::headers::*;
use crate::image::Image;
use crate::types::*;

/// The export directory.
pub struct Exports<'a> {
    image: &'a Image<'a>,
    dir_rva: RVA,
    dir_size: u32,
    descriptor: Option<&'a ImageExportDirectory>,
    eat: &'a [RVA],
    names: &'a [RVA],
    name_ordinals: &'a [u16],
    // EAT index -> position in the name tables, so iteration makes no
    // assumption about the ordering of the name-ordinal table
    name_positions: Vec<Option<u32>>,
}

impl<'a> Exports<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let dir = image
            .data_directory(ImageDirectoryEntry::Export)
            .copied()
            .filter(|dir| dir.present());

        let (dir_rva, dir_size) = match dir {
            Some(d) => (d.virtual_address, d.size),
            None => (RVA(0), 0),
        };

        let descriptor = dir.and_then(|d| image.by_rva::<ImageExportDirectory>(d.virtual_address));

        let eat = descriptor
            .and_then(|d| {
                image.slice_by_rva::<RVA>(d.address_of_functions, d.number_of_functions as usize)
            })
            .unwrap_or(&[]);

        // the two name tables are parallel; resolve them together or not at
        // all
        let name_tables = descriptor.and_then(|d| {
            let names =
                image.slice_by_rva::<RVA>(d.address_of_names, d.number_of_names as usize)?;
            let ordinals =
                image.slice_by_rva::<u16>(d.address_of_name_ordinals, d.number_of_names as usize)?;
            Some((names, ordinals))
        });
        let (names, name_ordinals) = name_tables.unwrap_or((&[], &[]));

        let mut name_positions = vec![None; eat.len()];
        for (position, &unbiased) in name_ordinals.iter().enumerate() {
            if let Some(slot) = name_positions.get_mut(unbiased as usize) {
                *slot = Some(position as u32);
            }
        }

        Self {
            image,
            dir_rva,
            dir_size,
            descriptor,
            eat,
            names,
            name_ordinals,
            name_positions,
        }
    }

    pub fn valid(&self) -> bool {
        self.descriptor.is_some()
    }

    pub fn empty(&self) -> bool {
        self.count() == 0
    }

    /// The export address table length.
    pub fn count(&self) -> u32 {
        self.eat.len() as u32
    }

    pub fn ordinal_base(&self) -> u32 {
        self.descriptor.map(|d| d.base).unwrap_or(0)
    }

    pub fn module_name(&self) -> Option<&'a str> {
        self.image.cstring_by_rva(self.descriptor?.name)
    }

    pub fn directory_rva(&self) -> RVA {
        self.dir_rva
    }

    pub fn directory_size(&self) -> u32 {
        self.dir_size
    }

    /// Whether an RVA lands inside the export directory's own range: the
    /// forwarder discriminator.
    pub fn contains(&self, rva: RVA) -> bool {
        rva.0 >= self.dir_rva.0 && rva.0 < self.dir_rva.0 + self.dir_size
    }

    pub fn iter<'s>(&'s self) -> ExportIterator<'s> {
        ExportIterator {
            exports: self,
            index: 0,
        }
    }

    fn make_export(&self, unbiased: u32, value: RVA) -> Export<'a> {
        if self.contains(value) {
            Export {
                kind: ExportKind::Forwarder,
                ordinal: self.ordinal_base() + unbiased,
                rva: value,
                address: None,
                forwarder: self.image.cstring_by_rva(value),
            }
        } else {
            Export {
                kind: ExportKind::Exact,
                ordinal: self.ordinal_base() + unbiased,
                rva: value,
                address: self.image.by_rva::<u8>(value),
                forwarder: None,
            }
        }
    }

    /// Binary-search the sorted name-pointer table for an export by name.
    ///
    /// Returns an empty export when the name is absent or the directory is
    /// invalid.
    pub fn find_name(&self, name: &str) -> Export<'a> {
        if !self.valid() {
            return Export::default();
        }

        // [left, right)
        let mut left = 0usize;
        let mut right = self.names.len();
        let mut hit = None;

        while left < right {
            let position = (left + right) / 2;
            let probe = match self.image.cstring_by_rva(self.names[position]) {
                Some(s) => s,
                None => return Export::default(),
            };

            match probe.as_bytes().cmp(name.as_bytes()) {
                std::cmp::Ordering::Greater => right = position,
                std::cmp::Ordering::Less => left = position + 1,
                std::cmp::Ordering::Equal => {
                    hit = Some(position);
                    break;
                }
            }
        }

        let position = match hit {
            Some(p) => p,
            None => return Export::default(),
        };

        let unbiased = self.name_ordinals[position] as u32;
        match self.eat.get(unbiased as usize) {
            Some(&value) => self.make_export(unbiased, value),
            None => Export::default(),
        }
    }

    /// Look an export up by its public (biased) ordinal. The returned
    /// export carries the same ordinal back.
    pub fn find_ordinal(&self, ordinal: u32) -> Export<'a> {
        if !self.valid() {
            return Export::default();
        }

        let unbiased = match ordinal.checked_sub(self.ordinal_base()) {
            Some(u) => u,
            None => return Export::default(),
        };

        match self.eat.get(unbiased as usize) {
            Some(&value) => self.make_export(unbiased, value),
            None => Export::default(),
        }
    }
}

impl<'s, 'a> IntoIterator for &'s Exports<'a> {
    type Item = ExportEntry<'s>;
    type IntoIter = ExportIterator<'s>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ExportIterator<'s> {
    exports: &'s Exports<'s>,
    index: u32,
}

impl<'s> Iterator for ExportIterator<'s> {
    type Item = ExportEntry<'s>;

    fn next(&mut self) -> Option<Self::Item> {
        if (self.index as usize) >= self.exports.eat.len() {
            return None;
        }

        let entry = ExportEntry {
            exports: self.exports,
            index: self.index,
        };

        self.index += 1;
        Some(entry)
    }
}

/// One export address table slot.
#[derive(Copy, Clone)]
pub struct ExportEntry<'s> {
    exports: &'s Exports<'s>,
    index: u32,
}

impl<'s> ExportEntry<'s> {
    /// The unbiased EAT index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The public ordinal: ordinal base plus EAT index.
    pub fn ordinal(&self) -> u32 {
        self.exports.ordinal_base() + self.index
    }

    /// The raw slot value.
    pub fn rva(&self) -> RVA {
        self.exports.eat[self.index as usize]
    }

    pub fn kind(&self) -> ExportKind {
        if self.exports.contains(self.rva()) {
            ExportKind::Forwarder
        } else {
            ExportKind::Exact
        }
    }

    /// Whether any name-ordinal entry references this slot; slots without
    /// one are reachable only by ordinal.
    pub fn has_name(&self) -> bool {
        self.exports
            .name_positions
            .get(self.index as usize)
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    pub fn name(&self) -> Option<&'s str> {
        let position = (*self.exports.name_positions.get(self.index as usize)?)?;
        self.exports
            .image
            .cstring_by_rva(self.exports.names[position as usize])
    }

    pub fn address(&self) -> Option<&'s u8> {
        match self.kind() {
            ExportKind::Exact => self.exports.image.by_rva::<u8>(self.rva()),
            _ => None,
        }
    }

    pub fn forwarder(&self) -> Option<&'s str> {
        match self.kind() {
            ExportKind::Forwarder => self.exports.image.cstring_by_rva(self.rva()),
            _ => None,
        }
    }
}

/// The result of an export lookup. An empty export (kind `Unknown`) means
/// not found or an invalid directory.
#[derive(Copy, Clone, Debug)]
pub struct Export<'a> {
    kind: ExportKind,
    ordinal: u32,
    rva: RVA,
    address: Option<&'a u8>,
    forwarder: Option<&'a str>,
}

impl Default for Export<'_> {
    fn default() -> Self {
        Self {
            kind: ExportKind::Unknown,
            ordinal: 0,
            rva: RVA(0),
            address: None,
            forwarder: None,
        }
    }
}

impl<'a> Export<'a> {
    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    pub fn found(&self) -> bool {
        self.kind != ExportKind::Unknown
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn rva(&self) -> RVA {
        self.rva
    }

    pub fn address(&self) -> Option<&'a u8> {
        self.address
    }

    pub fn forwarder(&self) -> Option<&'a str> {
        self.forwarder
    }
}
