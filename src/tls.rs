//! The TLS directory view and its callback array.
//!
//! `address_of_callbacks` is a virtual address, not an RVA: the directory is
//! written for the image's preferred base. The view converts it with
//! `va - image_base` before translating, in both modes — a byte region need
//! not sit at its preferred base, so dereferencing the VA directly would
//! only work by accident. A callback array the conversion cannot reach
//! yields an empty iterator.

use std::mem;

use crate::headers::*;
use crate::image::Image;
use crate::types::*;

/// A width-erased reference to the TLS directory.
#[derive(Copy, Clone)]
pub enum TlsDirectory<'a> {
    X32(&'a ImageTLSDirectory32),
    X64(&'a ImageTLSDirectory64),
}

impl TlsDirectory<'_> {
    pub fn address_of_callbacks(&self) -> u64 {
        match self {
            Self::X32(d) => d.address_of_callbacks.0 as u64,
            Self::X64(d) => d.address_of_callbacks.0,
        }
    }

    pub fn raw_data_size(&self) -> u64 {
        match self {
            Self::X32(d) => {
                (d.end_address_of_raw_data.0.saturating_sub(d.start_address_of_raw_data.0)) as u64
            }
            Self::X64(d) => d
                .end_address_of_raw_data
                .0
                .saturating_sub(d.start_address_of_raw_data.0),
        }
    }
}

/// The TLS directory.
#[derive(Copy, Clone)]
pub struct Tls<'a> {
    image: &'a Image<'a>,
    directory: Option<TlsDirectory<'a>>,
}

impl<'a> Tls<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let directory = match image.arch() {
            Arch::X32 => image
                .directory::<ImageTLSDirectory32>(ImageDirectoryEntry::TLS)
                .map(TlsDirectory::X32),
            Arch::X64 => image
                .directory::<ImageTLSDirectory64>(ImageDirectoryEntry::TLS)
                .map(TlsDirectory::X64),
            Arch::Unknown => None,
        };

        Self { image, directory }
    }

    pub fn directory(&self) -> Option<TlsDirectory<'a>> {
        self.directory
    }

    pub fn valid(&self) -> bool {
        self.directory.is_some()
    }

    pub fn empty(&self) -> bool {
        self.callbacks().next().is_none()
    }

    /// The callback array's offset inside the byte region, if reachable.
    fn callbacks_offset(&self) -> Option<usize> {
        let va = self.directory?.address_of_callbacks();
        if va == 0 {
            return None;
        }
        let rva = self.image.va_to_rva(va)?;
        self.image.rva_to_offset(rva)
    }

    /// TLS callback addresses, in array order, up to the null terminator.
    pub fn callbacks(&self) -> TlsCallbackIterator<'a> {
        TlsCallbackIterator {
            image: self.image,
            base_offset: self.callbacks_offset(),
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &Tls<'a> {
    type Item = u64;
    type IntoIter = TlsCallbackIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.callbacks()
    }
}

pub struct TlsCallbackIterator<'a> {
    image: &'a Image<'a>,
    base_offset: Option<usize>,
    index: usize,
}

impl Iterator for TlsCallbackIterator<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        let base = self.base_offset?;

        let value = match self.image.arch() {
            Arch::X32 => {
                let offset = base + self.index * mem::size_of::<VA32>();
                self.image.by_offset::<VA32>(offset)?.0 as u64
            }
            Arch::X64 => {
                let offset = base + self.index * mem::size_of::<VA64>();
                self.image.by_offset::<VA64>(offset)?.0
            }
            Arch::Unknown => return None,
        };

        if value == 0 {
            return None;
        }

        self.index += 1;
        Some(value)
    }
}
