//! The exception directory view: the runtime function table.

use std::mem;

use crate::headers::*;
use crate::image::Image;

/// The exception directory.
#[derive(Copy, Clone)]
pub struct Exceptions<'a> {
    functions: Option<&'a [RuntimeFunction]>,
}

impl<'a> Exceptions<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        let functions = image
            .data_directory(ImageDirectoryEntry::Exception)
            .copied()
            .filter(|dir| dir.present())
            .and_then(|dir| {
                let count = dir.size as usize / mem::size_of::<RuntimeFunction>();
                image.slice_by_rva::<RuntimeFunction>(dir.virtual_address, count)
            });

        Self { functions }
    }

    pub fn valid(&self) -> bool {
        self.functions.is_some()
    }

    pub fn empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Runtime functions in table order, up to a zero begin address.
    pub fn iter(&self) -> impl Iterator<Item = &'a RuntimeFunction> {
        self.functions
            .unwrap_or(&[])
            .iter()
            .take_while(|f| f.begin_address.0 != 0)
    }
}

impl<'a> IntoIterator for &Exceptions<'a> {
    type Item = &'a RuntimeFunction;
    type IntoIter = Box<dyn Iterator<Item = &'a RuntimeFunction> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
