//! The section-table view.

use crate::headers::ImageSectionHeader;
use crate::image::Image;

/// The section headers declared by the file header, in table order.
#[derive(Copy, Clone)]
pub struct Sections<'a> {
    headers: Option<&'a [ImageSectionHeader]>,
}

impl<'a> Sections<'a> {
    pub(crate) fn new(image: &'a Image<'a>) -> Self {
        Self {
            headers: image.section_table(),
        }
    }

    pub fn valid(&self) -> bool {
        self.headers.is_some()
    }

    pub fn empty(&self) -> bool {
        self.count() == 0
    }

    pub fn count(&self) -> usize {
        self.headers.map(|h| h.len()).unwrap_or(0)
    }

    pub fn get(&self, index: usize) -> Option<&'a ImageSectionHeader> {
        self.headers?.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'a, ImageSectionHeader> {
        self.headers.unwrap_or(&[]).iter()
    }
}

impl<'a> IntoIterator for &Sections<'a> {
    type Item = &'a ImageSectionHeader;
    type IntoIter = std::slice::Iter<'a, ImageSectionHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
