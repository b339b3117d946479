//! Read-only parsing of PE images and retrieval of the debug symbols they
//! reference.
//!
//! The image side gives iterator-driven views over a PE's structure —
//! headers, sections, imports (static, delayed, bound), exports, base
//! relocations, exception tables, TLS callbacks and the debug directory —
//! over a caller-owned byte region, in either of the two layouts a PE can
//! have: the on-disk file layout or the mapped module layout.
//!
//! The symbol side turns an image's CodeView record into a PDB identity,
//! knows the symbol-server naming scheme built from it, downloads the PDB
//! into a local cache and answers typed symbol queries against it.
//!
//! ```no_run
//! use pesym::Image;
//!
//! let data = std::fs::read("some.dll").unwrap();
//! let image = Image::from_file(&data);
//!
//! for library in &image.imports() {
//!     println!("{}", library.name().unwrap_or("?"));
//!     for function in &library {
//!         println!("  {:?}", function.data());
//!     }
//! }
//!
//! let export = image.exports().find_name("CreateFileW");
//! if export.found() {
//!     println!("CreateFileW is ordinal {}", export.ordinal());
//! }
//! ```

pub mod bound_imports;
pub mod debug_dir;
pub mod delay_imports;
pub mod download;
pub mod exceptions;
pub mod exports;
pub mod headers;
pub mod image;
pub mod imports;
pub mod pdbinfo;
pub mod provider;
pub mod relocs;
pub mod sections;
pub mod symbols;
pub mod tls;
pub mod types;

#[cfg(test)]
mod tests;

pub use crate::bound_imports::{BoundImports, BoundLibrary};
pub use crate::debug_dir::DebugDirectory;
pub use crate::delay_imports::DelayedImports;
pub use crate::download::{fetch_pdb, DownloadAction, Downloader, FileDownloader};
pub use crate::exceptions::Exceptions;
pub use crate::exports::{Export, ExportEntry, Exports};
pub use crate::image::{classify, Image};
pub use crate::imports::{ImportData, ImportedFunction, ImportedLibrary, Imports};
pub use crate::pdbinfo::{pdb_base_name, Guid, PdbIdentity};
pub use crate::provider::{PdbError, Prov, DEFAULT_SYM_PATH, MICROSOFT_SYMBOL_SERVER_SECURE};
pub use crate::relocs::Relocations;
pub use crate::sections::Sections;
pub use crate::symbols::{Module, Symbol};
pub use crate::tls::Tls;
pub use crate::types::{
    Arch, CChar, CCharString, ExportKind, ImageType, ImportKind, Offset, RelocKind, RVA,
};
