//! PE header, export-table and import-table parsing
//!
//! Images are read through [`ImageSource`], either from a target's memory
//! ([`MappedImage`]) or from disk ([`FileImage`]). Every RVA is checked
//! against the image size before it is read.

pub mod exports;
pub mod headers;
pub mod image;
pub mod imports;

pub use exports::{
    parse_exports, parse_exports_at, parse_exports_from_file, parse_exports_in_memory,
    ExportDirectory, ExportEntry, Forwarder, Symbol,
};
pub use imports::{
    parse_imports, parse_imports_at, parse_imports_from_file, parse_imports_in_memory,
    set_import_function, ImportDescriptor, ImportDirectory, ImportThunk,
};
pub use image::{FileImage, ImageSource, MappedImage, OptionalHeader, PeHeaders};
