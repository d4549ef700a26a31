//! Export directory parsing

use super::image::{
    check_range, read_c_string, read_struct, read_u16_array, read_u32_array, FileImage,
    ImageSource, MappedImage, PeHeaders,
};
use super::headers::ImageExportDirectory;
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo};
use crate::memory::MemoryAccess;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Ordinals are 16-bit, so no export table has more slots than this
const MAX_EXPORT_SLOTS: u32 = 0x1_0000;

/// An export looked up by name or by ordinal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    Name(String),
    Ordinal(u16),
}

impl Symbol {
    /// `#N` is an ordinal, anything else a name
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix('#').and_then(|n| n.parse::<u16>().ok()) {
            Some(ordinal) => Symbol::Ordinal(ordinal),
            None => Symbol::Name(text.to_string()),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Name(name) => write!(f, "{}", name),
            Symbol::Ordinal(ordinal) => write!(f, "#{}", ordinal),
        }
    }
}

impl From<&str> for Symbol {
    fn from(text: &str) -> Self {
        Symbol::parse(text)
    }
}

/// Where a forwarded export really lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forwarder {
    /// Module name without extension, as written in the forwarder string
    pub module: String,
    pub symbol: Symbol,
}

impl Forwarder {
    /// Splits `Module.Symbol` on the last dot
    pub fn parse(text: &str) -> MemoryResult<Self> {
        match text.rsplit_once('.') {
            Some((module, symbol)) if !module.is_empty() && !symbol.is_empty() => Ok(Forwarder {
                module: module.to_string(),
                symbol: Symbol::parse(symbol),
            }),
            _ => Err(MemoryError::PeParse(format!(
                "malformed forwarder \"{}\"",
                text
            ))),
        }
    }
}

impl fmt::Display for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.symbol)
    }
}

/// One exported symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Owning module's name
    pub module: String,
    /// `None` for ordinal-only exports
    pub name: Option<String>,
    pub ordinal: u16,
    pub rva: u32,
    pub forwarder: Option<Forwarder>,
}

impl ExportEntry {
    pub fn is_forwarded(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Absolute address for a module loaded at `base`
    pub fn address(&self, base: Address) -> Address {
        base.offset(self.rva as isize)
    }

    pub fn matches(&self, symbol: &Symbol) -> bool {
        match symbol {
            Symbol::Name(name) => self.name.as_deref() == Some(name.as_str()),
            Symbol::Ordinal(ordinal) => self.ordinal == *ordinal,
        }
    }
}

impl fmt::Display for ExportEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:<5} 0x{:08X} ", self.ordinal, self.rva)?;
        match &self.name {
            Some(name) => write!(f, "{}", name)?,
            None => write!(f, "<ordinal only>")?,
        }
        if let Some(forwarder) = &self.forwarder {
            write!(f, " -> {}", forwarder)?;
        }
        Ok(())
    }
}

/// A module's exports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDirectory {
    pub module_name: String,
    /// Name recorded inside the directory itself
    pub dll_name: Option<String>,
    pub ordinal_base: u32,
    pub time_date_stamp: u32,
    pub entries: Vec<ExportEntry>,
    present: bool,
}

impl ExportDirectory {
    /// The empty result for a module without an export table
    pub fn absent(module_name: impl Into<String>) -> Self {
        ExportDirectory {
            module_name: module_name.into(),
            dll_name: None,
            ordinal_base: 0,
            time_date_stamp: 0,
            entries: Vec::new(),
            present: false,
        }
    }

    /// False when the module declares no export table at all
    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ExportEntry> {
        self.entries.iter()
    }

    pub fn find(&self, symbol: &Symbol) -> Option<&ExportEntry> {
        self.entries.iter().find(|entry| entry.matches(symbol))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ExportEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.as_deref() == Some(name))
    }

    pub fn find_by_ordinal(&self, ordinal: u16) -> Option<&ExportEntry> {
        self.entries.iter().find(|entry| entry.ordinal == ordinal)
    }
}

impl<'a> IntoIterator for &'a ExportDirectory {
    type Item = &'a ExportEntry;
    type IntoIter = std::slice::Iter<'a, ExportEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Parses the export table of any image source
pub fn parse_exports<S: ImageSource + ?Sized>(
    source: &S,
    module_name: &str,
) -> MemoryResult<ExportDirectory> {
    let headers = PeHeaders::parse(source)?;
    let directory = match headers.export_directory() {
        Some(directory) if directory.is_present() => directory,
        _ => {
            debug!("{} has no export table", module_name);
            return Ok(ExportDirectory::absent(module_name));
        }
    };
    let (directory_rva, directory_size) = (directory.virtual_address, directory.size);
    check_range(source, directory_rva, directory_size as usize)?;

    let export: ImageExportDirectory = read_struct(source, directory_rva)?;
    let (function_count, name_count, ordinal_base) =
        (export.number_of_functions, export.number_of_names, export.base);
    if function_count > MAX_EXPORT_SLOTS || name_count > function_count {
        return Err(MemoryError::PeParse(format!(
            "{}: {} functions, {} names",
            module_name, function_count, name_count
        )));
    }

    let functions = read_u32_array(source, export.address_of_functions, function_count as usize)?;
    let name_rvas = read_u32_array(source, export.address_of_names, name_count as usize)?;
    let name_indices = read_u16_array(source, export.address_of_name_ordinals, name_count as usize)?;

    let mut names: Vec<Option<String>> = vec![None; functions.len()];
    for (&name_rva, &index) in name_rvas.iter().zip(&name_indices) {
        let slot = names.get_mut(usize::from(index)).ok_or_else(|| {
            MemoryError::PeParse(format!(
                "{}: name ordinal {} outside {} functions",
                module_name, index, function_count
            ))
        })?;
        if slot.is_none() {
            *slot = Some(read_c_string(source, name_rva)?);
        }
    }

    let dll_name = match export.name {
        0 => None,
        rva => Some(read_c_string(source, rva)?),
    };

    let mut entries = Vec::with_capacity(functions.len());
    for (index, (&rva, name)) in functions.iter().zip(names).enumerate() {
        if rva == 0 {
            continue;
        }
        let ordinal = ordinal_base
            .checked_add(index as u32)
            .and_then(|ordinal| u16::try_from(ordinal).ok())
            .ok_or_else(|| {
                MemoryError::PeParse(format!(
                    "{}: ordinal base {} + {} exceeds 16 bits",
                    module_name, ordinal_base, index
                ))
            })?;
        let forwarder = if directory.contains(rva) {
            Some(Forwarder::parse(&read_c_string(source, rva)?)?)
        } else {
            check_range(source, rva, 1)?;
            None
        };
        entries.push(ExportEntry {
            module: module_name.to_string(),
            name,
            ordinal,
            rva,
            forwarder,
        });
    }

    debug!("{}: {} exports", module_name, entries.len());
    Ok(ExportDirectory {
        module_name: module_name.to_string(),
        dll_name,
        ordinal_base,
        time_date_stamp: export.time_date_stamp,
        entries,
        present: true,
    })
}

/// Exports of a module mapped in `memory`, bounded by the module's size
pub fn parse_exports_in_memory<M: MemoryAccess + ?Sized>(
    memory: &M,
    module: &ModuleInfo,
) -> MemoryResult<ExportDirectory> {
    let image = MappedImage::new(memory, module.base_address, module.size);
    parse_exports(&image, &module.name)
}

/// Exports of an image at `base`, bounded by its SizeOfImage
pub fn parse_exports_at<M: MemoryAccess + ?Sized>(
    memory: &M,
    base: Address,
    module_name: &str,
) -> MemoryResult<ExportDirectory> {
    let image = MappedImage::at_base(memory, base)?;
    parse_exports(&image, module_name)
}

/// Exports of a PE file on disk
pub fn parse_exports_from_file(path: &Path) -> MemoryResult<ExportDirectory> {
    let image = FileImage::open(path)?;
    let name = image.name().to_string();
    parse_exports(&image, &name)
}
