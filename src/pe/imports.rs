//! Import directory parsing and import address table patching

use super::exports::Symbol;
use super::headers::{ImageImportDescriptor, IMAGE_ORDINAL_FLAG32, IMAGE_ORDINAL_FLAG64};
use super::image::{check_range, read_c_string, read_struct, FileImage, ImageSource, MappedImage, PeHeaders};
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, ProcessArchitecture};
use crate::memory::MemoryAccess;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::path::Path;
use tracing::{debug, info};

/// Descriptors read before the table is considered corrupt
const MAX_IMPORT_DESCRIPTORS: usize = 0x1000;
/// Thunks read per descriptor before the list is considered corrupt
const MAX_IMPORT_THUNKS: usize = 0x1_0000;

/// One imported symbol and its slot in the import address table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportThunk {
    pub symbol: Symbol,
    /// Export-name-table hint, for imports by name
    pub hint: Option<u16>,
    /// RVA of the IAT slot the loader fills in
    pub iat_rva: u32,
    /// Current IAT slot value: the bound address once loaded
    pub function: u64,
}

impl ImportThunk {
    pub fn by_ordinal(&self) -> bool {
        matches!(self.symbol, Symbol::Ordinal(_))
    }

    /// Absolute address of the IAT slot for an image at `base`
    pub fn slot_address(&self, base: Address) -> MemoryResult<Address> {
        base.add(self.iat_rva as usize)
    }
}

impl fmt::Display for ImportThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} {:<30}", self.iat_rva, self.symbol.to_string())?;
        if let Some(hint) = self.hint {
            write!(f, " hint {:<5}", hint)?;
        }
        write!(f, " = 0x{:X}", self.function)
    }
}

/// Imports from one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    pub module: String,
    pub original_first_thunk: u32,
    pub time_date_stamp: u32,
    pub forwarder_chain: u32,
    pub name_rva: u32,
    pub first_thunk: u32,
    pub thunks: Vec<ImportThunk>,
}

impl ImportDescriptor {
    /// True when the image was bound ahead of time for this module
    pub fn is_bound(&self) -> bool {
        self.time_date_stamp != 0
    }

    pub fn find(&self, symbol: &Symbol) -> Option<&ImportThunk> {
        self.thunks.iter().find(|thunk| &thunk.symbol == symbol)
    }

    /// Case-insensitive, extension optional
    pub fn matches_module(&self, name: &str) -> bool {
        let stem = |text: &str| -> String {
            let lower = text.to_ascii_lowercase();
            match lower.rsplit_once('.') {
                Some((stem, "dll")) => stem.to_string(),
                _ => lower,
            }
        };
        stem(&self.module) == stem(name)
    }
}

/// A module's import table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDirectory {
    pub module_name: String,
    pub descriptors: Vec<ImportDescriptor>,
    present: bool,
}

impl ImportDirectory {
    pub fn absent(module_name: impl Into<String>) -> Self {
        ImportDirectory {
            module_name: module_name.into(),
            descriptors: Vec::new(),
            present: false,
        }
    }

    /// False when the module declares no import table at all
    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImportDescriptor> {
        self.descriptors.iter()
    }

    pub fn find_module(&self, name: &str) -> Option<&ImportDescriptor> {
        self.descriptors.iter().find(|d| d.matches_module(name))
    }

    /// The thunk importing `symbol` from `module`
    pub fn find(&self, module: &str, symbol: &Symbol) -> Option<&ImportThunk> {
        self.descriptors
            .iter()
            .filter(|d| d.matches_module(module))
            .find_map(|d| d.find(symbol))
    }

    /// Total imported symbols across all modules
    pub fn thunk_count(&self) -> usize {
        self.descriptors.iter().map(|d| d.thunks.len()).sum()
    }
}

impl<'a> IntoIterator for &'a ImportDirectory {
    type Item = &'a ImportDescriptor;
    type IntoIter = std::slice::Iter<'a, ImportDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

/// Parses the import table of any image source
pub fn parse_imports<S: ImageSource + ?Sized>(
    source: &S,
    module_name: &str,
) -> MemoryResult<ImportDirectory> {
    let headers = PeHeaders::parse(source)?;
    let directory = match headers.import_directory() {
        Some(directory) if directory.is_present() => directory,
        _ => {
            debug!("{} has no import table", module_name);
            return Ok(ImportDirectory::absent(module_name));
        }
    };
    let architecture = headers.architecture();
    let descriptor_size = mem::size_of::<ImageImportDescriptor>();

    let mut descriptors = Vec::new();
    let mut rva = directory.virtual_address;
    loop {
        if descriptors.len() >= MAX_IMPORT_DESCRIPTORS {
            return Err(MemoryError::PeParse(format!(
                "{}: more than {} import descriptors",
                module_name, MAX_IMPORT_DESCRIPTORS
            )));
        }
        check_range(source, rva, descriptor_size)?;
        let raw: ImageImportDescriptor = read_struct(source, rva)?;
        if raw.is_terminator() {
            break;
        }
        descriptors.push(parse_descriptor(source, module_name, &raw, architecture)?);
        rva = rva.checked_add(descriptor_size as u32).ok_or_else(|| {
            MemoryError::PeParse(format!("{}: import table overflows", module_name))
        })?;
    }

    debug!(
        "{}: imports from {} modules",
        module_name,
        descriptors.len()
    );
    Ok(ImportDirectory {
        module_name: module_name.to_string(),
        descriptors,
        present: true,
    })
}

fn parse_descriptor<S: ImageSource + ?Sized>(
    source: &S,
    module_name: &str,
    raw: &ImageImportDescriptor,
    architecture: ProcessArchitecture,
) -> MemoryResult<ImportDescriptor> {
    let (lookup_rva, iat_rva, name_rva) = (raw.original_first_thunk, raw.first_thunk, raw.name);
    if name_rva == 0 || iat_rva == 0 {
        return Err(MemoryError::PeParse(format!(
            "{}: import descriptor without name or IAT",
            module_name
        )));
    }
    let module = read_c_string(source, name_rva)?;
    // Images without a lookup table keep the names in the IAT itself
    let lookup_rva = if lookup_rva != 0 { lookup_rva } else { iat_rva };
    let width = architecture.pointer_size() as u32;

    let mut thunks = Vec::new();
    for index in 0.. {
        if index >= MAX_IMPORT_THUNKS {
            return Err(MemoryError::PeParse(format!(
                "{}: more than {} imports from {}",
                module_name, MAX_IMPORT_THUNKS, module
            )));
        }
        let step = width.checked_mul(index as u32);
        let (lookup, slot) = match step
            .and_then(|step| Some((lookup_rva.checked_add(step)?, iat_rva.checked_add(step)?)))
        {
            Some(pair) => pair,
            None => {
                return Err(MemoryError::PeParse(format!(
                    "{}: thunk list for {} overflows",
                    module_name, module
                )))
            }
        };

        let entry = read_thunk(source, lookup, architecture)?;
        if entry == 0 {
            break;
        }
        let (symbol, hint) = decode_thunk(source, entry, architecture)?;
        let function = if slot == lookup {
            entry
        } else {
            read_thunk(source, slot, architecture)?
        };
        thunks.push(ImportThunk {
            symbol,
            hint,
            iat_rva: slot,
            function,
        });
    }

    Ok(ImportDescriptor {
        module,
        original_first_thunk: raw.original_first_thunk,
        time_date_stamp: raw.time_date_stamp,
        forwarder_chain: raw.forwarder_chain,
        name_rva,
        first_thunk: iat_rva,
        thunks,
    })
}

fn read_thunk<S: ImageSource + ?Sized>(
    source: &S,
    rva: u32,
    architecture: ProcessArchitecture,
) -> MemoryResult<u64> {
    match architecture {
        ProcessArchitecture::X86 => read_struct::<u32, _>(source, rva).map(u64::from),
        ProcessArchitecture::X64 => read_struct::<u64, _>(source, rva),
    }
}

/// Lookup entry to symbol: ordinal flag, else RVA of hint and name
fn decode_thunk<S: ImageSource + ?Sized>(
    source: &S,
    entry: u64,
    architecture: ProcessArchitecture,
) -> MemoryResult<(Symbol, Option<u16>)> {
    let by_ordinal = match architecture {
        ProcessArchitecture::X86 => entry & u64::from(IMAGE_ORDINAL_FLAG32) != 0,
        ProcessArchitecture::X64 => entry & IMAGE_ORDINAL_FLAG64 != 0,
    };
    if by_ordinal {
        return Ok((Symbol::Ordinal((entry & 0xFFFF) as u16), None));
    }

    let hint_rva = u32::try_from(entry & 0x7FFF_FFFF).map_err(|_| {
        MemoryError::PeParse(format!("{}: bad import name RVA 0x{:X}", source.describe(), entry))
    })?;
    let hint: u16 = read_struct(source, hint_rva)?;
    let name_rva = hint_rva.checked_add(2).ok_or_else(|| {
        MemoryError::PeParse(format!("{}: bad import name RVA 0x{:X}", source.describe(), entry))
    })?;
    Ok((Symbol::Name(read_c_string(source, name_rva)?), Some(hint)))
}

/// Imports of a module mapped in `memory`, bounded by the module's size
pub fn parse_imports_in_memory<M: MemoryAccess + ?Sized>(
    memory: &M,
    module: &ModuleInfo,
) -> MemoryResult<ImportDirectory> {
    let image = MappedImage::new(memory, module.base_address, module.size);
    parse_imports(&image, &module.name)
}

/// Imports of an image at `base`, bounded by its SizeOfImage
pub fn parse_imports_at<M: MemoryAccess + ?Sized>(
    memory: &M,
    base: Address,
    module_name: &str,
) -> MemoryResult<ImportDirectory> {
    let image = MappedImage::at_base(memory, base)?;
    parse_imports(&image, module_name)
}

/// Imports of a PE file on disk
pub fn parse_imports_from_file(path: &Path) -> MemoryResult<ImportDirectory> {
    let image = FileImage::open(path)?;
    let name = image.name().to_string();
    parse_imports(&image, &name)
}

/// Points one IAT slot of the module at `base` to `function`.
///
/// Returns the previous slot value. The slot is written at the target's
/// pointer width, lifting page protection for the duration of the write.
pub fn set_import_function<M: MemoryAccess + ?Sized>(
    memory: &M,
    base: Address,
    thunk: &ImportThunk,
    function: Address,
) -> MemoryResult<u64> {
    let slot = thunk.slot_address(base)?;
    let previous = match memory.architecture() {
        ProcessArchitecture::X86 => {
            let narrow = u32::try_from(function.as_u64()).map_err(|_| {
                MemoryError::InvalidAddress(format!("{} does not fit a 32-bit IAT slot", function))
            })?;
            let mut old = [0u8; 4];
            memory.read_into(slot, &mut old)?;
            memory.write(slot, &narrow.to_le_bytes())?;
            u64::from(u32::from_le_bytes(old))
        }
        ProcessArchitecture::X64 => {
            let mut old = [0u8; 8];
            memory.read_into(slot, &mut old)?;
            memory.write(slot, &function.as_u64().to_le_bytes())?;
            u64::from_le_bytes(old)
        }
    };
    info!(
        "IAT slot {} for {} now {} (was 0x{:X})",
        slot, thunk.symbol, function, previous
    );
    Ok(previous)
}
