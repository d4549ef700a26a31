//! Shared fixtures: synthetic PE images and a scripted in-process target

#![allow(dead_code)]

use remote_mem::memory::{MemoryAccess, MemoryRegion};
use remote_mem::{
    Address, BufferMemory, MemoryError, MemoryResult, ModuleInfo, ProcessArchitecture, ProcessId,
    ProtectionFlags, RemoteTarget, RemoteThreads,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const HEADERS_SIZE: usize = 0x400;
pub const EXPORT_RVA: u32 = 0x1000;
pub const CODE_RVA: u32 = 0x2000;
pub const IMPORT_RVA: u32 = 0x2800;
pub const IMAGE_SIZE: usize = 0x3000;

enum ExportSlot {
    Code { name: Option<String>, rva: u32 },
    Forward { name: String, target: String },
    Empty,
}

/// Builds a DLL with one section holding an export table and some code
pub struct DllBuilder {
    architecture: ProcessArchitecture,
    dll_name: String,
    ordinal_base: u32,
    slots: Vec<ExportSlot>,
    code: Vec<(u32, Vec<u8>)>,
    with_exports: bool,
    imports: Vec<(String, Vec<String>)>,
    lookup_tables: bool,
}

impl DllBuilder {
    pub fn new(architecture: ProcessArchitecture, dll_name: &str) -> Self {
        DllBuilder {
            architecture,
            dll_name: dll_name.to_string(),
            ordinal_base: 1,
            slots: Vec::new(),
            code: Vec::new(),
            with_exports: true,
            imports: Vec::new(),
            lookup_tables: true,
        }
    }

    pub fn ordinal_base(mut self, base: u32) -> Self {
        self.ordinal_base = base;
        self
    }

    pub fn export(mut self, name: &str, rva: u32) -> Self {
        self.slots.push(ExportSlot::Code {
            name: Some(name.to_string()),
            rva,
        });
        self
    }

    pub fn ordinal_only(mut self, rva: u32) -> Self {
        self.slots.push(ExportSlot::Code { name: None, rva });
        self
    }

    pub fn forward(mut self, name: &str, target: &str) -> Self {
        self.slots.push(ExportSlot::Forward {
            name: name.to_string(),
            target: target.to_string(),
        });
        self
    }

    /// A zero RVA slot, which loaders treat as unused
    pub fn gap(mut self) -> Self {
        self.slots.push(ExportSlot::Empty);
        self
    }

    pub fn code(mut self, rva: u32, bytes: &[u8]) -> Self {
        self.code.push((rva, bytes.to_vec()));
        self
    }

    /// Imports `symbols` from `module`; `#N` imports by ordinal
    pub fn import(mut self, module: &str, symbols: &[&str]) -> Self {
        self.imports.push((
            module.to_string(),
            symbols.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Zeroes OriginalFirstThunk so names live only in the IAT
    pub fn without_lookup_tables(mut self) -> Self {
        self.lookup_tables = false;
        self
    }

    /// Leaves the export data directory empty
    pub fn without_exports(mut self) -> Self {
        self.with_exports = false;
        self
    }

    /// The image as the loader maps it, `IMAGE_SIZE` bytes
    pub fn build_mapped(&self) -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_SIZE];
        let (directory_size, table) = self.export_table();
        let (descriptors_size, imports) = self.import_table();
        self.write_headers(&mut image, directory_size, descriptors_size);
        image[EXPORT_RVA as usize..EXPORT_RVA as usize + table.len()].copy_from_slice(&table);
        let import_at = IMPORT_RVA as usize;
        image[import_at..import_at + imports.len()].copy_from_slice(&imports);
        for (rva, bytes) in &self.code {
            let start = *rva as usize;
            image[start..start + bytes.len()].copy_from_slice(bytes);
        }
        image
    }

    /// The same image laid out as a file: headers, then the raw section
    pub fn build_file(&self) -> Vec<u8> {
        let mapped = self.build_mapped();
        let mut file = mapped[..HEADERS_SIZE].to_vec();
        file.extend_from_slice(&mapped[EXPORT_RVA as usize..]);
        file
    }

    fn is_64bit(&self) -> bool {
        self.architecture.is_64bit()
    }

    fn write_headers(&self, image: &mut [u8], directory_size: u32, descriptors_size: u32) {
        image[0..2].copy_from_slice(b"MZ");
        put_u32(image, 0x3C, 0x80);
        image[0x80..0x84].copy_from_slice(b"PE\0\0");

        let (machine, optional_size, magic): (u16, u16, u16) = if self.is_64bit() {
            (0x8664, 240, 0x020B)
        } else {
            (0x014C, 224, 0x010B)
        };
        let file = 0x84;
        put_u16(image, file, machine);
        put_u16(image, file + 2, 1);
        put_u16(image, file + 16, optional_size);
        put_u16(image, file + 18, 0x2102);

        let opt = file + 20;
        put_u16(image, opt, magic);
        put_u32(image, opt + 32, 0x1000);
        put_u32(image, opt + 36, 0x200);
        put_u32(image, opt + 56, IMAGE_SIZE as u32);
        put_u32(image, opt + 60, HEADERS_SIZE as u32);
        let directories = if self.is_64bit() {
            put_u32(image, opt + 108, 16);
            opt + 112
        } else {
            put_u32(image, opt + 92, 16);
            opt + 96
        };
        if self.with_exports {
            put_u32(image, directories, EXPORT_RVA);
            put_u32(image, directories + 4, directory_size);
        }
        if !self.imports.is_empty() {
            put_u32(image, directories + 8, IMPORT_RVA);
            put_u32(image, directories + 12, descriptors_size);
        }

        let section = opt + optional_size as usize;
        image[section..section + 5].copy_from_slice(b".text");
        let section_size = (IMAGE_SIZE - EXPORT_RVA as usize) as u32;
        put_u32(image, section + 8, section_size);
        put_u32(image, section + 12, EXPORT_RVA);
        put_u32(image, section + 16, section_size);
        put_u32(image, section + 20, HEADERS_SIZE as u32);
        put_u32(image, section + 36, 0x6000_0020);
    }

    /// Directory, arrays and strings, laid out from `EXPORT_RVA`
    fn export_table(&self) -> (u32, Vec<u8>) {
        let count = self.slots.len();
        let named: Vec<(usize, &str)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                ExportSlot::Code {
                    name: Some(name), ..
                } => Some((index, name.as_str())),
                ExportSlot::Forward { name, .. } => Some((index, name.as_str())),
                _ => None,
            })
            .collect();

        let functions_at = 40;
        let names_at = functions_at + count * 4;
        let ordinals_at = names_at + named.len() * 4;
        let strings_at = ordinals_at + named.len() * 2;

        let mut table = vec![0u8; strings_at];
        let mut strings = Vec::new();
        let intern = |text: &str, strings: &mut Vec<u8>| -> u32 {
            let rva = EXPORT_RVA + (strings_at + strings.len()) as u32;
            strings.extend_from_slice(text.as_bytes());
            strings.push(0);
            rva
        };

        let dll_name = intern(&self.dll_name, &mut strings);
        for (position, (index, name)) in named.iter().enumerate() {
            let rva = intern(name, &mut strings);
            put_u32(&mut table, names_at + position * 4, rva);
            put_u16(&mut table, ordinals_at + position * 2, *index as u16);
        }
        for (index, slot) in self.slots.iter().enumerate() {
            let rva = match slot {
                ExportSlot::Code { rva, .. } => *rva,
                ExportSlot::Forward { target, .. } => intern(target, &mut strings),
                ExportSlot::Empty => 0,
            };
            put_u32(&mut table, functions_at + index * 4, rva);
        }

        put_u32(&mut table, 4, 0x5F00_0000);
        put_u32(&mut table, 12, dll_name);
        put_u32(&mut table, 16, self.ordinal_base);
        put_u32(&mut table, 20, count as u32);
        put_u32(&mut table, 24, named.len() as u32);
        put_u32(&mut table, 28, EXPORT_RVA + functions_at as u32);
        put_u32(&mut table, 32, EXPORT_RVA + names_at as u32);
        put_u32(&mut table, 36, EXPORT_RVA + ordinals_at as u32);

        table.extend_from_slice(&strings);
        (table.len() as u32, table)
    }
}

impl DllBuilder {
    /// Descriptors, then per module: lookup table, IAT, name, hint/name entries.
    /// The IAT starts as a copy of the lookup table, as on disk.
    fn import_table(&self) -> (u32, Vec<u8>) {
        if self.imports.is_empty() {
            return (0, Vec::new());
        }
        let width = if self.is_64bit() { 8 } else { 4 };
        let descriptors_size = (self.imports.len() + 1) * 20;
        let mut table = vec![0u8; descriptors_size];

        for (index, (module, symbols)) in self.imports.iter().enumerate() {
            let lookup_at = table.len();
            let iat_at = lookup_at + (symbols.len() + 1) * width;
            table.resize(iat_at + (symbols.len() + 1) * width, 0);

            let name_at = table.len();
            table.extend_from_slice(module.as_bytes());
            table.push(0);

            for (position, symbol) in symbols.iter().enumerate() {
                let entry: u64 = match symbol.strip_prefix('#') {
                    Some(ordinal) => {
                        let flag = if self.is_64bit() { 1u64 << 63 } else { 1u64 << 31 };
                        flag | ordinal.parse::<u64>().unwrap()
                    }
                    None => {
                        if table.len() % 2 != 0 {
                            table.push(0);
                        }
                        let hint_at = table.len();
                        table.extend_from_slice(&(position as u16).to_le_bytes());
                        table.extend_from_slice(symbol.as_bytes());
                        table.push(0);
                        u64::from(IMPORT_RVA) + hint_at as u64
                    }
                };
                let bytes = entry.to_le_bytes();
                for at in [lookup_at, iat_at] {
                    let slot = at + position * width;
                    table[slot..slot + width].copy_from_slice(&bytes[..width]);
                }
            }

            let descriptor = index * 20;
            let lookup_rva = if self.lookup_tables {
                IMPORT_RVA + lookup_at as u32
            } else {
                0
            };
            put_u32(&mut table, descriptor, lookup_rva);
            put_u32(&mut table, descriptor + 12, IMPORT_RVA + name_at as u32);
            put_u32(&mut table, descriptor + 16, IMPORT_RVA + iat_at as u32);
        }

        assert!(table.len() <= IMAGE_SIZE - IMPORT_RVA as usize, "import table too large");
        (descriptors_size as u32, table)
    }
}

pub fn put_u16(buffer: &mut [u8], at: usize, value: u16) {
    buffer[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buffer: &mut [u8], at: usize, value: u32) {
    buffer[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// What a remote thread does when [`FakeTarget`] starts one
pub type ThreadScript = Box<dyn FnMut(&FakeTarget, Address, Address) -> MemoryResult<u32>>;

/// One remote thread start, with the code found at its entry point
#[derive(Debug, Clone)]
pub struct ThreadStart {
    pub start: Address,
    pub parameter: Address,
    pub code: Vec<u8>,
}

/// A target whose memory is a [`BufferMemory`] and whose threads run a script
pub struct FakeTarget {
    pub memory: BufferMemory,
    modules: RefCell<Vec<ModuleInfo>>,
    script: RefCell<Option<ThreadScript>>,
    starts: RefCell<Vec<ThreadStart>>,
    known: HashMap<(String, String), Address>,
}

impl FakeTarget {
    pub fn new(architecture: ProcessArchitecture) -> Self {
        FakeTarget {
            memory: BufferMemory::with_architecture(architecture),
            modules: RefCell::new(Vec::new()),
            script: RefCell::new(None),
            starts: RefCell::new(Vec::new()),
            known: HashMap::new(),
        }
    }

    /// Maps `image` at `base` and lists it as a loaded module
    pub fn load(&self, name: &str, path: &str, base: usize, image: &[u8]) -> ModuleInfo {
        self.memory
            .map(Address::new(base), image, ProtectionFlags::execute_read())
            .unwrap();
        let module = ModuleInfo::new(name, PathBuf::from(path), Address::new(base), image.len());
        self.modules.borrow_mut().push(module.clone());
        module
    }

    pub fn on_thread(
        &self,
        script: impl FnMut(&FakeTarget, Address, Address) -> MemoryResult<u32> + 'static,
    ) {
        *self.script.borrow_mut() = Some(Box::new(script));
    }

    pub fn know(&mut self, module: &str, name: &str, address: Address) {
        self.known
            .insert((module.to_ascii_lowercase(), name.to_string()), address);
    }

    pub fn starts(&self) -> Vec<ThreadStart> {
        self.starts.borrow().clone()
    }

    /// Stores a call result in the slot a stub thread receives
    pub fn complete_call(&self, slot: Address, value: u64) -> MemoryResult<()> {
        self.memory.write(slot, &value.to_le_bytes())
    }
}

impl MemoryAccess for FakeTarget {
    fn architecture(&self) -> ProcessArchitecture {
        self.memory.architecture()
    }

    fn read_partial(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<usize> {
        self.memory.read_partial(address, buffer)
    }

    fn write_raw(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        self.memory.write_raw(address, data)
    }

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address> {
        self.memory.allocate(size, protection)
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        self.memory.free(address)
    }

    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags> {
        self.memory.protect(address, size, protection)
    }

    fn query_region(&self, address: Address) -> MemoryResult<Option<MemoryRegion>> {
        self.memory.query_region(address)
    }

    fn flush_instruction_cache(&self, address: Address, size: usize) -> MemoryResult<()> {
        self.memory.flush_instruction_cache(address, size)
    }
}

impl RemoteThreads for FakeTarget {
    fn run_remote_thread(
        &self,
        start: Address,
        parameter: Address,
        timeout: Duration,
    ) -> MemoryResult<u32> {
        // Host-known entry points may not be mapped here
        let mut code = vec![0u8; 0x100];
        let read = self.memory.read_partial(start, &mut code).unwrap_or(0);
        code.truncate(read);
        self.starts.borrow_mut().push(ThreadStart {
            start,
            parameter,
            code,
        });

        let mut script = self.script.borrow_mut();
        match script.as_mut() {
            Some(run) => run(self, start, parameter),
            None => Err(MemoryError::timeout(start, timeout.as_millis() as u64)),
        }
    }
}

impl RemoteTarget for FakeTarget {
    fn pid(&self) -> ProcessId {
        4242
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        Ok(self.modules.borrow().clone())
    }

    fn known_procedure(&self, module: &str, name: &str) -> Option<Address> {
        self.known
            .get(&(module.to_ascii_lowercase(), name.to_string()))
            .copied()
    }
}
