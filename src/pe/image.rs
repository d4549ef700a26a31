//! Sources of PE image bytes, addressed by RVA

use super::headers::*;
use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use crate::memory::MemoryAccess;
use bytemuck::Pod;
use std::fs;
use std::mem;
use std::path::Path;

/// Upper bound on section count; the loader refuses more
const MAX_SECTIONS: u16 = 96;
/// Longest NUL-terminated string read out of an image
pub const MAX_IMAGE_STRING: usize = 512;
const STRING_CHUNK: usize = 64;

/// Random access to an image by relative virtual address
pub trait ImageSource {
    /// Fills `buffer` from `rva` or fails with `PeParse`
    fn read_at(&self, rva: u32, buffer: &mut [u8]) -> MemoryResult<()>;

    /// Bound every RVA is checked against
    fn image_size(&self) -> u32;

    /// Name for error messages
    fn describe(&self) -> String;
}

/// Fails unless `[rva, rva + length)` lies within the image
pub fn check_range<S: ImageSource + ?Sized>(source: &S, rva: u32, length: usize) -> MemoryResult<()> {
    let end = u64::from(rva) + length as u64;
    if end > u64::from(source.image_size()) {
        return Err(MemoryError::PeParse(format!(
            "{}: range 0x{:X}+0x{:X} exceeds image size 0x{:X}",
            source.describe(),
            rva,
            length,
            source.image_size()
        )));
    }
    Ok(())
}

pub fn read_struct<T: Pod, S: ImageSource + ?Sized>(source: &S, rva: u32) -> MemoryResult<T> {
    let mut bytes = vec![0u8; mem::size_of::<T>()];
    source.read_at(rva, &mut bytes)?;
    Ok(bytemuck::pod_read_unaligned(&bytes))
}

/// `count` little-endian u32 values starting at `rva`
pub fn read_u32_array<S: ImageSource + ?Sized>(source: &S, rva: u32, count: usize) -> MemoryResult<Vec<u32>> {
    let mut bytes = vec![0u8; count * 4];
    source.read_at(rva, &mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn read_u16_array<S: ImageSource + ?Sized>(source: &S, rva: u32, count: usize) -> MemoryResult<Vec<u16>> {
    let mut bytes = vec![0u8; count * 2];
    source.read_at(rva, &mut bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// NUL-terminated string at `rva`, never reading past the image
pub fn read_c_string<S: ImageSource + ?Sized>(source: &S, rva: u32) -> MemoryResult<String> {
    let mut collected = Vec::new();
    let mut cursor = rva;

    while collected.len() < MAX_IMAGE_STRING {
        let remaining_image = source.image_size().saturating_sub(cursor) as usize;
        let chunk_len = STRING_CHUNK
            .min(remaining_image)
            .min(MAX_IMAGE_STRING - collected.len());
        if chunk_len == 0 {
            break;
        }
        let mut chunk = vec![0u8; chunk_len];
        source.read_at(cursor, &mut chunk)?;
        if let Some(end) = chunk.iter().position(|&b| b == 0) {
            collected.extend_from_slice(&chunk[..end]);
            return Ok(String::from_utf8_lossy(&collected).into_owned());
        }
        collected.extend_from_slice(&chunk);
        cursor += chunk_len as u32;
    }

    Err(MemoryError::PeParse(format!(
        "{}: unterminated string at RVA 0x{:X}",
        source.describe(),
        rva
    )))
}

/// Either optional-header flavour
#[derive(Debug, Clone, Copy)]
pub enum OptionalHeader {
    Pe32(ImageOptionalHeader32),
    Pe64(ImageOptionalHeader64),
}

impl OptionalHeader {
    pub fn magic(&self) -> u16 {
        match self {
            OptionalHeader::Pe32(h) => h.magic,
            OptionalHeader::Pe64(h) => h.magic,
        }
    }

    pub fn architecture(&self) -> ProcessArchitecture {
        match self {
            OptionalHeader::Pe32(_) => ProcessArchitecture::X86,
            OptionalHeader::Pe64(_) => ProcessArchitecture::X64,
        }
    }

    pub fn size_of_image(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.size_of_image,
            OptionalHeader::Pe64(h) => h.size_of_image,
        }
    }

    pub fn size_of_headers(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.size_of_headers,
            OptionalHeader::Pe64(h) => h.size_of_headers,
        }
    }

    pub fn image_base(&self) -> u64 {
        match self {
            OptionalHeader::Pe32(h) => u64::from(h.image_base),
            OptionalHeader::Pe64(h) => h.image_base,
        }
    }

    pub fn entry_point(&self) -> u32 {
        match self {
            OptionalHeader::Pe32(h) => h.address_of_entry_point,
            OptionalHeader::Pe64(h) => h.address_of_entry_point,
        }
    }

    /// Data directory `index`, if the header declares that many
    pub fn data_directory(&self, index: usize) -> Option<ImageDataDirectory> {
        let (count, directories) = match self {
            OptionalHeader::Pe32(h) => (h.number_of_rva_and_sizes, h.data_directory),
            OptionalHeader::Pe64(h) => (h.number_of_rva_and_sizes, h.data_directory),
        };
        let declared = (count as usize).min(IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
        if index < declared {
            Some(directories[index])
        } else {
            None
        }
    }
}

/// Validated DOS, NT and section headers of one image
#[derive(Debug, Clone)]
pub struct PeHeaders {
    pub dos: ImageDosHeader,
    /// Offset of the "PE\0\0" signature
    pub nt_offset: u32,
    pub file: ImageFileHeader,
    pub optional: OptionalHeader,
    pub sections: Vec<ImageSectionHeader>,
}

impl PeHeaders {
    pub fn parse<S: ImageSource + ?Sized>(source: &S) -> MemoryResult<Self> {
        let dos: ImageDosHeader = read_struct(source, 0)?;
        let magic = dos.e_magic;
        if magic != IMAGE_DOS_SIGNATURE {
            return Err(MemoryError::PeParse(format!(
                "{}: bad DOS magic 0x{:04X}",
                source.describe(),
                magic
            )));
        }

        let nt_offset = u32::try_from(dos.e_lfanew).map_err(|_| {
            MemoryError::PeParse(format!("{}: negative NT header offset", source.describe()))
        })?;
        let signature: u32 = read_struct(source, nt_offset)?;
        if signature != IMAGE_NT_SIGNATURE {
            return Err(MemoryError::PeParse(format!(
                "{}: bad NT signature 0x{:08X}",
                source.describe(),
                signature
            )));
        }

        let file_offset = offset(source, nt_offset, 4)?;
        let file: ImageFileHeader = read_struct(source, file_offset)?;
        let optional_offset = offset(source, file_offset, mem::size_of::<ImageFileHeader>())?;

        let optional_magic: u16 = read_struct(source, optional_offset)?;
        let optional = match optional_magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => OptionalHeader::Pe32(read_struct(source, optional_offset)?),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => OptionalHeader::Pe64(read_struct(source, optional_offset)?),
            other => {
                return Err(MemoryError::PeParse(format!(
                    "{}: bad optional header magic 0x{:04X}",
                    source.describe(),
                    other
                )))
            }
        };

        let section_count = file.number_of_sections;
        if section_count > MAX_SECTIONS {
            return Err(MemoryError::PeParse(format!(
                "{}: {} sections",
                source.describe(),
                section_count
            )));
        }
        let mut section_offset =
            offset(source, optional_offset, usize::from(file.size_of_optional_header))?;
        let mut sections = Vec::with_capacity(usize::from(section_count));
        for _ in 0..section_count {
            sections.push(read_struct::<ImageSectionHeader, _>(source, section_offset)?);
            section_offset = offset(source, section_offset, mem::size_of::<ImageSectionHeader>())?;
        }

        Ok(PeHeaders {
            dos,
            nt_offset,
            file,
            optional,
            sections,
        })
    }

    pub fn architecture(&self) -> ProcessArchitecture {
        self.optional.architecture()
    }

    pub fn export_directory(&self) -> Option<ImageDataDirectory> {
        self.optional.data_directory(IMAGE_DIRECTORY_ENTRY_EXPORT)
    }

    pub fn import_directory(&self) -> Option<ImageDataDirectory> {
        self.optional.data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT)
    }
}

fn offset<S: ImageSource + ?Sized>(source: &S, base: u32, delta: usize) -> MemoryResult<u32> {
    u32::try_from(delta)
        .ok()
        .and_then(|delta| base.checked_add(delta))
        .ok_or_else(|| MemoryError::PeParse(format!("{}: header offset overflow", source.describe())))
}

/// An image mapped into a target's address space
pub struct MappedImage<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    base: Address,
    size: u32,
}

impl<'a, M: MemoryAccess + ?Sized> MappedImage<'a, M> {
    /// Image at `base` bounded by `size` bytes (e.g. a module's reported size)
    pub fn new(memory: &'a M, base: Address, size: usize) -> Self {
        MappedImage {
            memory,
            base,
            size: u32::try_from(size).unwrap_or(u32::MAX),
        }
    }

    /// Image at `base` bounded by its own SizeOfImage
    pub fn at_base(memory: &'a M, base: Address) -> MemoryResult<Self> {
        let unbounded = MappedImage {
            memory,
            base,
            size: u32::MAX,
        };
        let headers = PeHeaders::parse(&unbounded)?;
        Ok(MappedImage {
            memory,
            base,
            size: headers.optional.size_of_image(),
        })
    }

    pub fn base(&self) -> Address {
        self.base
    }
}

impl<M: MemoryAccess + ?Sized> ImageSource for MappedImage<'_, M> {
    fn read_at(&self, rva: u32, buffer: &mut [u8]) -> MemoryResult<()> {
        check_range(self, rva, buffer.len())?;
        let address = self.base.checked_add(rva as usize).ok_or_else(|| {
            MemoryError::PeParse(format!("{}: RVA 0x{:X} overflows", self.describe(), rva))
        })?;
        self.memory.read_into(address, buffer)
    }

    fn image_size(&self) -> u32 {
        self.size
    }

    fn describe(&self) -> String {
        format!("image at {}", self.base)
    }
}

/// An image read from disk; RVAs go through the section table
pub struct FileImage {
    name: String,
    data: Vec<u8>,
    headers_size: u32,
    image_size: u32,
    sections: Vec<ImageSectionHeader>,
}

impl FileImage {
    pub fn open(path: &Path) -> MemoryResult<Self> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, data)
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> MemoryResult<Self> {
        let length = u32::try_from(data.len()).map_err(|_| {
            MemoryError::PeParse("file larger than 4 GiB".to_string())
        })?;
        // Until the section table is known, RVAs are file offsets
        let mut image = FileImage {
            name: name.into(),
            data,
            headers_size: length,
            image_size: length,
            sections: Vec::new(),
        };
        let headers = PeHeaders::parse(&image)?;
        image.headers_size = headers.optional.size_of_headers().min(length);
        image.image_size = headers.optional.size_of_image();
        image.sections = headers.sections;
        Ok(image)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File offset holding `[rva, rva + length)`
    pub fn rva_to_offset(&self, rva: u32, length: usize) -> MemoryResult<usize> {
        let end = u64::from(rva) + length as u64;
        if end <= u64::from(self.headers_size) {
            return Ok(rva as usize);
        }

        for section in &self.sections {
            let (start, raw_size, raw_pointer) = (
                section.virtual_address,
                section.size_of_raw_data,
                section.pointer_to_raw_data,
            );
            let mapped_end = u64::from(start) + u64::from(section.mapped_size());
            if rva < start || u64::from(rva) >= mapped_end {
                continue;
            }
            if end > u64::from(start) + u64::from(raw_size) {
                break;
            }
            return Ok(raw_pointer as usize + (rva - start) as usize);
        }

        Err(MemoryError::PeParse(format!(
            "{}: RVA 0x{:X}+0x{:X} has no file data",
            self.name, rva, length
        )))
    }
}

impl ImageSource for FileImage {
    fn read_at(&self, rva: u32, buffer: &mut [u8]) -> MemoryResult<()> {
        check_range(self, rva, buffer.len())?;
        let start = self.rva_to_offset(rva, buffer.len())?;
        let bytes = start
            .checked_add(buffer.len())
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| {
                MemoryError::PeParse(format!(
                    "{}: offset 0x{:X} beyond end of file",
                    self.name, start
                ))
            })?;
        buffer.copy_from_slice(bytes);
        Ok(())
    }

    fn image_size(&self) -> u32 {
        self.image_size
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
