//! Value, string and byte-pattern search over a target's readable memory

use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use crate::memory::regions::{MemoryRegion, RegionEnumerator};
use crate::memory::MemoryAccess;
use bytemuck::Pod;
use tracing::{debug, trace};

/// Bytes read per request while walking a region
const SCAN_CHUNK: usize = 0x10_0000;

/// What to look for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPattern {
    /// Exact byte sequence
    Exact(Vec<u8>),
    /// Byte sequence with wildcards (None = any byte)
    Masked(Vec<Option<u8>>),
    /// Narrow text, matched without its terminator
    String(String),
    /// UTF-16LE text, matched without its terminator
    WideString(String),
}

impl ScanPattern {
    /// Parses IDA-style patterns such as `"48 8B ?? ?? 89"`
    pub fn from_hex_string(pattern: &str) -> MemoryResult<Self> {
        let mut bytes = Vec::new();
        for part in pattern.split_whitespace() {
            if part == "??" || part == "?" {
                bytes.push(None);
                continue;
            }
            if part.len() != 2 {
                return Err(MemoryError::InvalidPattern(format!(
                    "Invalid hex byte '{}': must be 2 digits",
                    part
                )));
            }
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| MemoryError::InvalidPattern(format!("Invalid hex: {}", part)))?;
            bytes.push(Some(byte));
        }

        if bytes.is_empty() {
            return Err(MemoryError::InvalidPattern("Empty pattern".to_string()));
        }
        if bytes.iter().all(Option::is_none) {
            return Err(MemoryError::InvalidPattern(
                "Pattern has no fixed bytes".to_string(),
            ));
        }
        Ok(ScanPattern::Masked(bytes))
    }

    /// The in-memory representation of a plain value
    pub fn value<T: Pod>(value: &T) -> Self {
        ScanPattern::Exact(bytemuck::bytes_of(value).to_vec())
    }

    /// A pointer as stored by a target of the given width
    pub fn pointer(address: Address, architecture: ProcessArchitecture) -> MemoryResult<Self> {
        if architecture.is_64bit() {
            return Ok(Self::value(&address.as_u64()));
        }
        let narrow = u32::try_from(address.as_u64()).map_err(|_| {
            MemoryError::InvalidPattern(format!("{} does not fit a 32-bit pointer", address))
        })?;
        Ok(Self::value(&narrow))
    }

    pub fn len(&self) -> usize {
        match self {
            ScanPattern::Exact(bytes) => bytes.len(),
            ScanPattern::Masked(bytes) => bytes.len(),
            ScanPattern::String(text) => text.len(),
            ScanPattern::WideString(text) => text.encode_utf16().count() * 2,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_match_pattern(&self) -> (Vec<u8>, Vec<bool>) {
        match self {
            ScanPattern::Exact(bytes) => (bytes.clone(), vec![true; bytes.len()]),
            ScanPattern::Masked(pattern) => pattern
                .iter()
                .map(|byte| (byte.unwrap_or(0), byte.is_some()))
                .unzip(),
            ScanPattern::String(text) => (text.as_bytes().to_vec(), vec![true; text.len()]),
            ScanPattern::WideString(text) => {
                let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
                let mask = vec![true; bytes.len()];
                (bytes, mask)
            }
        }
    }
}

/// Options for memory scanning
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// First address a match may start at
    pub start_address: Option<Address>,
    /// Matches start strictly below this address
    pub end_address: Option<Address>,
    /// Scan only executable regions
    pub executable_only: bool,
    /// Scan only writable regions
    pub writable_only: bool,
    /// Match addresses must be a multiple of this (1, 2, 4, 8)
    pub alignment: usize,
    /// Cap for `find_all`
    pub max_results: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            start_address: None,
            end_address: None,
            executable_only: false,
            writable_only: false,
            alignment: 1,
            max_results: None,
        }
    }
}

/// Searches committed readable regions in address order.
///
/// Unreadable stretches are skipped. A match never spans two regions.
pub struct MemoryScanner<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    options: ScanOptions,
}

impl<'a, M: MemoryAccess + ?Sized> MemoryScanner<'a, M> {
    /// Scanner over the whole address space
    pub fn new(memory: &'a M) -> Self {
        Self::with_options(memory, ScanOptions::default())
    }

    /// Scanner whose matches start in `start..end`
    pub fn with_range(memory: &'a M, start: Address, end: Address) -> Self {
        Self::with_options(
            memory,
            ScanOptions {
                start_address: Some(start),
                end_address: Some(end),
                ..ScanOptions::default()
            },
        )
    }

    pub fn with_options(memory: &'a M, options: ScanOptions) -> Self {
        MemoryScanner { memory, options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Lowest matching address
    pub fn find(&self, pattern: &ScanPattern) -> MemoryResult<Option<Address>> {
        Ok(self.scan(pattern, 1)?.into_iter().next())
    }

    /// Every matching address, ascending
    pub fn find_all(&self, pattern: &ScanPattern) -> MemoryResult<Vec<Address>> {
        self.scan(pattern, self.options.max_results.unwrap_or(usize::MAX))
    }

    pub fn find_value<T: Pod>(&self, value: T) -> MemoryResult<Option<Address>> {
        self.find(&ScanPattern::value(&value))
    }

    pub fn find_all_values<T: Pod>(&self, value: T) -> MemoryResult<Vec<Address>> {
        self.find_all(&ScanPattern::value(&value))
    }

    /// Finds a stored pointer to `target`, sized for the target's bitness
    pub fn find_pointer(&self, target: Address) -> MemoryResult<Option<Address>> {
        self.find(&ScanPattern::pointer(target, self.memory.architecture())?)
    }

    pub fn find_all_pointers(&self, target: Address) -> MemoryResult<Vec<Address>> {
        self.find_all(&ScanPattern::pointer(target, self.memory.architecture())?)
    }

    pub fn find_string(&self, text: &str) -> MemoryResult<Option<Address>> {
        self.find(&ScanPattern::String(text.to_string()))
    }

    pub fn find_wide_string(&self, text: &str) -> MemoryResult<Option<Address>> {
        self.find(&ScanPattern::WideString(text.to_string()))
    }

    fn scan(&self, pattern: &ScanPattern, limit: usize) -> MemoryResult<Vec<Address>> {
        if pattern.is_empty() {
            return Err(MemoryError::InvalidPattern("Empty pattern".to_string()));
        }
        let (bytes, mask) = pattern.to_match_pattern();
        let start = self.options.start_address.unwrap_or_else(Address::null);
        let end = self.options.end_address.unwrap_or(Address::new(usize::MAX));

        let mut results = Vec::new();
        if start >= end || limit == 0 {
            return Ok(results);
        }

        for region in RegionEnumerator::starting_at(self.memory, start) {
            let region = region?;
            if region.base_address >= end {
                break;
            }
            if !self.wants(&region) {
                continue;
            }
            if self.scan_region(&region, start, end, &bytes, &mask, limit, &mut results) {
                break;
            }
        }

        debug!(
            "Scan of {}..{} for {} bytes found {} matches",
            start,
            end,
            bytes.len(),
            results.len()
        );
        Ok(results)
    }

    fn wants(&self, region: &MemoryRegion) -> bool {
        region.is_readable()
            && (!self.options.executable_only || region.is_executable())
            && (!self.options.writable_only || region.is_writable())
    }

    /// Returns true once `limit` matches have been collected
    #[allow(clippy::too_many_arguments)]
    fn scan_region(
        &self,
        region: &MemoryRegion,
        start: Address,
        end: Address,
        pattern: &[u8],
        mask: &[bool],
        limit: usize,
        results: &mut Vec<Address>,
    ) -> bool {
        let alignment = self.options.alignment.max(1);
        let region_end = region.end_address().as_usize();
        let last_start = region_end.min(end.as_usize());
        let mut cursor = region.base_address.max(start).as_usize();

        while cursor < last_start {
            let chunk_end = cursor.saturating_add(SCAN_CHUNK).min(last_start);
            let read_end = chunk_end
                .saturating_add(pattern.len() - 1)
                .min(region_end);
            let mut buffer = vec![0u8; read_end - cursor];
            let read = match self.memory.read_partial(Address::new(cursor), &mut buffer) {
                Ok(read) => read,
                Err(e) => {
                    trace!("Skipping unreadable memory at 0x{:X}: {}", cursor, e);
                    return false;
                }
            };

            let candidates = (chunk_end - cursor).min((read + 1).saturating_sub(pattern.len()));
            for offset in 0..candidates {
                let address = cursor + offset;
                if address % alignment != 0 {
                    continue;
                }
                if matches_pattern(&buffer[offset..read], pattern, mask) {
                    results.push(Address::new(address));
                    if results.len() >= limit {
                        return true;
                    }
                }
            }

            if read < buffer.len() {
                trace!("Short read at 0x{:X}; skipping rest of region", cursor);
                return false;
            }
            cursor = chunk_end;
        }
        false
    }
}

fn matches_pattern(data: &[u8], pattern: &[u8], mask: &[bool]) -> bool {
    data.len() >= pattern.len()
        && pattern
            .iter()
            .zip(mask)
            .zip(data)
            .all(|((expected, fixed), actual)| !fixed || expected == actual)
}
