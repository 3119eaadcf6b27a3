//! Binary image access: sections, imports, relocations and byte reads.
//!
//! `BinaryImage` is the seam the explorer, lifter and resolver read through.
//! `MemoryImage` is the concrete implementation; it is either built directly
//! (tests, raw blobs) or parsed from an ELF/PE file with goblin.

#[cfg(feature = "capstone-backend")]
pub mod loader;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::CallingConvention;

pub use memory::{MemoryImage, MemoryImageBuilder};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("address range {address:#x}+{length:#x} is not mapped")]
    OutOfRange { address: u64, length: usize },

    #[error("failed to read binary at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse binary: {0}")]
    Parse(String),

    #[error("unsupported binary format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86,
    X86_64,
}

impl Arch {
    pub fn pointer_size(&self) -> usize {
        match self {
            Arch::X86 => 4,
            Arch::X86_64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Ok(Arch::X86_64),
            "x86" | "i386" | "i686" => Ok(Arch::X86),
            other => Err(ImageError::UnsupportedArch(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Elf,
    Pe,
    Raw,
}

/// A loaded (allocated) section of the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub executable: bool,
    pub writable: bool,
    /// File-backed contents; `None` for zero-filled sections such as `.bss`.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }
}

/// An imported symbol, keyed in `BinaryImage::imports` by its slot address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
}

/// Absolute relocation: the pointer-sized value stored at `site` is `target + addend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub site: u64,
    pub target: u64,
    pub size: u8,
    pub addend: i64,
}

impl Relocation {
    pub fn expected_value(&self) -> u64 {
        self.target.wrapping_add(self.addend as u64)
    }
}

pub trait BinaryImage {
    /// Read `length` bytes at `address`. Reads never span sections.
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, ImageError>;

    fn sections(&self) -> &[Section];

    fn imports(&self) -> &BTreeMap<u64, Import>;

    fn relocations(&self) -> &[Relocation];

    fn entry_point(&self) -> Option<u64>;

    fn arch(&self) -> Arch;

    fn format(&self) -> ImageFormat;

    fn section_containing(&self, address: u64) -> Option<&Section> {
        self.sections().iter().find(|s| s.contains(address))
    }

    fn is_code(&self, address: u64) -> bool {
        self.section_containing(address).is_some_and(|s| s.executable)
    }

    fn read_pointer(&self, address: u64) -> Result<u64, ImageError> {
        let size = self.arch().pointer_size();
        let bytes = self.read(address, size)?;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn calling_convention(&self) -> CallingConvention {
        match (self.arch(), self.format()) {
            (Arch::X86, _) => CallingConvention::Cdecl,
            (Arch::X86_64, ImageFormat::Pe) => CallingConvention::Ms64,
            (Arch::X86_64, _) => CallingConvention::SysV64,
        }
    }
}
