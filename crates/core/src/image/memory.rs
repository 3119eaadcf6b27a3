use std::collections::BTreeMap;

use crate::image::{Arch, BinaryImage, ImageError, ImageFormat, Import, Relocation, Section};

/// In-memory image: a set of non-overlapping sections plus import and relocation tables.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    pub(crate) arch: Arch,
    pub(crate) format: ImageFormat,
    pub(crate) entry: Option<u64>,
    pub(crate) sections: Vec<Section>,
    pub(crate) imports: BTreeMap<u64, Import>,
    pub(crate) relocations: Vec<Relocation>,
}

impl MemoryImage {
    pub fn builder(arch: Arch) -> MemoryImageBuilder {
        MemoryImageBuilder::new(arch)
    }

    /// Decode the image as `arch` regardless of what its headers say.
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }
}

impl BinaryImage for MemoryImage {
    fn read(&self, address: u64, length: usize) -> Result<Vec<u8>, ImageError> {
        let out_of_range = || ImageError::OutOfRange { address, length };
        let section = self.section_containing(address).ok_or_else(out_of_range)?;
        let offset = address - section.address;
        if offset.saturating_add(length as u64) > section.size {
            return Err(out_of_range());
        }
        match &section.data {
            Some(data) => {
                let start = offset as usize;
                // Sections may be larger in memory than on disk; the tail is zero.
                let mut bytes = data.get(start..).unwrap_or_default().to_vec();
                bytes.truncate(length);
                bytes.resize(length, 0);
                Ok(bytes)
            }
            None => Ok(vec![0; length]),
        }
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn imports(&self) -> &BTreeMap<u64, Import> {
        &self.imports
    }

    fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    fn entry_point(&self) -> Option<u64> {
        self.entry
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn format(&self) -> ImageFormat {
        self.format
    }
}

/// Builder for `MemoryImage`, mostly used to assemble images by hand.
#[derive(Debug, Clone)]
pub struct MemoryImageBuilder {
    image: MemoryImage,
}

impl MemoryImageBuilder {
    pub fn new(arch: Arch) -> Self {
        Self {
            image: MemoryImage {
                arch,
                format: ImageFormat::Raw,
                entry: None,
                sections: Vec::new(),
                imports: BTreeMap::new(),
                relocations: Vec::new(),
            },
        }
    }

    pub fn format(mut self, format: ImageFormat) -> Self {
        self.image.format = format;
        self
    }

    pub fn entry(mut self, address: u64) -> Self {
        self.image.entry = Some(address);
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.image.sections.push(section);
        self
    }

    /// Executable section named `.text` (or `.textN` for subsequent ones).
    pub fn code(self, address: u64, bytes: impl Into<Vec<u8>>) -> Self {
        let name = match self.image.sections.iter().filter(|s| s.executable).count() {
            0 => ".text".to_string(),
            n => format!(".text{n}"),
        };
        let data: Vec<u8> = bytes.into();
        self.section(Section {
            name,
            address,
            size: data.len() as u64,
            executable: true,
            writable: false,
            data: Some(data),
        })
    }

    pub fn data(self, name: &str, address: u64, bytes: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = bytes.into();
        self.section(Section {
            name: name.to_string(),
            address,
            size: data.len() as u64,
            executable: false,
            writable: true,
            data: Some(data),
        })
    }

    pub fn bss(self, name: &str, address: u64, size: u64) -> Self {
        self.section(Section {
            name: name.to_string(),
            address,
            size,
            executable: false,
            writable: true,
            data: None,
        })
    }

    pub fn import(mut self, slot: u64, name: &str, library: Option<&str>) -> Self {
        self.image
            .imports
            .insert(slot, Import { name: name.to_string(), library: library.map(str::to_string) });
        self
    }

    pub fn relocation(mut self, site: u64, target: u64, addend: i64) -> Self {
        let size = self.image.arch.pointer_size() as u8;
        self.image.relocations.push(Relocation { site, target, size, addend });
        self
    }

    pub fn build(mut self) -> MemoryImage {
        self.image.sections.sort_by_key(|s| s.address);
        self.image.relocations.sort_by_key(|r| r.site);
        self.image
    }
}
