//! ELF and PE loading with goblin.
//!
//! Only allocated sections are kept. Relocatable ELF objects are laid out from
//! `0x1000` upward and their x86-64 relocations applied, which is enough to lift
//! compiler output directly.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use goblin::elf::{self, Elf};
use goblin::pe::{self, PE};
use goblin::Object;
use log::debug;

use crate::image::{Arch, ImageError, ImageFormat, Import, MemoryImage, Relocation, Section};

const RELOCATABLE_BASE: u64 = 0x1000;

/// PE base relocation types we understand.
const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
const IMAGE_REL_BASED_DIR64: u16 = 10;

impl MemoryImage {
    /// Read and parse an executable from disk.
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let bytes =
            fs::read(path).map_err(|source| ImageError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&bytes)
    }

    /// Parse an ELF or PE image held in memory.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        match Object::parse(bytes).map_err(|e| ImageError::Parse(e.to_string()))? {
            Object::Elf(elf) => load_elf(&elf, bytes),
            Object::PE(pe) => load_pe(&pe, bytes),
            Object::Mach(_) => Err(ImageError::UnsupportedFormat("mach-o".into())),
            _ => Err(ImageError::UnsupportedFormat("unrecognised object".into())),
        }
    }
}

fn le_value(bytes: &[u8], offset: usize, size: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset.checked_add(size)?)?;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(slice);
    Some(u64::from_le_bytes(buf))
}

fn file_slice(bytes: &[u8], offset: u64, size: u64) -> Result<Vec<u8>, ImageError> {
    let start = offset as usize;
    let end = start.saturating_add(size as usize);
    bytes.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
        ImageError::Parse(format!("section data {offset:#x}+{size:#x} runs past end of file"))
    })
}

fn section_value(sections: &[Section], address: u64, size: usize) -> Option<u64> {
    let section = sections.iter().find(|s| s.contains(address))?;
    let data = section.data.as_ref()?;
    le_value(data, (address - section.address) as usize, size)
}

fn patch_section(sections: &mut [Section], address: u64, value: u64, size: usize) {
    let Some(section) = sections.iter_mut().find(|s| s.contains(address)) else { return };
    let Some(data) = section.data.as_mut() else { return };
    let start = (address - section.address) as usize;
    if let Some(dst) = data.get_mut(start..start + size) {
        dst.copy_from_slice(&value.to_le_bytes()[..size]);
    }
}

fn elf_arch(elf: &Elf) -> Result<Arch, ImageError> {
    match elf.header.e_machine {
        elf::header::EM_X86_64 => Ok(Arch::X86_64),
        elf::header::EM_386 => Ok(Arch::X86),
        other => Err(ImageError::UnsupportedArch(format!("ELF machine {other}"))),
    }
}

fn load_elf(elf: &Elf, bytes: &[u8]) -> Result<MemoryImage, ImageError> {
    use elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS};

    let arch = elf_arch(elf)?;
    let relocatable = elf.header.e_type == elf::header::ET_REL;

    let mut sections = Vec::new();
    // Section header index -> load address.
    let mut bases: BTreeMap<usize, u64> = BTreeMap::new();
    let mut next_free = RELOCATABLE_BASE;
    for (idx, sh) in elf.section_headers.iter().enumerate() {
        if (sh.sh_flags & SHF_ALLOC as u64) == 0 || sh.sh_size == 0 {
            continue;
        }
        let address = if relocatable {
            let align = sh.sh_addralign.max(1);
            let address = next_free.div_ceil(align) * align;
            next_free = address + sh.sh_size;
            address
        } else {
            sh.sh_addr
        };
        let data = if sh.sh_type == SHT_NOBITS {
            None
        } else {
            Some(file_slice(bytes, sh.sh_offset, sh.sh_size)?)
        };
        bases.insert(idx, address);
        sections.push(Section {
            name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
            address,
            size: sh.sh_size,
            executable: (sh.sh_flags & SHF_EXECINSTR as u64) != 0,
            writable: (sh.sh_flags & SHF_WRITE as u64) != 0,
            data,
        });
    }

    let mut imports = BTreeMap::new();
    let mut relocations = Vec::new();
    if relocatable {
        apply_object_relocations(elf, arch, &bases, &mut sections, &mut relocations);
    } else {
        collect_dynamic_relocations(elf, arch, &sections, &mut imports, &mut relocations);
    }
    relocations.sort_by_key(|r: &Relocation| r.site);

    let entry = if relocatable {
        elf.syms.iter().find_map(|sym| {
            let name = elf.strtab.get_at(sym.st_name)?;
            let base = bases.get(&sym.st_shndx)?;
            matches!(name, "_start" | "main").then(|| base + sym.st_value)
        })
    } else {
        Some(elf.entry).filter(|e| *e != 0)
    };

    debug!(
        "loaded ELF {arch}: {} sections, {} imports, {} relocations",
        sections.len(),
        imports.len(),
        relocations.len()
    );
    Ok(MemoryImage { arch, format: ImageFormat::Elf, entry, sections, imports, relocations })
}

fn collect_dynamic_relocations(
    elf: &Elf,
    arch: Arch,
    sections: &[Section],
    imports: &mut BTreeMap<u64, Import>,
    relocations: &mut Vec<Relocation>,
) {
    use elf::reloc::*;

    let (jump_slot, glob_dat, relative, absolute) = match arch {
        Arch::X86_64 => (R_X86_64_JUMP_SLOT, R_X86_64_GLOB_DAT, R_X86_64_RELATIVE, R_X86_64_64),
        Arch::X86 => (R_386_JMP_SLOT, R_386_GLOB_DAT, R_386_RELATIVE, R_386_32),
    };
    let size = arch.pointer_size();

    for reloc in elf.dynrelas.iter().chain(elf.dynrels.iter()).chain(elf.pltrelocs.iter()) {
        let site = reloc.r_offset;
        let sym = elf.dynsyms.get(reloc.r_sym);
        let name = sym.as_ref().and_then(|s| elf.dynstrtab.get_at(s.st_name)).unwrap_or("");
        let value = sym.as_ref().map(|s| s.st_value).unwrap_or(0);
        // Undefined symbols may still carry a PLT address as their value.
        let undefined = sym
            .as_ref()
            .map_or(true, |s| s.st_shndx == elf::section_header::SHN_UNDEF as usize);

        if reloc.r_type == relative {
            let (target, addend) = match reloc.r_addend {
                Some(addend) => (0, addend),
                None => match section_value(sections, site, size) {
                    Some(implicit) => (implicit, 0),
                    None => continue,
                },
            };
            relocations.push(Relocation { site, target, size: size as u8, addend });
        } else if reloc.r_type == jump_slot || reloc.r_type == glob_dat || reloc.r_type == absolute
        {
            if undefined {
                if !name.is_empty() {
                    imports.insert(site, Import { name: name.to_string(), library: None });
                }
            } else {
                let addend = reloc.r_addend.unwrap_or(0);
                relocations.push(Relocation { site, target: value, size: size as u8, addend });
            }
        }
    }
}

fn apply_object_relocations(
    elf: &Elf,
    arch: Arch,
    bases: &BTreeMap<usize, u64>,
    sections: &mut [Section],
    relocations: &mut Vec<Relocation>,
) {
    use elf::reloc::{
        R_X86_64_32, R_X86_64_32S, R_X86_64_64, R_X86_64_PC32, R_X86_64_PLT32,
    };

    if arch != Arch::X86_64 {
        debug!("skipping relocations of a 32-bit relocatable object");
        return;
    }

    for (reloc_shndx, relocs) in &elf.shdr_relocs {
        let Some(reloc_sh) = elf.section_headers.get(*reloc_shndx) else { continue };
        let Some(base) = bases.get(&(reloc_sh.sh_info as usize)) else { continue };
        for reloc in relocs.iter() {
            let site = base + reloc.r_offset;
            let Some(sym) = elf.syms.get(reloc.r_sym) else { continue };
            let Some(sym_base) = bases.get(&sym.st_shndx) else {
                debug!("relocation at {site:#x} references an undefined symbol");
                continue;
            };
            let target = sym_base + sym.st_value;
            let addend = reloc.r_addend.unwrap_or(0);
            let value = target.wrapping_add(addend as u64);
            match reloc.r_type {
                R_X86_64_64 => {
                    patch_section(sections, site, value, 8);
                    relocations.push(Relocation { site, target, size: 8, addend });
                }
                R_X86_64_32 | R_X86_64_32S => {
                    patch_section(sections, site, value, 4);
                    relocations.push(Relocation { site, target, size: 4, addend });
                }
                R_X86_64_PC32 | R_X86_64_PLT32 => {
                    patch_section(sections, site, value.wrapping_sub(site), 4);
                }
                other => debug!("ignoring relocation type {other} at {site:#x}"),
            }
        }
    }
}

fn load_pe(pe: &PE, bytes: &[u8]) -> Result<MemoryImage, ImageError> {
    use pe::section_table::{
        IMAGE_SCN_CNT_UNINITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_WRITE,
    };

    let arch = match pe.header.coff_header.machine {
        pe::header::COFF_MACHINE_X86_64 => Arch::X86_64,
        pe::header::COFF_MACHINE_X86 => Arch::X86,
        other => return Err(ImageError::UnsupportedArch(format!("PE machine {other:#x}"))),
    };
    let image_base = pe.image_base as u64;

    let mut sections = Vec::new();
    for sec in &pe.sections {
        let size = if sec.virtual_size == 0 { sec.size_of_raw_data } else { sec.virtual_size };
        if size == 0 {
            continue;
        }
        let uninitialized = (sec.characteristics & IMAGE_SCN_CNT_UNINITIALIZED_DATA) != 0;
        let data = if uninitialized || sec.size_of_raw_data == 0 {
            None
        } else {
            let raw = sec.size_of_raw_data.min(size) as u64;
            Some(file_slice(bytes, sec.pointer_to_raw_data as u64, raw)?)
        };
        sections.push(Section {
            name: sec.name().unwrap_or("").to_string(),
            address: image_base + sec.virtual_address as u64,
            size: size as u64,
            executable: (sec.characteristics & IMAGE_SCN_MEM_EXECUTE) != 0,
            writable: (sec.characteristics & IMAGE_SCN_MEM_WRITE) != 0,
            data,
        });
    }
    sections.sort_by_key(|s| s.address);

    // `offset` is the IAT slot; `rva` points at the hint/name entry.
    let imports = pe
        .imports
        .iter()
        .map(|import| {
            (
                image_base + import.offset as u64,
                Import { name: import.name.to_string(), library: Some(import.dll.to_string()) },
            )
        })
        .collect();

    let relocations = pe_base_relocations(pe, bytes, image_base, &sections);
    let entry = Some(pe.entry as u64).filter(|e| *e != 0).map(|e| image_base + e);

    debug!(
        "loaded PE {arch}: {} sections, {} imports, {} relocations",
        sections.len(),
        pe.imports.len(),
        relocations.len()
    );
    Ok(MemoryImage { arch, format: ImageFormat::Pe, entry, sections, imports, relocations })
}

fn pe_rva_to_offset(pe: &PE, rva: u32) -> Option<usize> {
    pe.sections.iter().find_map(|sec| {
        let span = sec.virtual_size.max(sec.size_of_raw_data);
        (rva >= sec.virtual_address && rva < sec.virtual_address + span)
            .then(|| (sec.pointer_to_raw_data + (rva - sec.virtual_address)) as usize)
    })
}

fn pe_base_relocations(
    pe: &PE,
    bytes: &[u8],
    image_base: u64,
    sections: &[Section],
) -> Vec<Relocation> {
    let mut relocations = Vec::new();
    let Some(optional) = pe.header.optional_header.as_ref() else { return relocations };
    let Some(dir) = optional.data_directories.get_base_relocation_table() else {
        return relocations;
    };
    let Some(start) = pe_rva_to_offset(pe, dir.virtual_address) else { return relocations };
    let end = start + dir.size as usize;

    let mut pos = start;
    while pos + 8 <= end {
        let (Some(page), Some(block_size)) = (le_value(bytes, pos, 4), le_value(bytes, pos + 4, 4))
        else {
            break;
        };
        if block_size < 8 {
            break;
        }
        let entries = (block_size as usize - 8) / 2;
        for idx in 0..entries {
            let Some(entry) = le_value(bytes, pos + 8 + idx * 2, 2) else { break };
            let entry = entry as u16;
            let size = match entry >> 12 {
                IMAGE_REL_BASED_HIGHLOW => 4,
                IMAGE_REL_BASED_DIR64 => 8,
                _ => continue,
            };
            let site = image_base + page + u64::from(entry & 0x0fff);
            if let Some(target) = section_value(sections, site, size) {
                relocations.push(Relocation { site, target, size: size as u8, addend: 0 });
            }
        }
        pos += block_size as usize;
    }
    relocations
}
