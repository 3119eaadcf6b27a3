#![allow(dead_code)]

use std::path::{Path, PathBuf};

use object::write::{Object, Relocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

/// Relocatable x86-64 ELF: `main` is `movabs rax, <.data>; ret`.
pub fn elf_bytes() -> Vec<u8> {
    elf_bytes_with_addend(0)
}

/// Same object, with `addend` added to the `.data` reference.
pub fn elf_bytes_with_addend(addend: i64) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    let mut code = vec![0x48, 0xb8];
    code.extend_from_slice(&0u64.to_le_bytes());
    code.push(0xc3);
    obj.append_section_data(text, &code, 16);

    let data = obj.add_section(Vec::new(), b".data".to_vec(), SectionKind::Data);
    obj.append_section_data(data, b"datadata", 8);

    obj.add_symbol(Symbol {
        name: b"main".to_vec(),
        value: 0,
        size: code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });
    let data_symbol = obj.section_symbol(data);
    obj.add_relocation(
        text,
        Relocation {
            offset: 2,
            symbol: data_symbol,
            addend,
            flags: RelocationFlags::Generic {
                kind: RelocationKind::Absolute,
                encoding: RelocationEncoding::Generic,
                size: 64,
            },
        },
    )
    .unwrap();
    obj.write().unwrap()
}

/// Write the fixture ELF into `dir` and return its path.
pub fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("sample.o");
    std::fs::write(&path, elf_bytes()).unwrap();
    path
}
