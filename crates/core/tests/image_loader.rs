#![cfg(feature = "capstone-backend")]

mod common;

use binlift_core::image::{Arch, BinaryImage, ImageError, ImageFormat, MemoryImage, Relocation};

#[test]
fn relocatable_elf_is_laid_out_and_relocated() {
    let image = MemoryImage::parse(&common::elf_fixture()).expect("parse elf");

    assert_eq!(image.format(), ImageFormat::Elf);
    assert_eq!(image.arch(), Arch::X86_64);
    assert_eq!(image.entry_point(), Some(0x1000));

    let sections: Vec<(&str, u64)> =
        image.sections().iter().map(|s| (s.name.as_str(), s.address)).collect();
    assert_eq!(sections, vec![(".text", 0x1000), (".data", 0x1010), (".bss", 0x1018)]);
    assert!(image.is_code(0x1000));
    assert!(!image.is_code(0x1010));

    assert_eq!(image.relocations(), &[Relocation { site: 0x1002, target: 0x1010, size: 8, addend: 0 }]);
    assert_eq!(image.read_pointer(0x1002).unwrap(), 0x1010);
    assert!(image.imports().is_empty());
}

#[test]
fn zero_filled_sections_read_as_zero() {
    let image = MemoryImage::parse(&common::elf_fixture()).unwrap();
    assert_eq!(image.read(0x1018, 16).unwrap(), vec![0; 16]);
    assert_eq!(image.read(0x1010, 4).unwrap(), b"data".to_vec());
    assert!(matches!(image.read(0x1018, 17), Err(ImageError::OutOfRange { .. })));
}

#[test]
fn open_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.o");
    std::fs::write(&path, common::elf_fixture()).unwrap();

    let image = MemoryImage::open(&path).unwrap();
    assert_eq!(image.sections().len(), 3);

    let missing = MemoryImage::open(&dir.path().join("missing.o")).unwrap_err();
    assert!(matches!(missing, ImageError::Io { .. }));
}

#[test]
fn garbage_is_rejected() {
    let err = MemoryImage::parse(&[0u8; 64]).unwrap_err();
    assert!(matches!(err, ImageError::Parse(_) | ImageError::UnsupportedFormat(_)), "unexpected: {err}");
}

#[test]
fn arch_override_replaces_the_header_value() {
    let image = MemoryImage::parse(&common::elf_fixture()).unwrap().with_arch(Arch::X86);
    assert_eq!(image.arch(), Arch::X86);
    assert_eq!(image.arch().pointer_size(), 4);
}

#[test]
fn arch_names_parse() {
    assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::X86_64);
    assert_eq!("i686".parse::<Arch>().unwrap(), Arch::X86);
    assert!(matches!("arm64".parse::<Arch>(), Err(ImageError::UnsupportedArch(_))));
}

#[test]
fn dynamic_elf_imports_follow_symbol_definedness() {
    let fixture = common::dynamic_elf_fixture();
    let image = MemoryImage::parse(&fixture.bytes).expect("parse dynamic elf");

    assert_eq!(image.format(), ImageFormat::Elf);
    assert_eq!(image.entry_point(), Some(fixture.text));
    assert!(image.is_code(fixture.text + 0x10));

    // `strcmp` is undefined even though its symbol value is the stub address.
    let imports: Vec<(u64, &str)> =
        image.imports().iter().map(|(slot, import)| (*slot, import.name.as_str())).collect();
    assert_eq!(imports, vec![(fixture.got, "strcmp"), (fixture.got + 8, "__gmon_start__")]);
    assert!(image.imports().values().all(|import| import.library.is_none()));

    assert_eq!(
        image.relocations(),
        &[Relocation { site: fixture.got + 16, target: fixture.text, size: 8, addend: 0 }]
    );
}

#[test]
fn pe_imports_are_keyed_by_their_address_table_slot() {
    let fixture = common::pe_fixture();
    let image = MemoryImage::parse(&fixture.bytes).expect("parse pe");

    assert_eq!(image.format(), ImageFormat::Pe);
    assert_eq!(image.arch(), Arch::X86_64);
    assert_eq!(image.entry_point(), Some(fixture.text));

    let import = image.imports().get(&fixture.iat).expect("import at IAT slot");
    assert_eq!(import.name, "ExitProcess");
    assert_eq!(import.library.as_deref(), Some("KERNEL32.dll"));
    assert_eq!(image.imports().len(), 1);
}

#[test]
fn pe_base_relocations_point_at_their_targets() {
    let fixture = common::pe_fixture();
    let image = MemoryImage::parse(&fixture.bytes).unwrap();

    assert_eq!(
        image.relocations(),
        &[Relocation { site: fixture.data, target: fixture.text, size: 8, addend: 0 }]
    );
    assert_eq!(image.read_pointer(fixture.data).unwrap(), fixture.text);
    assert!(fixture.text > fixture.image_base);
}
