#![allow(dead_code)]

use std::collections::HashMap;

use binlift_core::image::{Arch, BinaryImage, MemoryImage};
use binlift_core::ir::{BinOp, Body, Operand};
use binlift_core::lifter::{BlockKind, BodyBuilder, LiftError, LiftedBlock, Lifter};

/// Lifter replaying hand-written units keyed by address.
#[derive(Debug, Default)]
pub struct ScriptedLifter {
    units: HashMap<u64, LiftedBlock>,
    pub active: bool,
    pub closed: usize,
    pub lifted: Vec<u64>,
}

impl ScriptedLifter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(mut self, address: u64, size: u64, kind: BlockKind, body: Body) -> Self {
        self.units.insert(address, LiftedBlock { address, size, kind, body });
        self
    }
}

impl Lifter for ScriptedLifter {
    fn init(&mut self) -> Result<(), LiftError> {
        if self.active {
            return Err(LiftError::Busy);
        }
        self.active = true;
        Ok(())
    }

    fn lift(&mut self, _image: &dyn BinaryImage, address: u64) -> Result<LiftedBlock, LiftError> {
        if !self.active {
            return Err(LiftError::NotInitialised);
        }
        self.lifted.push(address);
        self.units.get(&address).cloned().ok_or(LiftError::InvalidInstruction(address))
    }

    fn close(&mut self) {
        self.active = false;
        self.closed += 1;
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn nops(b: &mut BodyBuilder, pcs: &[u64]) {
    for pc in pcs {
        b.begin(*pc);
        b.effect("nop", vec![]);
    }
}

/// Straight-line instructions at `pcs`, then on to `next`.
pub fn straight(pcs: &[u64], next: u64) -> Body {
    let mut b = BodyBuilder::new();
    nops(&mut b, pcs);
    b.finish_at(next)
}

/// Instructions at `pcs`; the last one is `call target` returning to `ret`.
pub fn call(pcs: &[u64], target: u64, ret: u64) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let rsp = b.read_reg("rsp");
    let sp = b.binary(BinOp::Sub, rsp, Operand::Const { value: 8 });
    b.store(sp.clone(), Operand::Pc { value: ret }, 8);
    b.write_reg("rsp", sp);
    b.finish_at(target)
}

/// `call reg` at the last of `pcs`.
pub fn call_indirect(pcs: &[u64]) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let target = b.read_reg("rax");
    b.finish(target)
}

/// `call [slot]` at the last of `pcs`.
pub fn call_through(pcs: &[u64], slot: u64) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let target = b.load(Operand::Const { value: slot }, 8);
    b.finish(target)
}

/// Instructions at `pcs`; the last one is `ret`.
pub fn ret(pcs: &[u64]) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let rsp = b.read_reg("rsp");
    let target = b.load(rsp.clone(), 8);
    let sp = b.binary(BinOp::Add, rsp, Operand::Const { value: 8 });
    b.write_reg("rsp", sp);
    b.finish(target)
}

/// Conditional jump at the last of `pcs`.
pub fn cond(pcs: &[u64], taken: u64, not_taken: u64) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let flag = b.helper("cond_z", vec![]);
    let next = b.select(flag, Operand::Pc { value: taken }, Operand::Pc { value: not_taken });
    b.finish(next)
}

/// `jmp [slot]`: the shape of an import trampoline.
pub fn jump_through(pc: u64, slot: u64) -> Body {
    let mut b = BodyBuilder::new();
    b.begin(pc);
    let target = b.load(Operand::Const { value: slot }, 8);
    b.finish(target)
}

/// `jmp [table + index*8]`.
pub fn jump_table(pcs: &[u64], table: u64) -> Body {
    let (last, head) = pcs.split_last().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    nops(&mut b, head);
    b.begin(*last);
    let index = b.read_reg("rax");
    let scaled = b.binary(BinOp::Mul, index, Operand::Const { value: 8 });
    let addr = b.binary(BinOp::Add, Operand::Const { value: table }, scaled);
    let target = b.load(addr, 8);
    b.finish(target)
}

/// Instructions at `pcs` that load from the absolute address `data` first.
pub fn load_abs(pcs: &[u64], data: u64, next: u64) -> Body {
    let (first, rest) = pcs.split_first().expect("at least one instruction");
    let mut b = BodyBuilder::new();
    b.begin(*first);
    let value = b.load(Operand::Const { value: data }, 8);
    b.write_reg("rax", value);
    nops(&mut b, rest);
    b.finish_at(next)
}

/// Instructions at `pcs` ending in `hlt`.
pub fn halt(pcs: &[u64], next: u64) -> Body {
    let mut b = BodyBuilder::new();
    nops(&mut b, pcs);
    b.halt();
    b.finish_at(next)
}

/// x86-64 image with 0x200 bytes of code at 0x1000 and the entry at 0x1000.
pub fn code_image() -> MemoryImage {
    MemoryImage::builder(Arch::X86_64).code(0x1000, vec![0x90; 0x200]).entry(0x1000).build()
}

/// Relocatable x86-64 ELF whose `main` is `movabs rax, <.data>; ret`, plus a `.bss`.
pub fn elf_fixture() -> Vec<u8> {
    use object::write::{Object, Relocation, Symbol, SymbolSection};
    use object::{
        Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags,
        RelocationKind, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
    };

    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    let mut code = vec![0x48, 0xb8];
    code.extend_from_slice(&0u64.to_le_bytes());
    code.push(0xc3);
    obj.append_section_data(text, &code, 16);

    let data = obj.add_section(Vec::new(), b".data".to_vec(), SectionKind::Data);
    obj.append_section_data(data, b"datadata", 8);
    let bss = obj.add_section(Vec::new(), b".bss".to_vec(), SectionKind::UninitializedData);
    obj.append_section_bss(bss, 16, 8);

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
            addend: 0,
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

/// Addresses inside [`dynamic_elf_fixture`].
#[derive(Debug, Clone)]
pub struct DynamicElf {
    pub bytes: Vec<u8>,
    pub text: u64,
    pub got: u64,
}

/// Non-PIE x86-64 executable linked against `libc.so.6`.
///
/// `.text` holds `call stub; ret` with the stub `jmp [got]` at `text + 0x10`.
/// `strcmp` is undefined but carries the stub address as its value, the way
/// non-PIE linkers emit PLT-backed imports. `__gmon_start__` is undefined
/// with value zero, and `main` is defined so its GLOB_DAT becomes a relocation.
pub fn dynamic_elf_fixture() -> DynamicElf {
    use object::elf;
    use object::write::elf::{FileHeader, ProgramHeader, Rel, SectionHeader, Sym, Writer};
    use object::Endianness;

    const BASE: u64 = 0x40_0000;

    let mut bytes = Vec::new();
    let mut w = Writer::new(Endianness::Little, true, &mut bytes);

    let text_name = w.add_section_name(b".text");
    let got_name = w.add_section_name(b".got");
    let text_index = w.reserve_section_index();
    let _got_index = w.reserve_section_index();
    w.reserve_shstrtab_section_index();

    let libc = w.add_dynamic_string(b"libc.so.6");
    let strcmp = w.add_dynamic_string(b"strcmp");
    let gmon = w.add_dynamic_string(b"__gmon_start__");
    let main = w.add_dynamic_string(b"main");
    let strcmp_sym = w.reserve_dynamic_symbol_index();
    let gmon_sym = w.reserve_dynamic_symbol_index();
    let main_sym = w.reserve_dynamic_symbol_index();

    w.reserve_file_header();
    w.reserve_program_headers(2);
    let text_offset = w.reserve(0x20, 16);
    let dynstr_offset = w.reserve_dynstr();
    let dynsym_offset = w.reserve_dynsym();
    let rela_dyn_offset = w.reserve_relocations(2, true);
    let rela_plt_offset = w.reserve_relocations(1, true);
    let dynamic_offset = w.reserve_dynamic(12);
    let got_offset = w.reserve(24, 8);
    let load_end = w.reserved_len();
    w.reserve_shstrtab();
    w.reserve_section_headers();

    let text = BASE + text_offset as u64;
    let got = BASE + got_offset as u64;
    let stub = text + 0x10;

    let mut code = vec![0x90; 0x20];
    code[..6].copy_from_slice(&[0xe8, 0x0b, 0x00, 0x00, 0x00, 0xc3]);
    let disp = (got - (stub + 6)) as u32;
    code[0x10..0x12].copy_from_slice(&[0xff, 0x25]);
    code[0x12..0x16].copy_from_slice(&disp.to_le_bytes());

    w.write_file_header(&FileHeader {
        os_abi: elf::ELFOSABI_NONE,
        abi_version: 0,
        e_type: elf::ET_EXEC,
        e_machine: elf::EM_X86_64,
        e_entry: text,
        e_flags: 0,
    })
    .unwrap();

    w.write_align_program_headers();
    w.write_program_header(&ProgramHeader {
        p_type: elf::PT_LOAD,
        p_flags: elf::PF_R | elf::PF_W | elf::PF_X,
        p_offset: 0,
        p_vaddr: BASE,
        p_paddr: BASE,
        p_filesz: load_end as u64,
        p_memsz: load_end as u64,
        p_align: 0x1000,
    });
    w.write_program_header(&ProgramHeader {
        p_type: elf::PT_DYNAMIC,
        p_flags: elf::PF_R | elf::PF_W,
        p_offset: dynamic_offset as u64,
        p_vaddr: BASE + dynamic_offset as u64,
        p_paddr: BASE + dynamic_offset as u64,
        p_filesz: 12 * 16,
        p_memsz: 12 * 16,
        p_align: 8,
    });

    w.pad_until(text_offset);
    w.write(&code);
    w.write_dynstr();

    w.write_null_dynamic_symbol();
    let undefined = |name| Sym {
        name: Some(name),
        section: None,
        st_info: 0,
        st_other: 0,
        st_shndx: elf::SHN_UNDEF,
        st_value: 0,
        st_size: 0,
    };
    w.write_dynamic_symbol(&Sym {
        st_info: (elf::STB_GLOBAL << 4) | elf::STT_FUNC,
        st_value: stub,
        ..undefined(strcmp)
    });
    w.write_dynamic_symbol(&Sym { st_info: (elf::STB_WEAK << 4) | elf::STT_NOTYPE, ..undefined(gmon) });
    w.write_dynamic_symbol(&Sym {
        section: Some(text_index),
        st_info: (elf::STB_GLOBAL << 4) | elf::STT_FUNC,
        st_value: text,
        st_size: 6,
        ..undefined(main)
    });

    w.write_align_relocation();
    for (site, sym) in [(got + 8, gmon_sym), (got + 16, main_sym)] {
        w.write_relocation(
            true,
            &Rel { r_offset: site, r_sym: sym.0, r_type: elf::R_X86_64_GLOB_DAT, r_addend: 0 },
        );
    }
    w.write_align_relocation();
    w.write_relocation(
        true,
        &Rel { r_offset: got, r_sym: strcmp_sym.0, r_type: elf::R_X86_64_JUMP_SLOT, r_addend: 0 },
    );

    let dynstr_len = w.dynstr_len() as u64;
    w.write_align_dynamic();
    w.write_dynamic_string(elf::DT_NEEDED, libc);
    w.write_dynamic(elf::DT_STRTAB, BASE + dynstr_offset as u64);
    w.write_dynamic(elf::DT_STRSZ, dynstr_len);
    w.write_dynamic(elf::DT_SYMTAB, BASE + dynsym_offset as u64);
    w.write_dynamic(elf::DT_SYMENT, 24);
    w.write_dynamic(elf::DT_RELA, BASE + rela_dyn_offset as u64);
    w.write_dynamic(elf::DT_RELASZ, 48);
    w.write_dynamic(elf::DT_RELAENT, 24);
    w.write_dynamic(elf::DT_JMPREL, BASE + rela_plt_offset as u64);
    w.write_dynamic(elf::DT_PLTRELSZ, 24);
    w.write_dynamic(elf::DT_PLTREL, u64::from(elf::DT_RELA));
    w.write_dynamic(elf::DT_NULL, 0);

    w.pad_until(got_offset);
    w.write(&[0; 24]);
    w.write_shstrtab();

    w.write_null_section_header();
    w.write_section_header(&SectionHeader {
        name: Some(text_name),
        sh_type: elf::SHT_PROGBITS,
        sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
        sh_addr: text,
        sh_offset: text_offset as u64,
        sh_size: 0x20,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 16,
        sh_entsize: 0,
    });
    w.write_section_header(&SectionHeader {
        name: Some(got_name),
        sh_type: elf::SHT_PROGBITS,
        sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
        sh_addr: got,
        sh_offset: got_offset as u64,
        sh_size: 24,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 8,
        sh_entsize: 8,
    });
    w.write_shstrtab_section_header();

    DynamicElf { bytes, text, got }
}

/// Addresses inside [`pe_fixture`].
#[derive(Debug, Clone)]
pub struct PeImage {
    pub bytes: Vec<u8>,
    pub image_base: u64,
    pub text: u64,
    pub data: u64,
    pub iat: u64,
}

/// 64-bit PE importing `KERNEL32.dll!ExitProcess`, with one DIR64 base
/// relocation on a `.data` pointer to `.text`.
pub fn pe_fixture() -> PeImage {
    use object::pe;
    use object::write::pe::{NtHeaders, Writer};

    const IMAGE_BASE: u64 = 0x1_4000_0000;

    let mut bytes = Vec::new();
    let mut w = Writer::new(true, 0x1000, 0x200, &mut bytes);
    w.reserve_dos_header_and_stub();
    w.reserve_nt_headers(pe::IMAGE_NUMBEROF_DIRECTORY_ENTRIES);
    w.reserve_section_headers(4);

    let text = w.reserve_text_section(0x10);
    let data = w.reserve_data_section(8, 8);
    let idata = w.reserve_idata_section(104);
    w.add_reloc(data.virtual_address, pe::IMAGE_REL_BASED_DIR64);
    w.reserve_reloc_section();

    // Import descriptor, null descriptor, lookup table, address table,
    // hint/name entry and the library name.
    let base = idata.virtual_address;
    let (ilt, iat, hint_name, dll_name) = (base + 40, base + 56, base + 72, base + 88);
    let mut table = vec![0u8; 104];
    table[0..4].copy_from_slice(&ilt.to_le_bytes());
    table[12..16].copy_from_slice(&dll_name.to_le_bytes());
    table[16..20].copy_from_slice(&iat.to_le_bytes());
    table[40..48].copy_from_slice(&u64::from(hint_name).to_le_bytes());
    table[56..64].copy_from_slice(&u64::from(hint_name).to_le_bytes());
    table[74..85].copy_from_slice(b"ExitProcess");
    table[88..100].copy_from_slice(b"KERNEL32.dll");

    let mut code = vec![0xcc; 0x10];
    code[0] = 0xc3;
    let pointer = (IMAGE_BASE + u64::from(text.virtual_address)).to_le_bytes();

    w.write_dos_header_and_stub().unwrap();
    w.write_nt_headers(NtHeaders {
        machine: pe::IMAGE_FILE_MACHINE_AMD64,
        time_date_stamp: 0,
        characteristics: pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE,
        major_linker_version: 14,
        minor_linker_version: 0,
        address_of_entry_point: text.virtual_address,
        image_base: IMAGE_BASE,
        major_operating_system_version: 6,
        minor_operating_system_version: 0,
        major_image_version: 0,
        minor_image_version: 0,
        major_subsystem_version: 6,
        minor_subsystem_version: 0,
        subsystem: pe::IMAGE_SUBSYSTEM_WINDOWS_CUI,
        dll_characteristics: 0,
        size_of_stack_reserve: 0x10_0000,
        size_of_stack_commit: 0x1000,
        size_of_heap_reserve: 0x10_0000,
        size_of_heap_commit: 0x1000,
    });
    w.write_section_headers();
    w.write_section(text.file_offset, &code);
    w.write_section(data.file_offset, &pointer);
    w.write_section(idata.file_offset, &table);
    w.write_reloc_section();

    PeImage {
        bytes,
        image_base: IMAGE_BASE,
        text: IMAGE_BASE + u64::from(text.virtual_address),
        data: IMAGE_BASE + u64::from(data.virtual_address),
        iat: IMAGE_BASE + u64::from(iat),
    }
}
