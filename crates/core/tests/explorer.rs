mod common;

use std::collections::BTreeSet;

use binlift_core::cfg::explorer::looks_like_string;
use binlift_core::cfg::{explore, AddressExplorer, BlockError, BlockKind, ExploreError, ExploreOptions};
use binlift_core::image::{Arch, MemoryImage};
use binlift_core::ir::{Body, Inst};
use binlift_core::lifter::LiftError;

use common::ScriptedLifter;

fn addresses(exploration: &binlift_core::cfg::Exploration) -> Vec<u64> {
    exploration.blocks.addresses().collect()
}

fn branchy() -> ScriptedLifter {
    ScriptedLifter::new()
        .unit(0x1000, 2, BlockKind::CondJump, common::cond(&[0x1000], 0x1010, 0x1002))
        .unit(0x1002, 0xe, BlockKind::Fallthrough, common::straight(&[0x1002, 0x1008], 0x1010))
        .unit(0x1010, 1, BlockKind::Return, common::ret(&[0x1010]))
}

fn image_with(bytes: &[(usize, &[u8])]) -> MemoryImage {
    let mut code = vec![0x90; 0x200];
    for (offset, data) in bytes {
        code[*offset..*offset + data.len()].copy_from_slice(data);
    }
    MemoryImage::builder(Arch::X86_64).code(0x1000, code).entry(0x1000).build()
}

#[test]
fn straight_line_code_is_one_block() {
    let image = common::code_image();
    let mut lifter = ScriptedLifter::new().unit(
        0x1000,
        0x10,
        BlockKind::Return,
        common::ret(&[0x1000, 0x1004, 0x1008, 0x100c]),
    );
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000]);
    let block = exploration.blocks.get(0x1000).unwrap();
    assert_eq!((block.address, block.end()), (0x1000, 0x1010));
    assert_eq!(exploration.stats.lifted, 1);
    // The stack adjustment constant is not code.
    assert_eq!(exploration.stats.rejected, 1);
}

#[test]
fn successors_are_explored_lowest_first() {
    let image = common::code_image();
    let mut lifter = branchy();
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1002, 0x1010]);
    assert_eq!(exploration.explored, BTreeSet::from([0x1000, 0x1002, 0x1010]));
    assert_eq!(lifter.lifted, vec![0x1000, 0x1002, 0x1010]);
}

#[test]
fn exploration_is_deterministic() {
    let image = common::code_image();
    let run = || {
        let mut lifter = branchy();
        let exploration =
            explore(&mut lifter, &image, &[0x1010, 0x1000], &ExploreOptions::default()).unwrap();
        (addresses(&exploration), exploration.explored, lifter.lifted)
    };
    assert_eq!(run(), run());
}

#[test]
fn decode_faults_drop_the_address() {
    let image = common::code_image();
    let mut lifter = ScriptedLifter::new()
        .unit(0x1000, 2, BlockKind::CondJump, common::cond(&[0x1000], 0x1010, 0x1002))
        .unit(0x1010, 1, BlockKind::Return, common::ret(&[0x1010]));
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1010]);
    assert_eq!(exploration.dropped, BTreeSet::from([0x1002]));
    assert_eq!(exploration.stats.dropped, 1);
    assert!(exploration.explored.contains(&0x1002));
}

#[test]
fn call_targets_are_explored() {
    let image = common::code_image();
    let mut lifter = ScriptedLifter::new()
        .unit(0x1000, 5, BlockKind::Call, common::call(&[0x1000], 0x1100, 0x1005))
        .unit(0x1005, 1, BlockKind::Return, common::ret(&[0x1005]))
        .unit(0x1100, 1, BlockKind::Return, common::ret(&[0x1100]));
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1005, 0x1100]);
}

fn pointer_program() -> ScriptedLifter {
    ScriptedLifter::new()
        .unit(0x1000, 8, BlockKind::Fallthrough, common::load_abs(&[0x1000], 0x1150, 0x1008))
        .unit(0x1008, 1, BlockKind::Return, common::ret(&[0x1008]))
        .unit(0x1150, 1, BlockKind::Return, common::ret(&[0x1150]))
}

#[test]
fn code_constants_become_candidates() {
    let image = common::code_image();
    let mut lifter = pointer_program();
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1008, 0x1150]);
    assert_eq!(exploration.stats.candidates, 1);
}

#[test]
fn constant_extraction_can_be_disabled() {
    let image = common::code_image();
    let mut lifter = pointer_program();
    let options = ExploreOptions { extract_addresses: false, ..ExploreOptions::default() };
    let exploration = explore(&mut lifter, &image, &[0x1000], &options).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1008]);
    assert!(!lifter.lifted.contains(&0x1150));
    assert_eq!(exploration.stats.candidates, 0);
}

#[test]
fn strings_inside_code_are_not_candidates() {
    let image = image_with(&[(0x180, &b"hello\0"[..])]);
    let mut lifter = ScriptedLifter::new()
        .unit(0x1000, 8, BlockKind::Fallthrough, common::load_abs(&[0x1000], 0x1180, 0x1008))
        .unit(0x1008, 1, BlockKind::Return, common::ret(&[0x1008]))
        .unit(0x1180, 1, BlockKind::Return, common::ret(&[0x1180]));
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(addresses(&exploration), vec![0x1000, 0x1008]);
    assert!(!exploration.explored.contains(&0x1180));
}

#[test]
fn string_check_handles_ascii_and_utf16() {
    let image = image_with(&[(0x180, &b"hello\0"[..]), (0x1a0, &b"h\0i\0\0\0"[..])]);
    assert!(looks_like_string(&image, 0x1180, 2));
    assert!(!looks_like_string(&image, 0x1180, 6));
    assert!(looks_like_string(&image, 0x11a0, 2));
    assert!(!looks_like_string(&image, 0x1100, 2));
    assert!(!looks_like_string(&image, 0x5000, 2));
}

#[test]
fn long_strings_are_read_to_their_terminator() {
    let mut text = vec![b'A'; 300];
    text.push(0);
    let wide: Vec<u8> = b"w".repeat(200).iter().flat_map(|c| [*c, 0]).chain([0, 0]).collect();
    let image = MemoryImage::builder(Arch::X86_64)
        .code(0x1000, text)
        .data(".rodata", 0x2000, wide)
        .code(0x3000, vec![b'B'; 400])
        .build();

    assert!(looks_like_string(&image, 0x1000, 2));
    assert!(looks_like_string(&image, 0x1000, 300));
    assert!(!looks_like_string(&image, 0x1000, 301));
    assert!(looks_like_string(&image, 0x2000, 200));
    // No terminator before the section ends.
    assert!(!looks_like_string(&image, 0x3000, 2));
}

fn table_program() -> ScriptedLifter {
    ScriptedLifter::new()
        .unit(0x1000, 7, BlockKind::JumpIndirect, common::jump_table(&[0x1000], 0x1190))
        .unit(0x1190, 1, BlockKind::Return, common::ret(&[0x1190]))
}

#[test]
fn jump_table_bases_are_not_candidates() {
    let image = common::code_image();
    let mut lifter = table_program();
    let exploration = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert_eq!(exploration.jump_tables, BTreeSet::from([0x1190]));
    assert_eq!(addresses(&exploration), vec![0x1000]);
}

#[test]
fn jump_table_detection_can_be_disabled() {
    let image = common::code_image();
    let mut lifter = table_program();
    let options = ExploreOptions { detect_jump_tables: false, ..ExploreOptions::default() };
    let exploration = explore(&mut lifter, &image, &[0x1000], &options).unwrap();

    assert!(exploration.jump_tables.is_empty());
    assert_eq!(addresses(&exploration), vec![0x1000, 0x1190]);
}

#[test]
fn busy_lifter_is_fatal() {
    let image = common::code_image();
    let mut lifter = branchy();
    lifter.active = true;
    let err = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap_err();

    assert!(matches!(err, ExploreError::Lifter(LiftError::Busy)));
    assert!(lifter.lifted.is_empty());
}

#[test]
fn lifter_is_closed_after_a_run() {
    let image = common::code_image();
    let mut lifter = branchy();
    explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap();

    assert!(!lifter.active);
    assert_eq!(lifter.closed, 1);
}

#[test]
fn structural_failures_abort_and_still_close_the_lifter() {
    let image = common::code_image();
    let unmarked = Body::new(vec![Inst::Exit], 0);
    let mut lifter = ScriptedLifter::new().unit(0x1000, 1, BlockKind::Fallthrough, unmarked);
    let err = explore(&mut lifter, &image, &[0x1000], &ExploreOptions::default()).unwrap_err();

    assert!(matches!(err, ExploreError::Block(BlockError::MissingMarkers(0x1000))));
    assert_eq!(lifter.closed, 1);
}

#[test]
fn empty_entry_list_is_rejected() {
    let image = common::code_image();
    let mut lifter = branchy();
    let err = explore(&mut lifter, &image, &[], &ExploreOptions::default()).unwrap_err();

    assert!(matches!(err, ExploreError::NoEntryPoints));
    assert_eq!(lifter.closed, 0);
}

#[test]
fn explorer_skips_addresses_already_explored() {
    let image = common::code_image();
    let mut lifter = branchy();
    let mut explorer = AddressExplorer::new(&mut lifter, &image, ExploreOptions::default()).unwrap();
    explorer.enqueue(0x1000);
    explorer.enqueue(0x1000);
    assert!(!explorer.is_explored(0x1000));
    let exploration = explorer.run().unwrap();

    assert_eq!(exploration.stats.lifted, 3);
    assert_eq!(lifter.lifted.iter().filter(|a| **a == 0x1000).count(), 1);
}
