use std::fs;
use std::path::Path;

use binlift::{binary_name, canonicalize_or_current, parse_address, sha256_file};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_against_cwd() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    assert_eq!(result, expected);

    let missing = canonicalize_or_current("does-not-exist.bin").expect("canonicalize");
    let cwd = std::env::current_dir().expect("cwd");
    assert_eq!(missing, cwd.join("does-not-exist.bin"));

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn binary_name_uses_the_file_name() {
    assert_eq!(binary_name(Path::new("/tmp/bins/a.out")), "a.out");
    assert_eq!(binary_name(Path::new("/")), "unnamed-binary");
}

#[test]
fn parse_address_accepts_hex_and_decimal() {
    assert_eq!(parse_address("0x401000").unwrap(), 0x401000);
    assert_eq!(parse_address("0X10").unwrap(), 0x10);
    assert_eq!(parse_address(" 4096 ").unwrap(), 4096);

    let err = parse_address("main").unwrap_err();
    assert!(err.to_string().contains("Invalid address 'main'"), "unexpected error: {err}");
    assert!(parse_address("0xzz").is_err());
}

#[test]
fn sha256_file_hashes_contents() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("abc.bin");
    fs::write(&path, b"abc").unwrap();
    assert_eq!(
        sha256_file(&path).unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );

    let err = sha256_file(&tmp.path().join("missing.bin")).unwrap_err();
    assert!(err.to_string().contains("Failed to open binary for hashing"));
}
