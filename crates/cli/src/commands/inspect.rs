use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use binlift_core::image::{BinaryImage, MemoryImage};

use crate::canonicalize_or_current;

#[derive(Debug, Serialize)]
pub struct SectionInfo {
    pub name: String,
    pub address: String,
    pub size: u64,
    pub executable: bool,
    pub writable: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageInfo {
    pub path: String,
    pub format: String,
    pub arch: String,
    pub entry_point: Option<String>,
    pub sections: Vec<SectionInfo>,
    pub imports: Vec<String>,
    pub relocations: usize,
}

/// Summarise what the loader sees in `input`.
pub fn image_info(input: &str) -> Result<ImageInfo> {
    let path = canonicalize_or_current(input)?;
    if !path.is_file() {
        return Err(anyhow!("Input binary does not exist: {}", path.display()));
    }
    let image = MemoryImage::open(&path)
        .with_context(|| format!("Failed to load image {}", path.display()))?;

    let sections = image
        .sections()
        .iter()
        .map(|s| SectionInfo {
            name: s.name.clone(),
            address: format!("{:#x}", s.address),
            size: s.size,
            executable: s.executable,
            writable: s.writable,
        })
        .collect();
    let imports = image
        .imports()
        .iter()
        .map(|(slot, import)| match &import.library {
            Some(lib) => format!("{slot:#x} {}!{}", lib, import.name),
            None => format!("{slot:#x} {}", import.name),
        })
        .collect();

    Ok(ImageInfo {
        path: path.display().to_string(),
        format: format!("{:?}", image.format()).to_lowercase(),
        arch: image.arch().to_string(),
        entry_point: image.entry_point().map(|e| format!("{e:#x}")),
        sections,
        imports,
        relocations: image.relocations().len(),
    })
}

/// Print sections, imports and relocation count of a binary.
pub fn inspect_command(input: &str, json: bool) -> Result<()> {
    let info = image_info(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Image: {}", info.path);
    println!("  Format: {}", info.format);
    println!("  Arch: {}", info.arch);
    println!("  Entry point: {}", info.entry_point.as_deref().unwrap_or("(none)"));
    println!("Sections:");
    for s in &info.sections {
        let flags = format!(
            "{}{}",
            if s.executable { "x" } else { "-" },
            if s.writable { "w" } else { "-" }
        );
        println!("- {} at {} ({} bytes, {})", s.name, s.address, s.size, flags);
    }
    println!("Imports: {}", info.imports.len());
    for import in &info.imports {
        println!("- {}", import);
    }
    println!("Relocations: {}", info.relocations);

    Ok(())
}
