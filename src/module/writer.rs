//! Serialises a modified [`Module`] back into a PE image.
//!
//! The source image is copied unchanged and one section is appended. It holds the
//! re-encoded bodies of every modified method, followed by a rebuilt metadata block in
//! which the `#US` heap has grown and the `MethodDef.RVA` of each modified method points
//! at its new body. The CLI header is redirected to the new metadata. Everything else,
//! including the old bodies and the old metadata, stays where it was.
//!
//! [`persist`] writes the result through a temporary file in the target directory that
//! is renamed over the target once complete.

use std::{io::Write, path::Path};

use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::{
    file::{
        io::{align_up, read_le, write_le_at},
        File, SECTION_HEADER_SIZE,
    },
    metadata::{
        cor20header::{CorFlags, FLAGS_OFFSET, META_DATA_RVA_OFFSET, META_DATA_SIZE_OFFSET},
        streams::{StreamHeader, UserStringsBuilder},
        tables::{MethodDefRaw, TableId, TablesHeader},
    },
    module::{loader::MetadataLayout, Module},
    Error::{NotSupported, WriteFailure},
    Result,
};

/// Name of the appended section.
pub const SECTION_NAME: [u8; 8] = *b".cilpat\0";

/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`
const SECTION_CHARACTERISTICS: u32 = 0x4000_0040;

/// Offset of `NumberOfSections` from the PE signature.
const NUMBER_OF_SECTIONS_OFFSET: usize = 4 + 2;
/// Offset of `SizeOfInitializedData` within the optional header.
const SIZE_OF_INITIALIZED_DATA_OFFSET: usize = 8;
/// Offset of `SizeOfImage` within the optional header.
const SIZE_OF_IMAGE_OFFSET: usize = 56;

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Value exceeds 32 bits - {:#x}", value))
}

/// Produce the image bytes for `module`.
///
/// A module without modified methods yields a copy of its source image.
///
/// # Errors
/// Returns [`crate::Error::NotSupported`] if the module has no source image or the PE
/// header has no room for another section header; encoding errors are propagated.
pub fn write_image(module: &Module) -> Result<Vec<u8>> {
    let Some(file) = module.image() else {
        return Err(NotSupported);
    };

    let modified: Vec<_> = module.modified_methods().collect();
    if modified.is_empty() {
        debug!("No modified methods, writing the source image unchanged");
        return Ok(file.data().to_vec());
    }

    let layout = MetadataLayout::locate(file)?;
    let placement = Placement::new(file)?;

    let mut user_strings = match layout.stream(file, "#US")? {
        Some(heap) => UserStringsBuilder::new(heap)?,
        None => UserStringsBuilder::new(&[0])?,
    };

    let mut content = Vec::new();
    let mut redirects = Vec::with_capacity(modified.len());
    for method in modified {
        let Some(body) = method.body() else {
            continue;
        };

        content.resize(align_up(content.len(), 4), 0);
        let rva = to_u32(placement.rva + content.len())?;
        let encoded = body.write(&mut |value: &str| user_strings.intern(value))?;
        debug!(
            "Encoded {} ({} bytes) at RVA {:#x}",
            method.name,
            encoded.len(),
            rva
        );

        content.extend_from_slice(&encoded);
        redirects.push((method.token.row(), rva));
    }

    content.resize(align_up(content.len(), 4), 0);
    let metadata_rva = to_u32(placement.rva + content.len())?;
    let metadata = build_metadata(file, &layout, user_strings, &redirects)?;
    let metadata_size = to_u32(metadata.len())?;
    content.extend_from_slice(&metadata);

    let mut out = file.data().to_vec();
    placement.append(file, &mut out, &content)?;

    let mut offset = layout.cor20_offset + META_DATA_RVA_OFFSET;
    write_le_at(&mut out, &mut offset, metadata_rva)?;
    let mut offset = layout.cor20_offset + META_DATA_SIZE_OFFSET;
    write_le_at(&mut out, &mut offset, metadata_size)?;

    if layout.cor20.flags.contains(CorFlags::STRONG_NAME_SIGNED) {
        warn!("Clearing the strong name signature flag, the signature no longer matches");
        let mut offset = layout.cor20_offset + FLAGS_OFFSET;
        let flags = layout.cor20.flags.difference(CorFlags::STRONG_NAME_SIGNED);
        write_le_at(&mut out, &mut offset, flags.bits())?;
    }

    debug!(
        "Metadata moved to RVA {:#x} ({} bytes), image is {} bytes",
        metadata_rva,
        metadata_size,
        out.len()
    );

    Ok(out)
}

/// Copy the metadata with `#US` replaced by the grown heap and the RVAs of the
/// redirected methods rewritten.
fn build_metadata(
    file: &File,
    layout: &MetadataLayout,
    user_strings: UserStringsBuilder,
    redirects: &[(u32, u32)],
) -> Result<Vec<u8>> {
    let source_tables = layout.required_stream(file, "#~")?;
    let header = TablesHeader::from(source_tables)?;

    let mut tables = source_tables.to_vec();
    let rva_column = header
        .info
        .column_offset(TableId::MethodDef, MethodDefRaw::RVA_COLUMN);
    for (rid, rva) in redirects {
        let mut offset = header.row_offset(TableId::MethodDef, *rid)? + rva_column;
        write_le_at(&mut tables, &mut offset, *rva)?;
    }

    let added_strings = user_strings.added();
    let mut heap = user_strings.finish();

    let mut root = layout.root.clone();
    if root.stream("#US").is_none() && added_strings > 0 {
        root.stream_headers.push(StreamHeader {
            offset: 0,
            size: 0,
            name: "#US".to_string(),
        });
    }

    let mut payloads = Vec::with_capacity(root.stream_headers.len());
    for stream in &root.stream_headers {
        let payload = match stream.name.as_str() {
            "#~" => std::mem::take(&mut tables),
            "#US" => std::mem::take(&mut heap),
            name => layout
                .stream(file, name)?
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        };
        payloads.push(payload);
    }

    let mut position = root.header_size();
    for (stream, payload) in root.stream_headers.iter_mut().zip(payloads.iter_mut()) {
        payload.resize(align_up(payload.len(), 4), 0);
        stream.offset = to_u32(position)?;
        stream.size = to_u32(payload.len())?;
        position += payload.len();
    }

    let mut out = Vec::with_capacity(position);
    root.write(&mut out)?;
    for payload in payloads {
        out.extend_from_slice(&payload);
    }

    debug!(
        "Rebuilt metadata: {} streams, {} new string literals, {} redirected methods",
        root.stream_headers.len(),
        added_strings,
        redirects.len()
    );

    Ok(out)
}

/// Where the new section goes, in the file and in memory.
struct Placement {
    /// File offset of the new section table entry
    header_offset: usize,
    /// Number of sections before the append
    section_count: usize,
    /// RVA of the new section
    rva: usize,
    /// File offset of the new section data
    offset: usize,
    file_alignment: usize,
    section_alignment: usize,
}

impl Placement {
    fn new(file: &File) -> Result<Placement> {
        let file_alignment = file.file_alignment()? as usize;
        let section_alignment = file.section_alignment()? as usize;
        if !file_alignment.is_power_of_two() || !section_alignment.is_power_of_two() {
            return Err(malformed_error!(
                "Invalid alignment - file {:#x}, section {:#x}",
                file_alignment,
                section_alignment
            ));
        }

        let section_count = file.sections().count();
        let header_offset = file.section_table_offset() + section_count * SECTION_HEADER_SIZE;
        let header_end = header_offset + SECTION_HEADER_SIZE;

        let size_of_headers = file.header_optional()?.windows_fields.size_of_headers as usize;
        let first_raw = file
            .sections()
            .filter(|section| section.size_of_raw_data != 0)
            .map(|section| section.pointer_to_raw_data as usize)
            .min()
            .unwrap_or(size_of_headers);

        let free = file.data_slice(header_offset, SECTION_HEADER_SIZE);
        let has_room = header_end <= size_of_headers.min(first_raw)
            && free.is_ok_and(|bytes| bytes.iter().all(|byte| *byte == 0));
        if !has_room {
            debug!(
                "No room for a section header at {:#x} (headers end at {:#x})",
                header_offset, size_of_headers
            );
            return Err(NotSupported);
        }

        let image_end = file
            .sections()
            .map(|section| {
                section.virtual_address as usize
                    + section.virtual_size.max(section.size_of_raw_data) as usize
            })
            .max()
            .unwrap_or(size_of_headers);

        Ok(Placement {
            header_offset,
            section_count,
            rva: align_up(image_end, section_alignment),
            offset: align_up(file.data().len(), file_alignment),
            file_alignment,
            section_alignment,
        })
    }

    /// Append `content` as the new section to `out` and update the PE headers.
    fn append(&self, file: &File, out: &mut Vec<u8>, content: &[u8]) -> Result<()> {
        let raw_size = align_up(content.len(), self.file_alignment);
        out.resize(self.offset, 0);
        out.extend_from_slice(content);
        out.resize(self.offset + raw_size, 0);

        let mut offset = self.header_offset;
        out[offset..offset + SECTION_NAME.len()].copy_from_slice(&SECTION_NAME);
        offset += SECTION_NAME.len();
        write_le_at(out, &mut offset, to_u32(content.len())?)?;
        write_le_at(out, &mut offset, to_u32(self.rva)?)?;
        write_le_at(out, &mut offset, to_u32(raw_size)?)?;
        write_le_at(out, &mut offset, to_u32(self.offset)?)?;
        // Relocations, line numbers and their counts
        write_le_at(out, &mut offset, 0u32)?;
        write_le_at(out, &mut offset, 0u32)?;
        write_le_at(out, &mut offset, 0u16)?;
        write_le_at(out, &mut offset, 0u16)?;
        write_le_at(out, &mut offset, SECTION_CHARACTERISTICS)?;

        let section_count = u16::try_from(self.section_count + 1)
            .map_err(|_| malformed_error!("Too many sections"))?;
        let mut offset = file.pe_signature_offset() + NUMBER_OF_SECTIONS_OFFSET;
        write_le_at(out, &mut offset, section_count)?;

        let optional = file.optional_header_offset();
        let mut offset = optional + SIZE_OF_INITIALIZED_DATA_OFFSET;
        let initialized = read_le::<u32>(&out[offset..])?
            .checked_add(to_u32(raw_size)?)
            .ok_or_else(|| malformed_error!("SizeOfInitializedData overflows"))?;
        write_le_at(out, &mut offset, initialized)?;

        let size_of_image = align_up(self.rva + content.len(), self.section_alignment);
        let mut offset = optional + SIZE_OF_IMAGE_OFFSET;
        write_le_at(out, &mut offset, to_u32(size_of_image)?)?;

        debug!(
            "Appended section at RVA {:#x}, file offset {:#x}, {} bytes",
            self.rva,
            self.offset,
            content.len()
        );

        Ok(())
    }
}

/// Write `data` to `path` atomically.
///
/// # Errors
/// Returns [`crate::Error::WriteFailure`] if the temporary file cannot be created,
/// written or renamed; no file is left at `path` in that case.
pub fn persist(data: &[u8], path: &Path) -> Result<()> {
    let failure = |source: std::io::Error| WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(directory).map_err(failure)?;
    temp.write_all(data).map_err(failure)?;
    temp.as_file().sync_all().map_err(failure)?;
    temp.persist(path).map_err(|error| failure(error.error))?;

    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Instruction, OpCode, Operand},
        metadata::{cor20header::Cor20Header, token::Token},
        module::ModuleStore,
        test::{build_image, CLR_HEADER_OFFSET},
    };

    fn awake(module: &mut Module) -> &mut crate::module::MethodDef {
        &mut module.types[1].methods[0]
    }

    #[test]
    fn unmodified_is_identical() {
        let image = build_image();
        let module = Module::from_mem(image.clone()).unwrap();

        assert_eq!(write_image(&module).unwrap(), image);
    }

    #[test]
    fn modified_round_trip() {
        let image = build_image();
        let mut module = Module::from_mem(image.clone()).unwrap();

        let body = awake(&mut module).body_mut().unwrap();
        let ret = body.instructions.id_at(11).unwrap();
        body.instructions
            .insert_before(
                ret,
                vec![
                    Instruction::ldstr("UnityEngine.dll"),
                    Instruction::new(OpCode::POP),
                    Instruction::ldstr("New.dll"),
                    Instruction::new(OpCode::POP),
                ],
            )
            .unwrap();

        let written = write_image(&module).unwrap();
        assert_eq!(written.len() % 0x200, 0);
        // Old bodies and metadata stay in place after the CLI header
        assert_eq!(written[0x248..0x600], image[0x248..0x600]);

        let reloaded = Module::from_mem(written).unwrap();
        let file = reloaded.image().unwrap();
        assert_eq!(file.sections().count(), 2);
        let section = file.sections().last().unwrap();
        assert_eq!(section.name, SECTION_NAME);
        assert_eq!(section.virtual_address, 0x4000);

        let method = &reloaded.types[1].methods[0];
        assert_eq!(method.rva, 0x4000);

        let body = method.body().unwrap();
        let strings: Vec<(Option<Token>, String)> = body
            .instructions
            .iter()
            .filter_map(|(_, instruction)| match &instruction.operand {
                Operand::String(string) => Some((string.token, string.value.clone())),
                _ => None,
            })
            .collect();

        // The existing literal is reused, the new one appended after the original heap
        assert_eq!(strings.len(), 3);
        assert_eq!(strings[1], (Some(Token::new(0x7000_0001)), "UnityEngine.dll".to_string()));
        assert_eq!(strings[2].1, "New.dll");
        assert!(strings[2].0.unwrap().row() > 1);

        // The brfalse.s still exits to ret
        let (_, branch) = body.instructions.iter().nth(1).unwrap();
        let ret = body.instructions.id_at(body.instructions.len() - 1).unwrap();
        assert_eq!(branch.operand, Operand::Target(ret));
    }

    #[test]
    fn clears_strong_name_flag() {
        let mut image = build_image();
        let flags = CLR_HEADER_OFFSET + FLAGS_OFFSET;
        image[flags] |= CorFlags::STRONG_NAME_SIGNED.bits() as u8;

        let mut module = Module::from_mem(image).unwrap();
        awake(&mut module).body_mut().unwrap().max_stack = 12;

        let written = write_image(&module).unwrap();
        let header = Cor20Header::read(&written[CLR_HEADER_OFFSET..]).unwrap();
        assert!(!header.flags.contains(CorFlags::STRONG_NAME_SIGNED));
        assert!(header.flags.contains(CorFlags::IL_ONLY));
        assert!(header.meta_data_rva > 0x4000);

        let reloaded = Module::from_mem(written).unwrap();
        assert_eq!(reloaded.types[1].methods[0].body().unwrap().max_stack, 12);
    }

    #[test]
    fn no_room_for_section_header() {
        let mut image = build_image();
        // Occupy the slot after the only section header
        let slot = 0x80 + 24 + 0xE0 + SECTION_HEADER_SIZE;
        image[slot] = 0xFF;

        let mut module = Module::from_mem(image).unwrap();
        awake(&mut module).body_mut().unwrap();

        assert!(matches!(write_image(&module), Err(NotSupported)));
    }

    #[test]
    fn persist_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.dll");

        persist(&[1, 2, 3], &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), [1, 2, 3]);

        // Only the target remains, no temporary file
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("out.dll");

        let result = persist(&[1, 2, 3], &target);
        assert!(matches!(result, Err(WriteFailure { .. })));
        assert!(!target.exists());
    }

    #[test]
    fn store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Game.dll");
        let output = dir.path().join("Game.mod.dll");
        std::fs::write(&input, build_image()).unwrap();

        let store = crate::module::PeStore;
        let mut module = store.read(&input).unwrap();
        awake(&mut module).body_mut().unwrap().max_stack = 9;
        store.write(&module, &output).unwrap();

        let reloaded = store.read(&output).unwrap();
        assert_eq!(reloaded.types[1].methods[0].body().unwrap().max_stack, 9);
    }
}
