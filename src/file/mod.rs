//! PE image access for .NET assemblies.
//!
//! [`File`] owns the raw bytes of an assembly (memory-mapped from disk or held in a
//! `Vec`) together with the goblin view of its PE headers. It answers the questions the
//! rest of the crate needs about the container: where the CLI header lives, how RVAs map
//! to file offsets, and where the header fields that a rewrite must update are located.
//!
//! # Key Components
//!
//! - [`File`] - The loaded image, self-referencing over its [`Backend`]
//! - [`Backend`] - Storage abstraction over mapped files and in-memory buffers
//! - [`io`] - Little-endian primitive reading and writing
//! - [`parser`] - Sequential cursor used by the metadata and CIL decoders

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{
    data_directories::DataDirectoryType, header::Header, optional_header::OptionalHeader,
    section_table::SectionTable, PE,
};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Size of one entry in the PE section table.
pub const SECTION_HEADER_SIZE: usize = 40;

/// PE32 optional header magic.
const PE32_MAGIC: u16 = 0x10b;

/// Storage for the bytes behind a [`File`].
pub trait Backend: Send + Sync {
    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the complete data.
    fn data(&self) -> &[u8];

    /// Returns the total size in bytes.
    fn len(&self) -> usize;
}

/// A loaded PE image that carries a CLR runtime header.
#[self_referencing]
pub struct File {
    data: Box<dyn Backend>,
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Memory-map and parse the image at `file`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, [`crate::Error::Empty`]
    /// for a zero-length file, [`crate::Error::GoblinErr`] if it is not a PE, or
    /// [`crate::Error::Malformed`] if it lacks a CLR runtime header.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Parse an image held in memory.
    ///
    /// # Errors
    /// Same conditions as [`File::from_file`], minus filesystem errors.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            let data = data.as_ref();
            match PE::parse(data.data()) {
                Ok(pe) => match pe.header.optional_header {
                    Some(optional_header) => {
                        if optional_header
                            .data_directories
                            .get_clr_runtime_header()
                            .is_none()
                        {
                            Err(malformed_error!(
                                "File does not have a CLR runtime header directory"
                            ))
                        } else {
                            Ok(pe)
                        }
                    }
                    None => Err(malformed_error!("File does not have an OptionalHeader")),
                },
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the COFF/PE header block.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// Returns the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the image has none. Loading already rejects
    /// such images, so this only fails on a corrupted [`File`].
    pub fn header_optional(&self) -> Result<&OptionalHeader> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .ok_or_else(|| malformed_error!("File does not have an OptionalHeader"))
        })
    }

    /// Returns the RVA and size of the CLI header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the CLR runtime header directory is empty.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .and_then(|optional_header| {
                    optional_header
                        .data_directories
                        .dirs()
                        .find(|(directory_type, directory)| {
                            *directory_type == DataDirectoryType::ClrRuntimeHeader
                                && directory.virtual_address != 0
                        })
                        .map(|(_, directory)| {
                            (directory.virtual_address as usize, directory.size as usize)
                        })
                })
                .ok_or_else(|| malformed_error!("CLR runtime header directory is empty"))
        })
    }

    /// Iterate the section table in file order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Returns the complete image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns `len` bytes at file offset `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Translate a relative virtual address into a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains `rva` or a section
    /// header overflows.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        let rva_u32 =
            u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

        self.with_pe(|pe| {
            for section in &pe.sections {
                let extent = section.virtual_size.max(section.size_of_raw_data);
                let Some(section_max) = section.virtual_address.checked_add(extent) else {
                    return Err(malformed_error!(
                        "Section malformed, causing integer overflow - {} + {}",
                        section.virtual_address,
                        extent
                    ));
                };

                if section.virtual_address <= rva_u32 && section_max > rva_u32 {
                    return Ok((rva - section.virtual_address as usize)
                        + section.pointer_to_raw_data as usize);
                }
            }

            Err(malformed_error!(
                "RVA could not be converted to offset - {}",
                rva
            ))
        })
    }

    /// Returns the file alignment from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the optional header is missing.
    pub fn file_alignment(&self) -> Result<u32> {
        Ok(self.header_optional()?.windows_fields.file_alignment)
    }

    /// Returns the section alignment from the optional header.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the optional header is missing.
    pub fn section_alignment(&self) -> Result<u32> {
        Ok(self.header_optional()?.windows_fields.section_alignment)
    }

    /// Returns `true` for PE32+ (64-bit) images.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the optional header is missing.
    pub fn is_pe32_plus_format(&self) -> Result<bool> {
        Ok(self.header_optional()?.standard_fields.magic != PE32_MAGIC)
    }

    /// Returns the file offset of the `PE\0\0` signature.
    #[must_use]
    pub fn pe_signature_offset(&self) -> usize {
        self.header().dos_header.pe_pointer as usize
    }

    /// Returns the file offset of the optional header.
    #[must_use]
    pub fn optional_header_offset(&self) -> usize {
        // PE signature plus COFF file header
        self.pe_signature_offset() + 4 + 20
    }

    /// Returns the file offset of the first section table entry.
    #[must_use]
    pub fn section_table_offset(&self) -> usize {
        self.optional_header_offset() + self.header().coff_header.size_of_optional_header as usize
    }
}
