//! The CLI header (`IMAGE_COR20_HEADER`, ECMA-335 II.25.3.3).
//!
//! The CLR runtime header data directory points at this 72-byte structure. It locates
//! the metadata root and carries the runtime flags. A rewrite of the metadata updates the
//! metadata RVA and size in place, and clears [`CorFlags::STRONG_NAME_SIGNED`] because
//! any change to the image invalidates the signature.

use bitflags::bitflags;

use crate::{file::parser::Parser, Result};

/// Size of the CLI header in bytes.
pub const COR20_HEADER_SIZE: usize = 72;
/// Offset of the `MetaData.VirtualAddress` field.
pub const META_DATA_RVA_OFFSET: usize = 8;
/// Offset of the `MetaData.Size` field.
pub const META_DATA_SIZE_OFFSET: usize = 12;
/// Offset of the `Flags` field.
pub const FLAGS_OFFSET: usize = 16;

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy)]
    /// Runtime flags of the CLI header
    pub struct CorFlags: u32 {
        /// Image contains only IL code
        const IL_ONLY = 0x0000_0001;
        /// Image requires a 32-bit process
        const REQUIRED_32BIT = 0x0000_0002;
        /// Image carries a strong name signature
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// Entry point is a native function
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        /// Image prefers a 32-bit process
        const PREFERRED_32BIT = 0x0002_0000;
    }
}

/// The parsed CLI header.
#[derive(Debug, Clone)]
pub struct Cor20Header {
    /// Size of the header, always 72
    pub cb: u32,
    /// Minimum major runtime version
    pub major_runtime_version: u16,
    /// Minor runtime version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// Runtime flags
    pub flags: CorFlags,
    /// Entry point token or native RVA
    pub entry_point_token: u32,
    /// RVA of managed resources
    pub resource_rva: u32,
    /// Size of managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature blob
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature blob
    pub strong_name_signature_size: u32,
    /// RVA of the VTable fixups
    pub vtable_fixups_rva: u32,
    /// Size of the VTable fixups
    pub vtable_fixups_size: u32,
}

impl Cor20Header {
    /// Parse the header from `data`, which starts at the header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short, or
    /// [`crate::Error::Malformed`] if the size field or the metadata directory is invalid.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        if meta_data_rva == 0 {
            return Err(malformed_error!("Metadata RVA cannot be zero"));
        }

        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_size == 0 {
            return Err(malformed_error!("Metadata size cannot be zero"));
        } else if meta_data_size > 0x1000_0000 {
            return Err(malformed_error!(
                "Metadata size {} exceeds reasonable limit (256MB)",
                meta_data_size
            ));
        }

        let flags = CorFlags::from_bits_retain(parser.read_le::<u32>()?);
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;

        // Code manager table, reserved
        parser.advance_by(8)?;

        let vtable_fixups_rva = parser.read_le::<u32>()?;
        let vtable_fixups_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
            vtable_fixups_rva,
            vtable_fixups_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    const HEADER: [u8; 72] = [
        0x48, 0x00, 0x00, 0x00, // cb = 72
        0x02, 0x00,             // major_runtime_version = 2
        0x05, 0x00,             // minor_runtime_version = 5
        0x68, 0x20, 0x00, 0x00, // meta_data_rva = 0x2068
        0x00, 0x03, 0x00, 0x00, // meta_data_size = 0x300
        0x09, 0x00, 0x02, 0x00, // flags = IL_ONLY | STRONG_NAME_SIGNED | PREFERRED_32BIT
        0x00, 0x00, 0x00, 0x00, // entry_point_token
        0x00, 0x00, 0x00, 0x00, // resource_rva
        0x00, 0x00, 0x00, 0x00, // resource_size
        0x00, 0x40, 0x00, 0x00, // strong_name_signature_rva = 0x4000
        0x80, 0x00, 0x00, 0x00, // strong_name_signature_size = 0x80
        0x00, 0x00, 0x00, 0x00, // code_manager_table_rva
        0x00, 0x00, 0x00, 0x00, // code_manager_table_size
        0x00, 0x00, 0x00, 0x00, // vtable_fixups_rva
        0x00, 0x00, 0x00, 0x00, // vtable_fixups_size
        0x00, 0x00, 0x00, 0x00, // export_address_table_jmp_rva
        0x00, 0x00, 0x00, 0x00, // export_address_table_jmp_size
        0x00, 0x00, 0x00, 0x00, // managed_native_header_rva
        0x00, 0x00, 0x00, 0x00, // managed_native_header_size
    ];

    #[test]
    fn crafted() {
        let parsed_header = Cor20Header::read(&HEADER).unwrap();

        assert_eq!(parsed_header.cb, 72);
        assert_eq!(parsed_header.major_runtime_version, 2);
        assert_eq!(parsed_header.minor_runtime_version, 5);
        assert_eq!(parsed_header.meta_data_rva, 0x2068);
        assert_eq!(parsed_header.meta_data_size, 0x300);
        assert!(parsed_header.flags.contains(CorFlags::IL_ONLY));
        assert!(parsed_header.flags.contains(CorFlags::STRONG_NAME_SIGNED));
        assert!(parsed_header.flags.contains(CorFlags::PREFERRED_32BIT));
        assert_eq!(parsed_header.strong_name_signature_rva, 0x4000);
        assert_eq!(parsed_header.strong_name_signature_size, 0x80);
    }

    #[test]
    fn field_offsets() {
        let mut offset = META_DATA_RVA_OFFSET;
        let rva: u32 = crate::file::io::read_le_at(&HEADER, &mut offset).unwrap();
        assert_eq!(rva, 0x2068);
        assert_eq!(offset, META_DATA_SIZE_OFFSET);

        let mut offset = FLAGS_OFFSET;
        let flags: u32 = crate::file::io::read_le_at(&HEADER, &mut offset).unwrap();
        assert_eq!(flags, 0x0002_0009);
    }

    #[test]
    fn invalid() {
        let mut bad_size = HEADER;
        bad_size[0] = 0x40;
        assert!(Cor20Header::read(&bad_size).is_err());

        let mut no_metadata = HEADER;
        no_metadata[8..12].fill(0);
        assert!(Cor20Header::read(&no_metadata).is_err());

        assert!(matches!(
            Cor20Header::read(&HEADER[..40]),
            Err(crate::Error::OutOfBounds { .. })
        ));
    }
}
