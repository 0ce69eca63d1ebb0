use crate::{
    file::io::{align_up, push_le, read_le},
    Result,
};

/// Names of the streams a metadata root may declare. `#-` marks the uncompressed table
/// layout, which is recognized here and rejected by the loader.
const STREAM_NAMES: [&str; 6] = ["#Strings", "#US", "#Blob", "#GUID", "#~", "#-"];

/// One entry of the stream directory that follows the metadata root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream data from the start of the metadata root
    pub offset: u32,
    /// Size of the stream data in bytes
    pub size: u32,
    /// Stream name
    pub name: String,
}

impl StreamHeader {
    /// Parse a stream header from the start of `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short, or
    /// [`crate::Error::Malformed`] for an unknown stream name.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(out_of_bounds_error!());
        }

        let mut name = String::with_capacity(32);
        for counter in 0..std::cmp::min(32, data.len() - 8) {
            let name_char = read_le::<u8>(&data[8 + counter..])?;
            if name_char == 0 {
                break;
            }

            name.push(char::from(name_char));
        }

        if !STREAM_NAMES.iter().any(|valid_name| name == *valid_name) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of this header on disk: offset, size and the NUL-terminated name padded to 4.
    #[must_use]
    pub fn header_size(&self) -> usize {
        8 + align_up(self.name.len() + 1, 4)
    }

    /// Append the on-disk form of this header to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        push_le(out, self.offset);
        push_le(out, self.size);

        let name_len = align_up(self.name.len() + 1, 4);
        out.extend_from_slice(self.name.as_bytes());
        out.resize(out.len() + name_len - self.name.len(), 0);
    }
}
