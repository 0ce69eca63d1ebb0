//! The metadata root (ECMA-335 II.24.2.1).
//!
//! The root starts with the `BSJB` signature, carries the runtime version string, and
//! lists the streams that make up the metadata. A rewrite keeps the version and flags and
//! writes a fresh stream directory for the relocated streams.

use crate::{
    file::io::{align_up, push_le, read_le, read_le_at},
    metadata::streams::StreamHeader,
    Result,
};

/// The `BSJB` signature that starts every metadata root.
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// The parsed metadata root.
#[derive(Debug, Clone)]
pub struct Root {
    /// Always [`CIL_HEADER_MAGIC`]
    pub signature: u32,
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Reserved, 0
    pub reserved: u32,
    /// Length of the padded version string field
    pub length: u32,
    /// Runtime version, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Stream directory
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Parse the root at the start of `data`, which spans the whole metadata.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if a field or stream lies beyond `data`, or
    /// [`crate::Error::Malformed`] for a bad signature or stream directory.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 36 {
            return Err(out_of_bounds_error!());
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let length = read_le_at::<u32>(data, &mut 12)?;
        let version_end = match (length as usize).checked_add(16) {
            Some(end) if end <= data.len() => end,
            Some(_) => return Err(out_of_bounds_error!()),
            None => {
                return Err(malformed_error!(
                    "Version string length causing integer overflow - {} + {}",
                    length,
                    16
                ))
            }
        };

        let version = data[16..version_end]
            .iter()
            .take_while(|byte| **byte != 0)
            .map(|byte| char::from(*byte))
            .collect::<String>();

        let mut cursor = version_end;
        let flags = read_le_at::<u16>(data, &mut cursor)?;
        let stream_count = read_le_at::<u16>(data, &mut cursor)?;
        if stream_count == 0 || stream_count > 6 {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut streams = Vec::with_capacity(stream_count as usize);
        let mut stream_offset = cursor;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(out_of_bounds_error!());
            }

            let new_stream = StreamHeader::from(&data[stream_offset..])?;
            match new_stream.offset.checked_add(new_stream.size) {
                Some(range) => {
                    if range as usize > data.len() {
                        return Err(out_of_bounds_error!());
                    }
                }
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        new_stream.offset,
                        new_stream.size
                    ))
                }
            }

            stream_offset += new_stream.header_size();
            streams.push(new_stream);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length,
            version,
            flags,
            stream_headers: streams,
        })
    }

    /// Returns the header of the stream called `name`.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|stream| stream.name == name)
    }

    /// Size of the root including its stream directory.
    #[must_use]
    pub fn header_size(&self) -> usize {
        16 + align_up(self.length as usize, 4)
            + 4
            + self
                .stream_headers
                .iter()
                .map(StreamHeader::header_size)
                .sum::<usize>()
    }

    /// Append the root and its stream directory to `out`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the stream directory is too large.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let version_len = align_up(self.length as usize, 4);
        let stream_count = u16::try_from(self.stream_headers.len())
            .map_err(|_| malformed_error!("Too many streams"))?;

        push_le(out, self.signature);
        push_le(out, self.major_version);
        push_le(out, self.minor_version);
        push_le(out, self.reserved);
        #[allow(clippy::cast_possible_truncation)]
        push_le(out, version_len as u32);

        let start = out.len();
        out.extend_from_slice(self.version.as_bytes());
        out.resize(start + version_len, 0);

        push_le(out, self.flags);
        push_le(out, stream_count);
        for stream in &self.stream_headers {
            stream.write(out);
        }

        Ok(())
    }
}
