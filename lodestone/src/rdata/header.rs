//! Type headers for readable and binary streams.

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::stream::Stream;

/// Longest accepted type name in a stream header.
const MAX_TYPE_NAME_LENGTH: usize = 256;

/// Write the readable header line `//! <type-name>\n`.
pub fn write_readable_type_header(
    stream: &mut dyn Stream,
    type_name: &InternedString,
) -> LodestoneResult<()> {
    stream.write_all(format!("//! {}\n", type_name).as_bytes())
}

/// Read and validate the readable header line, returning the type name.
pub fn read_readable_type_header(stream: &mut dyn Stream) -> LodestoneResult<InternedString> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte)? == 0 {
            return Err(LodestoneError::Serialization(
                "stream ended inside type header".to_string(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= MAX_TYPE_NAME_LENGTH + 4 {
            return Err(LodestoneError::Serialization(
                "type header exceeds maximum length".to_string(),
            ));
        }
        line.push(byte[0]);
    }

    let line = String::from_utf8(line)
        .map_err(|e| LodestoneError::Serialization(format!("type header is not UTF-8: {e}")))?;
    let name = line
        .strip_prefix("//! ")
        .ok_or_else(|| {
            LodestoneError::Serialization(format!("missing '//! <type>' header, got '{line}'"))
        })?
        .trim();
    if name.is_empty() {
        return Err(LodestoneError::Serialization(
            "empty type name in header".to_string(),
        ));
    }
    Ok(intern(name))
}

/// Write the binary type-header record: u32 length followed by the name.
pub fn write_binary_type_header(
    stream: &mut dyn Stream,
    type_name: &InternedString,
) -> LodestoneResult<()> {
    let bytes = type_name.as_str().as_bytes();
    stream.write_all(&(bytes.len() as u32).to_le_bytes())?;
    stream.write_all(bytes)
}

/// Read and validate the binary type-header record.
pub fn read_binary_type_header(stream: &mut dyn Stream) -> LodestoneResult<InternedString> {
    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes)?;
    let length = u32::from_le_bytes(length_bytes) as usize;
    if length == 0 || length > MAX_TYPE_NAME_LENGTH {
        return Err(LodestoneError::Serialization(format!(
            "implausible type name length {length} in binary header"
        )));
    }

    let mut name = vec![0u8; length];
    stream.read_exact(&mut name)?;
    let name = String::from_utf8(name)
        .map_err(|e| LodestoneError::Serialization(format!("type name is not UTF-8: {e}")))?;
    Ok(intern(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemoryStream, SeekFrom};

    #[test]
    fn readable_header_round_trip() {
        let mut stream = MemoryStream::new();
        write_readable_type_header(&mut stream, &intern("weapon_t")).unwrap();
        stream.write_all(b"damage = 3\n").unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        assert_eq!(read_readable_type_header(&mut stream).unwrap(), intern("weapon_t"));
        // Header read leaves the stream at the first statement.
        let mut rest = [0u8; 6];
        stream.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, b"damage");
    }

    #[test]
    fn binary_header_round_trip() {
        let mut stream = MemoryStream::new();
        write_binary_type_header(&mut stream, &intern("armor_t")).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(read_binary_type_header(&mut stream).unwrap(), intern("armor_t"));
    }

    #[test]
    fn bad_prefix_is_rejected() {
        let mut stream = MemoryStream::from_vec(b"// weapon_t\n".to_vec());
        assert!(read_readable_type_header(&mut stream).is_err());
    }
}
