use std::io::{self, Read, Write};

/// Encode a u64 as a variable-length integer
pub fn encode_varint_u64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a u64 variable-length integer
/// Returns (value, bytes_consumed)
pub fn decode_varint_u64(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None
}

/// Write a u64 variable-length integer to a stream
pub fn write_varint_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    let mut buf = Vec::with_capacity(10);
    encode_varint_u64(value, &mut buf);
    writer.write_all(&buf)
}

/// Read a u64 variable-length integer from a stream
///
/// Returns `Ok(None)` on a clean end of stream (no byte of the varint read).
pub fn read_varint_u64<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte)? {
            0 if shift == 0 => return Ok(None),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated varint",
                ));
            }
            _ => {}
        }

        if shift >= 64 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"));
        }

        result |= ((byte[0] & 0x7F) as u64) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
    }
}

/// Write a u32 in little-endian format
pub fn write_u32_le<W: Write>(writer: &mut W, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u32 in little-endian format
pub fn read_u32_le<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a u64 in little-endian format
pub fn write_u64_le<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Read a u64 in little-endian format
pub fn read_u64_le<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a u64 in little-endian format, or `None` at a clean end of stream
pub fn try_read_u64_le<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated u64",
            ));
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}
