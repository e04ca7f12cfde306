//! helpers for the stream DNS convention: every message is preceded by a
//! two byte big-endian length

use std::io::{Read, Result, Write};

pub fn read_packet_length<R: Read>(stream: &mut R) -> Result<u16> {
    let mut len_buffer = [0; 2];
    stream.read_exact(&mut len_buffer)?;

    Ok(u16::from_be_bytes(len_buffer))
}

pub fn write_packet_length<W: Write>(stream: &mut W, len: usize) -> Result<()> {
    let len_buffer = (len as u16).to_be_bytes();
    stream.write_all(&len_buffer)?;

    Ok(())
}

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_length_roundtrip() {
        let mut data = Vec::new();
        write_packet_length(&mut data, 0x1234).unwrap();
        assert_eq!(vec![0x12, 0x34], data);

        let mut cursor = Cursor::new(data);
        assert_eq!(0x1234, read_packet_length(&mut cursor).unwrap());
    }

    #[test]
    fn test_short_read_is_error() {
        let mut cursor = Cursor::new(vec![0x12]);
        assert!(read_packet_length(&mut cursor).is_err());
    }
}
