//! low level buffer operations for reading and writing DNS messages

use std::collections::HashMap;

use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum BufferError {
    EndOfBuffer,
    LabelTooLong,
    TooManyJumps,
}

type Result<T> = std::result::Result<T, BufferError>;

/// Common interface for the buffers a DNS message can be read from or
/// written to.
///
/// Domain names are the only non-trivial part: on read, compression
/// pointers are followed (with a jump bound, since a hostile message can
/// form a pointer loop), and on write a label cache allows implementations
/// to emit pointers instead of repeating suffixes.
pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn find_label(&self, label: &str) -> Option<usize>;
    fn save_label(&mut self, label: &str, pos: usize);

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);
        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);
        Ok(res)
    }

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)
    }

    /// Read a domain name, following compression pointers where present.
    /// The name is appended to `outstr` in lowercased dotted form without a
    /// trailing dot.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps = 0;
        let max_jumps = 5;
        let mut delim = "";

        loop {
            if jumps > max_jumps {
                return Err(BufferError::TooManyJumps);
            }

            let len = self.get(pos)?;

            // Two high bits set marks a compression pointer
            if (len & 0xC0) == 0xC0 {
                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = ((((len as u16) ^ 0xC0) << 8) | b2) as usize;
                pos = offset;

                jumped = true;
                jumps += 1;
                continue;
            }

            pos += 1;

            if len == 0 {
                break;
            }

            outstr.push_str(delim);
            let label = self.get_range(pos, len as usize)?;
            outstr.push_str(&String::from_utf8_lossy(label).to_lowercase());
            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }

    /// Write a domain name in wire format, emitting a compression pointer
    /// when the buffer has already seen the remaining suffix.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        let labels: Vec<&str> = qname.split('.').filter(|l| !l.is_empty()).collect();

        for (i, label) in labels.iter().enumerate() {
            let suffix = labels[i..].join(".");
            if let Some(prev) = self.find_label(&suffix) {
                self.write_u16(0xC000 | (prev as u16))?;
                return Ok(());
            }

            let pos = self.pos();
            self.save_label(&suffix, pos);

            if label.len() > 0x3F {
                return Err(BufferError::LabelTooLong);
            }

            self.write_u8(label.len() as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        self.write_u8(0)
    }
}

/// Growable buffer with name compression. The stream transport frames
/// every message with an explicit length, so nothing here needs a fixed
/// size.
#[derive(Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
    label_lookup: HashMap<String, usize>,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
            label_lookup: HashMap::new(),
        }
    }

    /// Wrap already-received wire data for parsing.
    pub fn from_bytes(data: &[u8]) -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: data.to_vec(),
            pos: 0,
            label_lookup: HashMap::new(),
        }
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buffer[self.pos];
        self.pos += 1;
        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(self.buffer[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buffer[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        self.buffer.push(val);
        self.pos += 1;
        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.buffer[pos] = val;
        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.pos = pos;
        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }

    fn find_label(&self, label: &str) -> Option<usize> {
        self.label_lookup.get(label).cloned()
    }

    fn save_label(&mut self, label: &str, pos: usize) {
        self.label_lookup.insert(label.to_string(), pos);
    }
}
