use thiserror::Error;

use crate::crypto::{Hash, HASH_SIZE};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("not enough bytes to read")]
    NotEnoughBytes,

    #[error("invalid size")]
    InvalidSize,

    #[error("invalid value")]
    InvalidValue,

    #[error("invalid hex string")]
    InvalidHex,
}

// Cursor over an immutable byte slice, mirror of the Writer.
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        if count > self.bytes.len() - self.total {
            return Err(ReaderError::NotEnoughBytes);
        }
        let bytes = &self.bytes[self.total..self.total + count];
        self.total += count;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| ReaderError::InvalidSize)?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().map_err(|_| ReaderError::InvalidSize)?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        let bytes = self.read_bytes_32()?;
        Ok(Hash::new(bytes))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ReaderError> {
        Ok(self.take(count)?.to_vec())
    }

    pub fn read_bytes_20(&mut self) -> Result<[u8; 20], ReaderError> {
        self.take(20)?.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; HASH_SIZE], ReaderError> {
        self.take(HASH_SIZE)?.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(ReaderError::InvalidSize);
        }
        self.read_bytes(len as usize)
    }

    pub fn read_varint(&mut self) -> Result<u64, ReaderError> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(ReaderError::InvalidValue);
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(ReaderError::InvalidValue);
            }
        }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.total
    }

    pub fn total_read(&self) -> usize {
        self.total
    }

    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }
}
