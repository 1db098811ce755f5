use primitive_types::U256;

// Byte addressed scratch memory, grown in 32-byte words. Growth cost
// is charged by the interpreter before any resize happens.
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Current size in 32-byte words
    pub fn words(&self) -> u64 {
        (self.data.len() as u64).div_ceil(32)
    }

    // Grow to cover [offset, offset + size), rounded up to a word
    pub fn resize(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let end = offset + size;
        let target = end.div_ceil(32) * 32;
        if target > self.data.len() {
            self.data.resize(target, 0);
        }
    }

    pub fn set(&mut self, offset: usize, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.resize(offset, data.len());
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn set_byte(&mut self, offset: usize, byte: u8) {
        self.resize(offset, 1);
        self.data[offset] = byte;
    }

    pub fn set_word(&mut self, offset: usize, word: &U256) {
        self.set(offset, &word.to_big_endian());
    }

    // Copy with zero padding beyond the source, the semantics every
    // *COPY opcode shares
    pub fn set_padded(&mut self, offset: usize, source: &[u8], source_offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        self.resize(offset, size);
        for i in 0..size {
            self.data[offset + i] = source.get(source_offset + i).copied().unwrap_or(0);
        }
    }

    pub fn get(&self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        let mut out = vec![0u8; size];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.data.get(offset + i).copied().unwrap_or(0);
        }
        out
    }

    pub fn load_word(&self, offset: usize) -> U256 {
        let bytes = self.get(offset, 32);
        U256::from_big_endian(&bytes)
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_roundtrip() {
        let mut memory = Memory::new();
        memory.set_word(0, &U256::from(0x2a_u64));
        assert_eq!(memory.load_word(0), U256::from(0x2a_u64));
        assert_eq!(memory.len(), 32);
    }

    #[test]
    fn test_resize_rounds_to_words() {
        let mut memory = Memory::new();
        memory.set_byte(33, 0xff);
        assert_eq!(memory.len(), 64);
        assert_eq!(memory.words(), 2);
    }

    #[test]
    fn test_padded_copy() {
        let mut memory = Memory::new();
        memory.set_padded(0, b"abc", 1, 4);
        assert_eq!(&memory.get(0, 4), &[b'b', b'c', 0, 0]);
    }
}
