//! Flat little-endian guest memory.

use jit_core::FastMem;

/// Power-of-two sized memory; addresses wrap at the size.
pub struct Ram {
    data: Vec<u8>,
    mask: u32,
}

impl Ram {
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two() && size as u64 <= 1 << 32,
            "ram size must be a power of two, got {size:#x}"
        );
        Self {
            data: vec![0; size],
            mask: (size - 1) as u32,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Host view of the backing store for direct access by compiled
    /// code. The storage never reallocates.
    pub fn fastmem(&mut self) -> FastMem {
        FastMem {
            base: self.data.as_mut_ptr() as usize,
            mask: self.mask,
        }
    }

    fn index(&self, addr: u32) -> usize {
        (addr & self.mask) as usize
    }

    pub fn read(&self, addr: u32, size: u32) -> u64 {
        (0..size).fold(0u64, |acc, i| {
            acc | (self.data[self.index(addr.wrapping_add(i))] as u64) << (i * 8)
        })
    }

    pub fn write(&mut self, addr: u32, size: u32, value: u64) {
        for i in 0..size {
            let idx = self.index(addr.wrapping_add(i));
            self.data[idx] = (value >> (i * 8)) as u8;
        }
    }

    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let idx = self.index(addr.wrapping_add(i as u32));
            self.data[idx] = *b;
        }
    }

    /// Copy 16-bit words in guest byte order.
    pub fn load_u16s(&mut self, addr: u32, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            self.write(addr.wrapping_add(i as u32 * 2), 2, *w as u64);
        }
    }

    pub fn load_u32s(&mut self, addr: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            self.write(addr.wrapping_add(i as u32 * 4), 4, *w as u64);
        }
    }
}
