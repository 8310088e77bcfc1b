use std::hint::black_box;

/// Accumulates every touched byte so the reads cannot be optimized away.
#[derive(Debug, Default)]
pub struct Sink {
    acc: u8,
}

impl Sink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `byte` through a volatile load and folds it into the accumulator.
    #[inline(always)]
    pub fn touch(&mut self, byte: &u8) {
        // SAFETY: `byte` is a valid reference for the duration of the call.
        let value = unsafe { std::ptr::read_volatile(byte) };
        self.absorb(value);
    }

    #[inline(always)]
    pub fn absorb(&mut self, value: u8) {
        self.acc = black_box(self.acc.wrapping_add(value));
    }

    pub fn value(&self) -> u8 {
        self.acc
    }
}
