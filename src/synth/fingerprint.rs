//! FNV-1a over 64-bit words.
//!
//! Seeds and cache keys must not change between toolchains, so this stands in
//! for `std::hash::DefaultHasher`, whose algorithm is unspecified.

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Fingerprint(u64);

impl Fingerprint {
    pub(crate) fn new() -> Self {
        Self(OFFSET_BASIS)
    }

    pub(crate) fn write_u64(&mut self, word: u64) {
        for byte in word.to_le_bytes() {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    pub(crate) fn write_f32s(&mut self, values: &[f32]) {
        self.write_u64(values.len() as u64);
        for v in values {
            self.write_u64(u64::from(v.to_bits()));
        }
    }

    pub(crate) fn finish(&self) -> u64 {
        self.0
    }
}
