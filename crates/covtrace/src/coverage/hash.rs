//! Integer avalanche mixers
//!
//! Multiply/xor-shift finalizers from the hash-prospector family. The set uses
//! them to derive fallback slot positions once the locality-preserving
//! linear steps collide.

/// Width-specific avalanche mixing
pub trait AvalancheMix: Copy {
    /// Mix all input bits into all output bits
    fn avalanche(self) -> Self;
}

/// Constants for the 64-bit finalizer (splitmix64 variant)
pub mod mix64 {
    /// First xor-shift distance
    pub const SHIFT_1: u32 = 30;
    /// First multiplier
    pub const MULTIPLIER_1: u64 = 0xbf58_476d_1ce4_e5b9;
    /// Second xor-shift distance
    pub const SHIFT_2: u32 = 27;
    /// Second multiplier
    pub const MULTIPLIER_2: u64 = 0x94d0_49bb_1331_11eb;
    /// Final xor-shift distance
    pub const SHIFT_3: u32 = 31;
}

/// Constants for the 32-bit finalizer (lowbias32)
pub mod mix32 {
    /// First xor-shift distance
    pub const SHIFT_1: u32 = 16;
    /// First multiplier
    pub const MULTIPLIER_1: u32 = 0x21f0_aaad;
    /// Second xor-shift distance
    pub const SHIFT_2: u32 = 15;
    /// Second multiplier
    pub const MULTIPLIER_2: u32 = 0x735a_2d97;
    /// Final xor-shift distance
    pub const SHIFT_3: u32 = 15;
}

impl AvalancheMix for u64 {
    #[inline]
    fn avalanche(self) -> Self {
        let mut x = self;
        x ^= x >> mix64::SHIFT_1;
        x = x.wrapping_mul(mix64::MULTIPLIER_1);
        x ^= x >> mix64::SHIFT_2;
        x = x.wrapping_mul(mix64::MULTIPLIER_2);
        x ^= x >> mix64::SHIFT_3;
        x
    }
}

impl AvalancheMix for u32 {
    #[inline]
    fn avalanche(self) -> Self {
        let mut x = self;
        x ^= x >> mix32::SHIFT_1;
        x = x.wrapping_mul(mix32::MULTIPLIER_1);
        x ^= x >> mix32::SHIFT_2;
        x = x.wrapping_mul(mix32::MULTIPLIER_2);
        x ^= x >> mix32::SHIFT_3;
        x
    }
}
