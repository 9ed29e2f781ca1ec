//! HyperLogLog cardinality sketch for the in-memory backend.
//!
//! Uses 2^14 six-bit registers (stored as bytes), the same precision Redis
//! uses for `PFADD`/`PFCOUNT`, giving a standard error of about 0.81%.
//! Small cardinalities are corrected with linear counting.

use sha2::{Digest, Sha256};

const PRECISION: u32 = 14;
const REGISTERS: usize = 1 << PRECISION;

#[derive(Clone)]
pub struct HyperLogLog {
    registers: Box<[u8]>,
}

impl std::fmt::Debug for HyperLogLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperLogLog")
            .field("estimate", &self.count())
            .finish()
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        Self {
            registers: vec![0u8; REGISTERS].into_boxed_slice(),
        }
    }

    /// Inserts a member. Returns `true` if a register changed.
    pub fn insert(&mut self, member: &str) -> bool {
        let hash = hash64(member);
        let index = (hash >> (64 - PRECISION)) as usize;
        // Sentinel bit bounds the rank when the remaining bits are all zero.
        let rest = (hash << PRECISION) | (1 << (PRECISION - 1));
        let rank = rest.leading_zeros() as u8 + 1;

        let slot = &mut self.registers[index];
        if rank > *slot {
            *slot = rank;
            true
        } else {
            false
        }
    }

    /// Estimated number of distinct members inserted.
    pub fn count(&self) -> u64 {
        let m = REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &register in self.registers.iter() {
            sum += 2f64.powi(-i32::from(register));
            if register == 0 {
                zeros += 1;
            }
        }

        let raw = alpha * m * m / sum;
        let estimate = if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        };
        estimate.round() as u64
    }
}

fn hash64(member: &str) -> u64 {
    let digest = Sha256::digest(member.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
