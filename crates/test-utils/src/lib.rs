//! Test helpers shared across the workspace: arbitrary value
//! generation and a scriptable in-memory chain.

pub mod chain;

use std::cell::Cell;

use arbitrary::{Arbitrary, Unstructured};
use rand::{rngs::OsRng, RngCore};

pub use chain::TestChain;

/// Pool of randomness to pull arbitrary values from in tests. Values
/// are drawn from consecutive slices of the pool, so successive calls
/// yield independent instances.
pub struct ArbitraryGenerator {
    buf: Vec<u8>,
    off: Cell<usize>,
}

impl Default for ArbitraryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbitraryGenerator {
    pub fn new() -> Self {
        Self::new_with_size(1 << 12)
    }

    pub fn new_with_size(n: usize) -> Self {
        let mut buf = vec![0; n];
        OsRng.fill_bytes(&mut buf);
        Self {
            buf,
            off: Cell::new(0),
        }
    }

    pub fn generate<'a, T: Arbitrary<'a> + Clone>(&'a self) -> T {
        let off = self.off.get();
        let mut u = Unstructured::new(&self.buf[off..]);
        let before = u.len();
        let value = T::arbitrary(&mut u).expect("failed to generate arbitrary instance");
        self.off.set(off + (before - u.len()));
        value
    }
}
