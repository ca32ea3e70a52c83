//! Primitive types shared across the Unit-e finalization core.

pub mod amount;
pub mod buf;
pub mod difficulty;
pub mod hash;
pub mod merkle;
pub mod params;
pub mod ufp64;

pub mod prelude {
    pub use crate::{
        amount::{Amount, UNIT},
        buf::{Buf20, Buf32, Buf64},
        params::{Height, Epoch, Dynasty, Parameters, Time},
        ufp64::Ufp64,
    };
}
