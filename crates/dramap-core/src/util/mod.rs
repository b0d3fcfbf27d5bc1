//! Shared helpers: platform constants, GF(2) bit manipulation, measurement
//! tables, and seedable randomness.

mod constants;
mod gf2;
mod histogram;
mod rng;

pub use self::constants::*;
pub use self::gf2::{
    generate_all_combinations, next_bit_permutation, parity, reduce_functions, xor_reduce,
    xor_reduce_masks,
};
pub use self::histogram::{Histogram, Stats};
pub use self::rng::Rng;
