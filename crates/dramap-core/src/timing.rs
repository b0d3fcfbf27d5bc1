//! Cache and timestamp primitives.
//!
//! This is the only module touching processor instructions directly. Every
//! measurement in the crate is built from the same skeleton: flush the
//! participating lines, `mfence`, read the TSC, perform the accesses,
//! `lfence`, read the TSC again. The fences keep the accesses inside the
//! timed region; the volatile load keeps the compiler from removing them.

use std::arch::x86_64::{__rdtscp, _mm_clflush, _mm_lfence, _mm_mfence};

/// Evicts the cache line containing `addr` from the whole hierarchy.
#[inline(always)]
pub(crate) fn flush(addr: *const u8) {
    unsafe { _mm_clflush(addr) };
}

/// Full memory fence.
#[inline(always)]
pub(crate) fn mfence() {
    unsafe { _mm_mfence() };
}

/// Load fence; retires all preceding loads before the next timestamp read.
#[inline(always)]
pub(crate) fn lfence() {
    unsafe { _mm_lfence() };
}

/// Serializing timestamp read (`rdtscp`).
#[inline(always)]
pub(crate) fn timestamp() -> u64 {
    let mut aux = 0u32;
    unsafe { __rdtscp(&mut aux) }
}

/// Volatile byte load that cannot be elided or hoisted out of the timed
/// region.
#[inline(always)]
pub(crate) fn load(addr: *const u8) -> u8 {
    unsafe { std::ptr::read_volatile(addr) }
}
