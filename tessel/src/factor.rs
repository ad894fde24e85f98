//! Factoring a group size into per-round radices.

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Factors of a group size, ordered by round. Groups rarely need more than a
/// handful of rounds, so the vector lives inline.
pub(crate) type Factors = SmallVec<[usize; 8]>;

/// Visits `pivot`, then `pivot - 1`, `pivot + 1`, `pivot - 2`, … within
/// `[lo, end)`, skipping whichever side has run out of range.
pub(crate) fn pivot_order(lo: usize, end: usize, pivot: usize) -> impl Iterator<Item = usize> {
    debug_assert!(lo <= pivot && pivot < end);
    let max_distance = (pivot - lo).max(end - 1 - pivot);
    core::iter::once(pivot).chain((1..=max_distance).flat_map(move |d| {
        let below = (pivot >= lo + d).then(|| pivot - d);
        let above = (pivot + d < end).then(|| pivot + d);
        below.into_iter().chain(above)
    }))
}

/// Decomposes `group_size` into an ordered list of radices whose product is
/// `group_size`, preferring factors close to `magic_k`.
///
/// Each radix is chosen greedily: `magic_k` itself when it divides what is
/// left, otherwise the divisor nearest `magic_k` below `2 * magic_k`
/// (visited in pivot order, so the magic value wins outright when it
/// divides), otherwise the smallest divisor up to the square root, otherwise
/// what is left is prime-like and becomes a single large radix.
pub(crate) fn factorize(group_size: usize, magic_k: usize) -> Result<Factors> {
    debug_assert!(magic_k >= 2);

    // No sequence of factors >= 2 can be longer than log2 of the product.
    let max_factors = if group_size >= 2 {
        group_size.ilog2() as usize
    } else {
        0
    };

    let mut factors = Factors::new();
    let mut n = group_size;
    while n > 1 {
        let next = if n % magic_k == 0 {
            magic_k
        } else if let Some(k) = pivot_order(2, 2 * magic_k, magic_k).find(|k| n % k == 0) {
            k
        } else if let Some(k) = (2 * magic_k..=n.isqrt()).find(|k| n % k == 0) {
            k
        } else {
            // A large prime (or a number with only large factors): give up
            // and finish in one round.
            n
        };

        factors.push(next);
        n /= next;

        if factors.len() > max_factors {
            return Err(Error::TooManyFactors);
        }
    }

    if factors.iter().product::<usize>() != group_size.max(1) {
        return Err(Error::FactorProductMismatch);
    }

    Ok(factors)
}
