//! Positions and trading partners of a process across the rounds.

use smallvec::SmallVec;

/// A process's partition index for every round.
pub(crate) type Indices = SmallVec<[usize; 8]>;

/// The position a process takes within its subgroup in each round:
/// `indices[r] = (group_rank / k_0⋯k_{r-1}) mod k_r`. The vector identifies
/// the process uniquely within the group.
pub(crate) fn partition_indices(k_array: &[usize], group_rank: usize) -> Indices {
    let mut step = 1;
    k_array
        .iter()
        .map(|&k| {
            let index = (group_rank / step) % k;
            step *= k;
            index
        })
        .collect()
}

/// The image-order position of the partition a process ends up owning: the
/// per-round digits packed with round 0 most significant, because round 0
/// cuts the image into the coarsest chunks.
pub(crate) fn final_partition_index(k_array: &[usize], indices: &[usize]) -> usize {
    k_array
        .iter()
        .zip(indices)
        .fold(0, |packed, (&k, &index)| packed * k + index)
}

/// Group ranks of the k processes trading pieces with `group_rank` in
/// `round`, in partner order. The caller itself sits at its partition index.
pub(crate) fn partner_group_ranks(
    k_array: &[usize],
    round: usize,
    group_rank: usize,
) -> impl Iterator<Item = usize> {
    let step: usize = k_array[..round].iter().product();
    let k = k_array[round];
    let partition_index = (group_rank / step) % k;
    let first = group_rank - partition_index * step;
    (0..k).map(move |i| first + i * step)
}
