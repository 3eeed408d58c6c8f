use rayon::prelude::*;

/// A match between a query and a train descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorMatch {
    /// Index into the query descriptors.
    pub query: usize,
    /// Index into the train descriptors.
    pub train: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Hamming distance between two binary descriptors.
#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

/// Match binary descriptors by brute force with Lowe's ratio test.
///
/// For each query descriptor the two nearest train descriptors are found. The
/// nearest one is kept only when its distance is strictly below `ratio` times the
/// distance of the second nearest. Queries without a second neighbour are dropped.
///
/// # Arguments
///
/// * `query` - The query descriptors.
/// * `train` - The train descriptors.
/// * `ratio` - The ratio test threshold, e.g. 0.8.
///
/// # Returns
///
/// The accepted matches ordered by query index.
pub fn match_descriptors_ratio<const N: usize>(
    query: &[[u8; N]],
    train: &[[u8; N]],
    ratio: f32,
) -> Vec<DescriptorMatch> {
    if train.len() < 2 {
        return vec![];
    }

    query
        .par_iter()
        .enumerate()
        .filter_map(|(i, q)| {
            let mut best = (usize::MAX, u32::MAX);
            let mut second = u32::MAX;
            for (j, t) in train.iter().enumerate() {
                let dist = hamming_distance(q, t);
                if dist < best.1 {
                    second = best.1;
                    best = (j, dist);
                } else if dist < second {
                    second = dist;
                }
            }

            ((best.1 as f32) < ratio * second as f32).then_some(DescriptorMatch {
                query: i,
                train: best.0,
                distance: best.1,
            })
        })
        .collect()
}
