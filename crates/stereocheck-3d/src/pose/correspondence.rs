use serde::{Deserialize, Serialize};

use super::FundamentalError;

/// Matched points of two views.
///
/// Point `i` of the first view and point `i` of the second view are images of the
/// same scene point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrespondencePair {
    points1: Vec<[f64; 2]>,
    points2: Vec<[f64; 2]>,
}

impl CorrespondencePair {
    /// Create correspondences from two position aligned point lists.
    ///
    /// # Errors
    ///
    /// Returns [`FundamentalError::LengthMismatch`] if the lists differ in length.
    pub fn new(points1: Vec<[f64; 2]>, points2: Vec<[f64; 2]>) -> Result<Self, FundamentalError> {
        if points1.len() != points2.len() {
            return Err(FundamentalError::LengthMismatch(points1.len(), points2.len()));
        }
        Ok(Self { points1, points2 })
    }

    /// Append a matched pair.
    pub fn push(&mut self, p1: [f64; 2], p2: [f64; 2]) {
        self.points1.push(p1);
        self.points2.push(p2);
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.points1.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.points1.is_empty()
    }

    /// Points of the first view.
    pub fn points1(&self) -> &[[f64; 2]] {
        &self.points1
    }

    /// Points of the second view.
    pub fn points2(&self) -> &[[f64; 2]] {
        &self.points2
    }

    /// Iterate over the pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&[f64; 2], &[f64; 2])> + '_ {
        self.points1.iter().zip(self.points2.iter())
    }

    /// The pairs at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            points1: indices.iter().map(|&i| self.points1[i]).collect(),
            points2: indices.iter().map(|&i| self.points2[i]).collect(),
        }
    }

    /// The pairs whose mask entry is true.
    pub fn masked(&self, mask: &[bool]) -> Self {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        self.select(&indices)
    }
}

impl FromIterator<([f64; 2], [f64; 2])> for CorrespondencePair {
    fn from_iter<I: IntoIterator<Item = ([f64; 2], [f64; 2])>>(iter: I) -> Self {
        let (points1, points2) = iter.into_iter().unzip();
        Self { points1, points2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch() {
        let res = CorrespondencePair::new(vec![[0.0, 0.0]], vec![]);
        assert_eq!(res, Err(FundamentalError::LengthMismatch(1, 0)));
    }

    #[test]
    fn test_select_and_mask() -> Result<(), FundamentalError> {
        let pairs = CorrespondencePair::new(
            vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
            vec![[10.0, 0.0], [11.0, 1.0], [12.0, 2.0]],
        )?;
        let sel = pairs.select(&[2, 0]);
        assert_eq!(sel.points1(), &[[2.0, 2.0], [0.0, 0.0]]);
        assert_eq!(sel.points2(), &[[12.0, 2.0], [10.0, 0.0]]);

        let masked = pairs.masked(&[false, true, false]);
        assert_eq!(masked.len(), 1);
        assert_eq!(masked.points2(), &[[11.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn test_collect_pairs() {
        let pairs: CorrespondencePair = (0..4)
            .map(|i| ([i as f64, 0.0], [i as f64 + 5.0, 0.0]))
            .collect();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs.iter().nth(3), Some((&[3.0, 0.0], &[8.0, 0.0])));
    }
}
