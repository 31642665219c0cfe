//! Common-cell resolution across sessions.

use std::collections::{BTreeSet, HashSet};

use crate::types::CellId;

/// Returns the cells present in every one of `sets`.
///
/// An empty `sets` yields an empty result, as does any pair of disjoint
/// sets. An empty intersection is not an error; it produces a tensor with a
/// zero-length cell axis.
///
/// # Example
/// ```
/// use ophys_tensor::align::common_cells;
/// use ophys_tensor::CellId;
///
/// let a = [CellId(1), CellId(2), CellId(3)];
/// let b = [CellId(2), CellId(3), CellId(4)];
/// let common = common_cells([&a[..], &b[..]]);
/// assert_eq!(common.into_iter().collect::<Vec<_>>(), vec![CellId(2), CellId(3)]);
/// ```
pub fn common_cells<'a, I>(sets: I) -> BTreeSet<CellId>
where
    I: IntoIterator<Item = &'a [CellId]>,
{
    let mut sets = sets.into_iter();
    let mut common: BTreeSet<CellId> = match sets.next() {
        Some(first) => first.iter().copied().collect(),
        None => return BTreeSet::new(),
    };

    for set in sets {
        if common.is_empty() {
            break;
        }
        let present: HashSet<CellId> = set.iter().copied().collect();
        common.retain(|cell| present.contains(cell));
    }

    common
}

/// Returns the common cells in tensor order (ascending id).
///
/// The order depends only on the ids, so it is identical across runs and
/// between freshly computed and cached subjects.
pub fn common_cell_order<'a, I>(sets: I) -> Vec<CellId>
where
    I: IntoIterator<Item = &'a [CellId]>,
{
    common_cells(sets).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<CellId> {
        raw.iter().copied().map(CellId).collect()
    }

    #[test]
    fn test_single_session_is_its_own_intersection() {
        let a = ids(&[5, 1, 3]);
        assert_eq!(common_cell_order([a.as_slice()]), ids(&[1, 3, 5]));
    }

    #[test]
    fn test_overlapping_sessions() {
        let a = ids(&[1, 2, 3]);
        let b = ids(&[2, 3, 4]);
        assert_eq!(common_cell_order([a.as_slice(), b.as_slice()]), ids(&[2, 3]));
    }

    #[test]
    fn test_disjoint_sessions_are_empty() {
        let a = ids(&[1, 2]);
        let b = ids(&[3, 4]);
        let c = ids(&[1, 2, 3, 4]);
        assert!(common_cells([a.as_slice(), b.as_slice(), c.as_slice()]).is_empty());
    }

    #[test]
    fn test_no_sessions() {
        let empty: [&[CellId]; 0] = [];
        assert!(common_cells(empty).is_empty());
    }

    #[test]
    fn test_duplicate_ids_collapse() {
        let a = ids(&[7, 7, 2]);
        let b = ids(&[2, 7]);
        assert_eq!(common_cell_order([a.as_slice(), b.as_slice()]), ids(&[2, 7]));
    }

    #[test]
    fn test_order_independent_of_session_order() {
        let a = ids(&[9, 4, 6, 1]);
        let b = ids(&[1, 6, 9]);
        assert_eq!(
            common_cell_order([a.as_slice(), b.as_slice()]),
            common_cell_order([b.as_slice(), a.as_slice()])
        );
    }
}
