//! Iterator helpers.

use std::iter::Zip;

/// Zips two iterators that are required to have the same length.
///
/// Landmark lists, filter states and network outputs are always supposed to line up one to one;
/// plain [`Iterator::zip`] would silently truncate when they don't.
///
/// # Panics
///
/// Panics when the lengths of `a` and `b` differ.
#[track_caller]
pub fn zip_exact<A, B>(a: A, b: B) -> Zip<A::IntoIter, B::IntoIter>
where
    A: IntoIterator,
    B: IntoIterator,
    A::IntoIter: ExactSizeIterator,
    B::IntoIter: ExactSizeIterator,
{
    let (a, b) = (a.into_iter(), b.into_iter());
    assert_eq!(
        a.len(),
        b.len(),
        "`zip_exact` called on iterators of different lengths"
    );
    a.zip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_lengths() {
        let sum: i32 = zip_exact([1, 2, 3], [10, 20, 30]).map(|(a, b)| a * b).sum();
        assert_eq!(sum, 140);
    }

    #[test]
    #[should_panic(expected = "different lengths")]
    fn mismatched_lengths() {
        zip_exact([1, 2, 3], [1, 2]).for_each(drop);
    }
}
