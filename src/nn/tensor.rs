//! `f32` tensors exchanged with the networks.
//!
//! A [`Tensor`] owns a dense row-major N-dimensional array. Indexing a prefix of its dimensions
//! yields a [`TensorView`] of the remaining ones, which is how network outputs like
//! `[1, 2016, 18]` box lists are taken apart.

use std::fmt;

use anyhow::{bail, Context};
use tinyvec::TinyVec;

use crate::iter::zip_exact;

type Shape = TinyVec<[usize; 4]>;

/// An owned, dynamically shaped tensor of `f32`s.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Box<[f32]>,
}

/// A borrowed view of the trailing dimensions of a [`Tensor`].
#[derive(Clone, Copy, PartialEq)]
pub struct TensorView<'a> {
    shape: &'a [usize],
    data: &'a [f32],
}

impl Tensor {
    /// Creates a tensor of shape `shape` by calling `f` with the index of every element, in
    /// row-major order (`[0, .., 0]`, `[0, .., 1]` and so on).
    pub fn from_shape_fn<const N: usize>(
        shape: [usize; N],
        mut f: impl FnMut([usize; N]) -> f32,
    ) -> Self {
        let len = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut index = [0; N];
        for _ in 0..len {
            data.push(f(index));
            // Odometer-style increment, last dimension first.
            for (i, size) in zip_exact(index.iter_mut(), shape).rev() {
                *i += 1;
                if *i < size {
                    break;
                }
                *i = 0;
            }
        }

        Self {
            shape: shape.iter().copied().collect(),
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a tensor of shape `shape` from the elements yielded by `iter`, in row-major order.
    ///
    /// # Panics
    ///
    /// Panics if `iter` does not yield exactly as many elements as `shape` describes.
    #[track_caller]
    pub fn from_iter(shape: &[usize], iter: impl IntoIterator<Item = f32>) -> Self {
        let data: Box<[f32]> = iter.into_iter().collect();
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "tensor of shape {shape:?} needs {expected} elements"
        );
        Self {
            shape: shape.iter().copied().collect(),
            data,
        }
    }

    pub(super) fn from_tract(tract: &tract_onnx::prelude::Tensor) -> anyhow::Result<Self> {
        let data = tract
            .as_slice::<f32>()
            .context("network produced a non-f32 tensor")?;
        Ok(Self {
            shape: tract.shape().iter().copied().collect(),
            data: data.into(),
        })
    }

    pub(super) fn to_tract(&self) -> anyhow::Result<tract_onnx::prelude::Tensor> {
        Ok(tract_onnx::prelude::Tensor::from_shape(
            &self.shape,
            &self.data,
        )?)
    }

    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            shape: &self.shape,
            data: &self.data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Indexes the leading `N` dimensions; see [`TensorView::index`].
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'_> {
        self.view().index(indices)
    }

    /// Iterates over the outermost dimension.
    #[track_caller]
    pub fn iter(&self) -> impl Iterator<Item = TensorView<'_>> {
        self.view().into_iter()
    }

    /// Returns the elements of a 1-dimensional tensor.
    #[track_caller]
    pub fn as_slice(&self) -> &[f32] {
        self.view().as_slice()
    }

    /// Returns the element of a 0-dimensional tensor.
    #[track_caller]
    pub fn as_singular(&self) -> f32 {
        self.view().as_singular()
    }

    /// Checks that the tensor has shape `expected`, for validating network outputs.
    pub fn expect_shape(&self, expected: &[usize]) -> anyhow::Result<()> {
        if self.shape() != expected {
            bail!(
                "unexpected tensor shape {:?} (expected {:?})",
                self.shape(),
                expected
            );
        }
        Ok(())
    }
}

impl From<f32> for Tensor {
    fn from(value: f32) -> Self {
        Self::from_iter(&[], [value])
    }
}

impl<const N: usize> From<[f32; N]> for Tensor {
    fn from(array: [f32; N]) -> Self {
        Self::from_iter(&[N], array)
    }
}

impl From<&[f32]> for Tensor {
    fn from(slice: &[f32]) -> Self {
        Self::from_iter(&[slice.len()], slice.iter().copied())
    }
}

impl<'a> TensorView<'a> {
    pub fn shape(&self) -> &'a [usize] {
        self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Indexes the leading `N` dimensions, returning a view of the remaining ones.
    ///
    /// Indexing a `[2, 3, 4]` tensor with `[a, b]` yields a view of shape `[4]`; `[]` yields the
    /// same view.
    ///
    /// # Panics
    ///
    /// Panics if `N` exceeds the rank, or if an index is out of bounds.
    #[track_caller]
    pub fn index<const N: usize>(&self, indices: [usize; N]) -> TensorView<'a> {
        assert!(
            N <= self.rank()
                && zip_exact(indices.iter(), &self.shape[..N]).all(|(i, len)| i < len),
            "index {indices:?} is out of bounds for tensor of shape {:?}",
            self.shape,
        );

        let mut data = self.data;
        for (dim, index) in indices.into_iter().enumerate() {
            let stride: usize = self.shape[dim + 1..].iter().product();
            data = &data[index * stride..(index + 1) * stride];
        }
        TensorView {
            shape: &self.shape[N..],
            data,
        }
    }

    #[track_caller]
    pub fn as_slice(&self) -> &'a [f32] {
        assert_eq!(
            self.rank(),
            1,
            "tensor of shape {:?} accessed as slice",
            self.shape
        );
        self.data
    }

    #[track_caller]
    pub fn as_singular(&self) -> f32 {
        assert_eq!(
            self.rank(),
            0,
            "tensor of shape {:?} accessed as single value",
            self.shape
        );
        self.data[0]
    }
}

impl<'a> IntoIterator for TensorView<'a> {
    type Item = TensorView<'a>;
    type IntoIter = Box<dyn Iterator<Item = TensorView<'a>> + 'a>;

    /// Iterates over the outermost dimension.
    ///
    /// # Panics
    ///
    /// Panics if the view is 0-dimensional.
    fn into_iter(self) -> Self::IntoIter {
        assert!(self.rank() > 0, "cannot iterate over a 0-dimensional tensor");
        Box::new((0..self.shape[0]).map(move |i| self.index([i])))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.view(), f)
    }
}

impl fmt::Debug for TensorView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank() {
            0 => write!(f, "{}", self.data[0]),
            1 if self.data.len() <= 8 => f.debug_list().entries(self.data).finish(),
            _ => write!(f, "Tensor{:?}", self.shape),
        }
    }
}
