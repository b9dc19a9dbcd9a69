//! Tensor shapes with explicit strides.

use smallvec::SmallVec;

use crate::dtype::DType;

/// One dimension of a [`TensorShape`]. Stride is measured in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dim {
    pub size: usize,
    pub stride: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TensorShape {
    pub dtype: DType,
    pub dims: SmallVec<[Dim; 4]>,
}

impl TensorShape {
    /// A compact row-major shape over the given dimension sizes.
    pub fn new(dtype: DType, sizes: &[usize]) -> Self {
        let mut shape = Self { dtype, dims: sizes.iter().map(|&size| Dim { size, stride: 0 }).collect() };
        shape.restride_natural();
        shape
    }

    pub fn sizes(&self) -> SmallVec<[usize; 4]> {
        self.dims.iter().map(|d| d.size).collect()
    }

    /// Number of elements spanned by the strided layout.
    ///
    /// For a compact row-major shape this is the product of the sizes.
    pub fn elems_spanned(&self) -> usize {
        if self.dims.iter().any(|d| d.size == 0) {
            return 0;
        }
        1 + self.dims.iter().map(|d| (d.size - 1) * d.stride).sum::<usize>()
    }

    pub fn byte_size(&self) -> usize {
        self.elems_spanned() * self.dtype.bytes()
    }

    /// Rewrite the strides in place to compact row-major form, keeping sizes.
    pub fn restride_natural(&mut self) {
        let mut stride = 1;
        for dim in self.dims.iter_mut().rev() {
            dim.stride = stride;
            stride *= dim.size;
        }
    }

    /// The same dim sizes, restrided to compact row-major form.
    pub fn with_natural_striding(&self) -> Self {
        let mut shape = self.clone();
        shape.restride_natural();
        shape
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.dtype)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", dim.size, dim.stride)?;
        }
        write!(f, ")")
    }
}
