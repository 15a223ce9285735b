//! Host-backed tensor shared between blob conversion and backend kernels.

use std::mem::{size_of, ManuallyDrop};

use anyhow::{bail, Result};

use super::{dtype::DType, shape::Shape};

/// Owned n-dimensional array with row-major byte storage.
///
/// Axis order is normalized at blob-conversion time (spatial-minor,
/// channel next, filter last) and never re-permuted afterwards.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Tensor {
            shape,
            dtype: DType::F32,
            data: vec_into_bytes(data),
        })
    }

    /// Constructs a `U8` tensor, ensuring the payload matches the expected element count.
    pub fn from_u8(shape: Shape, data: Vec<u8>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Tensor {
            shape,
            dtype: DType::U8,
            data,
        })
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: Shape) -> Self {
        let len = shape.num_elements();
        Tensor {
            shape,
            dtype: DType::F32,
            data: vec_into_bytes(vec![0.0f32; len]),
        }
    }

    /// Returns an `F32` tensor filled with a constant value.
    pub fn filled(shape: Shape, value: f32) -> Self {
        let len = shape.num_elements();
        Tensor {
            shape,
            dtype: DType::F32,
            data: vec_into_bytes(vec![value; len]),
        }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Provides access to the tensor shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the scalar dtype of the tensor payload.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Borrows the underlying `f32` data slice, panicking if the dtype differs.
    pub fn data(&self) -> &[f32] {
        match self.dtype {
            DType::F32 => bytes_as_slice::<f32>(&self.data),
            DType::U8 => panic!("tensor data is not stored as f32"),
        }
    }

    /// Mutably borrows the `f32` data slice, panicking if the dtype differs.
    pub fn data_mut(&mut self) -> &mut [f32] {
        match self.dtype {
            DType::F32 => bytes_as_slice_mut::<f32>(&mut self.data),
            DType::U8 => panic!("tensor data is not stored as mutable f32"),
        }
    }

    /// Borrows the underlying `u8` data slice, panicking if the dtype differs.
    pub fn data_u8(&self) -> &[u8] {
        match self.dtype {
            DType::U8 => &self.data,
            DType::F32 => panic!("tensor data is not stored as u8"),
        }
    }

    /// Reads one `f32` element by multi-dimensional index.
    pub fn at(&self, index: &[usize]) -> f32 {
        self.data()[self.shape.offset(index)]
    }

    /// Writes one `f32` element by multi-dimensional index.
    pub fn set(&mut self, index: &[usize], value: f32) {
        let offset = self.shape.offset(index);
        self.data_mut()[offset] = value;
    }

    /// Returns a copy of the tensor collapsed to one axis.
    pub fn flattened(&self) -> Result<Tensor> {
        Tensor::from_vec(Shape::new(vec![self.len()]), self.data().to_vec())
    }
}

/// Converts an owned vector into a raw byte buffer without copying.
fn vec_into_bytes<T>(data: Vec<T>) -> Vec<u8> {
    let mut data = ManuallyDrop::new(data);
    let ptr = data.as_mut_ptr() as *mut u8;
    let len = data.len() * size_of::<T>();
    let cap = data.capacity() * size_of::<T>();
    unsafe { Vec::from_raw_parts(ptr, len, cap) }
}

/// Views a byte slice as a typed slice, asserting that the layout matches.
fn bytes_as_slice<T>(bytes: &[u8]) -> &[T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, bytes.len() / size_of::<T>()) }
}

/// Views a mutable byte slice as a typed mutable slice, asserting the layout.
fn bytes_as_slice_mut<T>(bytes: &mut [u8]) -> &mut [T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    unsafe {
        std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut T, bytes.len() / size_of::<T>())
    }
}
