//! Scalar element types stored by host tensors.

/// Element type of a tensor payload.
///
/// `U8` exists for raw image input; every converted weight and every
/// activation produced by a backend is `F32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    U8,
}

impl DType {
    /// Returns the storage size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::U8 => 1,
        }
    }
}
