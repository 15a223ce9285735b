//! Backend abstraction consumed by the layer dispatcher.

pub mod spec;

pub use spec::{
    BackendError, BackendResult, Conv2dSpec, LrnSpec, MathBackend, NormRegion, Pool2dSpec,
    PoolKind, UnaryOp,
};
