//! Compute kernels for ternary matrix operations.

pub mod bitlinear;
pub mod ternary;

pub use bitlinear::{bitlinear, bitlinear_accumulate, bitlinear_into, ternary_dot};
pub use ternary::{
    pack_ternary, packed_len, unpack_ternary, unpack_ternary_tensor, TernaryWeight,
};
