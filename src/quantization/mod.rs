//! Int8 saturation rules shared by every stage of the forward pass.

pub mod saturate;

pub use saturate::{residual_add, saturate_f32, saturate_i32};
