//! Mathematical utilities

pub mod address;

pub use address::{decode_address, encode_address};
