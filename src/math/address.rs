//! Packed 64-bit cube addresses
//!
//! Layout, most significant bits first: `x` (22 bits) | `y` (20 bits) | `z` (22 bits),
//! each stored two's complement and sign-extended on decode.

pub const X_BITS: u32 = 22;
pub const Y_BITS: u32 = 20;
pub const Z_BITS: u32 = 22;

const X_MASK: u64 = (1 << X_BITS) - 1;
const Y_MASK: u64 = (1 << Y_BITS) - 1;
const Z_MASK: u64 = (1 << Z_BITS) - 1;

const Z_SHIFT: u32 = 0;
const Y_SHIFT: u32 = Z_BITS;
const X_SHIFT: u32 = Z_BITS + Y_BITS;

/// Smallest / largest encodable x and z.
pub const MIN_XZ: i32 = -(1 << (X_BITS - 1));
pub const MAX_XZ: i32 = (1 << (X_BITS - 1)) - 1;
/// Smallest / largest encodable y.
pub const MIN_Y: i32 = -(1 << (Y_BITS - 1));
pub const MAX_Y: i32 = (1 << (Y_BITS - 1)) - 1;

/// Sign-extend the low `bits` bits of `value`
fn sign_extend(value: u64, bits: u32) -> i32 {
    let shift = 64 - bits;
    ((value << shift) as i64 >> shift) as i32
}

/// Whether `(x, y, z)` fits the address layout
pub fn in_range(x: i32, y: i32, z: i32) -> bool {
    (MIN_XZ..=MAX_XZ).contains(&x) && (MIN_Y..=MAX_Y).contains(&y) && (MIN_XZ..=MAX_XZ).contains(&z)
}

/// Pack cube coordinates into an address
pub fn encode_address(x: i32, y: i32, z: i32) -> u64 {
    debug_assert!(in_range(x, y, z), "cube ({}, {}, {}) out of address range", x, y, z);
    ((x as u64 & X_MASK) << X_SHIFT) | ((y as u64 & Y_MASK) << Y_SHIFT) | ((z as u64 & Z_MASK) << Z_SHIFT)
}

/// Unpack an address back to cube coordinates
pub fn decode_address(address: u64) -> (i32, i32, i32) {
    (
        sign_extend((address >> X_SHIFT) & X_MASK, X_BITS),
        sign_extend((address >> Y_SHIFT) & Y_MASK, Y_BITS),
        sign_extend((address >> Z_SHIFT) & Z_MASK, Z_BITS),
    )
}
