//! Network byte-order helpers for frame header lengths and close codes.
//!
//! Clippy expectations stay scoped to these conversion points so the frame
//! codec can remain explicit about wire endianness.

/// Serialise a `u16` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use wspipe::byte_order::write_network_u16;
///
/// assert_eq!(write_network_u16(1000), [0x03, 0xE8]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16`.
///
/// # Examples
///
/// ```
/// use wspipe::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x03, 0xE8]), 1000);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Serialise a `u64` in network byte order, as used by 64-bit frame lengths.
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u64`.
///
/// # Examples
///
/// ```
/// use wspipe::byte_order::read_network_u64;
///
/// assert_eq!(read_network_u64([0, 0, 0, 0, 0, 1, 0, 0]), 65_536);
/// ```
#[must_use]
pub fn read_network_u64(bytes: [u8; 8]) -> u64 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u64::from_be_bytes(bytes)
}
