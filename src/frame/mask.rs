/// XOR `payload` in place with the four-byte masking `key`.
///
/// Masking is an involution: applying the same key twice restores the input.
///
/// # Examples
///
/// ```
/// use wspipe::frame::apply_mask;
///
/// let key = [0x37, 0xfa, 0x21, 0x3d];
/// let mut data = *b"Hello";
/// apply_mask(&mut data, key);
/// assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
/// ```
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (byte, mask) in payload.iter_mut().zip(key.iter().cycle()) {
        *byte ^= mask;
    }
}
