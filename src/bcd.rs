/*!
 # Packed decimal register bytes

 The RTC stores every time field as two 4-bit nibbles, tens and units.
*/

/// Decodes a packed two-nibble byte: `10 * (v / 16) + v % 16`.
///
/// Nibbles above 9 are not rejected, so `0x0E` decodes to 14.
pub fn bcd_to_dec(value: u8) -> u8 {
    10 * (value >> 4) + (value & 0x0F)
}

/// Encodes a decimal value (0-99) into a packed two-nibble byte.
pub fn dec_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decodes a sequence of register bytes, preserving order.
pub fn decode_all(raw: &[u8]) -> Vec<u8> {
    raw.iter().copied().map(bcd_to_dec).collect()
}
