//! # XOR Checksum
//!
//! Checksum policy for the Kobuki serial protocol.
//!
//! The checksum byte is the XOR of the length byte and every payload byte.
//! A received frame is therefore valid iff the XOR of everything from the
//! length byte through the checksum byte is zero.

/// Checksum policy injected into the framer.
///
/// Called with the bytes from the length field through the checksum byte;
/// the frame is accepted iff the result is zero.
pub type ChecksumFn = fn(&[u8]) -> u8;

/// XOR all bytes together
///
/// # Arguments
///
/// * `data` - Bytes to fold (length + payload, optionally followed by the checksum)
///
/// # Returns
///
/// * `u8` - XOR of all bytes (0 for an empty slice)
///
/// # Examples
///
/// ```
/// use kobuki_driver::protocol::checksum::xor_checksum;
///
/// let body = [0x04, 0x01, 0x02, 0x00, 0x00];
/// let cs = xor_checksum(&body);
/// let mut framed = body.to_vec();
/// framed.push(cs);
/// assert_eq!(xor_checksum(&framed), 0);
/// ```
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(xor_checksum(&[]), 0x00);
    }

    #[test]
    fn test_checksum_single_byte() {
        assert_eq!(xor_checksum(&[0x00]), 0x00);
        assert_eq!(xor_checksum(&[0xFF]), 0xFF);
    }

    #[test]
    fn test_checksum_appended_zeroes_total() {
        let body = [0x06, 0x01, 0x04, 0x2C, 0x01, 0x00, 0x00];
        let mut frame = body.to_vec();
        frame.push(xor_checksum(&body));
        assert_eq!(xor_checksum(&frame), 0);
    }

    #[test]
    fn test_checksum_changes_with_data() {
        let data1 = [0x04, 0x01, 0x02, 0x00, 0x04];
        let data2 = [0x04, 0x01, 0x02, 0x00, 0x05];
        assert_ne!(xor_checksum(&data1), xor_checksum(&data2));
    }

    #[test]
    fn test_checksum_detects_every_single_byte_change() {
        let body = [0x0F, 0x01, 0x0D, 0x10, 0x27, 0x00, 0x00, 0x00];
        let mut frame = body.to_vec();
        frame.push(xor_checksum(&body));

        for i in 0..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[i] ^= 0x01;
            assert_ne!(xor_checksum(&corrupted), 0, "corruption at {} went undetected", i);
        }
    }
}
