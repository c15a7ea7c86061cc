//! Payload masking ([RFC 6455 Section 5.3](https://datatracker.ietf.org/doc/html/rfc6455#section-5.3)).
//!
//! Byte `i` of a masked payload is `payload[i] ^ key[i % 4]`. Applying the same key twice
//! restores the original bytes, so one routine serves both directions.

use bytes::BytesMut;

/// Masks or unmasks `buf` in place with `key`.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    // Every chunk starts at an offset divisible by 4, so the key lines up with it as is.
    let word = u32::from_ne_bytes(key);
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        if let Ok(bytes) = <[u8; 4]>::try_from(&*chunk) {
            chunk.copy_from_slice(&(u32::from_ne_bytes(bytes) ^ word).to_ne_bytes());
        }
    }
    apply_mask_bytewise(chunks.into_remainder(), key);
}

#[inline]
fn apply_mask_bytewise(buf: &mut [u8], key: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Returns a masked copy of `payload`.
pub fn mask(payload: &[u8], key: [u8; 4]) -> BytesMut {
    let mut output = BytesMut::from(payload);
    apply_mask(&mut output, key);
    output
}

/// Draws a fresh masking key for an outbound client frame.
///
/// Keys only need to be unpredictable to intermediaries; they carry no secrecy.
#[inline]
pub fn generate_key() -> [u8; 4] {
    rand::random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_mask_matches_bytewise() {
        let key = [0x6d, 0xb6, 0xb2, 0x80];
        let unmasked = [
            0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00, 0x17, 0x74, 0xf9,
            0x12, 0x03,
        ];

        for len in 0..=unmasked.len() {
            for offset in 0..=3usize.min(len) {
                let mut expected = unmasked[..len].to_vec();
                apply_mask_bytewise(&mut expected[offset..], key);

                let mut actual = unmasked[..len].to_vec();
                apply_mask(&mut actual[offset..], key);

                assert_eq!(expected, actual, "len={len} offset={offset}");
            }
        }
    }

    #[test]
    fn test_mask_is_self_inverse() {
        let keys = [
            [0x00, 0x00, 0x00, 0x00],
            [0xFF, 0xFF, 0xFF, 0xFF],
            [0x12, 0x34, 0x56, 0x78],
            [0xAA, 0xBB, 0xCC, 0xDD],
        ];
        let original = b"Hello, World! This is a test message with various lengths.";

        for key in keys {
            for len in [0, 1, 3, 4, 5, 17, original.len()] {
                let once = mask(&original[..len], key);
                let twice = mask(&once, key);
                assert_eq!(&twice[..], &original[..len]);
            }
        }
    }

    #[test]
    fn test_mask_known_vector() {
        // "Hello" masked with the key from RFC 6455 section 5.7
        let masked = mask(b"Hello", [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&masked[..], &[0x7f, 0x9f, 0x4d, 0x51, 0x58]);
    }

    #[test]
    fn test_mask_edge_cases() {
        let key = [0x12, 0x34, 0x56, 0x78];

        let mut empty: Vec<u8> = vec![];
        apply_mask(&mut empty, key);
        assert!(empty.is_empty());

        let mut three = vec![0xAB, 0xCD, 0xEF];
        apply_mask(&mut three, key);
        assert_eq!(three, vec![0xAB ^ 0x12, 0xCD ^ 0x34, 0xEF ^ 0x56]);
    }

    #[test]
    fn test_mask_large_buffer() {
        let key = [0x01, 0x02, 0x03, 0x04];
        let original: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        let masked = mask(&original, key);

        for (i, byte) in masked.iter().enumerate() {
            assert_eq!(*byte, original[i] ^ key[i % 4], "mismatch at index {i}");
        }
    }
}
