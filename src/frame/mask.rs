//! Payload masking (RFC 6455 §5.3).

/// Incremental XOR masker. The key index carries over between calls, so a
/// payload split across reads unmasks the same as one applied whole.
#[derive(Debug, Clone, Copy)]
pub struct Masker {
    key: [u8; 4],
    index: usize,
}

impl Masker {
    pub fn new(key: [u8; 4]) -> Self {
        Self { key, index: 0 }
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.key[self.index];
            self.index = (self.index + 1) & 3;
        }
    }
}

/// Mask or unmask a whole payload in place.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    Masker::new(key).apply(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_is_xor_with_cycling_key() {
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut data = *b"Hello";
        apply_mask(&mut data, key);
        // RFC 6455 §5.7 single-frame masked text example.
        assert_eq!(data, [0x7f, 0x9f, 0x4d, 0x51, 0x58]);
        apply_mask(&mut data, key);
        assert_eq!(&data, b"Hello");
    }

    #[test]
    fn index_persists_across_chunks() {
        let key = [1, 2, 3, 4];
        let original: Vec<u8> = (0u8..23).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, key);

        for split in 0..original.len() {
            let mut chunked = original.clone();
            let mut masker = Masker::new(key);
            let (a, b) = chunked.split_at_mut(split);
            masker.apply(a);
            masker.apply(b);
            assert_eq!(chunked, whole, "split at {split}");
        }
    }

    #[test]
    fn each_byte_uses_key_index_mod_4() {
        let key = [0xAA, 0xBB, 0xCC, 0xDD];
        let plain = [0u8; 9];
        let mut data = plain;
        apply_mask(&mut data, key);
        for (i, b) in data.iter().enumerate() {
            assert_eq!(*b, plain[i] ^ key[i % 4]);
        }
    }
}
