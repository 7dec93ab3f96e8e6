//! Property-based tests for data structures.

#[cfg(test)]
mod proptest_tests {
    use proptest::prelude::*;

    use crate::data::{Key, NibbleMap, NibblePath, Slot};

    const REGION: usize = 2048;

    fn arb_nibbles() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(0u8..16, 0..=64)
    }

    proptest! {
        #[test]
        fn nibble_path_from_bytes_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let path = NibblePath::from_bytes(&bytes);
            assert_eq!(path.len(), bytes.len() * 2);

            for (i, byte) in bytes.iter().enumerate() {
                assert_eq!(path.get(i * 2), byte >> 4);
                assert_eq!(path.get(i * 2 + 1), byte & 0x0F);
            }
        }

        #[test]
        fn nibble_path_slice_from(bytes in proptest::collection::vec(any::<u8>(), 1..32), start in 0usize..64) {
            let path = NibblePath::from_bytes(&bytes);
            let start = start % path.len().max(1);

            let sliced = path.slice_from(start);
            assert_eq!(sliced.len(), path.len() - start);

            for i in 0..sliced.len() {
                assert_eq!(sliced.get(i), path.get(start + i));
            }
        }

        // Prefix extraction followed by decode reproduces the original path.
        #[test]
        fn slot_prefix_roundtrip(nibbles in arb_nibbles()) {
            let path = NibblePath::from_nibbles(&nibbles);
            let (prefix, residual) = Slot::extract_prefix(&path);
            let (decoded, count) = Slot::decode_nibbles_from_prefix(prefix);

            let mut rebuilt: Vec<u8> = decoded[..count].to_vec();
            rebuilt.extend(residual.iter());
            assert_eq!(rebuilt, nibbles);
        }

        // Set followed by get yields the written value, across arbitrary
        // interleavings of inserts into one map.
        #[test]
        fn map_get_after_set(
            entries in proptest::collection::vec(
                (proptest::collection::vec(0u8..16, 1..=16), proptest::collection::vec(any::<u8>(), 0..32)),
                1..24,
            )
        ) {
            let mut buf = [0u8; REGION];
            let mut map = NibbleMap::wrap(&mut buf[..]);

            let mut expected: Vec<(Key, Vec<u8>)> = Vec::new();
            for (nibbles, value) in &entries {
                let key = Key::account(NibblePath::from_nibbles(nibbles));
                if map.try_set(&key, value) {
                    expected.retain(|(k, _)| k != &key);
                    expected.push((key, value.clone()));
                }
            }

            for (key, value) in &expected {
                assert_eq!(map.try_get(key), Some(value.clone()));
            }
        }

        // Defragmentation preserves the live multiset of (key, value).
        #[test]
        fn map_defragment_preserves_contents(
            entries in proptest::collection::vec(
                (proptest::collection::vec(0u8..16, 1..=8), proptest::collection::vec(any::<u8>(), 0..16)),
                1..16,
            ),
            delete_mask in any::<u16>(),
        ) {
            let mut buf = [0u8; REGION];
            let mut map = NibbleMap::wrap(&mut buf[..]);

            let mut keys = Vec::new();
            for (nibbles, value) in &entries {
                let key = Key::account(NibblePath::from_nibbles(nibbles));
                if map.try_set(&key, value) && !keys.contains(&key) {
                    keys.push(key);
                }
            }
            for (i, key) in keys.iter().enumerate() {
                if delete_mask & (1u16 << (i % 16)) != 0 {
                    map.delete(key);
                }
            }

            let mut before: Vec<(Key, Vec<u8>)> =
                map.iter().map(|e| (e.key, e.data)).collect();
            map.defragment();
            let mut after: Vec<(Key, Vec<u8>)> =
                map.iter().map(|e| (e.key, e.data)).collect();

            let ord = |a: &(Key, Vec<u8>), b: &(Key, Vec<u8>)| {
                let an: Vec<u8> = a.0.path.iter().collect();
                let bn: Vec<u8> = b.0.path.iter().collect();
                an.cmp(&bn).then_with(|| a.1.cmp(&b.1))
            };
            before.sort_by(ord);
            after.sort_by(ord);
            assert_eq!(before, after);
            assert_eq!(map.tombstones(), 0);
        }

        // Tombstones never linger at the slot tail after a successful set.
        #[test]
        fn map_tail_slot_is_live_after_set(
            nibbles in proptest::collection::vec(0u8..16, 1..=8),
            other in proptest::collection::vec(0u8..16, 1..=8),
            value in proptest::collection::vec(any::<u8>(), 1..16),
        ) {
            let mut buf = [0u8; REGION];
            let mut map = NibbleMap::wrap(&mut buf[..]);

            let first = Key::account(NibblePath::from_nibbles(&nibbles));
            let second = Key::account(NibblePath::from_nibbles(&other));
            assert!(map.try_set(&first, &value));
            map.delete(&second);
            map.delete(&first);
            assert!(map.try_set(&second, &value));

            let tail: Vec<_> = map.iter().filter(|e| e.index + 1 == map.count()).collect();
            assert_eq!(tail.len(), 1, "tail slot must be live");
        }
    }
}
