//! Slices agree with the bytes they view and with their addresses.

use proptest::prelude::*;

use forensic_scanner::{AddressedBuffer, ForensicPath};

fn buffer_and_range() -> impl Strategy<Value = (Vec<u8>, usize, usize, usize)> {
    prop::collection::vec(any::<u8>(), 0..512).prop_flat_map(|bytes| {
        let n = bytes.len();
        (Just(bytes), 0..=n, 0..=n)
            .prop_flat_map(|(bytes, page, offset)| {
                let max_len = bytes.len() - offset;
                (Just(bytes), Just(page), Just(offset), 0..=max_len)
            })
    })
}

proptest! {
    #[test]
    fn slice_views_the_same_bytes((bytes, page, offset, len) in buffer_and_range()) {
        let parent = AddressedBuffer::from_vec_with_page_size(
            ForensicPath::from_offset(1000),
            bytes.clone(),
            page,
        );
        let child = parent.slice(offset, len).unwrap();
        prop_assert_eq!(child.as_bytes(), &bytes[offset..offset + len]);
        prop_assert_eq!(child.pos0().offset(), 1000 + offset as u64);
        prop_assert_eq!(child.page_size(), page.saturating_sub(offset).min(len));
        prop_assert!(child.page_size() <= child.len());
        prop_assert_eq!(parent.children(), 1);

        let copy = parent.copy_slice(offset, len).unwrap();
        prop_assert_eq!(copy.as_bytes(), child.as_bytes());
        prop_assert_eq!(copy.content_hash(), child.content_hash());
        drop(child);
        prop_assert_eq!(parent.children(), 0);
    }

    #[test]
    fn out_of_range_reads_fail(bytes in prop::collection::vec(any::<u8>(), 0..64), extra in 1usize..32) {
        let buf = AddressedBuffer::from_vec(ForensicPath::from_offset(0), bytes.clone());
        let n = bytes.len();
        prop_assert!(buf.get_bytes(n, extra).is_err());
        prop_assert!(buf.slice(n + extra, 0).is_err());
        prop_assert!(buf.get_u32_le(n).is_err());
        prop_assert!(buf.check_range(usize::MAX, 2).is_err());
        prop_assert!(buf.get_bytes(0, n).is_ok());
    }

    #[test]
    fn scalar_reads_match_std(bytes in prop::collection::vec(any::<u8>(), 8..64), at in 0usize..56) {
        prop_assume!(at + 8 <= bytes.len());
        let buf = AddressedBuffer::from_vec(ForensicPath::from_offset(0), bytes.clone());
        let word: [u8; 8] = bytes[at..at + 8].try_into().unwrap();
        prop_assert_eq!(buf.get_u64_le(at).unwrap(), u64::from_le_bytes(word));
        prop_assert_eq!(buf.get_u64_be(at).unwrap(), u64::from_be_bytes(word));
        let half: [u8; 4] = bytes[at..at + 4].try_into().unwrap();
        prop_assert_eq!(buf.get_i32_le(at).unwrap(), i32::from_le_bytes(half));
        prop_assert_eq!(buf.get_u16_be(at).unwrap(), u16::from_be_bytes([bytes[at], bytes[at + 1]]));
    }

    #[test]
    fn periodic_content_reports_its_period(unit in prop::collection::vec(any::<u8>(), 1..5), reps in 2usize..20) {
        let bytes: Vec<u8> = unit.iter().copied().cycle().take(unit.len() * reps).collect();
        let buf = AddressedBuffer::from_vec(ForensicPath::from_offset(0), bytes);
        let n = buf.repeating_ngram_size(10);
        prop_assert!(n >= 1 && n <= unit.len());
        prop_assert_eq!(unit.len() % n, 0);
    }
}
