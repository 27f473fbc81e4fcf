#![no_main]

use libfuzzer_sys::fuzz_target;

use forensic_scanner::{AddressedBuffer, ForensicPath};

// Interprets the input as a buffer plus a sequence of reads, checking each
// bounds-checked accessor against direct slice indexing.
//
// Byte layout:
// - Byte 0 → number of trailing op bytes (`ops_len`, capped at the input)
// - Next `len - ops_len` bytes → buffer content
// - Last `ops_len` bytes as `(opcode, offset, length)` triples:
//   - 0 → `get_bytes(offset, length)`
//   - 1 → `get_u32_le(offset)`
//   - 2 → `slice(offset, length)` then read it back
//   - 3 → `repeating_ngram_size(length % 16)` on the page
fuzz_target!(|data: &[u8]| {
    let Some((&head, rest)) = data.split_first() else {
        return;
    };
    let ops_len = (head as usize).min(rest.len());
    let (content, ops) = rest.split_at(rest.len() - ops_len);
    let buf = AddressedBuffer::from_vec(ForensicPath::from_offset(0), content.to_vec());
    let n = content.len();

    for op in ops.chunks_exact(3) {
        let offset = op[1] as usize;
        let len = op[2] as usize;
        let in_range = offset + len <= n;
        match op[0] % 4 {
            0 => match buf.get_bytes(offset, len) {
                Ok(bytes) => assert_eq!(bytes, &content[offset..offset + len]),
                Err(_) => assert!(!in_range),
            },
            1 => match buf.get_u32_le(offset) {
                Ok(v) => {
                    let word: [u8; 4] = content[offset..offset + 4].try_into().unwrap();
                    assert_eq!(v, u32::from_le_bytes(word));
                }
                Err(_) => assert!(offset + 4 > n),
            },
            2 => match buf.slice(offset, len) {
                Ok(child) => {
                    assert_eq!(child.as_bytes(), &content[offset..offset + len]);
                    assert_eq!(child.pos0().offset(), offset as u64);
                    assert!(child.page_size() <= child.len());
                }
                Err(_) => assert!(!in_range),
            },
            _ => {
                let max = (len % 16).max(2);
                let p = buf.repeating_ngram_size(max);
                if p > 0 {
                    assert!(p < max && 2 * p <= n);
                    assert_eq!(&content[p..], &content[..n - p]);
                }
            }
        }
    }
    assert_eq!(buf.children(), 0);
});
