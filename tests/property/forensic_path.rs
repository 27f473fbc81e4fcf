//! Forensic path construction, parsing, and rebasing.

use proptest::prelude::*;

use forensic_scanner::ForensicPath;

fn decoder() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9_]{0,7}"
}

/// A path built the way the engine builds them: offsets and decoders.
fn path_strategy() -> impl Strategy<Value = ForensicPath> {
    (
        any::<u32>(),
        prop::collection::vec((decoder(), any::<u16>()), 0..5),
    )
        .prop_map(|(base, steps)| {
            let mut pos = ForensicPath::from_offset(base as u64);
            for (name, offset) in steps {
                pos = pos.append(&name) + offset as u64;
            }
            pos
        })
}

proptest! {
    #[test]
    fn display_parses_back(pos in path_strategy()) {
        let text = pos.to_string();
        let parsed: ForensicPath = text.parse().unwrap();
        prop_assert_eq!(parsed.to_string(), text);
        prop_assert_eq!(parsed.depth(), pos.depth());
        prop_assert_eq!(parsed.offset(), pos.offset());
    }

    #[test]
    fn append_adds_one_level(pos in path_strategy(), name in decoder()) {
        let child = pos.append(&name);
        prop_assert_eq!(child.depth(), pos.depth() + 1);
        prop_assert_eq!(child.offset(), 0);
        prop_assert_eq!(child.last_decoder(), Some(name.as_str()));
        prop_assert!(child.contains_decoder(&name));
        prop_assert!(child.to_string().starts_with(&pos.to_string()));
    }

    #[test]
    fn adding_moves_only_the_leaf(pos in path_strategy(), delta in any::<u32>()) {
        let moved = &pos + delta as u64;
        prop_assert_eq!(moved.path(), pos.path());
        prop_assert_eq!(moved.offset(), pos.offset() + delta as u64);
        prop_assert_eq!(moved.depth(), pos.depth());
    }

    #[test]
    fn shift_preserves_decoder_chain(pos in path_strategy(), delta in any::<u32>()) {
        let shifted = pos.shift(delta as u64);
        prop_assert_eq!(shifted.depth(), pos.depth());
        prop_assert_eq!(shifted.alpha_part(), pos.alpha_part());
        if pos.depth() > 0 {
            prop_assert_eq!(shifted.offset(), pos.offset());
        } else {
            prop_assert_eq!(shifted.offset(), pos.offset() + delta as u64);
        }
    }

    #[test]
    fn numeric_only_text_is_top_level(offset in any::<u64>()) {
        let pos: ForensicPath = offset.to_string().parse().unwrap();
        prop_assert_eq!(pos.depth(), 0);
        prop_assert!(!pos.is_recursive());
        prop_assert_eq!(pos.offset(), offset);
    }
}
