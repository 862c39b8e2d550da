use std::collections::BTreeMap;

use proptest::prelude::*;

use fleetci::command::parse_properties;

proptest! {
    #[test]
    fn declared_pairs_are_recovered_with_last_one_winning(
        pairs in proptest::collection::vec(("[a-z][a-z0-9._-]{0,8}", "[ -~]{0,16}"), 0..12),
        separator in prop_oneof![Just("="), Just(" = "), Just(":"), Just(": ")],
    ) {
        let mut text = String::new();
        let mut expected = BTreeMap::new();
        for (key, value) in &pairs {
            text.push_str(&format!("{key}{separator}{value}\n"));
            expected.insert(key.clone(), value.trim().to_string());
        }
        prop_assert_eq!(parse_properties(&text), expected);
    }

    #[test]
    fn comments_and_blank_lines_contribute_nothing(
        lines in proptest::collection::vec(prop_oneof!["#[ -~]{0,20}", "![ -~]{0,20}", "[ \t]{0,4}"], 0..10)
    ) {
        prop_assert!(parse_properties(&lines.join("\n")).is_empty());
    }

    #[test]
    fn keys_are_never_empty_or_padded(text in "[ -~\n]{0,200}") {
        for key in parse_properties(&text).keys() {
            prop_assert!(!key.is_empty());
            prop_assert_eq!(key.trim(), key.as_str());
            prop_assert!(!key.contains('=') && !key.contains(':'));
        }
    }
}
