mod support;

use docx_patch::{locate_anchor, PatchError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use support::fixtures::{document, paragraph, strip_tags};

#[test]
fn phrase_split_across_formatted_runs_is_found_in_raw_offsets() {
    let body = r#"<w:p><w:pPr><w:jc w:val="center"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> rev</w:t></w:r><w:proofErr w:type="spellStart"/><w:r><w:t>enue</w:t></w:r></w:p>"#;
    let xml = document(body);
    let m = locate_anchor(xml.as_bytes(), "Quarterly revenue").unwrap();
    assert_eq!(strip_tags(&xml.as_bytes()[m.range()]), "Quarterly revenue");
    assert!(xml.as_bytes()[m.enclosing_range()].starts_with(b"<w:p><w:pPr>"));
    assert!(xml.as_bytes()[m.enclosing_range()].ends_with(b"</w:p>"));
}

#[test]
fn escaped_phrase_matches_entity_spelling() {
    let xml = document(&paragraph(&["Profit &amp; Loss"]));
    let m = locate_anchor(xml.as_bytes(), "Profit & Loss").unwrap();
    assert_eq!(&xml[m.range()], "Profit &amp; Loss");
}

#[test]
fn anchor_spanning_two_paragraphs_is_not_found() {
    let xml = document(&format!("{}{}", paragraph(&["Intro"]), paragraph(&["Conclusion"])));
    let err = locate_anchor(xml.as_bytes(), "Intro Conclusion").unwrap_err();
    assert!(matches!(err, PatchError::NotFound { .. }), "{err:?}");
    assert!(err.is_recoverable());
}

fn word() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn located_range_renders_exactly_the_phrase(
        paragraphs in proptest::collection::vec(proptest::collection::vec(word(), 1..8), 1..5),
        pick in any::<prop::sample::Index>(),
        span in any::<(prop::sample::Index, prop::sample::Index)>(),
    ) {
        let body: String = paragraphs
            .iter()
            .map(|words| {
                let runs: Vec<String> = words.iter().map(|w| format!("{w} ")).collect();
                paragraph(&runs.iter().map(String::as_str).collect::<Vec<_>>())
            })
            .collect();
        let xml = document(&body);

        let words = pick.get(&paragraphs);
        let (a, b) = (span.0.index(words.len()), span.1.index(words.len()));
        let phrase = words[a.min(b)..=a.max(b)].join(" ");

        let first = locate_anchor(xml.as_bytes(), &phrase).unwrap();
        let second = locate_anchor(xml.as_bytes(), &phrase).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(strip_tags(&xml.as_bytes()[first.range()]), phrase);
        prop_assert!(first.enclosing_start <= first.start && first.end <= first.enclosing_end);
    }
}
