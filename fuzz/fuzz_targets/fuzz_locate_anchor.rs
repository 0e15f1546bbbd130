#![no_main]

use docx_patch::{insert_node, locate_anchor, wrap_range, InsertionSpec, MarkerPair};
use libfuzzer_sys::fuzz_target;

/// Keep the harness itself bounded; parts in real documents are far larger, but the interesting
/// paths (run splitting, entity decoding, namespace scoping) show up in small inputs.
const MAX_INPUT_BYTES: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_BYTES)];

    // First byte picks how much of the tail is the phrase; the rest is the part.
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let phrase_len = usize::from(split).min(rest.len());
    let (phrase, xml) = rest.split_at(phrase_len);
    let phrase = String::from_utf8_lossy(phrase);

    let Ok(found) = locate_anchor(xml, &phrase) else {
        return;
    };
    assert!(found.range().start <= found.range().end);
    assert!(found.range().end <= xml.len());
    assert!(found.enclosing_range().start <= found.range().start);
    assert!(found.range().end <= found.enclosing_range().end);

    // Inserting next to a found anchor only ever adds bytes.
    let spec = InsertionSpec::after_anchor(phrase.as_ref(), "<w:p/>");
    if let Ok(out) = insert_node(xml, &spec) {
        assert!(out.len() > xml.len());
    }
    if let Ok(out) = wrap_range(xml, &phrase, &MarkerPair::comment_range(0)) {
        assert!(out.len() > xml.len());
    }
});
