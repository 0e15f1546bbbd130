//! Anchor phrase resolution against a part's rendered text.
//!
//! Word splits logical text into runs for reasons that have nothing to do with what the text
//! says (spell-check state, revision ids, formatting toggles), and producers disagree on
//! whitespace and entity spelling. Resolution therefore happens in two passes:
//!
//! 1. a literal byte search for the phrase (and its escaped spellings) inside a single text
//!    node;
//! 2. a search over each paragraph's *logical text*: the decoded contents of its `t` elements
//!    with run boundaries removed, `br`/`cr`/`tab` read as a space, and whitespace collapsed.
//!    Every logical character remembers the raw bytes it came from, so a hit maps straight back
//!    to offsets in the original buffer.
//!
//! Whichever pass yields the earlier position wins.

use std::ops::Range;

use crate::xml::{decode_text, escape_attr, escape_text, tokenize, TokenKind, TokenStream};
use crate::PatchError;

/// A resolved anchor. Offsets are only meaningful for the exact buffer they were computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorMatch {
    /// First raw byte of the matched text.
    pub start: usize,
    /// One past the last raw byte of the matched text.
    pub end: usize,
    /// Start of the enclosing paragraph's opening tag.
    pub enclosing_start: usize,
    /// End of the enclosing paragraph's closing tag.
    pub enclosing_end: usize,
}

impl AnchorMatch {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn enclosing_range(&self) -> Range<usize> {
        self.enclosing_start..self.enclosing_end
    }
}

const BLOCK: &str = "p";
const RUN: &str = "r";
const TEXT: &str = "t";
const INLINE_BREAKS: &[&str] = &["br", "cr", "tab"];

/// Find the first occurrence of `phrase` in the rendered text of `xml`.
///
/// Phrases may cross run boundaries but not paragraph boundaries.
pub fn locate_anchor(xml: &[u8], phrase: &str) -> Result<AnchorMatch, PatchError> {
    validate_phrase(phrase)?;
    let stream = tokenize(xml)?;
    locate_in_stream(&stream, phrase)
}

pub(crate) fn validate_phrase(phrase: &str) -> Result<(), PatchError> {
    if phrase.trim().is_empty() {
        return Err(PatchError::Validation(
            "anchor phrase must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn locate_in_stream(
    stream: &TokenStream<'_>,
    phrase: &str,
) -> Result<AnchorMatch, PatchError> {
    let literal = literal_match(stream, phrase);
    let limit = literal.map_or(stream.source.len(), |m| m.start);
    let logical = logical_match(stream, phrase, limit)?;

    let found = match (literal, logical) {
        (Some(a), Some(b)) if b.start < a.start => b,
        (Some(a), _) => a,
        (None, Some(b)) => b,
        (None, None) => return Err(PatchError::not_found(phrase)),
    };
    log::debug!(
        "anchor {phrase:?} resolved to bytes {}..{} (paragraph {}..{})",
        found.start,
        found.end,
        found.enclosing_start,
        found.enclosing_end
    );
    Ok(found)
}

fn literal_match(stream: &TokenStream<'_>, phrase: &str) -> Option<AnchorMatch> {
    let mut needles: Vec<String> = vec![phrase.to_string()];
    for spelling in [escape_text(phrase), escape_attr(phrase)] {
        if !needles.iter().any(|n| n.as_str() == spelling.as_ref()) {
            needles.push(spelling.into_owned());
        }
    }

    needles
        .iter()
        .filter_map(|needle| first_literal_in_text(stream, needle.as_bytes()))
        .min_by_key(|m| m.start)
}

fn first_literal_in_text(stream: &TokenStream<'_>, needle: &[u8]) -> Option<AnchorMatch> {
    let haystack = stream.source;
    let mut from = 0;
    while let Some(pos) = find_bytes(&haystack[from..], needle) {
        let start = from + pos;
        let end = start + needle.len();
        if let Some(found) = literal_in_text_node(stream, start, end) {
            return Some(found);
        }
        from = start + 1;
    }
    None
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Accept a literal hit only if it sits inside one text node of a `t` element in a paragraph,
/// without cutting through an entity reference.
fn literal_in_text_node(stream: &TokenStream<'_>, start: usize, end: usize) -> Option<AnchorMatch> {
    let index = stream.token_at(start)?;
    let token = stream.get(index);
    if token.kind != TokenKind::Text || end > token.span.end {
        return None;
    }
    let parent = token.parent?;
    if stream.get(parent).local_name() != TEXT {
        return None;
    }
    let raw = stream.bytes(token.span.clone());
    let base = token.span.start;
    if inside_entity(raw, start - base) || inside_entity(raw, end - base) {
        return None;
    }
    let paragraph = stream.enclosing(parent, BLOCK)?;
    let enclosing = stream.element_span(paragraph);
    Some(AnchorMatch {
        start,
        end,
        enclosing_start: enclosing.start,
        enclosing_end: enclosing.end,
    })
}

fn inside_entity(raw: &[u8], pos: usize) -> bool {
    match raw[..pos].iter().rposition(|&b| b == b'&') {
        Some(amp) => !raw[amp..pos].contains(&b';'),
        None => false,
    }
}

#[derive(Debug, Clone)]
struct LogicalChar {
    ch: char,
    span: Range<usize>,
}

/// Whitespace-normalized logical text of one paragraph. Text belonging to paragraphs nested
/// inside it (text boxes) is left to those paragraphs.
fn logical_text(
    stream: &TokenStream<'_>,
    paragraph: usize,
) -> Result<Vec<LogicalChar>, PatchError> {
    fn push(view: &mut Vec<LogicalChar>, ch: char, span: Range<usize>) {
        if !ch.is_whitespace() {
            view.push(LogicalChar { ch, span });
        } else if view.last().is_some_and(|c| c.ch != ' ') {
            view.push(LogicalChar { ch: ' ', span });
        }
    }

    let mut view: Vec<LogicalChar> = Vec::new();

    for index in stream.inner(paragraph) {
        let token = stream.get(index);
        match token.kind {
            TokenKind::Text => {
                let Some(parent) = token.parent else { continue };
                if stream.get(parent).local_name() != TEXT
                    || stream.enclosing(parent, BLOCK) != Some(paragraph)
                {
                    continue;
                }
                for decoded in decode_text(stream.bytes(token.span.clone()), token.span.start)? {
                    push(&mut view, decoded.ch, decoded.span);
                }
            }
            TokenKind::Start | TokenKind::Empty
                if INLINE_BREAKS.contains(&token.local_name())
                    && token
                        .parent
                        .is_some_and(|parent| stream.get(parent).local_name() == RUN)
                    && stream.enclosing(index, BLOCK) == Some(paragraph) =>
            {
                push(&mut view, ' ', stream.element_span(index));
            }
            _ => {}
        }
    }

    if view.last().is_some_and(|c| c.ch == ' ') {
        view.pop();
    }
    Ok(view)
}

fn normalize_phrase(phrase: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(phrase.len());
    for ch in phrase.trim().chars() {
        if ch.is_whitespace() {
            if out.last() != Some(&' ') {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn logical_match(
    stream: &TokenStream<'_>,
    phrase: &str,
    limit: usize,
) -> Result<Option<AnchorMatch>, PatchError> {
    let needle = normalize_phrase(phrase);
    if needle.is_empty() {
        return Ok(None);
    }

    let mut best: Option<AnchorMatch> = None;
    for (index, token) in stream.tokens.iter().enumerate() {
        if token.span.start >= limit {
            break;
        }
        if token.kind != TokenKind::Start || token.local_name() != BLOCK {
            continue;
        }

        let view = logical_text(stream, index)?;
        if view.len() < needle.len() {
            continue;
        }
        let Some(at) = view
            .windows(needle.len())
            .position(|w| w.iter().zip(&needle).all(|(c, n)| c.ch == *n))
        else {
            continue;
        };

        let start = view[at].span.start;
        if best.is_some_and(|b| b.start <= start) {
            continue;
        }
        let enclosing = stream.element_span(index);
        best = Some(AnchorMatch {
            start,
            end: view[at + needle.len() - 1].span.end,
            enclosing_start: enclosing.start,
            enclosing_end: enclosing.end,
        });
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        )
        .into_bytes()
    }

    fn text_at(xml: &[u8], m: &AnchorMatch) -> String {
        String::from_utf8(xml[m.range()].to_vec()).unwrap()
    }

    #[test]
    fn literal_phrase_in_single_run() {
        let xml = doc(r#"<w:p><w:r><w:t>Intro text</w:t></w:r></w:p>"#);
        let m = locate_anchor(&xml, "Intro").unwrap();
        assert_eq!(text_at(&xml, &m), "Intro");
        assert!(xml[m.enclosing_range()].starts_with(b"<w:p>"));
        assert!(xml[m.enclosing_range()].ends_with(b"</w:p>"));
    }

    #[test]
    fn escaped_phrase_is_found() {
        let xml = doc(r#"<w:p><w:r><w:t>R&amp;D budget</w:t></w:r></w:p>"#);
        let m = locate_anchor(&xml, "R&D budget").unwrap();
        assert_eq!(text_at(&xml, &m), "R&amp;D budget");
    }

    #[test]
    fn ignores_hits_inside_markup() {
        let xml = doc(
            r#"<w:p w:rsidR="Intro"><w:pPr><w:pStyle w:val="Intro"/></w:pPr><w:r><w:t>x</w:t></w:r></w:p><w:p><w:r><w:t>Intro</w:t></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "Intro").unwrap();
        assert_eq!(text_at(&xml, &m), "Intro");
        assert!(xml[m.enclosing_range()].starts_with(b"<w:p><w:r>"));
    }

    #[test]
    fn phrase_split_across_runs() {
        let xml = doc(
            r#"<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve"> World</w:t></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "Hello World").unwrap();
        assert_eq!(text_at(&xml, &m), r#"Hello</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve"> World"#);
    }

    #[test]
    fn breaks_and_whitespace_normalize_to_single_spaces() {
        let xml = doc(
            r#"<w:p><w:r><w:t>Total</w:t><w:tab/><w:t xml:space="preserve">  due   now</w:t></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "Total due\n now").unwrap();
        assert!(text_at(&xml, &m).starts_with("Total"));
        assert!(text_at(&xml, &m).ends_with("now"));
    }

    #[test]
    fn paragraph_tab_stops_are_not_text() {
        let xml = doc(
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr><w:r><w:t>AB</w:t></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "AB").unwrap();
        assert_eq!(text_at(&xml, &m), "AB");
    }

    #[test]
    fn phrase_spanning_paragraphs_is_not_found() {
        let xml = doc(r#"<w:p><w:r><w:t>Hello</w:t></w:r></w:p><w:p><w:r><w:t>World</w:t></w:r></w:p>"#);
        let err = locate_anchor(&xml, "Hello World").unwrap_err();
        assert!(err.is_recoverable(), "{err:?}");
    }

    #[test]
    fn resolution_prefers_the_first_occurrence() {
        // The first occurrence is split (logical pass); the second is a literal single-run hit.
        let xml = doc(
            r#"<w:p><w:r><w:t>Sum</w:t></w:r><w:r><w:t>mary</w:t></w:r></w:p><w:p><w:r><w:t>Summary</w:t></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "Summary").unwrap();
        let first_paragraph = xml
            .windows(5)
            .position(|w| w == b"<w:p>")
            .unwrap();
        assert_eq!(m.enclosing_start, first_paragraph);
    }

    #[test]
    fn entity_internals_never_match() {
        let xml = doc(r#"<w:p><w:r><w:t>Tom &amp; Jerry</w:t></w:r></w:p>"#);
        assert!(locate_anchor(&xml, "amp").is_err());
    }

    #[test]
    fn deleted_text_is_not_rendered() {
        let xml = doc(r#"<w:p><w:del><w:r><w:delText>Gone</w:delText></w:r></w:del></w:p>"#);
        assert!(matches!(
            locate_anchor(&xml, "Gone"),
            Err(PatchError::NotFound { .. })
        ));
    }

    #[test]
    fn empty_phrase_is_rejected() {
        let xml = doc("<w:p/>");
        assert!(matches!(
            locate_anchor(&xml, " \t"),
            Err(PatchError::Validation(_))
        ));
    }

    #[test]
    fn text_box_paragraphs_resolve_to_themselves() {
        let xml = doc(
            r#"<w:p><w:r><w:t>Outer</w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>Inner</w:t></w:r></w:p></w:txbxContent></w:r></w:p>"#,
        );
        let m = locate_anchor(&xml, "Inner").unwrap();
        assert!(xml[m.enclosing_range()].starts_with(b"<w:p><w:r><w:t>Inner"));
        assert!(locate_anchor(&xml, "Outer Inner").is_err());
    }
}
