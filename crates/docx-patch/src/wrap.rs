//! Wrapping existing runs with paired marker nodes (bookmarks, comment ranges).

use crate::anchor::{locate_in_stream, validate_phrase};
use crate::xml::{escape_attr, splice, tokenize, Fragment, TokenStream};
use crate::PatchError;

const RUN: &str = "r";
const TEXT: &str = "t";
const MAX_BOOKMARK_NAME_CHARS: usize = 40;

/// Start/end marker fragments placed around the runs that cover a phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPair {
    pub start: String,
    pub end: String,
}

impl MarkerPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// `w:bookmarkStart` / `w:bookmarkEnd` with the given id and name.
    ///
    /// Bookmark names follow Word's rules: at most 40 characters, starting with a letter (or
    /// `_` for hidden bookmarks), then letters, digits, and underscores only.
    pub fn bookmark(id: u32, name: &str) -> Result<Self, PatchError> {
        validate_bookmark_name(name)?;
        Ok(Self {
            start: format!(
                r#"<w:bookmarkStart w:id="{id}" w:name="{}"/>"#,
                escape_attr(name)
            ),
            end: format!(r#"<w:bookmarkEnd w:id="{id}"/>"#),
        })
    }

    /// `w:commentRangeStart` / `w:commentRangeEnd` for comment `id`.
    pub fn comment_range(id: u32) -> Self {
        Self {
            start: format!(r#"<w:commentRangeStart w:id="{id}"/>"#),
            end: format!(r#"<w:commentRangeEnd w:id="{id}"/>"#),
        }
    }
}

fn validate_bookmark_name(name: &str) -> Result<(), PatchError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(PatchError::Validation(
            "bookmark name must not be empty".to_string(),
        ));
    };
    if !(first.is_alphabetic() || first == '_') {
        return Err(PatchError::Validation(format!(
            "bookmark name {name:?} must start with a letter"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_alphanumeric() || *c == '_')) {
        return Err(PatchError::Validation(format!(
            "bookmark name {name:?} contains disallowed character {bad:?}"
        )));
    }
    if name.chars().count() > MAX_BOOKMARK_NAME_CHARS {
        return Err(PatchError::Validation(format!(
            "bookmark name {name:?} is longer than {MAX_BOOKMARK_NAME_CHARS} characters"
        )));
    }
    Ok(())
}

/// Surround the runs covering the first occurrence of `phrase` with `markers`.
///
/// The start marker lands right before the first covering run and the end marker right after
/// the last covering run; run content is never touched, so removing the two markers from the
/// output gives back the input.
pub fn wrap_range(xml: &[u8], phrase: &str, markers: &MarkerPair) -> Result<Vec<u8>, PatchError> {
    validate_phrase(phrase)?;
    let start_marker = Fragment::parse(&markers.start)?;
    let end_marker = Fragment::parse(&markers.end)?;

    let stream = tokenize(xml)?;
    let found = locate_in_stream(&stream, phrase)?;

    let first_run = covering_element(&stream, found.start)?;
    let last_run = covering_element(&stream, found.end - 1)?;
    let start_at = stream.get(first_run).span.start;
    let end_at = stream.element_span(last_run).end;

    let start_scope = stream.namespaces_in_scope(stream.container_at(start_at));
    let start_bytes = start_marker.for_scope(&start_scope)?;
    let end_scope = stream.namespaces_in_scope(stream.container_at(end_at));
    let end_bytes = end_marker.for_scope(&end_scope)?;

    log::debug!("wrapping {phrase:?}: start marker at {start_at}, end marker at {end_at}");

    // End first, so `start_at` still points at the same byte.
    let with_end = splice(xml, end_at, end_bytes.as_bytes());
    Ok(splice(&with_end, start_at, start_bytes.as_bytes()))
}

/// The run whose content holds `offset`, or the bare text element when there is no run.
fn covering_element(stream: &TokenStream<'_>, offset: usize) -> Result<usize, PatchError> {
    let token = stream.token_at(offset).ok_or_else(|| {
        PatchError::Structural(format!("anchor offset {offset} is past the end of the part"))
    })?;
    stream
        .enclosing(token, RUN)
        .or_else(|| stream.enclosing(token, TEXT))
        .ok_or_else(|| {
            PatchError::Structural(format!("anchor offset {offset} is not inside a text run"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    fn doc(body: &str) -> String {
        format!(r#"<w:document xmlns:w="{NS_W}"><w:body>{body}</w:body></w:document>"#)
    }

    #[test]
    fn wraps_runs_split_across_a_phrase() {
        let runs = r#"<w:r><w:t>Hello</w:t></w:r><w:r><w:rPr><w:i/></w:rPr><w:t xml:space="preserve"> World</w:t></w:r>"#;
        let xml = doc(&format!("<w:p>{runs}</w:p>"));
        let markers = MarkerPair::bookmark(0, "greeting").unwrap();
        let out = wrap_range(xml.as_bytes(), "Hello World", &markers).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            doc(&format!(
                r#"<w:p><w:bookmarkStart w:id="0" w:name="greeting"/>{runs}<w:bookmarkEnd w:id="0"/></w:p>"#
            ))
        );
    }

    #[test]
    fn only_covering_runs_are_wrapped() {
        let xml = doc(concat!(
            "<w:p><w:r><w:t>Before </w:t></w:r>",
            "<w:r><w:t>target</w:t></w:r>",
            "<w:r><w:t> after</w:t></w:r></w:p>",
        ));
        let out = wrap_range(xml.as_bytes(), "target", &MarkerPair::comment_range(3)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            doc(r#"<w:p><w:r><w:t>Before </w:t></w:r><w:commentRangeStart w:id="3"/><w:r><w:t>target</w:t></w:r><w:commentRangeEnd w:id="3"/><w:r><w:t> after</w:t></w:r></w:p>"#)
        );
    }

    #[test]
    fn bookmark_names_are_validated() {
        assert!(MarkerPair::bookmark(1, "_GoBack").is_ok());
        for bad in ["", "1st", "has space", "x<y", &"a".repeat(41)] {
            assert!(
                matches!(MarkerPair::bookmark(1, bad), Err(PatchError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn missing_phrase_leaves_nothing_behind() {
        let xml = doc("<w:p><w:r><w:t>Hello</w:t></w:r></w:p>");
        let err = wrap_range(xml.as_bytes(), "Goodbye", &MarkerPair::comment_range(0)).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn unbalanced_markers_are_rejected() {
        let xml = doc("<w:p><w:r><w:t>Hello</w:t></w:r></w:p>");
        let markers = MarkerPair::new("<w:ins>", "</w:ins>");
        let err = wrap_range(xml.as_bytes(), "Hello", &markers).unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)), "{err:?}");
    }
}
