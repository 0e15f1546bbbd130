//! Markup insertion at body-relative or anchor-relative positions.

use std::ops::Range;

use crate::anchor::{locate_in_stream, validate_phrase};
use crate::xml::{tokenize, Fragment, TokenKind, TokenStream};
use crate::PatchError;

const BODY: &str = "body";
const FINAL_SECTION_PROPERTIES: &str = "sectPr";

/// Where an insertion lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertionTarget {
    /// Immediately inside the body container's opening tag.
    BodyStart,
    /// Immediately before the body's closing tag, or before a trailing final `sectPr` so new
    /// content joins the last section.
    BodyEnd,
    /// Immediately after the closing tag of the paragraph containing the anchor phrase.
    AfterAnchor(String),
    /// Immediately before the opening tag of the paragraph containing the anchor phrase.
    BeforeAnchor(String),
}

impl InsertionTarget {
    pub fn anchor(&self) -> Option<&str> {
        match self {
            InsertionTarget::AfterAnchor(anchor) | InsertionTarget::BeforeAnchor(anchor) => {
                Some(anchor)
            }
            InsertionTarget::BodyStart | InsertionTarget::BodyEnd => None,
        }
    }
}

/// A markup fragment and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertionSpec {
    pub target: InsertionTarget,
    pub payload: String,
}

impl InsertionSpec {
    pub fn new(target: InsertionTarget, payload: impl Into<String>) -> Self {
        Self {
            target,
            payload: payload.into(),
        }
    }

    pub fn body_start(payload: impl Into<String>) -> Self {
        Self::new(InsertionTarget::BodyStart, payload)
    }

    pub fn body_end(payload: impl Into<String>) -> Self {
        Self::new(InsertionTarget::BodyEnd, payload)
    }

    pub fn after_anchor(anchor: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(InsertionTarget::AfterAnchor(anchor.into()), payload)
    }

    pub fn before_anchor(anchor: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(InsertionTarget::BeforeAnchor(anchor.into()), payload)
    }
}

/// How the prepared payload is joined with the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Splice {
    /// `source[..at] + payload + source[at..]`.
    At(usize),
    /// A self-closing container (`<w:body/>`) that has to be opened up to receive content.
    ExpandEmpty { span: Range<usize>, name: String },
}

impl Splice {
    pub fn apply(&self, source: &[u8], payload: &[u8]) -> Vec<u8> {
        match self {
            Splice::At(at) => crate::xml::splice(source, *at, payload),
            Splice::ExpandEmpty { span, name } => {
                let expanded = crate::xml::open_empty_tag(&source[span.clone()], name, payload);
                let mut out = Vec::with_capacity(source.len() + expanded.len());
                out.extend_from_slice(&source[..span.start]);
                out.extend_from_slice(&expanded);
                out.extend_from_slice(&source[span.end..]);
                out
            }
        }
    }
}

/// A resolved insertion point: the splice and the element whose content receives the payload.
#[derive(Debug, Clone)]
pub(crate) struct InsertionPoint {
    pub splice: Splice,
    pub container: Option<usize>,
}

/// Insert `spec.payload` into `xml` at `spec.target`.
///
/// On success the output is the input with exactly the prepared payload spliced in; no other
/// byte changes. The one exception is a self-closing body container, which is opened up to
/// hold the payload.
pub fn insert_node(xml: &[u8], spec: &InsertionSpec) -> Result<Vec<u8>, PatchError> {
    if let Some(anchor) = spec.target.anchor() {
        validate_phrase(anchor)?;
    }
    let fragment = Fragment::parse(&spec.payload)?;

    let stream = tokenize(xml)?;
    let point = resolve_insertion_point(&stream, &spec.target)?;
    let payload = fragment.for_scope(&stream.namespaces_in_scope(point.container))?;

    log::debug!(
        "inserting {} bytes at {:?} ({:?})",
        payload.len(),
        point.splice,
        spec.target
    );
    Ok(point.splice.apply(xml, payload.as_bytes()))
}

pub(crate) fn resolve_insertion_point(
    stream: &TokenStream<'_>,
    target: &InsertionTarget,
) -> Result<InsertionPoint, PatchError> {
    match target {
        InsertionTarget::BodyStart => {
            let body = find_body(stream)?;
            let token = stream.get(body);
            let splice = match token.kind {
                TokenKind::Empty => expand_empty(stream, body),
                _ => Splice::At(token.span.end),
            };
            Ok(InsertionPoint {
                splice,
                container: Some(body),
            })
        }
        InsertionTarget::BodyEnd => {
            let body = find_body(stream)?;
            let token = stream.get(body);
            if token.kind == TokenKind::Empty {
                return Ok(InsertionPoint {
                    splice: expand_empty(stream, body),
                    container: Some(body),
                });
            }
            let at = match stream.children(body).last() {
                Some(last) if stream.get(last).local_name() == FINAL_SECTION_PROPERTIES => {
                    stream.get(last).span.start
                }
                _ => stream.get(token.partner).span.start,
            };
            Ok(InsertionPoint {
                splice: Splice::At(at),
                container: Some(body),
            })
        }
        InsertionTarget::AfterAnchor(phrase) => {
            let found = locate_in_stream(stream, phrase)?;
            Ok(InsertionPoint {
                splice: Splice::At(found.enclosing_end),
                container: stream.container_at(found.enclosing_end),
            })
        }
        InsertionTarget::BeforeAnchor(phrase) => {
            let found = locate_in_stream(stream, phrase)?;
            Ok(InsertionPoint {
                splice: Splice::At(found.enclosing_start),
                container: stream.container_at(found.enclosing_start),
            })
        }
    }
}

fn find_body(stream: &TokenStream<'_>) -> Result<usize, PatchError> {
    stream.find_first(BODY).ok_or_else(|| {
        PatchError::Structural("part has no body container element".to_string())
    })
}

fn expand_empty(stream: &TokenStream<'_>, index: usize) -> Splice {
    let token = stream.get(index);
    Splice::ExpandEmpty {
        span: token.span.clone(),
        name: token.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    fn doc(body: &str) -> String {
        format!(r#"<w:document xmlns:w="{NS_W}"><w:body>{body}</w:body></w:document>"#)
    }

    fn insert(xml: &str, spec: InsertionSpec) -> String {
        String::from_utf8(insert_node(xml.as_bytes(), &spec).unwrap()).unwrap()
    }

    #[test]
    fn body_start_goes_right_after_the_opening_tag() {
        let xml = doc("<w:p/>");
        let out = insert(&xml, InsertionSpec::body_start("<w:p><w:r><w:t>first</w:t></w:r></w:p>"));
        assert_eq!(
            out,
            doc("<w:p><w:r><w:t>first</w:t></w:r></w:p><w:p/>")
        );
    }

    #[test]
    fn body_end_goes_before_final_section_properties() {
        let xml = doc(r#"<w:p/><w:sectPr><w:pgSz w:w="12240"/></w:sectPr>"#);
        let out = insert(&xml, InsertionSpec::body_end("<w:p/>"));
        assert_eq!(
            out,
            doc(r#"<w:p/><w:p/><w:sectPr><w:pgSz w:w="12240"/></w:sectPr>"#)
        );
    }

    #[test]
    fn body_end_without_section_properties_goes_before_closing_tag() {
        let xml = doc("<w:p/>\n");
        let out = insert(&xml, InsertionSpec::body_end("<w:tbl/>"));
        assert_eq!(out, doc("<w:p/>\n<w:tbl/>"));
    }

    #[test]
    fn section_properties_inside_a_paragraph_are_not_final() {
        let xml = doc(r#"<w:p><w:pPr><w:sectPr/></w:pPr></w:p>"#);
        let out = insert(&xml, InsertionSpec::body_end("<w:p/>"));
        assert_eq!(out, doc(r#"<w:p><w:pPr><w:sectPr/></w:pPr></w:p><w:p/>"#));
    }

    #[test]
    fn after_and_before_anchor_wrap_the_enclosing_paragraph() {
        let xml = doc(
            "<w:p><w:r><w:t>Intro</w:t></w:r></w:p><w:p><w:r><w:t>Conclusion</w:t></w:r></w:p>",
        );
        let after = insert(&xml, InsertionSpec::after_anchor("Intro", "<new/>"));
        assert_eq!(
            after,
            doc(concat!(
                "<w:p><w:r><w:t>Intro</w:t></w:r></w:p>",
                "<new/>",
                "<w:p><w:r><w:t>Conclusion</w:t></w:r></w:p>",
            ))
        );
        let before = insert(&xml, InsertionSpec::before_anchor("Conclusion", "<new/>"));
        assert_eq!(before, after);
    }

    #[test]
    fn inherited_namespace_declarations_are_not_repeated() {
        let xml = doc("<w:p/>");
        let payload = format!(r#"<w:p xmlns:w="{NS_W}"><w:r><w:t>x</w:t></w:r></w:p>"#);
        let out = insert(&xml, InsertionSpec::body_end(payload));
        assert_eq!(out, doc("<w:p/><w:p><w:r><w:t>x</w:t></w:r></w:p>"));
        assert_eq!(out.matches("xmlns:w=").count(), 1);
    }

    #[test]
    fn self_closing_body_is_opened() {
        let xml = format!(r#"<w:document xmlns:w="{NS_W}"><w:body /></w:document>"#);
        let out = insert(&xml, InsertionSpec::body_end("<w:p/>"));
        assert_eq!(out, doc("<w:p/>"));
    }

    #[test]
    fn missing_body_is_structural() {
        let err = insert_node(b"<w:hdr xmlns:w=\"urn:w\"/>", &InsertionSpec::body_start("<w:p/>"))
            .unwrap_err();
        assert!(matches!(err, PatchError::Structural(_)), "{err:?}");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn missing_anchor_is_recoverable() {
        let xml = doc("<w:p><w:r><w:t>Intro</w:t></w:r></w:p>");
        let err = insert_node(xml.as_bytes(), &InsertionSpec::after_anchor("Outro", "<new/>"))
            .unwrap_err();
        assert!(err.is_recoverable(), "{err:?}");
    }

    #[test]
    fn payload_is_validated_before_the_buffer() {
        // The buffer is not even XML; validation must still win.
        let err = insert_node(b"<<<", &InsertionSpec::body_start("<w:p>")).unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)), "{err:?}");
        let err = insert_node(b"<<<", &InsertionSpec::after_anchor("", "<p/>")).unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)), "{err:?}");
    }
}
