//! Byte-preserving XML token stream.
//!
//! Every patch operation works on a flat list of tokens that record where each event came from
//! in the original buffer. Because the spans are contiguous and cover the whole input, edits
//! are expressed as splices into the original bytes: anything the operation does not touch is
//! copied verbatim, so attribute order, namespace declarations, whitespace, and entity spelling
//! survive untouched.

use std::borrow::Cow;
use std::ops::Range;

use quick_xml::events::attributes::Attribute as XmlAttribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};

use crate::PatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Start,
    End,
    Empty,
    Text,
    CData,
    /// Declarations, comments, processing instructions, doctypes.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribute {
    /// Qualified key as written (`w:id`, `xmlns:w`).
    pub key: String,
    /// Raw (still escaped) value.
    pub raw: String,
    pub value: String,
}

impl Attribute {
    pub fn local_key(&self) -> &str {
        local_name_str(&self.key)
    }

    /// The prefix this attribute declares, if it is a namespace declaration. The default
    /// namespace (`xmlns="..."`) is reported as `""`.
    pub fn declared_prefix(&self) -> Option<&str> {
        if self.key == "xmlns" {
            Some("")
        } else {
            self.key.strip_prefix("xmlns:")
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Qualified tag name; empty for non-element tokens.
    pub name: String,
    pub attrs: Vec<Attribute>,
    /// Byte range of the event in the original buffer.
    pub span: Range<usize>,
    /// `Start` <-> `End` pairing. Every other token points at itself.
    pub partner: usize,
    pub parent: Option<usize>,
}

impl Token {
    pub fn local_name(&self) -> &str {
        local_name_str(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, TokenKind::Start | TokenKind::Empty)
    }
}

#[derive(Debug)]
pub(crate) struct TokenStream<'a> {
    pub source: &'a [u8],
    pub tokens: Vec<Token>,
}

pub(crate) fn local_name_str(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    }
}

pub(crate) fn prefixed_tag(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

pub(crate) fn escape_text(value: &str) -> Cow<'_, str> {
    quick_xml::escape::partial_escape(value)
}

pub(crate) fn escape_attr(value: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(value)
}

/// Tokenize a whole buffer. The buffer must be well formed: balanced tags, matching end names,
/// and no duplicate attributes.
pub(crate) fn tokenize(xml: &[u8]) -> Result<TokenStream<'_>, PatchError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut tokens: Vec<Token> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut last = 0usize;

    loop {
        let event = reader.read_event()?;
        let mut end = reader.buffer_position() as usize;
        let index = tokens.len();
        let parent = stack.last().copied();

        let (kind, name, attrs) = match event {
            Event::Eof => break,
            Event::Start(ref e) => (TokenKind::Start, qname(e)?, read_attributes(e)?),
            Event::Empty(ref e) => (TokenKind::Empty, qname(e)?, read_attributes(e)?),
            Event::End(ref e) => (
                TokenKind::End,
                std::str::from_utf8(e.name().as_ref())?.to_string(),
                Vec::new(),
            ),
            Event::Text(_) => {
                // Text ends right before the next `<`; never let the span swallow it.
                if end > last && xml.get(end - 1) == Some(&b'<') {
                    end -= 1;
                }
                (TokenKind::Text, String::new(), Vec::new())
            }
            Event::CData(_) => (TokenKind::CData, String::new(), Vec::new()),
            _ => (TokenKind::Other, String::new(), Vec::new()),
        };

        let mut token = Token {
            kind,
            name,
            attrs,
            span: last..end,
            partner: index,
            parent,
        };

        match kind {
            TokenKind::Start => stack.push(index),
            TokenKind::End => {
                let Some(open) = stack.pop() else {
                    return Err(PatchError::Structural(format!(
                        "unexpected closing tag </{}> at byte {last}",
                        token.name
                    )));
                };
                token.partner = open;
                token.parent = tokens[open].parent;
                tokens[open].partner = index;
            }
            _ => {}
        }

        tokens.push(token);
        last = end;
    }

    if let Some(open) = stack.pop() {
        return Err(PatchError::Structural(format!(
            "unclosed element <{}>",
            tokens[open].name
        )));
    }

    Ok(TokenStream {
        source: xml,
        tokens,
    })
}

fn qname(e: &BytesStart<'_>) -> Result<String, PatchError> {
    Ok(std::str::from_utf8(e.name().as_ref())?.to_string())
}

/// Attributes of a start tag. A repeated key is an error, except for a namespace declaration
/// repeated with the same URI, which is kept so fragment preparation can drop it.
fn read_attributes(e: &BytesStart<'_>) -> Result<Vec<Attribute>, PatchError> {
    let mut out: Vec<Attribute> = Vec::new();
    let mut attributes = e.attributes();
    attributes.with_checks(false);
    for attr in attributes {
        let attr = attr?;
        let attr = Attribute {
            key: std::str::from_utf8(attr.key.as_ref())?.to_string(),
            raw: std::str::from_utf8(attr.value.as_ref())?.to_string(),
            value: attr.unescape_value()?.into_owned(),
        };
        if let Some(earlier) = out.iter().find(|a| a.key == attr.key) {
            if attr.declared_prefix().is_none() || earlier.value != attr.value {
                return Err(PatchError::Structural(format!(
                    "duplicate attribute `{}` on <{}>",
                    attr.key,
                    String::from_utf8_lossy(e.name().as_ref())
                )));
            }
        }
        out.push(attr);
    }
    Ok(out)
}

impl<'a> TokenStream<'a> {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn get(&self, index: usize) -> &Token {
        &self.tokens[index]
    }

    pub fn bytes(&self, range: Range<usize>) -> &'a [u8] {
        &self.source[range]
    }

    /// Outer span of an element: from its `<` to the end of its closing tag.
    pub fn element_span(&self, index: usize) -> Range<usize> {
        let token = &self.tokens[index];
        token.span.start..self.tokens[token.partner].span.end
    }

    /// Inner span of an element. Empty for self-closing elements.
    pub fn content_span(&self, index: usize) -> Range<usize> {
        let token = &self.tokens[index];
        match token.kind {
            TokenKind::Start => token.span.end..self.tokens[token.partner].span.start,
            _ => token.span.end..token.span.end,
        }
    }

    /// Tokens strictly inside an element, in document order.
    pub fn inner(&self, index: usize) -> Range<usize> {
        let token = &self.tokens[index];
        match token.kind {
            TokenKind::Start => index + 1..token.partner,
            _ => index + 1..index + 1,
        }
    }

    /// First element (in document order) with the given local name.
    pub fn find_first(&self, local: &str) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| t.is_element() && t.local_name() == local)
    }

    /// Direct element children of `index`.
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.inner(index)
            .filter(move |&i| self.tokens[i].is_element() && self.tokens[i].parent == Some(index))
    }

    pub fn child(&self, index: usize, local: &str) -> Option<usize> {
        self.children(index)
            .find(|&i| self.tokens[i].local_name() == local)
    }

    /// Nearest ancestor-or-self element with the given local name.
    pub fn enclosing(&self, index: usize, local: &str) -> Option<usize> {
        let mut current = if self.tokens[index].is_element() {
            Some(index)
        } else if self.tokens[index].kind == TokenKind::End {
            Some(self.tokens[index].partner)
        } else {
            self.tokens[index].parent
        };
        while let Some(i) = current {
            if self.tokens[i].local_name() == local {
                return Some(i);
            }
            current = self.tokens[i].parent;
        }
        None
    }

    pub fn has_ancestor(&self, index: usize, local: &str) -> bool {
        let mut current = self.tokens[index].parent;
        while let Some(i) = current {
            if self.tokens[i].local_name() == local {
                return true;
            }
            current = self.tokens[i].parent;
        }
        false
    }

    /// Index of the token whose span contains `offset`.
    pub fn token_at(&self, offset: usize) -> Option<usize> {
        let idx = self.tokens.partition_point(|t| t.span.end <= offset);
        (idx < self.tokens.len()).then_some(idx)
    }

    /// Element whose content contains the token boundary at `offset`.
    pub fn container_at(&self, offset: usize) -> Option<usize> {
        let idx = self.tokens.partition_point(|t| t.span.start < offset);
        let token = self.tokens.get(idx)?;
        match token.kind {
            TokenKind::End => Some(token.partner),
            _ => token.parent,
        }
    }

    /// Namespace bindings visible inside the content of `element` (or at the top level when
    /// `element` is `None`), innermost declaration winning.
    pub fn namespaces_in_scope(&self, element: Option<usize>) -> Vec<(String, String)> {
        let mut chain = Vec::new();
        let mut current = element;
        while let Some(i) = current {
            chain.push(i);
            current = self.tokens[i].parent;
        }

        let mut scope: Vec<(String, String)> = Vec::new();
        for &i in chain.iter().rev() {
            for attr in &self.tokens[i].attrs {
                if let Some(prefix) = attr.declared_prefix() {
                    bind(&mut scope, prefix, &attr.value);
                }
            }
        }
        scope
    }
}

fn bind(scope: &mut Vec<(String, String)>, prefix: &str, uri: &str) {
    match scope.iter_mut().find(|(p, _)| p == prefix) {
        Some(existing) => existing.1 = uri.to_string(),
        None => scope.push((prefix.to_string(), uri.to_string())),
    }
}

fn lookup<'s>(scope: &'s [(String, String)], prefix: &str) -> Option<&'s str> {
    scope
        .iter()
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// One decoded character of a text node plus the raw bytes it was spelled with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedChar {
    pub ch: char,
    pub span: Range<usize>,
}

/// Decode a raw text node, keeping the original byte span of every character. Entity references
/// map to their whole `&...;` span; unknown entities are kept literally.
pub(crate) fn decode_text(raw: &[u8], base: usize) -> Result<Vec<DecodedChar>, PatchError> {
    let text = std::str::from_utf8(raw)?;
    let mut out = Vec::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        if ch == '&' {
            if let Some(semi) = text[pos..].find(';') {
                let entity = &text[pos..pos + semi + 1];
                if let Ok(decoded) = quick_xml::escape::unescape(entity) {
                    let mut decoded_chars = decoded.chars();
                    if let (Some(single), None) = (decoded_chars.next(), decoded_chars.next()) {
                        out.push(DecodedChar {
                            ch: single,
                            span: base + pos..base + pos + entity.len(),
                        });
                        while chars.peek().is_some_and(|&(p, _)| p < pos + entity.len()) {
                            chars.next();
                        }
                        continue;
                    }
                }
            }
        }
        out.push(DecodedChar {
            ch,
            span: base + pos..base + pos + ch.len_utf8(),
        });
    }

    Ok(out)
}

/// A caller-supplied markup fragment, checked for balance before any buffer is touched.
#[derive(Debug)]
pub(crate) struct Fragment<'a> {
    stream: TokenStream<'a>,
}

impl<'a> Fragment<'a> {
    pub fn parse(fragment: &'a str) -> Result<Self, PatchError> {
        if fragment.trim().is_empty() {
            return Err(PatchError::Validation("markup fragment is empty".to_string()));
        }

        let stream = tokenize(fragment.as_bytes()).map_err(|err| {
            PatchError::Validation(format!("markup fragment is not well formed: {err}"))
        })?;

        if !stream.tokens.iter().any(Token::is_element) {
            return Err(PatchError::Validation(
                "markup fragment contains no element".to_string(),
            ));
        }
        if stream.tokens.iter().any(|t| {
            t.kind == TokenKind::Other && stream.bytes(t.span.clone()).starts_with(b"<?xml")
        }) {
            return Err(PatchError::Validation(
                "markup fragment must not carry an XML declaration".to_string(),
            ));
        }

        Ok(Self { stream })
    }

    /// Bytes to splice at a point whose in-scope namespaces are `scope`.
    ///
    /// Every prefix the fragment uses must be declared, either inside the fragment or in
    /// `scope`. Declarations that merely repeat a binding already visible at the insertion point
    /// are removed so an edit never stacks redundant `xmlns` attributes onto the part; all other
    /// bytes of the fragment are kept as written.
    pub fn for_scope(&self, scope: &[(String, String)]) -> Result<String, PatchError> {
        let stream = &self.stream;
        // Scope seen by each element: the outer scope plus fragment-level declarations above it.
        let mut scopes: Vec<Option<Vec<(String, String)>>> = vec![None; stream.len()];
        let mut out = String::with_capacity(stream.source.len());

        for (index, token) in stream.tokens.iter().enumerate() {
            let raw = std::str::from_utf8(stream.bytes(token.span.clone()))?;
            if !token.is_element() {
                out.push_str(raw);
                continue;
            }

            let inherited = match token.parent {
                Some(parent) => scopes[parent].clone().unwrap_or_default(),
                None => scope.to_vec(),
            };
            let mut own = inherited.clone();
            let mut redundant = Vec::new();
            for (attr_index, attr) in token.attrs.iter().enumerate() {
                if let Some(prefix) = attr.declared_prefix() {
                    let repeated = token.attrs[..attr_index].iter().any(|a| a.key == attr.key);
                    if repeated || lookup(&inherited, prefix) == Some(attr.value.as_str()) {
                        redundant.push(attr_index);
                    }
                    bind(&mut own, prefix, &attr.value);
                }
            }

            check_prefix_declared(token.prefix(), &own, &token.name)?;
            for attr in &token.attrs {
                if attr.declared_prefix().is_none() {
                    if let Some((prefix, _)) = attr.key.split_once(':') {
                        check_prefix_declared(Some(prefix), &own, &attr.key)?;
                    }
                }
            }

            if redundant.is_empty() {
                out.push_str(raw);
            } else {
                out.push_str(&rewrite_start_tag(token, &redundant)?);
            }
            if token.kind == TokenKind::Start {
                scopes[index] = Some(own);
            }
        }

        Ok(out)
    }
}

fn check_prefix_declared(
    prefix: Option<&str>,
    scope: &[(String, String)],
    name: &str,
) -> Result<(), PatchError> {
    match prefix {
        None | Some("xml") | Some("xmlns") => Ok(()),
        Some(prefix) if lookup(scope, prefix).is_some() => Ok(()),
        Some(prefix) => Err(PatchError::Validation(format!(
            "namespace prefix `{prefix}` used by `{name}` is not declared"
        ))),
    }
}

/// Re-encode a start tag without the attributes at `skip`. Remaining attributes keep their
/// original order and raw (escaped) values.
fn rewrite_start_tag(token: &Token, skip: &[usize]) -> Result<String, PatchError> {
    let mut start = BytesStart::new(token.name.as_str());
    for (index, attr) in token.attrs.iter().enumerate() {
        if skip.contains(&index) {
            continue;
        }
        start.push_attribute(XmlAttribute {
            key: QName(attr.key.as_bytes()),
            value: double_quotable(&attr.raw),
        });
    }

    let mut writer = Writer::new(Vec::new());
    match token.kind {
        TokenKind::Empty => writer.write_event(Event::Empty(start))?,
        _ => writer.write_event(Event::Start(start))?,
    }
    Ok(std::str::from_utf8(&writer.into_inner())?.to_string())
}

/// A raw attribute value safe to write between double quotes. Values that were single-quoted
/// may hold a literal `"`.
fn double_quotable(raw: &str) -> Cow<'_, [u8]> {
    if raw.contains('"') {
        Cow::Owned(raw.replace('"', "&quot;").into_bytes())
    } else {
        Cow::Borrowed(raw.as_bytes())
    }
}

/// Turn a self-closing tag (`<x a="1"/>`) into `<x a="1">content</x>`.
pub(crate) fn open_empty_tag(tag: &[u8], name: &str, content: &[u8]) -> Vec<u8> {
    let mut open = tag.strip_suffix(b"/>").unwrap_or(tag);
    while let [head @ .., last] = open {
        if !last.is_ascii_whitespace() {
            break;
        }
        open = head;
    }
    let mut out = Vec::with_capacity(open.len() + content.len() + name.len() + 4);
    out.extend_from_slice(open);
    out.push(b'>');
    out.extend_from_slice(content);
    out.extend_from_slice(b"</");
    out.extend_from_slice(name.as_bytes());
    out.push(b'>');
    out
}

/// `source[..at] + insert + source[at..]`.
pub(crate) fn splice(source: &[u8], at: usize, insert: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(source.len() + insert.len());
    out.extend_from_slice(&source[..at]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&source[at..]);
    out
}
