//! Identifier allocation scoped to the current document state.
//!
//! [`next_identifier`] is the stateless form: it rescans a buffer and returns `max + 1`, so the
//! caller must write the returned id back before asking again. [`IdentifierPool`] is the
//! explicit state object to thread through a multi-step document build; it remembers what it
//! has handed out, so consecutive allocations never collide even before the ids land in a part.

use std::collections::BTreeMap;

use crate::xml::{tokenize, TokenStream};
use crate::PatchError;

/// An identifier namespace. Each kind is unique only within its own scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentifierKind {
    /// `w:id` on `w:bookmarkStart` / `w:bookmarkEnd`.
    Bookmark,
    /// `w:abstractNumId` on `w:abstractNum` (numbering.xml).
    AbstractNumbering,
    /// `w:numId` on `w:num` (numbering.xml).
    Numbering,
    /// `Id="rIdN"` on `<Relationship>` (any `.rels` part).
    Relationship,
    /// `id` on `wp:docPr` and the `*:cNvPr` non-visual properties of drawing objects.
    Drawing,
    /// `w:id` on comments and their range markers.
    Comment,
    /// `c:idx` / `c:order` values of chart series.
    ChartSeries,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 7] = [
        IdentifierKind::Bookmark,
        IdentifierKind::AbstractNumbering,
        IdentifierKind::Numbering,
        IdentifierKind::Relationship,
        IdentifierKind::Drawing,
        IdentifierKind::Comment,
        IdentifierKind::ChartSeries,
    ];

    fn elements(self) -> &'static [&'static str] {
        match self {
            IdentifierKind::Bookmark => &["bookmarkStart", "bookmarkEnd"],
            IdentifierKind::AbstractNumbering => &["abstractNum"],
            IdentifierKind::Numbering => &["num"],
            IdentifierKind::Relationship => &["Relationship"],
            IdentifierKind::Drawing => &["docPr", "cNvPr"],
            IdentifierKind::Comment => &[
                "comment",
                "commentRangeStart",
                "commentRangeEnd",
                "commentReference",
            ],
            IdentifierKind::ChartSeries => &["idx", "order"],
        }
    }

    fn attribute(self) -> &'static str {
        match self {
            IdentifierKind::Bookmark | IdentifierKind::Comment => "id",
            IdentifierKind::AbstractNumbering => "abstractNumId",
            IdentifierKind::Numbering => "numId",
            IdentifierKind::Relationship => "Id",
            IdentifierKind::Drawing => "id",
            IdentifierKind::ChartSeries => "val",
        }
    }

    /// Parse one attribute value; `None` for values that are not ids of this kind.
    fn parse(self, value: &str) -> Option<u32> {
        let value = value.trim();
        match self {
            IdentifierKind::Relationship => value.strip_prefix("rId")?.parse().ok(),
            _ => value.parse().ok(),
        }
    }
}

/// Abstract/concrete numbering ids allocated together for a new list definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberingIds {
    pub abstract_num_id: u32,
    pub num_id: u32,
}

/// Highest id of `kind` present in `xml`, if any. Unparsable values are skipped.
pub fn max_identifier(xml: &[u8], kind: IdentifierKind) -> Result<Option<u32>, PatchError> {
    Ok(scan_max(&tokenize(xml)?, kind))
}

pub(crate) fn scan_max(stream: &TokenStream<'_>, kind: IdentifierKind) -> Option<u32> {
    let elements = kind.elements();
    let mut max = None;

    for (index, token) in stream.tokens.iter().enumerate() {
        if !token.is_element() || !elements.contains(&token.local_name()) {
            continue;
        }
        // `c:idx`/`c:order` also appear on data points and labels; only series-level ones count.
        if kind == IdentifierKind::ChartSeries
            && token
                .parent
                .map_or(true, |parent| stream.get(parent).local_name() != "ser")
        {
            continue;
        }
        let Some(value) = token
            .attrs
            .iter()
            .find(|a| a.declared_prefix().is_none() && a.local_key() == kind.attribute())
        else {
            continue;
        };
        match kind.parse(&value.value) {
            Some(id) => max = max.max(Some(id)),
            None => log::debug!(
                "skipping unparsable {kind:?} identifier {:?} at token {index}",
                value.value
            ),
        }
    }

    max
}

/// Next unused identifier of `kind`: `max + 1`, or `1` when the buffer has none.
///
/// The buffer is the only state. Write the returned id into the buffer before calling again for
/// the same kind, or use [`IdentifierPool`].
pub fn next_identifier(xml: &[u8], kind: IdentifierKind) -> Result<u32, PatchError> {
    next_after(kind, max_identifier(xml, kind)?)
}

/// The id after `max` (`1` when nothing is taken). Running past `u32::MAX` is an error, never a
/// repeat of the highest id.
pub(crate) fn next_after(kind: IdentifierKind, max: Option<u32>) -> Result<u32, PatchError> {
    match max {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or_else(|| exhausted(kind)),
    }
}

pub(crate) fn exhausted(kind: IdentifierKind) -> PatchError {
    PatchError::Structural(format!("{kind:?} identifier space exhausted"))
}

/// Allocate a fresh abstract-numbering/numbering id pair from a numbering part.
pub fn next_numbering_ids(numbering_xml: &[u8]) -> Result<NumberingIds, PatchError> {
    Ok(NumberingIds {
        abstract_num_id: next_identifier(numbering_xml, IdentifierKind::AbstractNumbering)?,
        num_id: next_identifier(numbering_xml, IdentifierKind::Numbering)?,
    })
}

/// Explicit per-document identifier state.
///
/// Seed it with every part that shares an id scope (`observe`), then `allocate` as many ids as
/// the build needs.
#[derive(Debug, Clone, Default)]
pub struct IdentifierPool {
    high_water: BTreeMap<IdentifierKind, u32>,
}

impl IdentifierPool {
    /// A pool seeded from one buffer.
    pub fn scan(xml: &[u8]) -> Result<Self, PatchError> {
        let mut pool = Self::default();
        pool.observe(xml)?;
        Ok(pool)
    }

    /// Fold every identifier found in `xml` into the pool.
    pub fn observe(&mut self, xml: &[u8]) -> Result<(), PatchError> {
        let stream = tokenize(xml)?;
        for kind in IdentifierKind::ALL {
            if let Some(max) = scan_max(&stream, kind) {
                self.reserve(kind, max);
            }
        }
        Ok(())
    }

    /// Mark `id` as taken.
    pub fn reserve(&mut self, kind: IdentifierKind, id: u32) {
        let entry = self.high_water.entry(kind).or_insert(0);
        *entry = (*entry).max(id);
    }

    /// The id `allocate` would hand out next, without taking it.
    pub fn peek(&self, kind: IdentifierKind) -> Result<u32, PatchError> {
        next_after(kind, self.high_water.get(&kind).copied())
    }

    pub fn allocate(&mut self, kind: IdentifierKind) -> Result<u32, PatchError> {
        let id = self.peek(kind)?;
        self.reserve(kind, id);
        Ok(id)
    }

    pub fn allocate_numbering(&mut self) -> Result<NumberingIds, PatchError> {
        Ok(NumberingIds {
            abstract_num_id: self.allocate(IdentifierKind::AbstractNumbering)?,
            num_id: self.allocate(IdentifierKind::Numbering)?,
        })
    }

    /// Allocate the next relationship id as written in `.rels` parts (`rIdN`).
    pub fn allocate_relationship_id(&mut self) -> Result<String, PatchError> {
        Ok(format!("rId{}", self.allocate(IdentifierKind::Relationship)?))
    }
}
