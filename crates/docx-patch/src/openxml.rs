//! OPC relationship parts (`*.rels`) and part-name resolution.

use crate::ids::{next_after, scan_max, IdentifierKind};
use crate::xml::{escape_attr, open_empty_tag, prefixed_tag, splice, tokenize, TokenKind};
use crate::PatchError;

pub const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_TYPE_CHART: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart";

const RELATIONSHIPS: &str = "Relationships";
const RELATIONSHIP: &str = "Relationship";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }
}

/// The relationships part that belongs to `part_name` (`word/document.xml` ->
/// `word/_rels/document.xml.rels`).
pub fn rels_part_name(part_name: &str) -> String {
    let part_name = part_name.strip_prefix('/').unwrap_or(part_name);
    let (dir, file) = part_name.rsplit_once('/').unwrap_or(("", part_name));
    if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub fn resolve_target(base_part: &str, target: &str) -> String {
    // OPC part names do not include fragments.
    let target = target.split_once('#').map_or(target, |(base, _)| base);
    if target.is_empty() {
        // A bare `#fragment` points back at the source part.
        return base_part.strip_prefix('/').unwrap_or(base_part).to_string();
    }

    // Absolute targets are rooted at the package root, not the source part's folder.
    let (target, base_dir) = match target.strip_prefix('/') {
        Some(target) => (target, ""),
        None => (
            target,
            base_part.rsplit_once('/').map_or("", |(dir, _)| dir),
        ),
    };

    let mut components: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            _ => components.push(segment),
        }
    }

    components.join("/")
}

pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, PatchError> {
    let stream = tokenize(xml)?;
    let relationships = stream
        .tokens
        .iter()
        .filter(|token| {
            token.is_element() && token.local_name().eq_ignore_ascii_case(RELATIONSHIP)
        })
        .filter_map(|token| {
            let attr = |key: &str| {
                token
                    .attrs
                    .iter()
                    .find(|a| {
                        a.declared_prefix().is_none() && a.local_key().eq_ignore_ascii_case(key)
                    })
                    .map(|a| a.value.clone())
            };
            // Entries without an id, type, and target are skipped.
            Some(Relationship {
                id: attr("Id")?,
                type_uri: attr("Type")?,
                target: attr("Target")?,
                target_mode: attr("TargetMode"),
            })
        })
        .collect();
    Ok(relationships)
}

/// Append a `<Relationship>` to a relationships part and return the new part plus the allocated
/// `rIdN`.
///
/// The new element goes right before `</Relationships>`; the rest of the part is untouched.
pub fn add_relationship(
    rels_xml: &[u8],
    type_uri: &str,
    target: &str,
    target_mode: Option<&str>,
) -> Result<(Vec<u8>, String), PatchError> {
    if type_uri.trim().is_empty() || target.trim().is_empty() {
        return Err(PatchError::Validation(
            "relationship type and target must not be empty".to_string(),
        ));
    }

    let stream = tokenize(rels_xml)?;
    let root = stream
        .find_first(RELATIONSHIPS)
        .ok_or_else(|| PatchError::Structural("part has no Relationships element".to_string()))?;
    let kind = IdentifierKind::Relationship;
    let id = format!("rId{}", next_after(kind, scan_max(&stream, kind))?);

    let root_token = stream.get(root);
    let name = prefixed_tag(root_token.prefix(), RELATIONSHIP);
    let mut element = format!(
        r#"<{name} Id="{id}" Type="{}" Target="{}""#,
        escape_attr(type_uri),
        escape_attr(target)
    );
    if let Some(mode) = target_mode {
        element.push_str(&format!(r#" TargetMode="{}""#, escape_attr(mode)));
    }
    element.push_str("/>");

    let out = match root_token.kind {
        TokenKind::Start => {
            let at = stream.get(root_token.partner).span.start;
            splice(rels_xml, at, element.as_bytes())
        }
        _ => {
            let mut out = rels_xml[..root_token.span.start].to_vec();
            out.extend(open_empty_tag(
                stream.bytes(root_token.span.clone()),
                &root_token.name,
                element.as_bytes(),
            ));
            out.extend_from_slice(&rels_xml[root_token.span.end..]);
            out
        }
    };

    log::debug!("added relationship {id} -> {target:?}");
    Ok((out, id))
}
