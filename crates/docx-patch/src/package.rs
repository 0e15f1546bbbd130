//! In-memory OPC package (`.docx`) wrapper around the byte-level patch operations.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::read::ZipFile;

use crate::openxml::{parse_relationships, rels_part_name, resolve_target, REL_TYPE_OFFICE_DOCUMENT};
use crate::PatchError;

/// Maximum allowed *inflated* bytes for a single part.
///
/// Guards against ZIP bombs (tiny compressed size, huge uncompressed size) and forged size
/// metadata when a whole package is materialized in memory.
pub const MAX_DOCX_PART_BYTES: u64 = 256 * 1024 * 1024; // 256 MiB

/// Maximum allowed *inflated* bytes across all parts of a package.
pub const MAX_DOCX_PACKAGE_TOTAL_BYTES: u64 = 512 * 1024 * 1024; // 512 MiB

const DEFAULT_MAIN_DOCUMENT: &str = "word/document.xml";
const CHARTS_PREFIX: &str = "word/charts/chart";

/// Size limits enforced by [`DocxPackage::from_bytes_limited`].
#[derive(Debug, Clone, Copy)]
pub struct PackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: MAX_DOCX_PART_BYTES,
            max_total_bytes: MAX_DOCX_PACKAGE_TOTAL_BYTES,
        }
    }
}

/// Every part of a package, inflated, keyed by zip entry name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxPackage {
    parts: BTreeMap<String, Vec<u8>>,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PatchError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, PatchError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut budget = InflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            let buf = read_part_with_budget(&mut file, &name, limits.max_part_bytes, &mut budget)?;
            parts.insert(name, buf);
        }

        log::debug!("loaded {} parts ({} bytes inflated)", parts.len(), budget.used_bytes);
        Ok(Self { parts })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        if let Some(bytes) = self.parts.get(name) {
            return Some(bytes.as_slice());
        }
        // Some producers write entry names with a leading `/`.
        let bytes = match name.strip_prefix('/') {
            Some(stripped) => self.parts.get(stripped),
            None => self.parts.get(&format!("/{name}")),
        };
        bytes.map(Vec::as_slice)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn set_part(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.parts.insert(name.into(), bytes);
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), PatchError> {
        w.write_all(&self.write_to_bytes()?)?;
        Ok(())
    }

    pub fn write_to_bytes(&self) -> Result<Vec<u8>, PatchError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    /// Name of the main document part: the `officeDocument` relationship target from
    /// `_rels/.rels`, or `word/document.xml` when the package does not declare one.
    pub fn main_document_part(&self) -> Result<String, PatchError> {
        if let Some(rels) = self.part(&rels_part_name("")) {
            let main = parse_relationships(rels)?
                .into_iter()
                .find(|rel| rel.type_uri == REL_TYPE_OFFICE_DOCUMENT && !rel.is_external());
            if let Some(rel) = main {
                return Ok(resolve_target("", &rel.target));
            }
        }
        if self.part(DEFAULT_MAIN_DOCUMENT).is_some() {
            return Ok(DEFAULT_MAIN_DOCUMENT.to_string());
        }
        Err(PatchError::MissingPart(DEFAULT_MAIN_DOCUMENT.to_string()))
    }

    /// `word/charts/chart*.xml` parts, in name order.
    pub fn chart_parts(&self) -> Vec<String> {
        self.parts
            .keys()
            .map(|name| name.strip_prefix('/').unwrap_or(name))
            .filter(|name| name.starts_with(CHARTS_PREFIX) && name.ends_with(".xml"))
            .map(str::to_string)
            .collect()
    }

    /// Resolve relationship `relationship_id` of `part_name` to a part name. External targets
    /// resolve to `None`.
    pub fn relationship_target(
        &self,
        part_name: &str,
        relationship_id: &str,
    ) -> Result<Option<String>, PatchError> {
        let Some(rels) = self.part(&rels_part_name(part_name)) else {
            return Ok(None);
        };
        Ok(parse_relationships(rels)?
            .into_iter()
            .find(|rel| rel.id == relationship_id)
            .filter(|rel| !rel.is_external())
            .map(|rel| resolve_target(part_name, &rel.target)))
    }

    /// Run `edit` on one part and store its output.
    ///
    /// The part is replaced only when `edit` succeeds; on error the package is left exactly as it
    /// was and the error is returned.
    pub fn patch_part<T, F>(&mut self, name: &str, edit: F) -> Result<T, PatchError>
    where
        F: FnOnce(&[u8]) -> Result<(Vec<u8>, T), PatchError>,
    {
        let key = self.part_key(name)?;
        let (bytes, value) = edit(&self.parts[&key])?;
        log::debug!("patched part {key} ({} bytes)", bytes.len());
        self.parts.insert(key, bytes);
        Ok(value)
    }

    fn part_key(&self, name: &str) -> Result<String, PatchError> {
        let stripped = name.strip_prefix('/').unwrap_or(name);
        [name.to_string(), stripped.to_string(), format!("/{stripped}")]
            .into_iter()
            .find(|key| self.parts.contains_key(key))
            .ok_or_else(|| PatchError::MissingPart(name.to_string()))
    }
}

/// Total inflated bytes still allowed while loading a package.
struct InflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl InflateBudget {
    fn new(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes,
            used_bytes: 0,
        }
    }

    fn remaining_bytes(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }

    fn consume(&mut self, bytes: u64) -> Result<(), PatchError> {
        self.used_bytes = self.used_bytes.saturating_add(bytes);
        if self.used_bytes > self.max_total_bytes {
            return Err(PatchError::PackageTooLarge {
                total: self.used_bytes,
                max: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// Read one zip entry without trusting its size metadata: the declared size is checked first,
/// then the read itself is capped at `limit + 1` bytes.
fn read_part_with_budget(
    file: &mut ZipFile<'_>,
    part: &str,
    max_part_bytes: u64,
    budget: &mut InflateBudget,
) -> Result<Vec<u8>, PatchError> {
    let declared_size = file.size();
    if declared_size > max_part_bytes {
        return Err(PatchError::PartTooLarge {
            part: part.to_string(),
            size: declared_size,
            max: max_part_bytes,
        });
    }

    let remaining = budget.remaining_bytes();
    let limit_is_total = remaining < max_part_bytes;
    let effective_max = max_part_bytes.min(remaining);
    if limit_is_total && declared_size > effective_max {
        return Err(PatchError::PackageTooLarge {
            total: budget.used_bytes.saturating_add(declared_size),
            max: budget.max_total_bytes,
        });
    }

    let mut buf = Vec::new();
    file.take(effective_max.saturating_add(1))
        .read_to_end(&mut buf)?;

    let observed = buf.len() as u64;
    if observed > effective_max {
        if limit_is_total {
            return Err(PatchError::PackageTooLarge {
                total: budget.used_bytes.saturating_add(observed),
                max: budget.max_total_bytes,
            });
        }
        return Err(PatchError::PartTooLarge {
            part: part.to_string(),
            size: observed,
            max: max_part_bytes,
        });
    }

    budget.consume(observed)?;
    Ok(buf)
}
