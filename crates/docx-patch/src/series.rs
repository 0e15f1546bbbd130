//! Chart series synchronization (`c:ser` lists in DrawingML chart parts).
//!
//! The chart part is rewritten with a list of span edits computed from one token stream and
//! applied in a single pass, so everything outside the rewritten data fields (shape
//! properties, labels, axes, extension lists) is copied byte for byte.
//!
//! Per series position `i`:
//! - `i < min(replacements, originals)`: the name, category, and value fields are rewritten in
//!   place; cell-range formulas are resized to the new point counts.
//! - `i >= replacements`: the series element is removed with its leading indentation.
//! - `i >= originals`: the last original is cloned (fresh `idx`/`order`, no `extLst`, data
//!   formulas moved one column right per added series). With no originals at all, a series
//!   with literal caches is built inside the first chart-type group.

use std::ops::Range;

use crate::a1::{resize_range, shift_range_columns, RangeFormula};
use crate::error::{FieldFormatError, SeriesField};
use crate::ids::{exhausted, scan_max, IdentifierKind};
use crate::xml::{escape_text, open_empty_tag, prefixed_tag, tokenize, TokenKind, TokenStream};
use crate::PatchError;

const SERIES: &str = "ser";
const EXTENSION_LIST: &str = "extLst";
const PLOT_AREA: &str = "plotArea";

/// `ser` children that precede the name field.
const BEFORE_NAME: &[&str] = &["idx", "order"];
/// First `ser` children that may follow the category field.
const AFTER_CATEGORIES: &[&str] = &[
    "val",
    "yVal",
    "shape",
    "smooth",
    "bubbleSize",
    "bubble3D",
    "extLst",
];
/// First `ser` children that may follow the value field.
const AFTER_VALUES: &[&str] = &["shape", "smooth", "bubbleSize", "bubble3D", "extLst"];
/// Chart-type group children that precede the series list.
const BEFORE_SERIES: &[&str] = &[
    "barDir",
    "grouping",
    "varyColors",
    "scatterStyle",
    "radarStyle",
    "wireframe",
    "ofPieType",
];
/// Chart-type groups whose series use `xVal`/`yVal` instead of `cat`/`val`.
const XY_GROUPS: &[&str] = &["scatterChart", "bubbleChart"];

/// Replacement data for one chart series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub categories: Vec<String>,
    /// `None` is a blank point: no `c:pt` is written, but it still counts towards `ptCount`.
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn new(
        name: impl Into<String>,
        categories: impl IntoIterator<Item = impl Into<String>>,
        values: impl IntoIterator<Item = Option<f64>>,
    ) -> Self {
        Self {
            name: name.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            values: values.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSyncOutcome {
    pub xml: Vec<u8>,
    /// Formulas that could not be recomputed. Each was left exactly as it was.
    pub format_errors: Vec<FieldFormatError>,
}

/// Rewrite the series list of a chart part so it matches `replacements`, position by position.
pub fn synchronize_series(
    xml: &[u8],
    replacements: &[Series],
) -> Result<SeriesSyncOutcome, PatchError> {
    for (index, series) in replacements.iter().enumerate() {
        if let Some(value) = series.values.iter().flatten().find(|v| !v.is_finite()) {
            return Err(PatchError::Validation(format!(
                "series {index} has a non-finite value ({value})"
            )));
        }
    }

    let stream = tokenize(xml)?;
    let originals = series_list(&stream);
    let mut sync = SeriesSync {
        stream: &stream,
        edits: Vec::new(),
        format_errors: Vec::new(),
        // Series ids are 0-based; `None` once the id space is used up.
        next_id: match scan_max(&stream, IdentifierKind::ChartSeries) {
            Some(max) => max.checked_add(1),
            None => Some(0),
        },
    };

    for (index, &ser) in originals.iter().enumerate() {
        match replacements.get(index) {
            Some(replacement) => {
                let edits = sync.rewrite_series(ser, index, replacement, None)?;
                sync.edits.extend(edits);
            }
            None => {
                log::debug!("dropping series {index}");
                sync.edits.push(Edit::remove(removal_range(&stream, ser)));
            }
        }
    }

    if replacements.len() > originals.len() {
        let extra = &replacements[originals.len()..];
        match originals.last() {
            Some(&template) => sync.clone_series(template, originals.len(), extra)?,
            None => sync.synthesize_series(extra)?,
        }
    }

    let SeriesSync {
        mut edits,
        format_errors,
        ..
    } = sync;
    for error in &format_errors {
        log::warn!("{error}");
    }
    edits.sort_by_key(|edit| (edit.range.start, edit.range.end));
    Ok(SeriesSyncOutcome {
        xml: apply_edits(xml, 0, &edits)?,
        format_errors,
    })
}

/// Every top-level `ser` element in document order. Series nested in extension lists (filtered
/// series) or inside another series are not part of the list.
fn series_list(stream: &TokenStream<'_>) -> Vec<usize> {
    stream
        .tokens
        .iter()
        .enumerate()
        .filter(|(index, token)| {
            token.is_element()
                && token.local_name() == SERIES
                && !stream.has_ancestor(*index, EXTENSION_LIST)
                && !stream.has_ancestor(*index, SERIES)
        })
        .map(|(index, _)| index)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    range: Range<usize>,
    text: String,
}

impl Edit {
    fn replace(range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at..at, text)
    }

    fn remove(range: Range<usize>) -> Self {
        Self::replace(range, String::new())
    }
}

/// Apply sorted, non-overlapping edits to `source`, whose first byte sits at offset `base` of the
/// buffer the edits were computed against.
fn apply_edits(source: &[u8], base: usize, edits: &[Edit]) -> Result<Vec<u8>, PatchError> {
    let extra: usize = edits.iter().map(|e| e.text.len()).sum();
    let mut out = Vec::with_capacity(source.len() + extra);
    let mut cursor = base;
    for edit in edits {
        if edit.range.start < cursor {
            return Err(PatchError::Structural(format!(
                "overlapping chart edits at byte {}",
                edit.range.start
            )));
        }
        out.extend_from_slice(&source[cursor - base..edit.range.start - base]);
        out.extend_from_slice(edit.text.as_bytes());
        cursor = edit.range.end;
    }
    out.extend_from_slice(&source[cursor - base..]);
    Ok(out)
}

/// The element span plus the whitespace-only text right before it, so no blank line is left.
fn removal_range(stream: &TokenStream<'_>, index: usize) -> Range<usize> {
    let span = stream.element_span(index);
    match index.checked_sub(1).map(|prev| stream.get(prev)) {
        Some(prev)
            if prev.kind == TokenKind::Text
                && stream
                    .bytes(prev.span.clone())
                    .iter()
                    .all(u8::is_ascii_whitespace) =>
        {
            prev.span.start..span.end
        }
        _ => span,
    }
}

/// Whitespace-only text right before `index`, used to indent inserted siblings the same way.
fn indentation<'a>(stream: &TokenStream<'a>, index: usize) -> &'a [u8] {
    let range = removal_range(stream, index);
    stream.bytes(range.start..stream.get(index).span.start)
}

/// Namespace prefix for elements written next to an existing chart element.
struct Tags<'t> {
    prefix: Option<&'t str>,
}

impl Tags<'_> {
    fn name(&self, local: &str) -> String {
        prefixed_tag(self.prefix, local)
    }

    fn element(&self, local: &str, content: &str) -> String {
        let name = self.name(local);
        format!("<{name}>{content}</{name}>")
    }

    fn val(&self, local: &str, value: impl std::fmt::Display) -> String {
        format!(r#"<{} val="{value}"/>"#, self.name(local))
    }

    /// `strCache`/`strLit` body.
    fn str_data(&self, local: &str, items: &[String]) -> String {
        let mut content = self.val("ptCount", items.len());
        for (idx, item) in items.iter().enumerate() {
            content.push_str(&self.point(idx, &escape_text(item)));
        }
        self.element(local, &content)
    }

    fn point(&self, idx: usize, value: &str) -> String {
        let pt = self.name("pt");
        format!(r#"<{pt} idx="{idx}">{}</{pt}>"#, self.element("v", value))
    }

    /// `numCache`/`numLit` body. `format_code` is an existing `formatCode` element, kept as is.
    fn num_data(&self, local: &str, format_code: Option<&str>, values: &[Option<f64>]) -> String {
        let mut content = format_code.unwrap_or_default().to_string();
        content.push_str(&self.val("ptCount", values.len()));
        for (idx, value) in values.iter().enumerate() {
            if let Some(value) = value {
                content.push_str(&self.point(idx, &value.to_string()));
            }
        }
        self.element(local, &content)
    }
}

/// How a series clone differs from its template.
#[derive(Debug, Clone, Copy)]
struct CloneOptions {
    id: u32,
    /// Columns to move the name and value formulas to the right.
    shift: u32,
}

struct SeriesSync<'s, 'a> {
    stream: &'s TokenStream<'a>,
    edits: Vec<Edit>,
    format_errors: Vec<FieldFormatError>,
    next_id: Option<u32>,
}

impl<'s, 'a> SeriesSync<'s, 'a> {
    /// Edits that turn series element `ser` into `replacement`.
    fn rewrite_series(
        &mut self,
        ser: usize,
        series_index: usize,
        replacement: &Series,
        clone: Option<CloneOptions>,
    ) -> Result<Vec<Edit>, PatchError> {
        let stream = self.stream;
        let token = stream.get(ser);
        if token.kind != TokenKind::Start {
            return Err(PatchError::Structural(format!(
                "series {series_index} is an empty element"
            )));
        }
        let tags = Tags {
            prefix: token.prefix(),
        };
        let children: Vec<usize> = stream.children(ser).collect();
        let xy = stream
            .get(ser)
            .parent
            .is_some_and(|group| XY_GROUPS.contains(&stream.get(group).local_name()));
        let shift = clone.map_or(0, |c| c.shift);

        let mut edits = Vec::new();
        let (mut name, mut categories, mut values) = (false, false, false);
        for &child in &children {
            let local = stream.get(child).local_name();
            match local {
                "idx" | "order" => {
                    if let Some(clone) = clone {
                        let tag = &stream.get(child).name;
                        edits.push(Edit::replace(
                            stream.element_span(child),
                            format!(r#"<{tag} val="{}"/>"#, clone.id),
                        ));
                    }
                }
                EXTENSION_LIST if clone.is_some() => {
                    edits.push(Edit::remove(stream.element_span(child)));
                }
                "tx" => {
                    name = true;
                    self.rewrite_name(child, series_index, replacement, shift, &mut edits)?;
                }
                "cat" | "xVal" => {
                    categories = true;
                    self.rewrite_categories(
                        child,
                        series_index,
                        &replacement.categories,
                        &mut edits,
                    )?;
                }
                "val" | "yVal" => {
                    values = true;
                    self.rewrite_values(
                        child,
                        series_index,
                        &replacement.values,
                        shift,
                        &mut edits,
                    )?;
                }
                _ => {}
            }
        }

        let end = stream.content_span(ser).end;
        let insert_before = |locals: &[&str], not: bool| {
            children
                .iter()
                .find(|&&c| locals.contains(&stream.get(c).local_name()) != not)
                .map_or(end, |&c| stream.get(c).span.start)
        };
        if !name && !replacement.name.is_empty() {
            edits.push(Edit::insert(
                insert_before(BEFORE_NAME, true),
                tags.element("tx", &tags.element("v", &escape_text(&replacement.name))),
            ));
        }
        if !categories && !replacement.categories.is_empty() {
            let local = if xy { "xVal" } else { "cat" };
            edits.push(Edit::insert(
                insert_before(AFTER_CATEGORIES, false),
                tags.element(local, &tags.str_data("strLit", &replacement.categories)),
            ));
        }
        if !values && !replacement.values.is_empty() {
            let local = if xy { "yVal" } else { "val" };
            edits.push(Edit::insert(
                insert_before(AFTER_VALUES, false),
                tags.element(local, &tags.num_data("numLit", None, &replacement.values)),
            ));
        }

        Ok(edits)
    }

    fn rewrite_name(
        &mut self,
        tx: usize,
        series_index: usize,
        replacement: &Series,
        shift: u32,
        edits: &mut Vec<Edit>,
    ) -> Result<(), PatchError> {
        let stream = self.stream;
        let tags = Tags {
            prefix: stream.get(tx).prefix(),
        };
        let names = std::slice::from_ref(&replacement.name);

        if let Some(reference) = stream.child(tx, "strRef") {
            if shift > 0 {
                self.rewrite_formula(
                    reference,
                    series_index,
                    SeriesField::Name,
                    None,
                    shift,
                    edits,
                )?;
            }
            let cache = tags.str_data("strCache", names);
            edits.push(self.replace_or_append_cache(reference, "strCache", cache));
        } else if let Some(v) = stream.child(tx, "v") {
            edits.push(set_content(stream, v, escape_text(&replacement.name).into_owned())?);
        } else {
            edits.push(set_content(
                stream,
                tx,
                tags.element("v", &escape_text(&replacement.name)),
            )?);
        }
        Ok(())
    }

    fn rewrite_categories(
        &mut self,
        field: usize,
        series_index: usize,
        categories: &[String],
        edits: &mut Vec<Edit>,
    ) -> Result<(), PatchError> {
        let stream = self.stream;
        let tags = Tags {
            prefix: stream.get(field).prefix(),
        };
        // Numeric caches stay numeric only when every category reads as a number.
        let numeric = categories.iter().all(|c| c.trim().parse::<f64>().is_ok());
        let n = Some(categories.len());
        let field_kind = SeriesField::Categories;

        let mut handled = false;
        for child in stream.children(field).collect::<Vec<_>>() {
            let local = stream.get(child).local_name();
            match local {
                "strRef" => {
                    self.rewrite_formula(child, series_index, field_kind, n, 0, edits)?;
                    let cache = tags.str_data("strCache", categories);
                    edits.push(self.replace_or_append_cache(child, "strCache", cache));
                }
                "numRef" if numeric => {
                    self.rewrite_formula(child, series_index, field_kind, n, 0, edits)?;
                    let values = numeric_categories(categories);
                    let cache = self.num_cache(child, "numCache", &tags, &values)?;
                    edits.push(cache);
                }
                "numRef" | "multiLvlStrRef" => {
                    let formula = self.formula_element(child, series_index, field_kind, n, 0)?;
                    let content = format!(
                        "{}{}",
                        formula.unwrap_or_default(),
                        tags.str_data("strCache", categories)
                    );
                    edits.push(Edit::replace(
                        stream.element_span(child),
                        tags.element("strRef", &content),
                    ));
                }
                "numLit" if numeric => {
                    let values = numeric_categories(categories);
                    let format_code = self.format_code(child)?;
                    edits.push(Edit::replace(
                        stream.element_span(child),
                        tags.num_data("numLit", format_code, &values),
                    ));
                }
                "strLit" | "numLit" => {
                    edits.push(Edit::replace(
                        stream.element_span(child),
                        tags.str_data("strLit", categories),
                    ));
                }
                _ => continue,
            }
            handled = true;
        }

        if !handled {
            edits.push(set_content(stream, field, tags.str_data("strLit", categories))?);
        }
        Ok(())
    }

    fn rewrite_values(
        &mut self,
        field: usize,
        series_index: usize,
        values: &[Option<f64>],
        shift: u32,
        edits: &mut Vec<Edit>,
    ) -> Result<(), PatchError> {
        let stream = self.stream;
        let tags = Tags {
            prefix: stream.get(field).prefix(),
        };
        let field_kind = SeriesField::Values;

        let mut handled = false;
        for child in stream.children(field).collect::<Vec<_>>() {
            match stream.get(child).local_name() {
                "numRef" => {
                    let n = Some(values.len());
                    self.rewrite_formula(child, series_index, field_kind, n, shift, edits)?;
                    let cache = self.num_cache(child, "numCache", &tags, values)?;
                    edits.push(cache);
                }
                "numLit" => {
                    let format_code = self.format_code(child)?;
                    edits.push(Edit::replace(
                        stream.element_span(child),
                        tags.num_data("numLit", format_code, values),
                    ));
                }
                _ => continue,
            }
            handled = true;
        }

        if !handled {
            edits.push(set_content(stream, field, tags.num_data("numLit", None, values))?);
        }
        Ok(())
    }

    /// Replace the `numCache` of `reference` (keeping its `formatCode`), or append one.
    fn num_cache(
        &self,
        reference: usize,
        local: &str,
        tags: &Tags<'_>,
        values: &[Option<f64>],
    ) -> Result<Edit, PatchError> {
        let format_code = match self.stream.child(reference, local) {
            Some(cache) => self.format_code(cache)?,
            None => None,
        };
        let cache = tags.num_data(local, format_code, values);
        Ok(self.replace_or_append_cache(reference, local, cache))
    }

    fn format_code(&self, data: usize) -> Result<Option<&'a str>, PatchError> {
        match self.stream.child(data, "formatCode") {
            Some(code) => Ok(Some(std::str::from_utf8(
                self.stream.bytes(self.stream.element_span(code)),
            )?)),
            None => Ok(None),
        }
    }

    /// Swap the cache child of `reference` for `cache`; without one, put it after the formula.
    fn replace_or_append_cache(&self, reference: usize, local: &str, cache: String) -> Edit {
        let stream = self.stream;
        if let Some(existing) = stream.child(reference, local) {
            return Edit::replace(stream.element_span(existing), cache);
        }
        let at = match stream.child(reference, "f") {
            Some(f) => stream.element_span(f).end,
            None => stream.content_span(reference).end,
        };
        Edit::insert(at, cache)
    }

    /// Recompute the `f` of `reference` in place, if it has one.
    fn rewrite_formula(
        &mut self,
        reference: usize,
        series_index: usize,
        field: SeriesField,
        n: Option<usize>,
        shift: u32,
        edits: &mut Vec<Edit>,
    ) -> Result<(), PatchError> {
        let stream = self.stream;
        let Some(f) = stream.child(reference, "f") else {
            return Ok(());
        };
        let original = formula_text(stream, f)?;
        if let Some(updated) = self.recompute(&original, series_index, field, n, shift) {
            if updated != original {
                edits.push(set_content(stream, f, escape_text(&updated).into_owned())?);
            }
        }
        Ok(())
    }

    /// The `f` element of `reference`, recomputed, as markup to embed in a rebuilt reference.
    fn formula_element(
        &mut self,
        reference: usize,
        series_index: usize,
        field: SeriesField,
        n: Option<usize>,
        shift: u32,
    ) -> Result<Option<String>, PatchError> {
        let stream = self.stream;
        let Some(f) = stream.child(reference, "f") else {
            return Ok(None);
        };
        let original = formula_text(stream, f)?;
        let verbatim = std::str::from_utf8(stream.bytes(stream.element_span(f)))?;
        Ok(Some(
            match self.recompute(&original, series_index, field, n, shift) {
                Some(updated) if updated != original => {
                    let name = &stream.get(f).name;
                    format!("<{name}>{}</{name}>", escape_text(&updated))
                }
                _ => verbatim.to_string(),
            },
        ))
    }

    /// Shift then resize `formula`. Failures are recorded and yield `None`.
    fn recompute(
        &mut self,
        formula: &str,
        series_index: usize,
        field: SeriesField,
        n: Option<usize>,
        shift: u32,
    ) -> Option<String> {
        let shifted = if shift > 0 {
            shift_range_columns(formula, shift)
        } else {
            Ok(formula.to_string())
        };
        let result = shifted.and_then(|shifted| match n {
            Some(n) => {
                if let Some(len) = RangeFormula::parse(&shifted).ok().and_then(|r| r.len()) {
                    log::debug!("series {series_index} {field}: {len} -> {n} cells in {shifted:?}");
                }
                resize_range(&shifted, n)
            }
            None => Ok(shifted),
        });
        match result {
            Ok(updated) => Some(updated),
            Err(reason) => {
                self.format_errors.push(FieldFormatError {
                    series_index,
                    field,
                    formula: formula.to_string(),
                    reason,
                });
                None
            }
        }
    }

    /// Append clones of `template` for each of `extra`, right after it.
    fn clone_series(
        &mut self,
        template: usize,
        first_index: usize,
        extra: &[Series],
    ) -> Result<(), PatchError> {
        let stream = self.stream;
        let span = stream.element_span(template);
        let source = stream.bytes(span.clone());
        let indent = indentation(stream, template);

        let mut clones = Vec::new();
        for (offset, replacement) in extra.iter().enumerate() {
            let options = CloneOptions {
                id: self.allocate_id()?,
                shift: u32::try_from(offset + 1).unwrap_or(u32::MAX),
            };
            let series_index = first_index + offset;
            log::debug!(
                "cloning series {} as series {series_index} ({options:?})",
                first_index - 1
            );
            let mut edits =
                self.rewrite_series(template, series_index, replacement, Some(options))?;
            edits.sort_by_key(|edit| (edit.range.start, edit.range.end));
            clones.extend_from_slice(indent);
            clones.extend(apply_edits(source, span.start, &edits)?);
        }

        self.edits
            .push(Edit::insert(span.end, std::str::from_utf8(&clones)?));
        Ok(())
    }

    /// Build literal series inside the first chart-type group when the part has none to clone.
    fn synthesize_series(&mut self, extra: &[Series]) -> Result<(), PatchError> {
        let stream = self.stream;
        let group = stream
            .find_first(PLOT_AREA)
            .and_then(|plot_area| {
                stream
                    .children(plot_area)
                    .find(|&c| stream.get(c).local_name().ends_with("Chart"))
            })
            .ok_or_else(|| {
                PatchError::Structural(
                    "chart part has no chart-type group to hold series".to_string(),
                )
            })?;
        if stream.get(group).kind != TokenKind::Start {
            return Err(PatchError::Structural(format!(
                "chart-type group `{}` is an empty element",
                stream.get(group).name
            )));
        }

        let tags = Tags {
            prefix: stream.get(group).prefix(),
        };
        let xy = XY_GROUPS.contains(&stream.get(group).local_name());
        let (cat, val) = if xy { ("xVal", "yVal") } else { ("cat", "val") };

        let mut out = String::new();
        for series in extra {
            let id = self.allocate_id()?;
            let mut content = tags.val("idx", id);
            content.push_str(&tags.val("order", id));
            content.push_str(&tags.element("tx", &tags.element("v", &escape_text(&series.name))));
            content.push_str(&tags.element(cat, &tags.str_data("strLit", &series.categories)));
            let format_code = tags.element("formatCode", "General");
            content.push_str(&tags.element(
                val,
                &tags.num_data("numLit", Some(&format_code), &series.values),
            ));
            out.push_str(&tags.element(SERIES, &content));
        }

        let at = stream
            .children(group)
            .find(|&c| !BEFORE_SERIES.contains(&stream.get(c).local_name()))
            .map_or(stream.content_span(group).end, |c| stream.get(c).span.start);
        log::debug!("synthesizing {} series in `{}`", extra.len(), stream.get(group).name);
        self.edits.push(Edit::insert(at, out));
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<u32, PatchError> {
        let id = self.next_id.ok_or_else(|| exhausted(IdentifierKind::ChartSeries))?;
        self.next_id = id.checked_add(1);
        Ok(id)
    }
}

fn numeric_categories(categories: &[String]) -> Vec<Option<f64>> {
    categories
        .iter()
        .map(|c| c.trim().parse::<f64>().ok())
        .collect()
}

/// Decoded text of an `f` element.
fn formula_text(stream: &TokenStream<'_>, f: usize) -> Result<String, PatchError> {
    let raw = std::str::from_utf8(stream.bytes(stream.content_span(f)))?;
    Ok(quick_xml::escape::unescape(raw)
        .map_err(quick_xml::Error::from)?
        .into_owned())
}

/// Replace the content of element `index`, opening it up first when it is self-closing.
fn set_content(
    stream: &TokenStream<'_>,
    index: usize,
    content: String,
) -> Result<Edit, PatchError> {
    let token = stream.get(index);
    if token.kind == TokenKind::Start {
        return Ok(Edit::replace(stream.content_span(index), content));
    }
    let tag = stream.bytes(token.span.clone());
    let expanded = open_empty_tag(tag, &token.name, content.as_bytes());
    Ok(Edit::replace(token.span.clone(), std::str::from_utf8(&expanded)?))
}
