//! Minimal-diff structural patching of WordprocessingML and DrawingML chart parts.
//!
//! Every operation takes a part's bytes and returns new bytes (or an error) without touching its
//! input. Edits are splices into the original buffer, so bytes outside the edited region are
//! preserved exactly: attribute order, namespace declarations, whitespace, and entity spelling.
//!
//! - [`locate_anchor`]: find a phrase in the rendered text of a paragraph, even when Word split
//!   it across runs.
//! - [`insert_node`]: splice a markup fragment at the body start/end or next to an anchored
//!   paragraph.
//! - [`wrap_range`]: surround the runs covering a phrase with a [`MarkerPair`] (bookmarks,
//!   comment ranges).
//! - [`synchronize_series`]: make a chart part's series list match replacement data.
//! - [`next_identifier`] / [`IdentifierPool`]: allocate ids that do not collide with the
//!   document's existing ones.
//! - [`DocxPackage`] (feature `package`, on by default): the zip container plus relationship
//!   helpers from [`openxml`].

mod a1;
mod anchor;
mod error;
mod ids;
mod insert;
pub mod openxml;
#[cfg(feature = "package")]
mod package;
mod series;
mod wrap;
mod xml;

pub use anchor::{locate_anchor, AnchorMatch};
pub use error::{FieldFormatError, PatchError, SeriesField};
pub use ids::{
    max_identifier, next_identifier, next_numbering_ids, IdentifierKind, IdentifierPool,
    NumberingIds,
};
pub use insert::{insert_node, InsertionSpec, InsertionTarget};
#[cfg(feature = "package")]
pub use package::{DocxPackage, PackageLimits, MAX_DOCX_PACKAGE_TOTAL_BYTES, MAX_DOCX_PART_BYTES};
pub use series::{synchronize_series, Series, SeriesSyncOutcome};
pub use wrap::{wrap_range, MarkerPair};
