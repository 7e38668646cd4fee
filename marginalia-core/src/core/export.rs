//! Export of an assembled outline for rendering consumers.
//!
//! The exported document carries the forest exactly as the read path built
//! it. Sibling pointers are not part of it; renderers walk `children`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::outline::Outline;
use crate::Result;

/// Format version of [`ExportOutline`].
pub const EXPORT_VERSION: u32 = 1;

/// Version of this library, recorded in exports.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level JSON structure of an outline export.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutline {
    pub version: u32,
    pub app_version: String,
    pub outline: Outline,
}

/// Wraps `outline` in an export envelope.
pub fn export_outline(outline: &Outline) -> ExportOutline {
    ExportOutline {
        version: EXPORT_VERSION,
        app_version: APP_VERSION.to_string(),
        outline: outline.clone(),
    }
}

/// Writes the export of `outline` as pretty JSON to `path`.
pub fn write_export<P: AsRef<Path>>(outline: &Outline, path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(&export_outline(outline))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Suggested file name for an export of `outline`.
pub fn export_file_name(outline: &Outline) -> String {
    format!("{}.outline.json", slugify(&outline.summary.title))
}

/// Converts a title into a safe filename stem.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let slug: String = slug
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() { "outline".to_string() } else { slug }
}
