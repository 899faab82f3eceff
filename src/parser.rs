//! Skill document parsing
//!
//! A pure function from raw markdown to a [`Skill`]: fields come from an
//! optional YAML front matter block, falling back to the first heading and
//! first prose paragraph of the body.

use serde::Deserialize;
use serde_yaml::Value;
use sha2::{Digest, Sha256};

use crate::model::{Skill, SkillLocation};
use crate::util::markdown::{first_heading, first_paragraph, split_front_matter};
use crate::util::path::parent_dir_name;

/// Longest slug produced by [`slugify`]
pub const MAX_SLUG_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,
    #[error("invalid front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    name: Option<Value>,
    title: Option<Value>,
    description: Option<Value>,
    version: Option<Value>,
    author: Option<Value>,
    license: Option<Value>,
    tags: Option<Value>,
}

/// Parse one skill document read from `location`.
pub fn parse_skill(raw: &str, location: &SkillLocation) -> Result<Skill, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let (front, body) = split_front_matter(raw);
    let meta: FrontMatter = match front {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)?,
        _ => FrontMatter::default(),
    };

    let title = meta
        .name
        .as_ref()
        .and_then(scalar)
        .or_else(|| meta.title.as_ref().and_then(scalar))
        .or_else(|| first_heading(body))
        .or_else(|| parent_dir_name(&location.path).map(str::to_string))
        .unwrap_or_else(|| repo_name(&location.source_id).to_string());

    let description = meta
        .description
        .as_ref()
        .and_then(scalar)
        .or_else(|| first_paragraph(body));

    let id = skill_id(&location.source_id, &location.path);
    let slug = [
        Some(title.as_str()),
        parent_dir_name(&location.path),
        Some(repo_name(&location.source_id)),
    ]
    .into_iter()
    .flatten()
    .map(slugify)
    .find(|s| !s.is_empty())
    .unwrap_or_else(|| format!("skill-{}", &id[..8]));

    Ok(Skill {
        id,
        slug,
        source_id: location.source_id.clone(),
        file_path: location.path.clone(),
        title,
        description,
        version: meta.version.as_ref().and_then(scalar),
        author: meta.author.as_ref().and_then(author),
        license: meta.license.as_ref().and_then(scalar),
        tags: meta.tags.as_ref().map(tags).unwrap_or_default(),
        content: raw.to_string(),
        content_hash: content_hash(raw),
    })
}

/// Stable skill id: the first 16 bytes (hex) of SHA-256 over `source:path`
pub fn skill_id(source_id: &str, path: &str) -> String {
    let digest = Sha256::digest(format!("{source_id}:{path}").as_bytes());
    hex::encode(&digest[..16])
}

/// Hex SHA-256 of the raw document
pub fn content_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Lowercase ASCII alphanumerics with every other run collapsed to `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// `base` with a numeric suffix, shortened so the result stays within [`MAX_SLUG_LEN`].
pub fn suffixed_slug(base: &str, n: usize) -> String {
    let suffix = format!("-{n}");
    let keep = MAX_SLUG_LEN.saturating_sub(suffix.len()).min(base.len());
    format!("{}{}", base[..keep].trim_end_matches('-'), suffix)
}

/// SPDX identifier of a well-known license text
pub fn detect_license(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    let has = |needle: &str| upper.contains(needle);

    let id = if has("APACHE LICENSE") && has("VERSION 2.0") {
        "Apache-2.0"
    } else if has("GNU LESSER GENERAL PUBLIC LICENSE") {
        "LGPL-3.0"
    } else if has("GNU AFFERO GENERAL PUBLIC LICENSE") {
        "AGPL-3.0"
    } else if has("GNU GENERAL PUBLIC LICENSE") {
        if has("VERSION 2") { "GPL-2.0" } else { "GPL-3.0" }
    } else if has("MOZILLA PUBLIC LICENSE") {
        "MPL-2.0"
    } else if has("MIT LICENSE") || has("PERMISSION IS HEREBY GRANTED, FREE OF CHARGE") {
        "MIT"
    } else if has("ISC LICENSE") {
        "ISC"
    } else if has("UNLICENSE") || has("FREE AND UNENCUMBERED SOFTWARE RELEASED INTO THE PUBLIC DOMAIN") {
        "Unlicense"
    } else if has("CC0 1.0") {
        "CC0-1.0"
    } else if has("REDISTRIBUTION AND USE IN SOURCE AND BINARY FORMS") {
        if has("NEITHER THE NAME") { "BSD-3-Clause" } else { "BSD-2-Clause" }
    } else {
        return None;
    };
    Some(id)
}

fn repo_name(source_id: &str) -> &str {
    let repo = source_id.split_once(':').map_or(source_id, |(repo, _)| repo);
    repo.rsplit_once('/').map_or(repo, |(_, name)| name)
}

fn scalar(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn author(value: &Value) -> Option<String> {
    match value {
        Value::Mapping(map) => map.get("name").and_then(scalar),
        Value::Sequence(items) => {
            let names: Vec<String> = items.iter().filter_map(author).collect();
            (!names.is_empty()).then(|| names.join(", "))
        }
        other => scalar(other),
    }
}

/// Tags from a YAML list or a comma separated string; lowercased, sorted, unique.
fn tags(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Sequence(items) => items.iter().filter_map(scalar).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut tags: Vec<String> = raw
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}
