//! Small markdown helpers shared by README and skill parsing

/// Longest description kept from a paragraph
const MAX_DESCRIPTION_CHARS: usize = 300;

/// Split a leading `---` delimited front matter block from the body.
///
/// Returns `(None, text)` when the document has no (closed) front matter.
pub fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim_start_matches('\u{feff}');
    let Some(rest) = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))
    else {
        return (None, text);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    (None, text)
}

/// Text of the first `#` heading (any level)
pub fn first_heading(text: &str) -> Option<String> {
    let mut in_code = false;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if let Some(heading) = line.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return Some(heading.to_string());
            }
        }
    }
    None
}

/// First paragraph that is not a heading, badge, html block, rule or code.
///
/// Lines of the paragraph are joined with single spaces and the result is
/// truncated to a fixed number of characters.
pub fn first_paragraph(text: &str) -> Option<String> {
    let (_, body) = split_front_matter(text);
    let mut in_code = false;
    let mut paragraph: Vec<&str> = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.starts_with("```") || line.starts_with("~~~") {
            in_code = !in_code;
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if in_code {
            continue;
        }
        if line.is_empty() || !is_prose(line) {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }

    if paragraph.is_empty() {
        return None;
    }
    Some(truncate_chars(&paragraph.join(" "), MAX_DESCRIPTION_CHARS))
}

fn is_prose(line: &str) -> bool {
    !(line.starts_with('#')
        || line.starts_with("![")
        || line.starts_with("[![")
        || line.starts_with('<')
        || line.starts_with('|')
        || line.starts_with("---")
        || line.starts_with("===")
        || line.starts_with("***"))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}
