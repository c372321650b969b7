use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One published or queued article record.
///
/// The JSON files use camelCase keys. Fields this tool does not manage
/// (legacy script leftovers, experimental metadata) are carried through
/// `extra` so a read-modify-write cycle never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guide {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub title: String,
    #[serde(default)]
    pub meta_title: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub category: String,
    pub publish_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_date: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub related_dlls: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub content: String,
}

impl Guide {
    /// URL segment for the guide. Older records carry no explicit slug;
    /// those fall back to the id, which has always been slug-shaped.
    pub fn slug(&self) -> &str {
        match self.slug.as_deref() {
            Some(slug) if !slug.is_empty() => slug,
            _ => &self.id,
        }
    }

    /// Total word count across excerpt and section bodies.
    pub fn word_count(&self) -> usize {
        let mut count = self.excerpt.split_whitespace().count();
        for section in &self.sections {
            count += section.content.split_whitespace().count();
        }
        count
    }

    /// First sentence of the first section, used by the opening-diversity
    /// audit. Empty when the guide has no section content.
    pub fn opening_sentence(&self) -> &str {
        let Some(first) = self.sections.first() else {
            return "";
        };
        first_sentence(&first.content)
    }

    /// Structural problems that would break the published site build.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.id.trim().is_empty() {
            issues.push("id is empty".to_string());
        }
        if self.title.trim().is_empty() {
            issues.push(format!("{}: title is empty", self.id));
        }
        if !is_iso_date(&self.publish_date) {
            issues.push(format!(
                "{}: publishDate is not YYYY-MM-DD: {:?}",
                self.id, self.publish_date
            ));
        }
        if let Some(update_date) = &self.update_date
            && !is_iso_date(update_date)
        {
            issues.push(format!(
                "{}: updateDate is not YYYY-MM-DD: {update_date:?}",
                self.id
            ));
        }
        if self.sections.is_empty() {
            issues.push(format!("{}: no sections", self.id));
        }
        issues
    }
}

/// Static reference record for one DLL, rendered on descriptive pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DllRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub software: Vec<String>,
    #[serde(default)]
    pub common_errors: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Strict `YYYY-MM-DD` shape check. Publish dates are compared
/// lexicographically, which is only sound when every date has this shape.
pub fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    for (index, byte) in bytes.iter().enumerate() {
        match index {
            4 | 7 => {
                if *byte != b'-' {
                    return false;
                }
            }
            _ => {
                if !byte.is_ascii_digit() {
                    return false;
                }
            }
        }
    }
    let month: u32 = value[5..7].parse().unwrap_or(0);
    let day: u32 = value[8..10].parse().unwrap_or(0);
    (1..=12).contains(&month) && (1..=31).contains(&day)
}

/// First sentence of a text block, terminator included.
pub fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim_start();
    for (index, ch) in trimmed.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = index + ch.len_utf8();
            let rest = &trimmed[end..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return &trimmed[..end];
            }
        }
    }
    trimmed
}

/// Lowercase-and-dash slug used for generated ids.
pub fn slugify(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_dash = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            output.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash && !output.is_empty() {
            output.push('-');
            previous_dash = true;
        }
    }
    while output.ends_with('-') {
        output.pop();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guide(id: &str, publish_date: &str) -> Guide {
        Guide {
            id: id.to_string(),
            slug: None,
            title: format!("Guide {id}"),
            meta_title: String::new(),
            meta_description: String::new(),
            excerpt: "Short summary.".to_string(),
            category: "dll-errors".to_string(),
            publish_date: publish_date.to_string(),
            update_date: None,
            keywords: Vec::new(),
            sections: vec![Section {
                heading: "Overview".to_string(),
                content: "The file is missing. Reinstall the runtime.".to_string(),
            }],
            related_dlls: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn slug_falls_back_to_id() {
        let mut record = guide("fix-msvcp140", "2025-01-01");
        assert_eq!(record.slug(), "fix-msvcp140");
        record.slug = Some("custom-slug".to_string());
        assert_eq!(record.slug(), "custom-slug");
        record.slug = Some(String::new());
        assert_eq!(record.slug(), "fix-msvcp140");
    }

    #[test]
    fn word_count_covers_excerpt_and_sections() {
        let record = guide("a", "2025-01-01");
        assert_eq!(record.word_count(), 2 + 7);
    }

    #[test]
    fn opening_sentence_stops_at_first_terminator() {
        let record = guide("a", "2025-01-01");
        assert_eq!(record.opening_sentence(), "The file is missing.");
    }

    #[test]
    fn opening_sentence_ignores_decimal_points() {
        assert_eq!(
            first_sentence("Version 9.29 shipped in 2010. Later builds differ."),
            "Version 9.29 shipped in 2010."
        );
    }

    #[test]
    fn iso_date_shape_is_strict() {
        assert!(is_iso_date("2025-06-01"));
        assert!(!is_iso_date("2025-6-1"));
        assert!(!is_iso_date("2025/06/01"));
        assert!(!is_iso_date("2025-13-01"));
        assert!(!is_iso_date("2025-00-10"));
        assert!(!is_iso_date("not-a-date!"));
    }

    #[test]
    fn validate_flags_bad_dates_and_missing_sections() {
        let mut record = guide("a", "someday");
        record.sections.clear();
        let issues = record.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("publishDate"));
        assert!(issues[1].contains("no sections"));
    }

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{
            "id": "fix-d3dx9-43",
            "title": "Fix d3dx9_43.dll",
            "publishDate": "2025-01-01",
            "legacyScore": 7,
            "sections": [{"heading": "H", "content": "C."}]
        }"#;
        let record: Guide = serde_json::from_str(raw).expect("parse guide");
        assert_eq!(record.extra.get("legacyScore"), Some(&Value::from(7)));
        let rendered = serde_json::to_value(&record).expect("render guide");
        assert_eq!(rendered.get("legacyScore"), Some(&Value::from(7)));
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Fix d3dx9_43.dll — Elden Ring"), "fix-d3dx9-43-dll-elden-ring");
        assert_eq!(slugify("  MSVCP140.dll  "), "msvcp140-dll");
    }
}
