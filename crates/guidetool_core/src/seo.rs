use serde::Serialize;

use crate::model::Guide;

/// Truncate to at most `limit` characters without splitting a word.
/// The result is always a prefix of the trimmed input; nothing is ever
/// appended, so search snippets match the page text.
pub fn truncate_on_word_boundary(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }

    let mut cut = 0usize;
    let mut chars = 0usize;
    let mut last_space: Option<usize> = None;
    for (index, ch) in trimmed.char_indices() {
        if chars == limit {
            break;
        }
        if ch.is_whitespace() {
            last_space = Some(index);
        }
        cut = index + ch.len_utf8();
        chars += 1;
    }

    let boundary = match last_space {
        Some(space) if space > 0 => space,
        _ => cut,
    };
    trimmed[..boundary]
        .trim_end_matches([',', ';', ':', '-'])
        .trim_end()
        .to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct SeoIssue {
    pub guide_id: String,
    pub field: &'static str,
    pub length: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeoReport {
    pub checked: usize,
    pub issues: Vec<SeoIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeoFixReport {
    pub checked: usize,
    pub truncated_titles: usize,
    pub truncated_descriptions: usize,
    pub derived_titles: usize,
    pub derived_descriptions: usize,
}

/// Report metaTitle/metaDescription records violating the limits,
/// including empty values (the build renders blank tags for those).
pub fn check_guides(guides: &[Guide], title_limit: usize, description_limit: usize) -> SeoReport {
    let mut issues = Vec::new();
    for guide in guides {
        let title_len = guide.meta_title.chars().count();
        if title_len > title_limit || guide.meta_title.trim().is_empty() {
            issues.push(SeoIssue {
                guide_id: guide.id.clone(),
                field: "metaTitle",
                length: title_len,
                limit: title_limit,
            });
        }
        let description_len = guide.meta_description.chars().count();
        if description_len > description_limit || guide.meta_description.trim().is_empty() {
            issues.push(SeoIssue {
                guide_id: guide.id.clone(),
                field: "metaDescription",
                length: description_len,
                limit: description_limit,
            });
        }
    }
    SeoReport {
        checked: guides.len(),
        issues,
    }
}

/// Bring every record under the limits. Over-long values are truncated
/// in place; missing values are derived from `title` / `excerpt` by the
/// same truncation.
pub fn fix_guides(
    guides: &mut [Guide],
    title_limit: usize,
    description_limit: usize,
) -> SeoFixReport {
    let mut report = SeoFixReport {
        checked: guides.len(),
        truncated_titles: 0,
        truncated_descriptions: 0,
        derived_titles: 0,
        derived_descriptions: 0,
    };

    for guide in guides {
        if guide.meta_title.trim().is_empty() {
            guide.meta_title = truncate_on_word_boundary(&guide.title, title_limit);
            report.derived_titles += 1;
        } else if guide.meta_title.chars().count() > title_limit {
            guide.meta_title = truncate_on_word_boundary(&guide.meta_title, title_limit);
            report.truncated_titles += 1;
        }

        if guide.meta_description.trim().is_empty() {
            let source = if guide.excerpt.trim().is_empty() {
                &guide.title
            } else {
                &guide.excerpt
            };
            guide.meta_description = truncate_on_word_boundary(source, description_limit);
            report.derived_descriptions += 1;
        } else if guide.meta_description.chars().count() > description_limit {
            guide.meta_description =
                truncate_on_word_boundary(&guide.meta_description, description_limit);
            report.truncated_descriptions += 1;
        }
    }
    report
}
