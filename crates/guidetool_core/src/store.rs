use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::model::{DllRecord, Guide};

/// On-disk payload shape of a guide data file. Some files are bare
/// arrays, others wrap the array in `{"guides": [...]}`; whichever shape
/// was read is preserved on save so the site build keeps working.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShape {
    BareArray,
    Wrapped,
}

#[derive(Debug, Clone)]
pub struct GuideFile {
    pub guides: Vec<Guide>,
    pub shape: FileShape,
    /// Single leading `//` comment line some legacy files carry.
    pub comment: Option<String>,
}

/// Load a guide data file, tolerating one leading `//` comment line and
/// both payload shapes.
pub fn load_guides(path: &Path) -> Result<GuideFile> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (comment, body) = split_leading_comment(&content);
    let value: Value = serde_json::from_str(body)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let (shape, items) = match value {
        Value::Array(items) => (FileShape::BareArray, items),
        Value::Object(mut object) => match object.remove("guides") {
            Some(Value::Array(items)) => (FileShape::Wrapped, items),
            _ => bail!(
                "unsupported payload in {}: expected an array or {{\"guides\": [...]}}",
                path.display()
            ),
        },
        _ => bail!(
            "unsupported payload in {}: expected an array or {{\"guides\": [...]}}",
            path.display()
        ),
    };

    let mut guides = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let guide: Guide = serde_json::from_value(item)
            .with_context(|| format!("invalid guide record #{index} in {}", path.display()))?;
        guides.push(guide);
    }

    Ok(GuideFile {
        guides,
        shape,
        comment: comment.map(ToString::to_string),
    })
}

/// Write a guide data file atomically: serialize to a sibling temp file,
/// then rename over the target. A crash mid-write leaves the previous
/// file intact instead of a truncated payload.
pub fn save_guides(path: &Path, file: &GuideFile) -> Result<()> {
    let payload = match file.shape {
        FileShape::BareArray => serde_json::to_value(&file.guides),
        FileShape::Wrapped => {
            let mut object = serde_json::Map::new();
            object.insert(
                "guides".to_string(),
                serde_json::to_value(&file.guides)
                    .context("failed to serialize guide records")?,
            );
            Ok(Value::Object(object))
        }
    }
    .context("failed to serialize guide records")?;

    let mut rendered = String::new();
    if let Some(comment) = &file.comment {
        rendered.push_str(comment);
        rendered.push('\n');
    }
    rendered.push_str(
        &serde_json::to_string_pretty(&payload).context("failed to render guide JSON")?,
    );
    rendered.push('\n');

    write_atomic(path, &rendered)
}

/// Load the DLL reference catalog (bare array or `{"dlls": [...]}`).
pub fn load_catalog(path: &Path) -> Result<Vec<DllRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (_, body) = split_leading_comment(&content);
    let value: Value = serde_json::from_str(body)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("dlls") {
            Some(Value::Array(items)) => items,
            _ => bail!(
                "unsupported payload in {}: expected an array or {{\"dlls\": [...]}}",
                path.display()
            ),
        },
        _ => bail!(
            "unsupported payload in {}: expected an array or {{\"dlls\": [...]}}",
            path.display()
        ),
    };

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let record: DllRecord = serde_json::from_value(item)
            .with_context(|| format!("invalid DLL record #{index} in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

fn split_leading_comment(content: &str) -> (Option<&str>, &str) {
    let trimmed = content.trim_start();
    if trimmed.starts_with("//") {
        match trimmed.split_once('\n') {
            Some((comment, rest)) => (Some(comment.trim_end()), rest),
            None => (Some(trimmed.trim_end()), ""),
        }
    } else {
        (None, content)
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("path has no file name: {}", path.display()))?;
    let temp_path = parent.join(format!("{file_name}.tmp"));
    fs::write(&temp_path, content)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;

    if fs::rename(&temp_path, path).is_err() {
        // Windows refuses to rename over an existing file.
        fs::remove_file(path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("failed to move {} into place", temp_path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::*;
    use crate::model::Section;

    fn sample_guide(id: &str) -> Guide {
        Guide {
            id: id.to_string(),
            slug: None,
            title: format!("Fix {id}"),
            meta_title: String::new(),
            meta_description: String::new(),
            excerpt: String::new(),
            category: "dll-errors".to_string(),
            publish_date: "2025-01-01".to_string(),
            update_date: None,
            keywords: Vec::new(),
            sections: vec![Section {
                heading: "Overview".to_string(),
                content: "Body.".to_string(),
            }],
            related_dlls: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn load_tolerates_leading_comment_line() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("guides.json");
        fs::write(
            &path,
            "// generated 2024-11-02, do not edit by hand\n[{\"id\":\"a\",\"title\":\"T\",\"publishDate\":\"2025-01-01\"}]",
        )
        .expect("write file");

        let file = load_guides(&path).expect("load");
        assert_eq!(file.guides.len(), 1);
        assert_eq!(file.shape, FileShape::BareArray);
        assert_eq!(
            file.comment.as_deref(),
            Some("// generated 2024-11-02, do not edit by hand")
        );
    }

    #[test]
    fn wrapped_shape_round_trips() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("guides.json");
        fs::write(
            &path,
            r#"{"guides": [{"id":"a","title":"T","publishDate":"2025-01-01"}]}"#,
        )
        .expect("write file");

        let file = load_guides(&path).expect("load");
        assert_eq!(file.shape, FileShape::Wrapped);
        save_guides(&path, &file).expect("save");

        let written = fs::read_to_string(&path).expect("read back");
        let value: Value = serde_json::from_str(&written).expect("valid JSON");
        assert!(value.get("guides").is_some());

        let reloaded = load_guides(&path).expect("reload");
        assert_eq!(reloaded.guides, file.guides);
    }

    #[test]
    fn comment_line_survives_save() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("queue.json");
        let file = GuideFile {
            guides: vec![sample_guide("a")],
            shape: FileShape::BareArray,
            comment: Some("// scheduled content queue".to_string()),
        };
        save_guides(&path, &file).expect("save");
        let reloaded = load_guides(&path).expect("reload");
        assert_eq!(
            reloaded.comment.as_deref(),
            Some("// scheduled content queue")
        );
        assert_eq!(reloaded.guides, file.guides);
    }

    #[test]
    fn save_replaces_existing_file_atomically() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("guides.json");
        fs::write(&path, "[]").expect("seed file");

        let file = GuideFile {
            guides: vec![sample_guide("a"), sample_guide("b")],
            shape: FileShape::BareArray,
            comment: None,
        };
        save_guides(&path, &file).expect("save");

        let reloaded = load_guides(&path).expect("reload");
        assert_eq!(reloaded.guides.len(), 2);
        assert!(!path.with_file_name("guides.json.tmp").exists());
    }

    #[test]
    fn load_rejects_non_array_payload() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("guides.json");
        fs::write(&path, r#"{"items": []}"#).expect("write file");
        let error = load_guides(&path).expect_err("must fail");
        assert!(error.to_string().contains("unsupported payload"));
    }

    #[test]
    fn load_names_broken_record_index() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("guides.json");
        fs::write(
            &path,
            r#"[{"id":"a","title":"T","publishDate":"2025-01-01"},{"title":"missing id"}]"#,
        )
        .expect("write file");
        let error = load_guides(&path).expect_err("must fail");
        assert!(error.to_string().contains("record #1"));
    }

    #[test]
    fn catalog_accepts_both_shapes() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("dll-catalog.json");
        fs::write(
            &path,
            r#"{"dlls":[{"name":"msvcp140.dll","software":["Visual C++ 2015"]}]}"#,
        )
        .expect("write file");
        let records = load_catalog(&path).expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "msvcp140.dll");

        fs::write(&path, r#"[{"name":"d3dx9_43.dll"}]"#).expect("rewrite file");
        let records = load_catalog(&path).expect("reload");
        assert_eq!(records[0].name, "d3dx9_43.dll");
    }
}
