//! # 分拣规则
//!
//! 把识别出的零件编号映射到分类编号。

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// 兜底分类
pub const MISC_CATEGORY: &str = "misc";

/// 规则文件中与颜色无关的键前缀
const ANY_COLOR_PREFIX: &str = "any_color-";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to read sorting profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse sorting profile: {0}")]
    Parse(#[from] serde_json::Error),
}

/// 零件 → 分类
pub trait SortingProfile: Send + Sync {
    /// 未收录的零件返回默认分类
    fn category_for_part(&self, part_id: &str) -> String;

    /// 分类的显示名称
    fn category_name(&self, _category_id: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    default_category_id: Option<String>,
    #[serde(default)]
    categories: HashMap<String, CategoryEntry>,
    part_to_category: HashMap<String, String>,
}

/// JSON 规则文件
///
/// ```json
/// {
///   "name": "Technic",
///   "default_category_id": "misc",
///   "categories": { "beams": { "name": "Beams" } },
///   "part_to_category": { "any_color-32523": "beams" }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct JsonSortingProfile {
    id: Option<String>,
    name: Option<String>,
    default_category_id: String,
    category_names: HashMap<String, String>,
    part_to_category: HashMap<String, String>,
}

impl JsonSortingProfile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profile = Self::from_json_str(&content)?;
        info!(
            "Loaded sorting profile {} ({} parts)",
            profile.name().unwrap_or("<unnamed>"),
            profile.part_count()
        );
        Ok(profile)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ProfileError> {
        let doc: ProfileDocument = serde_json::from_str(content)?;
        Ok(Self {
            id: doc.id,
            name: doc.name,
            default_category_id: doc
                .default_category_id
                .unwrap_or_else(|| MISC_CATEGORY.to_string()),
            category_names: doc
                .categories
                .into_iter()
                .map(|(id, entry)| (id, entry.name))
                .collect(),
            part_to_category: doc.part_to_category,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn default_category_id(&self) -> &str {
        &self.default_category_id
    }

    pub fn part_count(&self) -> usize {
        self.part_to_category.len()
    }
}

impl SortingProfile for JsonSortingProfile {
    fn category_for_part(&self, part_id: &str) -> String {
        let key = format!("{}{}", ANY_COLOR_PREFIX, part_id);
        self.part_to_category
            .get(&key)
            .or_else(|| self.part_to_category.get(part_id))
            .cloned()
            .unwrap_or_else(|| self.default_category_id.clone())
    }

    fn category_name(&self, category_id: &str) -> Option<String> {
        self.category_names.get(category_id).cloned()
    }
}

/// 代码内构造的规则（测试与模拟运行）
#[derive(Debug, Clone)]
pub struct StaticSortingProfile {
    default_category_id: String,
    part_to_category: HashMap<String, String>,
}

impl StaticSortingProfile {
    pub fn new() -> Self {
        Self {
            default_category_id: MISC_CATEGORY.to_string(),
            part_to_category: HashMap::new(),
        }
    }

    pub fn with(mut self, part_id: impl Into<String>, category_id: impl Into<String>) -> Self {
        self.part_to_category
            .insert(part_id.into(), category_id.into());
        self
    }

    pub fn default_category(mut self, category_id: impl Into<String>) -> Self {
        self.default_category_id = category_id.into();
        self
    }
}

impl Default for StaticSortingProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl SortingProfile for StaticSortingProfile {
    fn category_for_part(&self, part_id: &str) -> String {
        self.part_to_category
            .get(part_id)
            .cloned()
            .unwrap_or_else(|| self.default_category_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"{
        "id": "p1",
        "name": "Technic",
        "categories": { "beams": { "name": "Beams" }, "pins": { "name": "Pins" } },
        "part_to_category": {
            "any_color-32523": "beams",
            "any_color-2780": "pins"
        }
    }"#;

    #[test]
    fn test_lookup_uses_any_color_key() {
        let profile = JsonSortingProfile::from_json_str(PROFILE).unwrap();
        assert_eq!(profile.category_for_part("32523"), "beams");
        assert_eq!(profile.category_for_part("2780"), "pins");
        assert_eq!(profile.category_name("pins").as_deref(), Some("Pins"));
        assert_eq!(profile.name(), Some("Technic"));
    }

    #[test]
    fn test_unknown_part_falls_back_to_misc() {
        let profile = JsonSortingProfile::from_json_str(PROFILE).unwrap();
        assert_eq!(profile.default_category_id(), MISC_CATEGORY);
        assert_eq!(profile.category_for_part("99999"), MISC_CATEGORY);
    }

    #[test]
    fn test_custom_default_category() {
        let profile = JsonSortingProfile::from_json_str(
            r#"{ "default_category_id": "other", "part_to_category": {} }"#,
        )
        .unwrap();
        assert_eq!(profile.category_for_part("3001"), "other");
    }

    #[test]
    fn test_part_map_is_required() {
        assert!(JsonSortingProfile::from_json_str(r#"{ "name": "x" }"#).is_err());
    }

    #[test]
    fn test_static_profile() {
        let profile = StaticSortingProfile::new().with("3001", "bricks");
        assert_eq!(profile.category_for_part("3001"), "bricks");
        assert_eq!(profile.category_for_part("3002"), MISC_CATEGORY);
    }
}
