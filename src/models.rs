use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Top,
    Bottom,
    Shoes,
    Accessory,
    #[default]
    Uncategorized,
}

impl Category {
    /// Categories a user may pick when uploading.
    pub const SELECTABLE: [Category; 4] = [
        Category::Top,
        Category::Bottom,
        Category::Shoes,
        Category::Accessory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Top => "top",
            Category::Bottom => "bottom",
            Category::Shoes => "shoes",
            Category::Accessory => "accessory",
            Category::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "top" => Ok(Category::Top),
            "bottom" => Ok(Category::Bottom),
            "shoes" => Ok(Category::Shoes),
            "accessory" => Ok(Category::Accessory),
            "uncategorized" => Ok(Category::Uncategorized),
            other => Err(format!(
                "Unknown category '{}'. Use top, bottom, shoes or accessory",
                other
            )),
        }
    }
}

/// One uploaded clothing photo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub user_id: String,
    pub category: Category,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(user_id: String, category: Category, path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            category,
            path,
            created_at: Utc::now(),
        }
    }
}

/// An outfit: item ids per slot. Absent optional slots compare as "none".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    pub top: String,
    pub bottom: String,
    #[serde(default)]
    pub shoes: Option<String>,
    #[serde(default)]
    pub accessory: Option<String>,
}

impl Combination {
    /// Slots paired with the category each item must belong to.
    pub fn slots(&self) -> Vec<(Category, &str)> {
        let mut slots = vec![
            (Category::Top, self.top.as_str()),
            (Category::Bottom, self.bottom.as_str()),
        ];
        if let Some(shoes) = &self.shoes {
            slots.push((Category::Shoes, shoes.as_str()));
        }
        if let Some(accessory) = &self.accessory {
            slots.push((Category::Accessory, accessory.as_str()));
        }
        slots
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceKind {
    Dislike,
    Favorite,
}

impl PreferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            PreferenceKind::Dislike => "dislike",
            PreferenceKind::Favorite => "favorite",
        }
    }
}

/// A stored dislike or favorite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferenceRecord {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub combination: Combination,
    pub created_at: DateTime<Utc>,
}

impl PreferenceRecord {
    pub fn new(user_id: String, combination: Combination) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            combination,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Recorded,
    AlreadyExisted,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemListResponse {
    pub items: Vec<Item>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateItemRequest {
    pub category: Category,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuggestRequest {
    #[serde(default = "default_true")]
    pub include_shoes: bool,
    #[serde(default = "default_true")]
    pub include_accessory: bool,
}

fn default_true() -> bool {
    true
}

/// Resolved outfit returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outfit {
    pub top: Option<Item>,
    pub bottom: Option<Item>,
    pub shoes: Option<Item>,
    pub accessory: Option<Item>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestion: Option<Combination>,
    pub outfit: Option<Outfit>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResponse {
    pub outcome: RecordOutcome,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreferenceView {
    pub id: String,
    pub combination: Combination,
    pub outfit: Outfit,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PreferenceListResponse {
    pub records: Vec<PreferenceView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("TOP".parse::<Category>(), Ok(Category::Top));
        assert_eq!(" Shoes ".parse::<Category>(), Ok(Category::Shoes));
        assert!("hat".parse::<Category>().is_err());
    }

    #[test]
    fn combination_without_optional_slots_deserializes_as_none() {
        let combo: Combination =
            serde_json::from_str(r#"{"top":"t1","bottom":"b1"}"#).unwrap();
        assert_eq!(combo.shoes, None);
        assert_eq!(combo.accessory, None);
        assert_eq!(combo.slots().len(), 2);
    }

    #[test]
    fn preference_record_flattens_combination() {
        let record = PreferenceRecord::new(
            "u1".to_string(),
            Combination {
                top: "t1".to_string(),
                bottom: "b1".to_string(),
                shoes: Some("s1".to_string()),
                accessory: None,
            },
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["top"], "t1");
        assert_eq!(value["shoes"], "s1");
        assert!(value["accessory"].is_null());
    }
}
