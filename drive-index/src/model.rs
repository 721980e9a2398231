use std::fmt;

use drive_core::{FOLDER_MIME_TYPE, SHORTCUT_MIME_TYPE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Shortcut,
    Regular,
}

impl NodeKind {
    pub fn from_mime_type(mime_type: &str) -> Self {
        match mime_type {
            FOLDER_MIME_TYPE => NodeKind::Folder,
            SHORTCUT_MIME_TYPE => NodeKind::Shortcut,
            _ => NodeKind::Regular,
        }
    }
}

/// A remote object as reported by the drive. This is also the record shape of the scan
/// interchange file and the input of bulk inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "drive_file_id")]
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub shortcut_target_id: Option<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_mime_type(&self.mime_type)
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == NodeKind::Folder
    }

    pub fn is_shortcut(&self) -> bool {
        self.kind() == NodeKind::Shortcut
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    pub drive_file_id: String,
    pub name: String,
    pub mime_type: String,
    pub parent_id: Option<String>,
    pub owner: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub size: Option<i64>,
    pub shortcut_target_id: Option<String>,
    pub md5_checksum: Option<String>,
    pub active: bool,
}

impl FileRecord {
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_mime_type(&self.mime_type)
    }

    pub fn is_folder(&self) -> bool {
        self.kind() == NodeKind::Folder
    }

    /// The object a mirror shortcut for this record should point at.
    pub fn shortcut_target(&self) -> &str {
        self.shortcut_target_id
            .as_deref()
            .unwrap_or(&self.drive_file_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregationType {
    Shortcut,
    Collection,
    Pattern,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Shortcut => "shortcut",
            AggregationType::Collection => "collection",
            AggregationType::Pattern => "pattern",
        }
    }

    /// Tags are matched case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shortcut" => Some(AggregationType::Shortcut),
            "collection" => Some(AggregationType::Collection),
            "pattern" => Some(AggregationType::Pattern),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AggregationType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AggregationType::parse(&value).ok_or_else(|| format!("unknown aggregation type: {value}"))
    }
}

impl From<AggregationType> for String {
    fn from(value: AggregationType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryType {
    pub id: i64,
    pub name: String,
    pub aggregation_type: AggregationType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub category_type_id: i64,
    pub canonical_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryAlias {
    pub id: i64,
    pub category_id: i64,
    pub alias_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MirrorLevel {
    Root,
    TypeFolder,
    Category,
    Leaf,
}

impl MirrorLevel {
    pub fn as_i64(&self) -> i64 {
        match self {
            MirrorLevel::Root => 0,
            MirrorLevel::TypeFolder => 1,
            MirrorLevel::Category => 2,
            MirrorLevel::Leaf => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(MirrorLevel::Root),
            1 => Some(MirrorLevel::TypeFolder),
            2 => Some(MirrorLevel::Category),
            3 => Some(MirrorLevel::Leaf),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorNode {
    pub id: i64,
    pub name: String,
    pub drive_file_id: String,
    pub parent_id: Option<String>,
    pub shortcut_target_id: Option<String>,
    pub category_type_id: Option<i64>,
    pub level: MirrorLevel,
}

#[derive(Debug, Clone)]
pub struct MirrorInput {
    pub name: String,
    pub drive_file_id: String,
    pub parent_id: Option<String>,
    pub shortcut_target_id: Option<String>,
    pub category_type_id: Option<i64>,
    pub level: MirrorLevel,
}

impl MirrorInput {
    /// Describes a node the reconciler just created under `parent_id`.
    pub fn created(
        node: &Node,
        parent_id: Option<&str>,
        category_type_id: Option<i64>,
        level: MirrorLevel,
    ) -> Self {
        Self {
            name: node.name.clone(),
            drive_file_id: node.id.clone(),
            parent_id: parent_id.map(str::to_string),
            shortcut_target_id: node.shortcut_target_id.clone(),
            category_type_id,
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_follows_mime_type() {
        assert_eq!(NodeKind::from_mime_type(FOLDER_MIME_TYPE), NodeKind::Folder);
        assert_eq!(
            NodeKind::from_mime_type(SHORTCUT_MIME_TYPE),
            NodeKind::Shortcut
        );
        assert_eq!(NodeKind::from_mime_type("image/png"), NodeKind::Regular);
    }

    #[test]
    fn node_uses_interchange_field_names() {
        let value = serde_json::json!({
            "drive_file_id": "abc",
            "name": "Scan.pdf",
            "mime_type": "application/pdf",
            "parent_id": "root",
            "size": 10
        });
        let node: Node = serde_json::from_value(value).unwrap();
        assert_eq!(node.id, "abc");
        assert_eq!(node.size, Some(10));
        assert_eq!(node.owner, None);

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["drive_file_id"], "abc");
        assert!(back.get("id").is_none());
    }

    #[test]
    fn aggregation_type_rejects_unknown_tags() {
        let parsed: AggregationType = serde_json::from_str("\"Pattern\"").unwrap();
        assert_eq!(parsed, AggregationType::Pattern);
        assert!(serde_json::from_str::<AggregationType>("\"bucket\"").is_err());
    }

    #[test]
    fn shortcut_target_prefers_existing_shortcut_target() {
        let mut record = FileRecord {
            id: 1,
            drive_file_id: "file".into(),
            name: "a".into(),
            mime_type: "text/plain".into(),
            parent_id: None,
            owner: None,
            created_time: None,
            modified_time: None,
            size: None,
            shortcut_target_id: None,
            md5_checksum: None,
            active: true,
        };
        assert_eq!(record.shortcut_target(), "file");
        record.shortcut_target_id = Some("target".into());
        assert_eq!(record.shortcut_target(), "target");
    }
}
