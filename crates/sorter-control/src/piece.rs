//! 零件记录
//!
//! 零件在上料检测时创建，由分类与分发两条流水线共同修改，到达 `distributed` 后不再变化。

use serde::{Deserialize, Serialize};
use sorter_client::BinAddress;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// 零件唯一标识（UUID v4 文本）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(String);

impl PieceId {
    /// 随机生成
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志用的短形式
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl From<&str> for PieceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceStage {
    Created,
    Distributing,
    Distributed,
}

/// 识别状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Pending,
    Classifying,
    Classified,
    Unknown,
    NotFound,
}

/// 识别结果
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationResult {
    Classified {
        part_id: String,
        confidence: Option<f64>,
    },
    /// 识别服务明确表示没有匹配
    NotFound,
    /// 识别失败
    Unknown,
}

/// 零件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    #[serde(rename = "uuid")]
    pub id: PieceId,
    /// Unix 秒
    pub created_at: f64,
    pub updated_at: f64,
    pub stage: PieceStage,
    pub classification_status: ClassificationStatus,
    pub part_id: Option<String>,
    pub category_id: Option<String>,
    pub confidence: Option<f64>,
    /// (layer, section, bin)
    pub destination_bin: Option<(usize, usize, usize)>,
    pub thumbnail: Option<String>,
    pub top_image: Option<String>,
    pub bottom_image: Option<String>,
}

impl Piece {
    pub fn new() -> Self {
        Self::with_id(PieceId::generate())
    }

    pub fn with_id(id: PieceId) -> Self {
        let now = unix_seconds();
        Self {
            id,
            created_at: now,
            updated_at: now,
            stage: PieceStage::Created,
            classification_status: ClassificationStatus::Pending,
            part_id: None,
            category_id: None,
            confidence: None,
            destination_bin: None,
            thumbnail: None,
            top_image: None,
            bottom_image: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_seconds();
    }

    /// 已得出识别结论（有零件编号，或明确无法识别），可以进入分发
    pub fn is_ready_for_distribution(&self) -> bool {
        self.part_id.is_some()
            || matches!(
                self.classification_status,
                ClassificationStatus::Unknown | ClassificationStatus::NotFound
            )
    }

    pub fn destination(&self) -> Option<BinAddress> {
        self.destination_bin
            .map(|(layer, section, bin)| BinAddress::new(layer, section, bin))
    }

    pub fn set_destination(&mut self, address: BinAddress) {
        self.destination_bin = Some((address.layer_index, address.section_index, address.bin_index));
    }

    /// 写入识别结果
    pub fn apply_classification(&mut self, result: &ClassificationResult) {
        match result {
            ClassificationResult::Classified {
                part_id,
                confidence,
            } => {
                self.classification_status = ClassificationStatus::Classified;
                self.part_id = Some(part_id.clone());
                self.confidence = *confidence;
            },
            ClassificationResult::NotFound => {
                self.classification_status = ClassificationStatus::NotFound;
            },
            ClassificationResult::Unknown => {
                self.classification_status = ClassificationStatus::Unknown;
            },
        }
        self.touch();
    }
}

impl Default for Piece {
    fn default() -> Self {
        Self::new()
    }
}

/// 对外发布的零件快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieceEvent {
    pub tag: &'static str,
    pub data: Piece,
}

impl PieceEvent {
    pub const TAG: &'static str = "known_object";

    pub fn snapshot(piece: &Piece) -> Self {
        Self {
            tag: Self::TAG,
            data: piece.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_look_like_uuid_v4() {
        let id = PieceId::generate();
        let text = id.as_str();
        assert_eq!(text.len(), 36);
        assert_eq!(&text[14..15], "4");
        assert!(matches!(&text[19..20], "8" | "9" | "a" | "b"));
        assert_eq!(id.short().len(), 8);
        assert_eq!(Uuid::parse_str(text).unwrap().get_version_num(), 4);
        assert_ne!(id, PieceId::generate());
    }

    #[test]
    fn test_distribution_eligibility() {
        let mut piece = Piece::new();
        assert!(!piece.is_ready_for_distribution());
        piece.classification_status = ClassificationStatus::Classifying;
        assert!(!piece.is_ready_for_distribution());

        piece.apply_classification(&ClassificationResult::Unknown);
        assert!(piece.is_ready_for_distribution());

        let mut piece = Piece::new();
        piece.apply_classification(&ClassificationResult::Classified {
            part_id: "3001".into(),
            confidence: Some(0.93),
        });
        assert!(piece.is_ready_for_distribution());
        assert_eq!(piece.confidence, Some(0.93));
    }

    #[test]
    fn test_event_json_shape() {
        let mut piece = Piece::with_id(PieceId::from("abc"));
        piece.set_destination(BinAddress::new(0, 2, 1));
        piece.stage = PieceStage::Distributing;
        let json: serde_json::Value =
            serde_json::from_str(&PieceEvent::snapshot(&piece).to_json().unwrap()).unwrap();
        assert_eq!(json["tag"], "known_object");
        assert_eq!(json["data"]["uuid"], "abc");
        assert_eq!(json["data"]["stage"], "distributing");
        assert_eq!(json["data"]["classification_status"], "pending");
        assert_eq!(json["data"]["destination_bin"], serde_json::json!([0, 2, 1]));
    }
}
