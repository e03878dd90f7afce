//! 转盘模型
//!
//! 转盘上有四个固定工位，每次转动 90° 所有零件前进一个工位：
//!
//! ```text
//! feeder → classification → intermediate → exit → (离开转盘)
//! ```
//!
//! 每个工位最多一个零件。

use crate::piece::{ClassificationResult, ClassificationStatus, Piece, PieceId};
use std::fmt;
use thiserror::Error;
use tracing::info;

/// 工位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarouselRole {
    Feeder,
    Classification,
    Intermediate,
    Exit,
}

impl CarouselRole {
    pub const ALL: [CarouselRole; 4] = [
        CarouselRole::Feeder,
        CarouselRole::Classification,
        CarouselRole::Intermediate,
        CarouselRole::Exit,
    ];

    fn index(self) -> usize {
        match self {
            CarouselRole::Feeder => 0,
            CarouselRole::Classification => 1,
            CarouselRole::Intermediate => 2,
            CarouselRole::Exit => 3,
        }
    }
}

impl fmt::Display for CarouselRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CarouselRole::Feeder => "feeder",
            CarouselRole::Classification => "classification",
            CarouselRole::Intermediate => "intermediate",
            CarouselRole::Exit => "exit",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CarouselError {
    /// 上料工位已有零件
    #[error("Feeder slot already holds piece {occupant}")]
    FeederOccupied { occupant: PieceId },

    /// 转盘上没有该零件
    #[error("Piece {0} is not on the carousel")]
    UnknownPiece(PieceId),
}

#[derive(Debug, Clone, Default)]
pub struct Carousel {
    slots: [Option<Piece>; 4],
}

impl Carousel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在上料工位放入零件
    ///
    /// # 错误
    /// - `CarouselError::FeederOccupied`: 上料工位非空，零件没有放入
    pub fn add_piece_at_feeder(&mut self, piece: Piece) -> Result<(), CarouselError> {
        let slot = &mut self.slots[CarouselRole::Feeder.index()];
        if let Some(occupant) = slot {
            return Err(CarouselError::FeederOccupied {
                occupant: occupant.id.clone(),
            });
        }
        info!("Carousel: piece {} added at feeder", piece.id.short());
        *slot = Some(piece);
        Ok(())
    }

    /// 转动一个工位，返回离开转盘的零件
    pub fn rotate(&mut self) -> Option<Piece> {
        let exiting = self.slots[CarouselRole::Exit.index()].take();
        self.slots.rotate_right(1);
        if let Some(piece) = &exiting {
            info!("Carousel: piece {} left the carousel", piece.id.short());
        }
        exiting
    }

    pub fn piece_at(&self, role: CarouselRole) -> Option<&Piece> {
        self.slots[role.index()].as_ref()
    }

    pub fn piece_at_mut(&mut self, role: CarouselRole) -> Option<&mut Piece> {
        self.slots[role.index()].as_mut()
    }

    /// 零件所在工位
    pub fn role_of(&self, id: &PieceId) -> Option<CarouselRole> {
        CarouselRole::ALL
            .into_iter()
            .find(|role| self.piece_at(*role).is_some_and(|p| &p.id == id))
    }

    pub fn find_mut(&mut self, id: &PieceId) -> Option<&mut Piece> {
        self.slots.iter_mut().flatten().find(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.slots.iter().flatten()
    }

    /// 标记零件正在识别
    pub fn mark_pending_classification(&mut self, id: &PieceId) -> Result<(), CarouselError> {
        let piece = self
            .find_mut(id)
            .ok_or_else(|| CarouselError::UnknownPiece(id.clone()))?;
        piece.classification_status = ClassificationStatus::Classifying;
        piece.touch();
        Ok(())
    }

    /// 写入识别结果
    pub fn resolve_classification(
        &mut self,
        id: &PieceId,
        result: &ClassificationResult,
    ) -> Result<(), CarouselError> {
        let piece = self
            .find_mut(id)
            .ok_or_else(|| CarouselError::UnknownPiece(id.clone()))?;
        piece.apply_classification(result);
        info!(
            "Carousel: piece {} classified as {:?}",
            id.short(),
            piece.part_id.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }
}
