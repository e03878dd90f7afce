//! 共享上下文
//!
//! 三条状态机之间的全部共享状态都在这里，由协调器以 `&mut` 依次传给每条状态机，
//! 因此只在控制循环线程上读写。

use crate::carousel::{Carousel, CarouselRole};
use crate::piece::{ClassificationResult, Piece, PieceEvent, PieceId, PieceStage};
use crossbeam_channel::{Sender, TrySendError};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// 离开转盘的零件保留条数
pub const EXITED_HISTORY_LIMIT: usize = 64;

pub struct SharedContext {
    /// 分类流水线可以接收新零件
    pub classification_ready: bool,
    /// 分发流水线可以接收出口处的零件
    pub distribution_ready: bool,
    /// 滑槽正在运动，上料暂停
    pub chute_move_in_progress: bool,
    pub carousel: Carousel,
    /// 转盘转动后落入滑槽、等待分发确认的零件
    pub handoff: Option<PieceId>,
    exited: VecDeque<Piece>,
    events: Option<Sender<PieceEvent>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self {
            classification_ready: true,
            distribution_ready: true,
            chute_move_in_progress: false,
            carousel: Carousel::new(),
            handoff: None,
            exited: VecDeque::with_capacity(EXITED_HISTORY_LIMIT),
            events: None,
        }
    }

    /// 设置生命周期事件出口
    pub fn with_events(mut self, events: Sender<PieceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// 发布零件快照；出口已满或已断开时丢弃
    pub fn publish(&self, piece: &Piece) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(PieceEvent::snapshot(piece)) {
            Ok(()) => debug!("Published piece {} ({:?})", piece.id.short(), piece.stage),
            Err(TrySendError::Full(_)) => {
                warn!("Event queue full, dropping snapshot of piece {}", piece.id.short())
            },
            Err(TrySendError::Disconnected(_)) => {
                debug!("Event receiver gone, snapshot of piece {} dropped", piece.id.short())
            },
        }
    }

    pub fn record_exited(&mut self, piece: Piece) {
        if self.exited.len() == EXITED_HISTORY_LIMIT {
            self.exited.pop_front();
        }
        self.exited.push_back(piece);
    }

    /// 最近离开转盘的零件（旧 → 新）
    pub fn exited(&self) -> impl Iterator<Item = &Piece> {
        self.exited.iter()
    }

    /// 在转盘或离开记录中查找零件
    pub fn find_piece_mut(&mut self, id: &PieceId) -> Option<&mut Piece> {
        if self.carousel.role_of(id).is_some() {
            return self.carousel.find_mut(id);
        }
        self.exited.iter_mut().rev().find(|p| &p.id == id)
    }

    /// 中间工位的零件已有识别结论，但还没有被分发流水线认领
    pub fn intermediate_unclaimed(&self) -> bool {
        self.carousel
            .piece_at(CarouselRole::Intermediate)
            .is_some_and(|piece| {
                piece.is_ready_for_distribution()
                    && !(piece.stage == PieceStage::Distributing && piece.destination().is_some())
            })
    }

    /// 写入识别结果并发布；零件已不存在时返回 `false`
    pub fn resolve_classification(&mut self, id: &PieceId, result: &ClassificationResult) -> bool {
        let Some(piece) = self.find_piece_mut(id) else {
            warn!("Classification result for unknown piece {}", id.short());
            return false;
        };
        piece.apply_classification(result);
        let snapshot = piece.clone();
        self.publish(&snapshot);
        true
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}
