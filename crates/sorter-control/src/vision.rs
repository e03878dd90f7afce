//! 视觉协作接口
//!
//! 相机、检测器、识别服务和图片存储都是外部协作者，状态机只依赖这里的 trait。
//! 本模块同时提供一个基于灰度差分的检测器 [`HeatmapDetector`] 和把图片写成
//! netpbm 文件的 [`DirectoryImageStore`]。

use crate::piece::{ClassificationResult, PieceId};
use sorter_tools::DetectionSection;
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 一帧图像（行优先，灰度或 RGB）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// 1（灰度）或 3（RGB）
    pub channels: u8,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn gray(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Option<Self> {
        Self::new(width, height, 1, data.into())
    }

    pub fn rgb(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Option<Self> {
        Self::new(width, height, 3, data.into())
    }

    fn new(width: u32, height: u32, channels: u8, data: Arc<[u8]>) -> Option<Self> {
        let expected = width as usize * height as usize * channels as usize;
        (data.len() == expected).then_some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 灰度数据（RGB 按 BT.601 加权）
    pub fn to_gray(&self) -> Vec<u8> {
        match self.channels {
            3 => self
                .data
                .chunks_exact(3)
                .map(|px| {
                    let luma = 0.299 * f32::from(px[0])
                        + 0.587 * f32::from(px[1])
                        + 0.114 * f32::from(px[2]);
                    luma.round().min(255.0) as u8
                })
                .collect(),
            _ => self.data.to_vec(),
        }
    }
}

/// 差分结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffScore {
    pub score: f64,
    pub hot_pixels: u32,
}

/// 上料相机
pub trait FeederCamera: Send {
    fn latest_frame(&mut self) -> Option<Frame>;
}

/// 识别工位的上下两台相机
pub trait ClassificationCameras: Send {
    /// 返回 (top, bottom)
    fn capture_pair(&mut self) -> Option<(Frame, Frame)>;
}

/// 上料平台运动检测器
pub trait Detector: Send {
    fn push_frame(&mut self, frame: &Frame);

    /// 以最近的画面为基线；区域或画面不足时返回 `false`
    fn capture_baseline(&mut self, corners: &[[f64; 2]], shape: [u32; 2]) -> bool;

    /// 当前画面相对基线的差分；没有基线时返回 `None`
    fn compute_diff(&mut self) -> Option<DiffScore>;
}

pub type IdentifyCallback = Box<dyn FnOnce(ClassificationResult) + Send>;

/// 零件识别服务
///
/// 实现必须立即返回，并在任意线程上恰好调用一次 `on_result`。
pub trait Identifier: Send + Sync {
    fn classify(&self, top: Frame, bottom: Frame, on_result: IdentifyCallback);
}

/// 图片存储
pub trait ImageStore: Send {
    /// 保存上下两张图，返回 (top, bottom) 的引用名；不保存时返回 `None`
    fn save(
        &mut self,
        id: &PieceId,
        top: &Frame,
        bottom: &Frame,
    ) -> io::Result<Option<(String, String)>>;
}

// ==================== Detector ====================

const GRAY_RING_CAPACITY: usize = 30;

/// 灰度差分检测器
///
/// 基线和当前画面都取最近若干帧的平均；差分经过方框平滑后只统计平台多边形内的像素。
/// 超过 `pixel_thresh` 的像素为热点，得分为热点的平均差值，热点不足
/// `min_hot_pixels` 时得分为 0。
pub struct HeatmapDetector {
    params: DetectionSection,
    dims: Option<(u32, u32)>,
    ring: VecDeque<Vec<u8>>,
    baseline: Option<Vec<u8>>,
    mask: Vec<bool>,
}

impl HeatmapDetector {
    pub fn new(params: DetectionSection) -> Self {
        Self {
            params,
            dims: None,
            ring: VecDeque::with_capacity(GRAY_RING_CAPACITY),
            baseline: None,
            mask: Vec::new(),
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    fn average(&self, count: usize) -> Option<Vec<u8>> {
        let n = count.max(1).min(self.ring.len());
        if n == 0 {
            return None;
        }
        let frames: Vec<&Vec<u8>> = self.ring.iter().rev().take(n).collect();
        let len = frames[0].len();
        let mut acc = vec![0u32; len];
        for frame in &frames {
            for (sum, &px) in acc.iter_mut().zip(frame.iter()) {
                *sum += u32::from(px);
            }
        }
        Some(acc.into_iter().map(|sum| (sum / n as u32) as u8).collect())
    }
}

impl Detector for HeatmapDetector {
    fn push_frame(&mut self, frame: &Frame) {
        let dims = (frame.width, frame.height);
        if self.dims != Some(dims) {
            if self.dims.is_some() {
                warn!(
                    "Detector frame size changed to {}x{}, baseline discarded",
                    frame.width, frame.height
                );
            }
            self.dims = Some(dims);
            self.ring.clear();
            self.baseline = None;
            self.mask.clear();
        }
        if self.ring.len() == GRAY_RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(frame.to_gray());
    }

    fn capture_baseline(&mut self, corners: &[[f64; 2]], shape: [u32; 2]) -> bool {
        if corners.len() < 3 {
            warn!("Detector baseline needs a platform polygon (got {} corners)", corners.len());
            return false;
        }
        let Some((width, height)) = self.dims else {
            return false;
        };
        if shape != [width, height] {
            debug!(
                "Detector configured for {}x{}, camera delivers {}x{}",
                shape[0], shape[1], width, height
            );
        }
        let Some(baseline) = self.average(self.params.baseline_frames) else {
            return false;
        };
        self.mask = polygon_mask(corners, width, height);
        self.baseline = Some(baseline);
        info!(
            "Detector baseline captured ({} frames, {} px in region)",
            self.params.baseline_frames.min(self.ring.len()),
            self.mask.iter().filter(|&&inside| inside).count()
        );
        true
    }

    fn compute_diff(&mut self) -> Option<DiffScore> {
        let (width, height) = self.dims?;
        let baseline = self.baseline.as_ref()?;
        let current = self.average(self.params.current_frames)?;

        let diff: Vec<u8> = current
            .iter()
            .zip(baseline.iter())
            .map(|(&a, &b)| a.abs_diff(b))
            .collect();
        let diff = box_blur(&diff, width as usize, height as usize, self.params.blur_kernel | 1);

        let mut hot_pixels = 0u32;
        let mut hot_sum = 0u64;
        for (&value, &inside) in diff.iter().zip(self.mask.iter()) {
            if inside && value > self.params.pixel_thresh {
                hot_pixels += 1;
                hot_sum += u64::from(value);
            }
        }
        let score = if hot_pixels >= self.params.min_hot_pixels && hot_pixels > 0 {
            hot_sum as f64 / f64::from(hot_pixels)
        } else {
            0.0
        };
        Some(DiffScore { score, hot_pixels })
    }
}

/// 多边形内的像素（射线法，按像素中心判断）
fn polygon_mask(corners: &[[f64; 2]], width: u32, height: u32) -> Vec<bool> {
    let mut mask = vec![false; width as usize * height as usize];
    for y in 0..height as usize {
        let py = y as f64 + 0.5;
        for x in 0..width as usize {
            let px = x as f64 + 0.5;
            let mut inside = false;
            let mut j = corners.len() - 1;
            for i in 0..corners.len() {
                let [xi, yi] = corners[i];
                let [xj, yj] = corners[j];
                if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
                j = i;
            }
            mask[y * width as usize + x] = inside;
        }
    }
    mask
}

/// 可分离方框平滑，边缘按最近像素延伸
fn box_blur(data: &[u8], width: usize, height: usize, kernel: usize) -> Vec<u8> {
    if kernel <= 1 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let radius = (kernel / 2) as isize;
    let pass = |src: &[u8], len: usize, lines: usize, stride: usize, step: usize| -> Vec<u8> {
        let mut out = vec![0u8; src.len()];
        for line in 0..lines {
            let base = line * stride;
            for i in 0..len as isize {
                let mut sum = 0u32;
                for k in -radius..=radius {
                    let idx = (i + k).clamp(0, len as isize - 1) as usize;
                    sum += u32::from(src[base + idx * step]);
                }
                out[base + i as usize * step] = (sum / kernel as u32) as u8;
            }
        }
        out
    };
    let horizontal = pass(data, width, height, width, 1);
    pass(&horizontal, height, width, 1, width)
}

// ==================== Image store ====================

/// 不保存图片
#[derive(Debug, Default, Clone, Copy)]
pub struct NullImageStore;

impl ImageStore for NullImageStore {
    fn save(&mut self, _: &PieceId, _: &Frame, _: &Frame) -> io::Result<Option<(String, String)>> {
        Ok(None)
    }
}

/// 把图片写成 PGM/PPM 文件
#[derive(Debug, Clone)]
pub struct DirectoryImageStore {
    dir: PathBuf,
}

impl DirectoryImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_frame(&self, name: &str, frame: &Frame) -> io::Result<String> {
        let (magic, ext) = if frame.channels == 3 {
            ("P6", "ppm")
        } else {
            ("P5", "pgm")
        };
        let file_name = format!("{}.{}", name, ext);
        let path = self.dir.join(&file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        write!(writer, "{}\n{} {}\n255\n", magic, frame.width, frame.height)?;
        writer.write_all(&frame.data)?;
        writer.flush()?;
        Ok(file_name)
    }
}

impl ImageStore for DirectoryImageStore {
    fn save(
        &mut self,
        id: &PieceId,
        top: &Frame,
        bottom: &Frame,
    ) -> io::Result<Option<(String, String)>> {
        fs::create_dir_all(&self.dir)?;
        let top_name = self.write_frame(&format!("{}_top", id), top)?;
        let bottom_name = self.write_frame(&format!("{}_bottom", id), bottom)?;
        debug!("Saved images for piece {} to {}", id.short(), self.dir.display());
        Ok(Some((top_name, bottom_name)))
    }
}
