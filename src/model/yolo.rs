// 该文件是 Lujian （路检） 项目的一部分。
// src/model/yolo.rs - YOLO 目标检测器
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::BTreeMap;
use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use tracing::{debug, warn};

use super::session::{InferSession, parse_class_names, parse_input_size};
use super::{BoundingBox, Detection, Device, InferError, LoadError, Model, round_confidence};
use crate::config::Thresholds;

/// 默认模型输入边长
pub const YOLO_INPUT_SIZE: u32 = 640;
/// 单张图像最多保留的检测数
pub const MAX_DETECTIONS: usize = 300;
/// 填充颜色 (114, 114, 114)
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// 等比缩放并居中填充后的几何信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  /// 原图宽度
  pub width: u32,
  /// 原图高度
  pub height: u32,
}

impl Letterbox {
  pub fn new(width: u32, height: u32, input_width: u32, input_height: u32) -> Self {
    let scale = (input_width as f32 / width as f32).min(input_height as f32 / height as f32);
    let resized_w = (width as f32 * scale).round();
    let resized_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((input_width as f32 - resized_w) / 2.0 - 0.1).round().max(0.0),
      pad_y: ((input_height as f32 - resized_h) / 2.0 - 0.1).round().max(0.0),
      width,
      height,
    }
  }

  fn resized_dims(&self) -> (u32, u32) {
    (
      ((self.width as f32 * self.scale).round() as u32).max(1),
      ((self.height as f32 * self.scale).round() as u32).max(1),
    )
  }

  /// 将模型输入空间的 xyxy 框映射回原图，裁剪到图像范围内并取整；
  /// 退化的框返回 `None`
  pub fn restore(&self, bbox: [f32; 4]) -> Option<BoundingBox> {
    let (w, h) = (self.width as f32, self.height as f32);
    let x1 = ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w) as i32;
    let y1 = ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h) as i32;
    let x2 = ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w) as i32;
    let y2 = ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h) as i32;
    (x1 < x2 && y1 < y2).then_some(BoundingBox { x1, y1, x2, y2 })
  }
}

/// 缩放、填充并转为 NCHW 浮点张量，像素值归一化到 [0, 1]
pub fn letterbox(image: &RgbImage, input_width: u32, input_height: u32) -> (Array4<f32>, Letterbox) {
  let geometry = Letterbox::new(image.width(), image.height(), input_width, input_height);
  let (resized_w, resized_h) = geometry.resized_dims();
  let resized = imageops::resize(image, resized_w, resized_h, FilterType::Triangle);

  let (w, h) = (input_width as usize, input_height as usize);
  let mut tensor = Array4::from_elem((1, 3, h, w), LETTERBOX_FILL);
  let (pad_x, pad_y) = (geometry.pad_x as usize, geometry.pad_y as usize);
  for (x, y, pixel) in resized.enumerate_pixels() {
    let (tx, ty) = (x as usize + pad_x, y as usize + pad_y);
    if tx >= w || ty >= h {
      continue;
    }
    for c in 0..3 {
      tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
    }
  }
  (tensor, geometry)
}

/// 候选框，坐标位于模型输入空间
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: usize,
  pub score: f32,
  /// [x_min, y_min, x_max, y_max]
  pub bbox: [f32; 4],
}

/// 解码 YOLOv8 输出，支持 `[1, 4+nc, N]` 与 `[1, N, 4+nc]` 两种布局
pub fn decode_output(shape: &[i64], data: &[f32], confidence: f32) -> Result<Vec<Candidate>, InferError> {
  let bad_shape = || InferError::OutputShape {
    expected: "[1, 4+nc, N] 或 [1, N, 4+nc]",
    actual: shape.to_vec(),
  };
  let [batch, d1, d2] = shape else {
    return Err(bad_shape());
  };
  if *batch != 1 || *d1 <= 0 || *d2 <= 0 {
    return Err(bad_shape());
  }
  let (d1, d2) = (*d1 as usize, *d2 as usize);
  if data.len() != d1 * d2 {
    return Err(bad_shape());
  }

  // 特征维通常远小于候选框数量
  let channels_first = d1 <= d2;
  let (features, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
  if features < 5 {
    return Err(bad_shape());
  }
  let at = |anchor: usize, feature: usize| {
    if channels_first {
      data[feature * anchors + anchor]
    } else {
      data[anchor * features + feature]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (4..features)
      .map(|f| (f - 4, at(anchor, f)))
      .fold((0, f32::NEG_INFINITY), |best, current| {
        if current.1 > best.1 { current } else { best }
      });
    if score < confidence {
      continue;
    }

    let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  Ok(candidates)
}

/// 按类别的非极大值抑制
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, limit: usize) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= limit {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 两个 xyxy 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

/// YOLO 目标检测器
pub struct YoloDetector {
  session: InferSession,
  input_width: u32,
  input_height: u32,
  names: BTreeMap<usize, String>,
}

impl YoloDetector {
  pub fn load(path: &Path, device: Device) -> Result<Self, LoadError> {
    let session = InferSession::open(path, device)?;

    let metadata = |key: &str| match session.custom_metadata(key) {
      Ok(value) => value,
      Err(e) => {
        warn!("读取模型元数据 {} 失败: {}", key, e);
        None
      }
    };
    let names = metadata("names")
      .map(|raw| parse_class_names(&raw))
      .unwrap_or_default();
    if names.is_empty() {
      warn!("模型 {} 未提供类别名称", path.display());
    }
    let (input_width, input_height) = metadata("imgsz")
      .and_then(|raw| parse_input_size(&raw))
      .unwrap_or((YOLO_INPUT_SIZE, YOLO_INPUT_SIZE));
    debug!(
      "检测模型输入 {}x{}，类别数 {}",
      input_width,
      input_height,
      names.len()
    );

    Ok(Self {
      session,
      input_width,
      input_height,
      names,
    })
  }

  /// 后处理：置信度过滤、NMS、还原到原图坐标
  pub fn postprocess(
    &self,
    shape: &[i64],
    data: &[f32],
    geometry: &Letterbox,
    thresholds: Thresholds,
  ) -> Result<Vec<Detection>, InferError> {
    postprocess(shape, data, geometry, thresholds, &self.names)
  }
}

fn label_for(names: &BTreeMap<usize, String>, class_id: usize) -> String {
  names
    .get(&class_id)
    .cloned()
    .unwrap_or_else(|| format!("class_{class_id}"))
}

fn postprocess(
  shape: &[i64],
  data: &[f32],
  geometry: &Letterbox,
  thresholds: Thresholds,
  names: &BTreeMap<usize, String>,
) -> Result<Vec<Detection>, InferError> {
  let candidates = decode_output(shape, data, thresholds.confidence)?;
  let kept = nms(candidates, thresholds.iou, MAX_DETECTIONS);
  Ok(
    kept
      .into_iter()
      .filter_map(|candidate| {
        let bbox = geometry.restore(candidate.bbox)?;
        Some(Detection {
          label: label_for(names, candidate.class_id),
          confidence: round_confidence(candidate.score),
          bbox: Some(bbox),
        })
      })
      .collect(),
  )
}

impl Model for YoloDetector {
  fn infer(&self, image: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>, InferError> {
    let (input, geometry) = letterbox(image, self.input_width, self.input_height);
    let (shape, data) = self.session.run(input)?;
    self.postprocess(&shape, &data, &geometry, thresholds)
  }

  fn device(&self) -> Device {
    self.session.device()
  }
}
