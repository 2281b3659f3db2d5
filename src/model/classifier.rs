// 该文件是 Lujian （路检） 项目的一部分。
// src/model/classifier.rs - 路面标线状况分类器
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

use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use tracing::debug;

use super::session::InferSession;
use super::{Detection, Device, InferError, LoadError, Model, round_confidence};
use crate::config::Thresholds;

/// 类别，顺序与模型输出一致
pub const PAVEMENT_CLASSES: [&str; 10] = [
  "corner_faded",
  "corner_missing",
  "cracking",
  "edge_faded",
  "edge_missing",
  "ghost_marking",
  "healthy",
  "misalignment",
  "segment_faded",
  "segment_missing",
];

/// 分类模型输入边长
pub const PAVEMENT_INPUT_SIZE: u32 = 128;

/// 预处理：缩放到固定尺寸，转为 NCHW，像素值归一化到 [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct Transform {
  size: u32,
}

impl Default for Transform {
  fn default() -> Self {
    Self {
      size: PAVEMENT_INPUT_SIZE,
    }
  }
}

impl Transform {
  pub fn apply(&self, image: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(image, self.size, self.size, FilterType::Triangle);
    let size = self.size as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
  }
}

/// softmax 后取最大概率的类别；输出为空或含非有限值时返回 `None`
pub fn classify(logits: &[f32]) -> Option<(usize, f32)> {
  if logits.is_empty() || !logits.iter().all(|v| v.is_finite()) {
    return None;
  }
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps
    .iter()
    .enumerate()
    .max_by(|a, b| a.1.total_cmp(b.1))
    .map(|(index, e)| (index, e / sum))
}

/// 路面标线分类器
pub struct PavementClassifier {
  session: InferSession,
  transform: Transform,
}

impl PavementClassifier {
  pub fn load(path: &Path, device: Device) -> Result<Self, LoadError> {
    Ok(Self {
      session: InferSession::open(path, device)?,
      transform: Transform::default(),
    })
  }

  fn postprocess(shape: &[i64], logits: &[f32]) -> Result<Detection, InferError> {
    if logits.len() != PAVEMENT_CLASSES.len() {
      return Err(InferError::OutputShape {
        expected: "[1, 10]",
        actual: shape.to_vec(),
      });
    }
    let (index, probability) = classify(logits).ok_or(InferError::NonFiniteOutput)?;
    debug!("路面分类: {} ({:.4})", PAVEMENT_CLASSES[index], probability);
    Ok(Detection {
      label: PAVEMENT_CLASSES[index].to_string(),
      confidence: round_confidence(probability),
      bbox: None,
    })
  }
}

impl Model for PavementClassifier {
  /// 分类不使用阈值
  fn infer(&self, image: &RgbImage, _thresholds: Thresholds) -> Result<Vec<Detection>, InferError> {
    let input = self.transform.apply(image);
    let (shape, logits) = self.session.run(input)?;
    Ok(vec![Self::postprocess(&shape, &logits)?])
  }

  fn device(&self) -> Device {
    self.session.device()
  }
}
