// 该文件是 Lujian （路检） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::Thresholds;

pub trait Model: Send + Sync {
  fn infer(&self, image: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>, InferError>;
  fn device(&self) -> Device;
}

#[derive(Error, Debug)]
pub enum InferError {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("模型输出形状不符合预期，期望 {expected}，实际 {actual:?}")]
  OutputShape {
    expected: &'static str,
    actual: Vec<i64>,
  },
  #[error("模型输出包含非有限数值")]
  NonFiniteOutput,
  #[error("推理会话锁已损坏")]
  Poisoned,
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error(transparent)]
  Artifact(#[from] ArtifactError),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("模型结构不符合预期: {0}")]
  InvalidModel(String),
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Cuda,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => f.write_str("cpu"),
      Device::Cuda => f.write_str("cuda"),
    }
  }
}

/// 原图像素坐标下的边界框，序列化为 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "[i32; 4]")]
pub struct BoundingBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl From<BoundingBox> for [i32; 4] {
  fn from(b: BoundingBox) -> Self {
    [b.x1, b.y1, b.x2, b.y2]
  }
}

impl BoundingBox {
  pub fn width(&self) -> u32 {
    (self.x2 - self.x1).max(0) as u32
  }

  pub fn height(&self) -> u32 {
    (self.y2 - self.y1).max(0) as u32
  }
}

/// 单条检测结果；分类模型的 `bbox` 为空
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub confidence: f32,
  pub bbox: Option<BoundingBox>,
}

/// 置信度保留两位小数
pub fn round_confidence(score: f32) -> f32 {
  (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

mod classifier;
mod session;
mod yolo;

pub use self::classifier::{PAVEMENT_CLASSES, PavementClassifier};
pub use self::session::select_device;
pub use self::yolo::YoloDetector;

/// 已加载的模型
pub enum ModelHandle {
  Classifier(PavementClassifier),
  Detector(YoloDetector),
}

impl Model for ModelHandle {
  fn infer(&self, image: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>, InferError> {
    match self {
      ModelHandle::Classifier(model) => model.infer(image, thresholds),
      ModelHandle::Detector(model) => model.infer(image, thresholds),
    }
  }

  fn device(&self) -> Device {
    match self {
      ModelHandle::Classifier(model) => model.device(),
      ModelHandle::Detector(model) => model.device(),
    }
  }
}
