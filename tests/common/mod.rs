// 该文件是 Lujian （路检） 项目的一部分。
// tests/common/mod.rs - 集成测试公共桩件
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

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{ImageFormat, RgbImage};

use lujian::config::Thresholds;
use lujian::detector::{ModelFamily, ModelKind, RoadDetector};
use lujian::model::{BoundingBox, Detection, Device, InferError, Model};
use lujian::output::{AnnotatedImageWriter, Draw};
use lujian::provision::Loader;

pub const IMAGE_WIDTH: u32 = 64;
pub const IMAGE_HEIGHT: u32 = 48;

/// 按置信度阈值过滤固定结果的模型
pub struct StubModel {
  detections: Vec<Detection>,
}

impl Model for StubModel {
  fn infer(&self, _image: &RgbImage, thresholds: Thresholds) -> Result<Vec<Detection>, InferError> {
    Ok(
      self
        .detections
        .iter()
        .filter(|d| d.bbox.is_none() || d.confidence >= thresholds.confidence)
        .cloned()
        .collect(),
    )
  }

  fn device(&self) -> Device {
    Device::Cpu
  }
}

#[derive(Default)]
pub struct StubLoader {
  calls: AtomicUsize,
  fail: bool,
}

impl StubLoader {
  pub fn failing() -> Self {
    Self {
      calls: AtomicUsize::new(0),
      fail: true,
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Loader for StubLoader {
  type Key = ModelFamily;
  type Handle = StubModel;
  type Error = std::io::Error;

  fn load(&self, family: ModelFamily) -> Result<StubModel, std::io::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(std::io::Error::other("weights missing"));
    }
    let detections = match family.spec().kind {
      ModelKind::Classifier => vec![Detection {
        label: "segment_faded".to_string(),
        confidence: 0.93,
        bbox: None,
      }],
      ModelKind::Detector => vec![
        Detection {
          label: "stop".to_string(),
          confidence: 0.88,
          bbox: Some(BoundingBox {
            x1: 4,
            y1: 4,
            x2: 30,
            y2: 30,
          }),
        },
        Detection {
          label: "yield".to_string(),
          confidence: 0.4,
          bbox: Some(BoundingBox {
            x1: 32,
            y1: 10,
            x2: 60,
            y2: 44,
          }),
        },
      ],
    };
    Ok(StubModel { detections })
  }
}

pub fn stub_detector(output_dir: &Path, loader: StubLoader) -> RoadDetector<StubLoader> {
  RoadDetector::new(
    loader,
    AnnotatedImageWriter::new(output_dir, Draw::without_font()),
    HashMap::new(),
  )
}

pub fn encoded_image(format: ImageFormat) -> Vec<u8> {
  let image = RgbImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |x, y| {
    image::Rgb([(x * 4) as u8, (y * 5) as u8, 120])
  });
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, format).unwrap();
  bytes.into_inner()
}

pub fn write_image(dir: &Path, name: &str, format: ImageFormat) -> PathBuf {
  let path = dir.join(name);
  std::fs::write(&path, encoded_image(format)).unwrap();
  path
}

pub fn file_names(dir: &Path) -> Vec<String> {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return Vec::new();
  };
  let mut names: Vec<String> = entries
    .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  names.sort();
  names
}
