// 该文件是 Lujian （路检） 项目的一部分。
// src/output.rs - 结果图像输出
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use crate::model::Detection;

pub mod draw;
pub use self::draw::{Draw, Style};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("无法从 {0} 推导结果文件名")]
  InvalidFileName(PathBuf),
  #[error("I/O 错误 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("保存图像 {path} 失败: {source}")]
  Image {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 结果文件名 `{原文件名}_{后缀}{原扩展名}`
pub fn annotated_file_name(input: &Path, suffix: &str) -> Result<String, OutputError> {
  let invalid = || OutputError::InvalidFileName(input.to_path_buf());
  let stem = input.file_stem().and_then(|s| s.to_str()).ok_or_else(invalid)?;
  let extension = input
    .extension()
    .and_then(|e| e.to_str())
    .ok_or_else(invalid)?;
  Ok(format!("{stem}_{suffix}.{extension}"))
}

/// 在原图副本上绘制结果，保存到结果目录
pub struct AnnotatedImageWriter {
  directory: PathBuf,
  draw: Draw,
}

impl AnnotatedImageWriter {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw) -> Self {
    Self {
      directory: directory.into(),
      draw,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 返回结果文件名（不含目录）
  pub fn write(
    &self,
    input: &Path,
    image: &RgbImage,
    detections: &[Detection],
    suffix: &str,
    style: Style,
  ) -> Result<String, OutputError> {
    let file_name = annotated_file_name(input, suffix)?;
    std::fs::create_dir_all(&self.directory).map_err(|source| OutputError::Io {
      path: self.directory.clone(),
      source,
    })?;

    let mut canvas = image.clone();
    self.draw.render(&mut canvas, detections, style);

    let path = self.directory.join(&file_name);
    canvas
      .save(&path)
      .map_err(|source| OutputError::Image {
        path: path.clone(),
        source,
      })?;
    info!("结果图像已保存: {}", path.display());

    Ok(file_name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  #[test]
  fn file_name_keeps_stem_and_extension() {
    assert_eq!(
      annotated_file_name(Path::new("/tmp/up/crossing.JPG"), "det").unwrap(),
      "crossing_det.JPG"
    );
    assert_eq!(
      annotated_file_name(Path::new("a.b.png"), "signal_damage").unwrap(),
      "a.b_signal_damage.png"
    );
    assert!(annotated_file_name(Path::new("noext"), "det").is_err());
  }

  #[test]
  fn writes_exactly_one_annotated_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("lamp.png");
    let image = RgbImage::from_pixel(64, 48, image::Rgb([200, 200, 200]));
    image.save(&input).unwrap();

    let out_dir = dir.path().join("output");
    let writer = AnnotatedImageWriter::new(&out_dir, Draw::without_font());
    let detections = [Detection {
      label: "red".to_string(),
      confidence: 0.9,
      bbox: Some(BoundingBox {
        x1: 5,
        y1: 5,
        x2: 40,
        y2: 30,
      }),
    }];
    let name = writer
      .write(&input, &image, &detections, "light", Style::Boxes([0, 255, 0]))
      .unwrap();

    assert_eq!(name, "lamp_light.png");
    let files: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
    assert_eq!(files.len(), 1);

    let saved = image::open(out_dir.join(&name)).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(5, 5).0, [0, 255, 0]);
    assert_eq!(saved.get_pixel(20, 20).0, [200, 200, 200]);
    // 原图不变
    let original = image::open(&input).unwrap().to_rgb8();
    assert_eq!(original.get_pixel(5, 5).0, [200, 200, 200]);
  }
}
