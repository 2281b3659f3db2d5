// 该文件是 Lujian （路检） 项目的一部分。
// src/output/draw.rs - 检测与分类结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::model::{BoundingBox, Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 3;
const BOX_THICKNESS: i32 = 2;
const BANNER_ORIGIN: (i32, i32) = (30, 30);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BANNER_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
// 每字符平均宽度与字号之比（粗略估计）
const ESTIMATED_CHAR_WIDTH: f32 = 0.55;

/// 常见的系统字体位置
const SYSTEM_FONTS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 绘制样式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
  /// 边界框与标签，颜色为 RGB
  Boxes([u8; 3]),
  /// 左上角的分类结果横幅
  Banner,
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_vertical_padding: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::from_font_file(None)
  }
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    Self {
      font: Some(font),
      font_size: LABEL_FONT_SIZE,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }

  /// 只画边界框，不渲染文字与横幅
  pub fn without_font() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }

  /// 依次尝试指定字体与系统字体
  pub fn from_font_file(path: Option<&Path>) -> Self {
    let candidates = path
      .map(Path::to_path_buf)
      .into_iter()
      .chain(SYSTEM_FONTS.iter().map(PathBuf::from));

    for candidate in candidates {
      let Ok(data) = std::fs::read(&candidate) else {
        continue;
      };
      match FontArc::try_from_vec(data) {
        Ok(font) => {
          info!("标注字体: {}", candidate.display());
          return Self::with_font(font);
        }
        Err(e) => warn!("无法解析字体 {}: {}", candidate.display(), e),
      }
    }

    warn!("未找到可用字体，结果图像将不包含文字");
    Self::without_font()
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn render(&self, image: &mut RgbImage, detections: &[Detection], style: Style) {
    match style {
      Style::Boxes(color) => {
        for detection in detections {
          if let Some(bbox) = &detection.bbox {
            let label = format!("{} {:.2}", detection.label, detection.confidence);
            self.draw_bbox_with_label(image, bbox, &label, Rgb(color));
          }
        }
      }
      Style::Banner => {
        if let Some(detection) = detections.first() {
          self.draw_banner(image, detection);
        }
      }
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &BoundingBox, label: &str, color: Rgb<u8>) {
    // 边框加粗为 2 像素，向内收缩
    for thickness in 0..BOX_THICKNESS {
      let width = bbox.width().saturating_sub(2 * thickness as u32);
      let height = bbox.height().saturating_sub(2 * thickness as u32);
      if width == 0 || height == 0 {
        break;
      }
      let rect = Rect::at(bbox.x1 + thickness, bbox.y1 + thickness).of_size(width, height);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, label);
    let tag_w = text_w + 2 * LABEL_TEXT_HORIZONTAL_PADDING as u32;
    let tag_h = text_h + 2 * self.label_text_vertical_padding as u32;

    // 标签放在框上方，空间不足时放在框内
    let tag_y = if bbox.y1 >= tag_h as i32 {
      bbox.y1 - tag_h as i32
    } else {
      bbox.y1
    };
    draw_filled_rect_mut(image, Rect::at(bbox.x1, tag_y).of_size(tag_w, tag_h), color);
    draw_text_mut(
      image,
      TEXT_COLOR,
      bbox.x1 + LABEL_TEXT_HORIZONTAL_PADDING,
      tag_y + self.label_text_vertical_padding,
      scale,
      font,
      label,
    );
  }

  /// 文字尺寸；没有字体时按字符数估算
  fn measure(&self, scale: PxScale, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(scale, font, text),
      None => (
        (text.chars().count() as f32 * scale.x * ESTIMATED_CHAR_WIDTH) as u32,
        scale.y as u32,
      ),
    }
  }

  fn draw_banner(&self, image: &mut RgbImage, detection: &Detection) {
    let font_size = (image.height() / 18).max(20);
    let scale = PxScale::from(font_size as f32);
    let padding = font_size / 2;
    let spacing = font_size / 4;

    let condition = format!("Condition: {}", detection.label);
    let confidence = format!("Confidence: {:.1}%", detection.confidence * 100.0);
    let (condition_w, condition_h) = self.measure(scale, &condition);
    let (confidence_w, confidence_h) = self.measure(scale, &confidence);

    let (x, y) = BANNER_ORIGIN;
    let box_w = condition_w.max(confidence_w) + 2 * padding;
    let box_h = condition_h + confidence_h + spacing + 2 * padding;
    draw_filled_rect_mut(image, Rect::at(x, y).of_size(box_w, box_h), BANNER_COLOR);

    let Some(font) = &self.font else {
      return;
    };
    let text_x = x + padding as i32;
    let text_y = y + padding as i32;
    draw_text_mut(image, TEXT_COLOR, text_x, text_y, scale, font, &condition);
    draw_text_mut(
      image,
      TEXT_COLOR,
      text_x,
      text_y + (condition_h + spacing) as i32,
      scale,
      font,
      &confidence,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn boxed(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
    Detection {
      label: "stop".to_string(),
      confidence: 0.8,
      bbox: Some(BoundingBox { x1, y1, x2, y2 }),
    }
  }

  #[test]
  fn box_outline_is_two_pixels_thick() {
    let mut image = RgbImage::new(50, 50);
    Draw::without_font().render(&mut image, &[boxed(10, 10, 30, 30)], Style::Boxes([0, 0, 255]));

    assert_eq!(image.get_pixel(10, 20).0, [0, 0, 255]);
    assert_eq!(image.get_pixel(11, 20).0, [0, 0, 255]);
    assert_eq!(image.get_pixel(12, 20).0, [0, 0, 0]);
    assert_eq!(image.get_pixel(20, 20).0, [0, 0, 0]);
  }

  #[test]
  fn box_touching_the_border_is_clipped() {
    let mut image = RgbImage::new(20, 20);
    Draw::without_font().render(&mut image, &[boxed(0, 0, 20, 20)], Style::Boxes([255, 0, 0]));
    assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(image.get_pixel(19, 19).0, [255, 0, 0]);
  }

  #[test]
  fn banner_is_drawn_without_a_font() {
    let mut image = RgbImage::from_pixel(400, 200, Rgb([9, 9, 9]));
    let detection = Detection {
      label: "healthy".to_string(),
      confidence: 0.91,
      bbox: None,
    };
    Draw::without_font().render(&mut image, &[detection], Style::Banner);

    assert_eq!(image.get_pixel(35, 35).0, [0, 0, 0]);
    assert_eq!(image.get_pixel(29, 29).0, [9, 9, 9]);
    assert_eq!(image.get_pixel(399, 199).0, [9, 9, 9]);
  }

  #[test]
  fn banner_style_ignores_boxes() {
    let mut image = RgbImage::from_pixel(400, 200, Rgb([9, 9, 9]));
    Draw::without_font().render(&mut image, &[boxed(1, 1, 20, 20)], Style::Banner);
    // 横幅盖不到的框线位置保持原样
    assert_eq!(image.get_pixel(1, 10).0, [9, 9, 9]);
    assert_eq!(image.get_pixel(35, 35).0, [0, 0, 0]);
  }
}
