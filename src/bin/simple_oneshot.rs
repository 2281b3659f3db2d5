// 该文件是 Lujian （路检） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lujian::config::{PathArgs, ProcessEnv};
use lujian::detector::{ModelFamily, RoadDetector};

/// 对单张图像运行一类模型，以 JSON 输出结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型类别: light, sign, illumination, sign_damage, signal_damage, pavement
  #[arg(long, value_name = "FAMILY")]
  pub family: ModelFamily,
  /// 输入图像
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 覆盖置信度阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub conf: Option<f32>,
  /// 覆盖 NMS IoU 阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub iou: Option<f32>,
  #[command(flatten)]
  pub paths: PathArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("模型类别: {}", args.family);
  info!("输入图像: {}", args.input.display());
  info!("结果目录: {}", args.paths.output_dir.display());

  let detector = RoadDetector::from_config(&args.paths, &ProcessEnv)?;
  let thresholds = detector
    .thresholds(args.family)
    .with_overrides(args.conf, args.iou)?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let (detections, file_name) = detector.detect_with(args.family, &args.input, thresholds)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  let report = serde_json::json!({
    "detections": detections,
    "output": args.paths.output_dir.join(&file_name),
  });
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
