// 该文件是 Lujian （路检） 项目的一部分。
// src/main.rs - HTTP 服务主程序
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lujian::config::{ProcessEnv, ServerArgs};
use lujian::server;

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = ServerArgs::parse();

  info!("Lujian 道路设施检测服务");
  info!("结果目录: {}", args.paths.output_dir.display());
  info!("模型缓存目录: {}", args.paths.model_cache_dir.display());
  info!("预置模型目录: {}", args.paths.baked_model_dir.display());

  // 下载客户端自带运行时，须在 tokio 运行时之外创建与释放
  let (state, app) = server::prepare(&args, &ProcessEnv)?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("无法创建异步运行时")?;
  let address = format!("{}:{}", args.host, args.port);
  runtime.block_on(async {
    let listener = tokio::net::TcpListener::bind(&address)
      .await
      .with_context(|| format!("无法监听 {address}"))?;
    info!("服务已启动: http://{}", address);
    server::serve(listener, app).await?;
    anyhow::Ok(())
  })?;

  drop(runtime);
  drop(state);
  Ok(())
}
