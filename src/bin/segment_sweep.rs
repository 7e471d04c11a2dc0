// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/segment_sweep.rs - 阈值扫描
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_seg::{
  CancelToken, FromUrl,
  args::{ModelArgs, PromptArgs},
  output::SaveMasksOutput,
  task::{Task, ThresholdSweepTask, cancel_on_interrupt},
};
use tracing::info;

/// 解码一次，按多个阈值分别输出分割结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub model: ModelArgs,
  #[command(flatten)]
  pub prompt: PromptArgs,
  /// 逗号分隔的阈值列表
  #[arg(
    long,
    value_delimiter = ',',
    default_value = "0.3,0.5,0.7",
    value_name = "THRESHOLDS"
  )]
  pub sweep: Vec<f32>,
  /// 输出目录，每个阈值一个子目录
  #[arg(long, default_value = "folder:.", value_name = "OUTPUT")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model.model);
  info!("输入图像: {}", args.prompt.image);
  info!("阈值: {:?}", args.sweep);
  info!("输出路径: {}", args.output);

  let cancel = CancelToken::new();
  cancel_on_interrupt(&cancel)?;

  let request = args.prompt.request()?;
  let output = SaveMasksOutput::from_url(&args.output)?;
  let mut pipeline = args.model.load(&cancel)?;

  ThresholdSweepTask::new(args.sweep, cancel).run_task(request, &mut pipeline, output)
}
