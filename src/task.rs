// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 分割任务
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

use std::time::Instant;

use anyhow::Context;
use image::RgbImage;
use tracing::{info, warn};

use crate::{
  cancel::CancelToken,
  frame::{ImageView, resize_to},
  graph::Backend,
  input::SegmentRequest,
  output::{Render, SegmentResult},
  pipeline::{Pipeline, PipelineError},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 记录一个阶段的耗时
fn timed<T>(stage: &str, f: impl FnOnce() -> T) -> T {
  let now = Instant::now();
  let result = f();
  info!("{}完成，耗时: {:.2?}", stage, now.elapsed());
  result
}

/// Ctrl-C 时取消正在执行的阶段
pub fn cancel_on_interrupt(cancel: &CancelToken) -> anyhow::Result<()> {
  let cancel = cancel.clone();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，取消当前阶段");
    cancel.cancel();
  })
  .context("无法设置 Ctrl-C 处理函数")
}

/// 依次运行图像、文本与框提示编码
fn encode_request<B: Backend>(
  pipeline: &mut Pipeline<B>,
  request: &SegmentRequest,
  cancel: &CancelToken,
) -> anyhow::Result<()> {
  let input_size = pipeline
    .expected_input_size()
    .ok_or(PipelineError::NotLoaded)?;
  let resized = resize_to(&request.image, input_size);
  info!(
    "输入图像 {} 缩放到模型尺寸 {}",
    request.image.size(),
    input_size
  );

  timed("图像编码", || pipeline.encode_image(&resized, cancel)).context("图像编码失败")?;
  timed("文本编码", || pipeline.encode_text(&request.text, cancel)).context("文本编码失败")?;
  timed("框提示编码", || pipeline.encode_boxes(&request.boxes, cancel))
    .context("框提示编码失败")?;
  Ok(())
}

/// 单次分割：编码、解码并输出一个阈值下的结果
pub struct OneShotTask {
  threshold: f32,
  cancel: CancelToken,
}

impl OneShotTask {
  pub fn new(threshold: f32, cancel: CancelToken) -> Self {
    Self { threshold, cancel }
  }
}

impl<'a, B, O, RE> Task<SegmentRequest, &'a mut Pipeline<B>, O> for OneShotTask
where
  B: Backend,
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<RgbImage, SegmentResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    request: SegmentRequest,
    pipeline: &'a mut Pipeline<B>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let now = Instant::now();
    encode_request(pipeline, &request, &self.cancel)?;

    let detections = timed("解码", || {
      pipeline.decode(self.threshold, request.source_size(), false, &self.cancel)
    })
    .context("解码失败")?;
    info!(
      "阈值 {} 下得到 {} 个结果，总耗时: {:.2?}",
      self.threshold,
      detections.len(),
      now.elapsed()
    );

    let result = SegmentResult::new(request.text.clone(), self.threshold, detections);
    timed("渲染", || output.render_result(&request.image, &result))?;
    Ok(())
  }
}

/// 阈值扫描的输出子目录，序号保证相近的阈值不会共用目录
pub fn sweep_dir_name(index: usize, threshold: f32) -> String {
  format!("{:02}-threshold-{}", index, threshold)
}

/// 解码一次后以多个阈值重新筛选，每个阈值单独输出
pub struct ThresholdSweepTask {
  thresholds: Vec<f32>,
  cancel: CancelToken,
}

impl ThresholdSweepTask {
  pub fn new(thresholds: Vec<f32>, cancel: CancelToken) -> Self {
    Self { thresholds, cancel }
  }
}

impl<'a, B, O, RE> Task<SegmentRequest, &'a mut Pipeline<B>, O> for ThresholdSweepTask
where
  B: Backend,
  RE: std::error::Error + Sync + Send + 'static,
  O: Render<RgbImage, SegmentResult, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    request: SegmentRequest,
    pipeline: &'a mut Pipeline<B>,
    output: O,
  ) -> Result<(), Self::Error> {
    let Some((&first, rest)) = self.thresholds.split_first() else {
      anyhow::bail!("没有指定阈值");
    };

    info!("开始阈值扫描任务: {:?}", self.thresholds);
    encode_request(pipeline, &request, &self.cancel)?;

    let target = request.source_size();
    let mut runs = vec![(
      first,
      timed("解码", || pipeline.decode(first, target, false, &self.cancel)).context("解码失败")?,
    )];
    for &threshold in rest {
      let detections = timed("阈值筛选", || {
        pipeline.decode(threshold, target, true, &self.cancel)
      })
      .context("阈值筛选失败")?;
      runs.push((threshold, detections));
    }

    for (index, (threshold, detections)) in runs.into_iter().enumerate() {
      info!("阈值 {}: {} 个结果", threshold, detections.len());
      let result = SegmentResult::new(request.text.clone(), threshold, detections)
        .with_name(sweep_dir_name(index, threshold));
      output.render_result(&request.image, &result)?;
    }
    Ok(())
  }
}
