// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/prompt.rs - 文本与框提示编码阶段
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

use tracing::{debug, error, info};

use crate::{
  cancel::CancelToken,
  frame::ImageSize,
  graph::{Backend, GraphSession, TextTokenizer},
  pipeline::{Pipeline, PipelineError, PromptEmbedding, take_outputs},
  state::Phase,
  tensor::Tensor,
};

pub const START_TOKEN: i64 = 49406;
pub const END_TOKEN: i64 = 49407;

/// 在分词结果前后加上起止标记并填充到固定长度
///
/// 返回 `(ids, validity)`：有效位置为 1，填充位置为结束标记且有效位为 0。
/// 超出长度的部分被截断。
pub fn pack_text_tokens(ids: &[i64], len: usize) -> (Vec<i64>, Vec<i64>) {
  let framed = std::iter::once(START_TOKEN)
    .chain(ids.iter().copied())
    .chain(std::iter::once(END_TOKEN));

  let mut tokens = vec![END_TOKEN; len];
  let mut validity = vec![0; len];
  for (i, id) in framed.take(len).enumerate() {
    tokens[i] = id;
    validity[i] = 1;
  }
  (tokens, validity)
}

/// 空文本：全部为结束标记，仅第 0 位有效
pub fn empty_text_tokens(len: usize) -> (Vec<i64>, Vec<i64>) {
  let mut validity = vec![0; len];
  if let Some(first) = validity.first_mut() {
    *first = 1;
  }
  (vec![END_TOKEN; len], validity)
}

/// 一个框提示，矩形为相对图像尺寸归一化的 `[x, y, w, h]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxPrompt {
  pub rect: [f32; 4],
  pub label: i64,
}

impl BoxPrompt {
  pub fn new(x: f32, y: f32, w: f32, h: f32, label: i64) -> Self {
    Self {
      rect: [x, y, w, h],
      label,
    }
  }

  /// 像素坐标按源图像尺寸归一化
  pub fn from_pixels(rect: [f32; 4], label: i64, source: ImageSize) -> Self {
    let (w, h) = (source.width.max(1) as f32, source.height.max(1) as f32);
    Self::new(rect[0] / w, rect[1] / h, rect[2] / w, rect[3] / h, label)
  }
}

impl<B: Backend> Pipeline<B> {
  /// 运行文本编码器；空文本也会编码为一个最小的占位提示
  pub fn encode_text(&mut self, text: &str, cancel: &CancelToken) -> Result<(), PipelineError> {
    let _guard = self.state.enter(Phase::Processing)?.consuming(cancel);
    let embedding = self
      .run_text(text, cancel)
      .inspect_err(|e| error!("文本编码失败: {}", e))?;
    info!("文本编码完成: {:?}", text);
    self.cache.text = Some(embedding);
    Ok(())
  }

  fn run_text(&mut self, text: &str, cancel: &CancelToken) -> Result<PromptEmbedding, PipelineError> {
    let model = self.loaded()?;
    let len = model.shapes.sequence_length();
    let (ids, validity) = if text.is_empty() {
      empty_text_tokens(len)
    } else {
      pack_text_tokens(&model.tokenizer.encode(text)?, len)
    };
    debug!("文本输入 id: {:?}", ids);

    let inputs = vec![
      Tensor::i64(model.shapes.text_inputs[0].clone(), ids)?,
      Tensor::i64(model.shapes.text_inputs[1].clone(), validity)?,
    ];
    if cancel.consume() {
      return Err(PipelineError::Cancelled);
    }
    let outputs = model.text.run(inputs, cancel)?;
    let [embedding, validity] = take_outputs("文本编码器", outputs, &model.shapes.text_outputs)?;
    PromptEmbedding::new(embedding, validity)
  }

  /// 运行几何编码器；空输入仅清除框提示缓存
  pub fn encode_boxes(&mut self, prompts: &[BoxPrompt], cancel: &CancelToken) -> Result<(), PipelineError> {
    if prompts.is_empty() {
      debug!("没有框提示，清除框提示缓存");
      self.cache.boxes = None;
      return Ok(());
    }

    let _guard = self.state.enter(Phase::Processing)?.consuming(cancel);
    let embedding = self
      .run_geometry(prompts, cancel)
      .inspect_err(|e| error!("框提示编码失败: {}", e))?;
    info!("框提示编码完成: {} 个", prompts.len());
    self.cache.boxes = Some(embedding);
    Ok(())
  }

  fn run_geometry(
    &mut self,
    prompts: &[BoxPrompt],
    cancel: &CancelToken,
  ) -> Result<PromptEmbedding, PipelineError> {
    let model = self.model.as_mut().ok_or(PipelineError::NotLoaded)?;
    let pyramid = self
      .cache
      .pyramid
      .as_ref()
      .ok_or(PipelineError::MissingCache("特征金字塔"))?;

    let count = prompts.len() as i64;
    let rects = prompts.iter().flat_map(|p| p.rect).collect::<Vec<f32>>();
    let labels = prompts.iter().map(|p| p.label).collect::<Vec<i64>>();
    let inputs = vec![
      Tensor::f32([1, count, 4], rects)?,
      Tensor::i64([1, count], labels)?,
      pyramid.levels[2].clone(),
      pyramid.levels[3].clone(),
    ];

    // 输出比输入多一个提示位
    let [embedding_shape, validity_shape] = &model.shapes.text_outputs;
    let shapes = [
      embedding_shape.with_dim(1, count + 1)?,
      validity_shape.with_dim(1, count + 1)?,
    ];

    if cancel.consume() {
      return Err(PipelineError::Cancelled);
    }
    let outputs = model.geometry.run(inputs, cancel)?;
    let [embedding, validity] = take_outputs("几何编码器", outputs, &shapes)?;
    PromptEmbedding::new(embedding, validity)
  }
}
