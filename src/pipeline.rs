// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 可提示分割推理流水线
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

//! 四个计算图（视觉编码器、文本编码器、几何编码器、掩码解码器）的阶段编排。
//!
//! 调用顺序：加载 → 图像编码 → 文本编码 / 框提示编码 → 解码 → 阈值筛选。
//! 解码结果会被缓存，之后可以用 `skip_decode` 以新的阈值重新筛选而无需再次运行解码器。
//! 所有阶段都需要 `&mut Pipeline`，因此释放模型不可能与正在执行的阶段重叠。

use std::path::PathBuf;

use thiserror::Error;

use crate::{
  config::ConfigError,
  frame::ImageSize,
  graph::{Backend, GraphError},
  shape::{PYRAMID_LEVELS, Shape, ShapeError},
  state::{BusyError, Phase, PipelineState},
  tensor::{Tensor, TensorError},
};

mod decode;
mod load;
mod postprocess;
mod prompt;
mod vision;

pub use self::load::ModelShapes;
pub use self::postprocess::{
  Detection, flatten_boxes, rank_candidates, resize_bilinear, scale_box, score_candidates, sigmoid,
};
pub use self::prompt::{BoxPrompt, END_TOKEN, START_TOKEN, empty_text_tokens, pack_text_tokens};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型尚未加载")]
  NotLoaded,
  #[error("模型文件不存在: {0}")]
  MissingFile(PathBuf),
  #[error("输入图像尺寸不符: 期望 {expected}, 实际 {actual}")]
  InputSize {
    expected: ImageSize,
    actual: ImageSize,
  },
  #[error("输入图像通道数不符: 期望 3, 实际 {0}")]
  InputChannels(usize),
  #[error("缺少前置阶段的结果: {0}")]
  MissingCache(&'static str),
  #[error("图 {graph} 输出数量不足: 期望 {expected}, 实际 {actual}")]
  OutputCount {
    graph: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("解码器输出无效: {0}")]
  DecoderOutput(String),
  #[error("操作已取消")]
  Cancelled,
  #[error("流水线正忙: {0:?}")]
  Busy(Phase),
  #[error(transparent)]
  Graph(#[from] GraphError),
  #[error(transparent)]
  Shape(#[from] ShapeError),
  #[error(transparent)]
  Tensor(#[from] TensorError),
  #[error(transparent)]
  Config(#[from] ConfigError),
}

impl From<BusyError> for PipelineError {
  fn from(err: BusyError) -> Self {
    PipelineError::Busy(err.0)
  }
}

/// 视觉编码器输出的四层特征，0 为最粗的合成层，3 为模型原生的最精细层
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePyramid {
  pub levels: [Tensor; PYRAMID_LEVELS],
}

/// 提示嵌入及其有效位掩码，二者共享第 1 维（提示数量）
#[derive(Debug, Clone, PartialEq)]
pub struct PromptEmbedding {
  embedding: Tensor,
  validity: Tensor,
}

impl PromptEmbedding {
  pub fn new(embedding: Tensor, validity: Tensor) -> Result<Self, PipelineError> {
    embedding.as_f32()?;
    validity.as_bool()?;
    let (e, v) = (embedding.shape(), validity.shape());
    if e.rank() != 3 || v.rank() != 2 || e.dims()[..2] != v.dims()[..2] {
      return Err(PipelineError::Shape(ShapeError::Mismatch {
        expected: Shape::new(e.dims()[..e.rank().min(2)].to_vec()),
        actual: v.clone(),
      }));
    }
    Ok(Self {
      embedding,
      validity,
    })
  }

  pub fn embedding(&self) -> &Tensor {
    &self.embedding
  }

  pub fn validity(&self) -> &Tensor {
    &self.validity
  }

  /// 提示数量
  pub fn prompt_count(&self) -> i64 {
    self.embedding.shape().dims()[1]
  }

  /// 沿提示数量维拼接，`other` 排在后面
  pub fn concat(&self, other: &PromptEmbedding) -> Result<PromptEmbedding, PipelineError> {
    PromptEmbedding::new(
      self.embedding.concat(&other.embedding, 1)?,
      self.validity.concat(&other.validity, 1)?,
    )
  }

  pub fn into_tensors(self) -> (Tensor, Tensor) {
    (self.embedding, self.validity)
  }
}

/// 解码器的四个原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderOutput {
  masks: Tensor,
  boxes: Tensor,
  logits: Tensor,
  presence: Tensor,
}

#[derive(Default)]
struct StageCache {
  pyramid: Option<FeaturePyramid>,
  text: Option<PromptEmbedding>,
  boxes: Option<PromptEmbedding>,
  decoded: Option<DecoderOutput>,
}

/// 加载后的四个计算图与分词器
pub struct LoadedModel<B: Backend> {
  vision: B::Graph,
  text: B::Graph,
  geometry: B::Graph,
  decoder: B::Graph,
  tokenizer: B::Tokenizer,
  shapes: ModelShapes,
}

/// 分割流水线，独占持有模型与全部中间结果
pub struct Pipeline<B: Backend> {
  backend: B,
  model: Option<LoadedModel<B>>,
  cache: StageCache,
  state: PipelineState,
}

impl<B: Backend> Pipeline<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      model: None,
      cache: StageCache::default(),
      state: PipelineState::new(),
    }
  }

  /// 共享的状态句柄，可在其他线程观察流水线是否忙碌
  pub fn state_probe(&self) -> PipelineState {
    self.state.clone()
  }

  pub fn feature_pyramid(&self) -> Option<&FeaturePyramid> {
    self.cache.pyramid.as_ref()
  }

  pub fn text_embedding(&self) -> Option<&PromptEmbedding> {
    self.cache.text.as_ref()
  }

  pub fn box_embedding(&self) -> Option<&PromptEmbedding> {
    self.cache.boxes.as_ref()
  }

  pub fn decoder_output(&self) -> Option<&DecoderOutput> {
    self.cache.decoded.as_ref()
  }

  fn loaded(&mut self) -> Result<&mut LoadedModel<B>, PipelineError> {
    self.model.as_mut().ok_or(PipelineError::NotLoaded)
  }
}

impl Default for Pipeline<crate::graph::OnnxBackend> {
  fn default() -> Self {
    Self::new(crate::graph::OnnxBackend::new())
  }
}

/// 图输出按推导形状重新解释，元素数量必须一致
fn take_outputs<const N: usize>(
  graph: &'static str,
  outputs: Vec<Tensor>,
  shapes: &[Shape; N],
) -> Result<[Tensor; N], PipelineError> {
  if outputs.len() < N {
    return Err(PipelineError::OutputCount {
      graph,
      expected: N,
      actual: outputs.len(),
    });
  }
  let shaped = outputs
    .into_iter()
    .zip(shapes)
    .map(|(tensor, shape)| Ok(tensor.reshape(shape.clone())?))
    .collect::<Result<Vec<_>, PipelineError>>()?;
  shaped
    .try_into()
    .map_err(|shaped: Vec<Tensor>| PipelineError::OutputCount {
      graph,
      expected: N,
      actual: shaped.len(),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn embedding(count: i64, value: f32, valid: bool) -> PromptEmbedding {
    let n = count as usize;
    PromptEmbedding::new(
      Tensor::f32([1, count, 2], vec![value; n * 2]).unwrap(),
      Tensor::bool([1, count], vec![valid; n]).unwrap(),
    )
    .unwrap()
  }

  #[test]
  fn concatenation_keeps_text_first() {
    let text = embedding(3, 1.0, true);
    let boxes = embedding(2, 2.0, false);
    let joined = text.concat(&boxes).unwrap();
    assert_eq!(joined.prompt_count(), 5);
    assert_eq!(
      joined.embedding().as_f32().unwrap(),
      &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]
    );
    assert_eq!(
      joined.validity().as_bool().unwrap(),
      &[true, true, true, false, false]
    );
  }

  #[test]
  fn embedding_and_validity_must_share_prompt_count() {
    let result = PromptEmbedding::new(
      Tensor::f32([1, 3, 2], vec![0.0; 6]).unwrap(),
      Tensor::bool([1, 2], vec![true; 2]).unwrap(),
    );
    assert!(matches!(result, Err(PipelineError::Shape(_))));
  }

  #[test]
  fn outputs_are_reshaped_to_derived_shapes() {
    let outputs = vec![Tensor::f32([4], vec![0.0; 4]).unwrap()];
    let shaped = take_outputs("测试", outputs, &[Shape::from([1, 1, 2, 2])]).unwrap();
    assert_eq!(shaped[0].shape(), &Shape::from([1, 1, 2, 2]));

    let outputs = vec![Tensor::f32([3], vec![0.0; 3]).unwrap()];
    assert!(take_outputs("测试", outputs, &[Shape::from([1, 1, 2, 2])]).is_err());
    assert!(matches!(
      take_outputs("测试", Vec::new(), &[Shape::from([1])]),
      Err(PipelineError::OutputCount { .. })
    ));
  }
}
