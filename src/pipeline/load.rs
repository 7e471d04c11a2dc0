// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/load.rs - 模型加载与形状推导
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

use tracing::{debug, error, info, warn};

use crate::{
  cancel::CancelToken,
  config::ModelBundle,
  frame::ImageSize,
  graph::{Backend, GraphSession},
  pipeline::{LoadedModel, Pipeline, PipelineError, StageCache},
  shape::{PYRAMID_LEVELS, PyramidRule, Shape, ShapeError},
  state::Phase,
};

/// 加载时从模型元数据推导出的形状，批次维度均固定为 1
#[derive(Debug, Clone, PartialEq)]
pub struct ModelShapes {
  pub vision_input: Shape,
  pub pyramid: [Shape; PYRAMID_LEVELS],
  /// 文本编码器输入：token id 与有效位
  pub text_inputs: [Shape; 2],
  /// 文本编码器输出：嵌入与有效位
  pub text_outputs: [Shape; 2],
}

impl ModelShapes {
  /// 从四个图的输入输出元数据推导
  pub fn derive<G: GraphSession>(
    vision: &G,
    text: &G,
    rule: &PyramidRule,
  ) -> Result<Self, PipelineError> {
    let vision_input = vision.input_shape(0)?.pin_batch()?.require_static()?;
    if vision_input.rank() != 4 {
      return Err(
        ShapeError::Rank {
          expected: 4,
          actual: vision_input.rank(),
        }
        .into(),
      );
    }

    let finest = vision
      .output_shape(PYRAMID_LEVELS - 1)?
      .pin_batch()?
      .require_static()?;
    let derived = rule.derive(&finest)?;
    let declared = (0..PYRAMID_LEVELS)
      .map(|level| Ok(vision.output_shape(level)?.pin_batch()?))
      .collect::<Result<Vec<_>, PipelineError>>()?;
    let pyramid = rule.reconcile(derived, &declared)?;

    let text_inputs = [
      text.input_shape(0)?.pin_batch()?.require_static()?,
      text.input_shape(1)?.pin_batch()?.require_static()?,
    ];
    let text_outputs = [
      text.output_shape(0)?.pin_batch()?.require_static()?,
      text.output_shape(1)?.pin_batch()?.require_static()?,
    ];

    Ok(Self {
      vision_input,
      pyramid,
      text_inputs,
      text_outputs,
    })
  }

  /// 输入图像必须预先缩放到的尺寸
  pub fn input_size(&self) -> ImageSize {
    let (h, w) = self.vision_input.spatial().unwrap_or_default();
    ImageSize::new(w as u32, h as u32)
  }

  /// 文本编码器期望的序列长度
  pub fn sequence_length(&self) -> usize {
    self.text_inputs[0].dims().last().copied().unwrap_or(0) as usize
  }
}

impl<B: Backend> Pipeline<B> {
  /// 加载五个资源文件，全部成功后才替换当前模型
  pub fn load_model(&mut self, bundle: &ModelBundle, cancel: &CancelToken) -> Result<(), PipelineError> {
    let _guard = self.state.enter(Phase::Loading)?.consuming(cancel);
    info!("开始加载模型");

    if let Some(missing) = bundle.first_missing() {
      return Err(PipelineError::MissingFile(missing.to_path_buf()));
    }

    let model = build_model(&self.backend, bundle, cancel)
      .inspect_err(|e| error!("模型加载失败: {}", e))?;
    info!(
      "模型加载完成，输入尺寸 {}，文本序列长度 {}",
      model.shapes.input_size(),
      model.shapes.sequence_length()
    );
    self.model = Some(model);
    self.cache = StageCache::default();
    Ok(())
  }

  /// 释放模型与全部缓存，加载或处理进行中时拒绝
  pub fn unload(&mut self) -> Result<(), PipelineError> {
    if !self.state.can_teardown() {
      let phase = self.state.phase();
      warn!("流水线正忙（{:?}），跳过释放", phase);
      return Err(PipelineError::Busy(phase));
    }
    if self.model.take().is_some() {
      info!("模型已释放");
    }
    self.cache = StageCache::default();
    Ok(())
  }

  /// 清除中间结果，保留已加载的模型
  pub fn clear(&mut self) {
    self.cache = StageCache::default();
  }

  pub fn is_loaded(&self) -> bool {
    self.model.is_some()
  }

  pub fn model_shapes(&self) -> Option<&ModelShapes> {
    self.model.as_ref().map(|m| &m.shapes)
  }

  pub fn expected_input_size(&self) -> Option<ImageSize> {
    self.model_shapes().map(ModelShapes::input_size)
  }
}

fn build_model<B: Backend>(
  backend: &B,
  bundle: &ModelBundle,
  cancel: &CancelToken,
) -> Result<LoadedModel<B>, PipelineError> {
  let checkpoint = || {
    if cancel.consume() {
      warn!("模型加载被取消");
      Err(PipelineError::Cancelled)
    } else {
      Ok(())
    }
  };

  checkpoint()?;
  let vision = backend.load_graph(&bundle.vision, &bundle.execution)?;
  checkpoint()?;
  let text = backend.load_graph(&bundle.text, &bundle.execution)?;
  checkpoint()?;
  let geometry = backend.load_graph(&bundle.geometry, &bundle.execution)?;
  checkpoint()?;
  let decoder = backend.load_graph(&bundle.decoder, &bundle.execution)?;
  checkpoint()?;
  let tokenizer = backend.load_tokenizer(&bundle.tokenizer)?;

  let shapes = ModelShapes::derive(&vision, &text, &bundle.pyramid)?;
  // 分词器加载与形状推导期间到达的请求
  checkpoint()?;
  debug!("视觉输入形状: {}", shapes.vision_input);
  for (level, shape) in shapes.pyramid.iter().enumerate() {
    debug!("金字塔第 {} 层形状: {}", level, shape);
  }
  debug!(
    "文本输入形状: {} / {}，输出形状: {} / {}",
    shapes.text_inputs[0], shapes.text_inputs[1], shapes.text_outputs[0], shapes.text_outputs[1]
  );

  Ok(LoadedModel {
    vision,
    text,
    geometry,
    decoder,
    tokenizer,
    shapes,
  })
}
