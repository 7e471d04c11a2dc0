// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/decode.rs - 解码阶段
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
  graph::{Backend, GraphSession},
  pipeline::{DecoderOutput, Detection, Pipeline, PipelineError},
  state::Phase,
  tensor::Tensor,
};

const DECODER_OUTPUTS: usize = 4;

impl DecoderOutput {
  /// 按 (掩码, 框, 置信度, 存在性) 的顺序接收解码器输出并校验彼此一致
  pub fn from_outputs(outputs: Vec<Tensor>) -> Result<Self, PipelineError> {
    let actual = outputs.len();
    let [masks, boxes, logits, presence]: [Tensor; DECODER_OUTPUTS] = outputs
      .into_iter()
      .take(DECODER_OUTPUTS)
      .collect::<Vec<_>>()
      .try_into()
      .map_err(|_| PipelineError::OutputCount {
        graph: "解码器",
        expected: DECODER_OUTPUTS,
        actual,
      })?;

    let candidates = logits.as_f32()?.len();
    if presence.as_f32()?.is_empty() {
      return Err(PipelineError::DecoderOutput("存在性输出为空".to_string()));
    }
    if boxes.as_f32()?.len() != candidates * 4 {
      return Err(PipelineError::DecoderOutput(format!(
        "{} 个候选对应 {} 个框坐标",
        candidates,
        boxes.len()
      )));
    }
    let Some((h, w)) = masks.shape().spatial() else {
      return Err(PipelineError::DecoderOutput(format!(
        "掩码形状应为 4 维: {}",
        masks.shape()
      )));
    };
    if masks.as_f32()?.len() != candidates * (h * w) as usize {
      return Err(PipelineError::DecoderOutput(format!(
        "掩码形状 {} 与 {} 个候选不符",
        masks.shape(),
        candidates
      )));
    }

    Ok(Self {
      masks,
      boxes,
      logits,
      presence,
    })
  }
}

impl<B: Backend> Pipeline<B> {
  /// 运行解码器并按阈值提取结果
  ///
  /// `skip_decode` 为真时不运行解码器，直接用缓存的解码结果重新筛选，
  /// 见 [`Pipeline::change_threshold`]。
  pub fn decode(
    &mut self,
    threshold: f32,
    target: ImageSize,
    skip_decode: bool,
    cancel: &CancelToken,
  ) -> Result<Vec<Detection>, PipelineError> {
    if skip_decode {
      return self.change_threshold(threshold, target, cancel);
    }

    let _guard = self.state.enter(Phase::Processing)?.consuming(cancel);
    let decoded = self
      .run_decoder(cancel)
      .inspect_err(|e| error!("解码失败: {}", e))?;
    info!("解码完成: {} 个候选", decoded.candidate_count());
    self.cache.decoded = Some(decoded);
    self
      .evaluate(threshold, target)
      .inspect_err(|e| error!("结果提取失败: {}", e))
  }

  /// 使用缓存的解码结果以新阈值重新筛选，不运行任何图
  ///
  /// 与其他阶段一样，结束时清除挂起的取消请求。
  pub fn change_threshold(
    &mut self,
    threshold: f32,
    target: ImageSize,
    cancel: &CancelToken,
  ) -> Result<Vec<Detection>, PipelineError> {
    let _guard = self.state.enter(Phase::Processing)?.consuming(cancel);
    self
      .evaluate(threshold, target)
      .inspect_err(|e| error!("结果提取失败: {}", e))
  }

  pub fn is_decoder_empty(&self) -> bool {
    self.cache.decoded.is_none()
  }

  fn evaluate(&self, threshold: f32, target: ImageSize) -> Result<Vec<Detection>, PipelineError> {
    let decoded = self
      .cache
      .decoded
      .as_ref()
      .ok_or(PipelineError::MissingCache("解码结果"))?;
    let detections = decoded.detections(threshold, target)?;
    debug!("阈值 {} 下保留 {} 个结果", threshold, detections.len());
    Ok(detections)
  }

  fn run_decoder(&mut self, cancel: &CancelToken) -> Result<DecoderOutput, PipelineError> {
    let model = self.model.as_mut().ok_or(PipelineError::NotLoaded)?;
    let pyramid = self
      .cache
      .pyramid
      .as_ref()
      .ok_or(PipelineError::MissingCache("特征金字塔"))?;
    let text = self
      .cache
      .text
      .as_ref()
      .ok_or(PipelineError::MissingCache("文本嵌入"))?;

    // 文本提示在前，框提示（若有）在后
    let prompt = match &self.cache.boxes {
      Some(boxes) => text.concat(boxes)?,
      None => text.clone(),
    };
    debug!("解码器提示数量: {}", prompt.prompt_count());
    let (embedding, validity) = prompt.into_tensors();

    let mut inputs = pyramid.levels.to_vec();
    inputs.push(embedding);
    inputs.push(validity);

    if cancel.consume() {
      return Err(PipelineError::Cancelled);
    }
    let outputs = model.decoder.run(inputs, cancel)?;
    DecoderOutput::from_outputs(outputs)
  }
}
