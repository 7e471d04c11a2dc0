// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/vision.rs - 图像编码阶段
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
  frame::{ImageView, RGB_CHANNELS, to_planar_rgb},
  graph::{Backend, GraphSession},
  pipeline::{FeaturePyramid, Pipeline, PipelineError, take_outputs},
  state::Phase,
  tensor::Tensor,
};

impl<B: Backend> Pipeline<B> {
  /// 运行视觉编码器，成功后替换特征金字塔缓存
  ///
  /// 图像尺寸必须等于 [`Pipeline::expected_input_size`]，且必须是三通道图像。
  pub fn encode_image<I: ImageView + ?Sized>(
    &mut self,
    image: &I,
    cancel: &CancelToken,
  ) -> Result<(), PipelineError> {
    let _guard = self.state.enter(Phase::Processing)?.consuming(cancel);
    let pyramid = self
      .run_vision(image, cancel)
      .inspect_err(|e| error!("图像编码失败: {}", e))?;
    self.cache.pyramid = Some(pyramid);
    info!("图像编码完成");
    Ok(())
  }

  fn run_vision<I: ImageView + ?Sized>(
    &mut self,
    image: &I,
    cancel: &CancelToken,
  ) -> Result<FeaturePyramid, PipelineError> {
    let model = self.loaded()?;

    let expected = model.shapes.input_size();
    if image.size() != expected {
      return Err(PipelineError::InputSize {
        expected,
        actual: image.size(),
      });
    }
    if image.channels() != RGB_CHANNELS {
      return Err(PipelineError::InputChannels(image.channels()));
    }

    let input = Tensor::f32(model.shapes.vision_input.clone(), to_planar_rgb(image))?;
    debug!("视觉输入张量: {}", input.shape());

    if cancel.consume() {
      return Err(PipelineError::Cancelled);
    }
    let outputs = model.vision.run(vec![input], cancel)?;
    let levels = take_outputs("视觉编码器", outputs, &model.shapes.pyramid)?;
    Ok(FeaturePyramid { levels })
  }
}
