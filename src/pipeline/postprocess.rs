// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline/postprocess.rs - 置信度、阈值筛选与掩码提取
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

use image::{GrayImage, Luma};

use crate::{
  frame::ImageSize,
  pipeline::{DecoderOutput, PipelineError},
  tensor::Tensor,
};

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// 一个通过阈值的候选
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 解码器输出中的候选序号
  pub candidate: usize,
  pub score: f32,
  /// 原图像素坐标 `[x, y, w, h]`
  pub bbox: [i32; 4],
  /// 原图尺寸的二值掩码，前景为 255
  pub mask: GrayImage,
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

/// `score[i] = sigmoid(logit[i]) * sigmoid(presence)`
pub fn score_candidates(logits: &[f32], presence_logit: f32) -> Vec<f32> {
  let presence = sigmoid(presence_logit);
  logits.iter().map(|&l| sigmoid(l) * presence).collect()
}

/// 按分数降序排列，只保留严格大于阈值的候选
pub fn rank_candidates(scores: &[f32], threshold: f32) -> Vec<usize> {
  let mut order = (0..scores.len()).collect::<Vec<_>>();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
  order.retain(|&i| scores[i] > threshold);
  order
}

/// 归一化框坐标乘以目标尺寸后截断为整数
pub fn scale_box(rect: [f32; 4], target: ImageSize) -> [i32; 4] {
  let (w, h) = (target.width as f32, target.height as f32);
  [
    (rect[0] * w) as i32,
    (rect[1] * h) as i32,
    (rect[2] * w) as i32,
    (rect[3] * h) as i32,
  ]
}

/// 一个轴上的采样位置：(左索引, 右索引, 右侧权重)
fn axis_samples(src: usize, dst: usize) -> Vec<(usize, usize, f32)> {
  let scale = src as f32 / dst as f32;
  let last = src - 1;
  (0..dst)
    .map(|d| {
      // 像素中心对齐
      let pos = (d as f32 + 0.5) * scale - 0.5;
      let floor = pos.floor();
      let (i0, t) = if floor < 0.0 {
        (0, 0.0)
      } else if floor as usize >= last {
        (last, 0.0)
      } else {
        (floor as usize, pos - floor)
      };
      (i0, (i0 + 1).min(last), t)
    })
    .collect()
}

/// 双线性缩放单通道平面，行优先
pub fn resize_bilinear(plane: &[f32], src_width: usize, src_height: usize, target: ImageSize) -> Vec<f32> {
  let (dst_width, dst_height) = (target.width as usize, target.height as usize);
  if src_width == 0 || src_height == 0 || plane.len() < src_width * src_height {
    return vec![0.0; dst_width * dst_height];
  }

  let xs = axis_samples(src_width, dst_width);
  let ys = axis_samples(src_height, dst_height);
  let at = |row: usize, col: usize| plane[row * src_width + col];

  let mut out = Vec::with_capacity(dst_width * dst_height);
  for &(y0, y1, ty) in &ys {
    for &(x0, x1, tx) in &xs {
      let top = at(y0, x0) * (1.0 - tx) + at(y0, x1) * tx;
      let bottom = at(y1, x0) * (1.0 - tx) + at(y1, x1) * tx;
      out.push(top * (1.0 - ty) + bottom * ty);
    }
  }
  out
}

fn binarize(values: &[f32], target: ImageSize) -> GrayImage {
  let width = target.width as usize;
  GrayImage::from_fn(target.width, target.height, |x, y| {
    if values[y as usize * width + x as usize] > 0.0 {
      Luma([FOREGROUND])
    } else {
      Luma([BACKGROUND])
    }
  })
}

/// 按检测顺序展平的框坐标，每个检测 4 个整数
pub fn flatten_boxes(detections: &[Detection]) -> Vec<i32> {
  detections.iter().flat_map(|d| d.bbox).collect()
}

impl DecoderOutput {
  pub fn masks(&self) -> &Tensor {
    &self.masks
  }

  pub fn boxes(&self) -> &Tensor {
    &self.boxes
  }

  pub fn logits(&self) -> &Tensor {
    &self.logits
  }

  pub fn presence(&self) -> &Tensor {
    &self.presence
  }

  pub fn candidate_count(&self) -> usize {
    self.logits.len()
  }

  /// 掩码的原生分辨率 (h, w)
  pub fn mask_size(&self) -> (usize, usize) {
    self
      .masks
      .shape()
      .spatial()
      .map(|(h, w)| (h as usize, w as usize))
      .unwrap_or_default()
  }

  /// 每个候选的分数，顺序与解码器输出一致
  pub fn scores(&self) -> Result<Vec<f32>, PipelineError> {
    let presence = self
      .presence
      .as_f32()?
      .first()
      .copied()
      .ok_or_else(|| PipelineError::DecoderOutput("存在性输出为空".to_string()))?;
    Ok(score_candidates(self.logits.as_f32()?, presence))
  }

  /// 按阈值筛选并把框与掩码还原到目标尺寸
  pub fn detections(&self, threshold: f32, target: ImageSize) -> Result<Vec<Detection>, PipelineError> {
    let scores = self.scores()?;
    let boxes = self.boxes.as_f32()?;
    let masks = self.masks.as_f32()?;
    let (mask_height, mask_width) = self.mask_size();
    let plane = mask_height * mask_width;

    let detections = rank_candidates(&scores, threshold)
      .into_iter()
      .map(|k| {
        let rect = [boxes[k * 4], boxes[k * 4 + 1], boxes[k * 4 + 2], boxes[k * 4 + 3]];
        let logits = &masks[k * plane..(k + 1) * plane];
        let resized = resize_bilinear(logits, mask_width, mask_height, target);
        Detection {
          candidate: k,
          score: scores[k],
          bbox: scale_box(rect, target),
          mask: binarize(&resized, target),
        }
      })
      .collect();
    Ok(detections)
  }
}
