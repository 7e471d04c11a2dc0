// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 分割结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::pipeline::Detection;

const PALETTE_SIZE: usize = 16;
const MASK_ALPHA: f32 = 0.45;

/// 在原图上叠加半透明掩码与外接框
pub struct Overlay {
  colors: Vec<Rgb<u8>>,
  alpha: f32,
}

impl Default for Overlay {
  fn default() -> Self {
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self {
      colors,
      alpha: MASK_ALPHA,
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Overlay {
  pub fn with_alpha(mut self, alpha: f32) -> Self {
    self.alpha = alpha.clamp(0.0, 1.0);
    self
  }

  /// 第 `index` 个检测结果使用的颜色
  pub fn color(&self, index: usize) -> Rgb<u8> {
    self.colors[index % self.colors.len()]
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for (index, detection) in detections.iter().enumerate() {
      let color = self.color(index);
      self.tint_mask(image, detection, color);
      draw_bbox(image, detection.bbox, color);
    }
  }

  fn tint_mask(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    // 掩码与原图尺寸不同时只绘制重叠部分
    let width = image.width().min(detection.mask.width());
    let height = image.height().min(detection.mask.height());
    for y in 0..height {
      for x in 0..width {
        if detection.mask.get_pixel(x, y)[0] == 0 {
          continue;
        }
        let pixel = image.get_pixel_mut(x, y);
        for c in 0..3 {
          let blended = pixel[c] as f32 * (1.0 - self.alpha) + color[c] as f32 * self.alpha;
          pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
      }
    }
  }
}

fn draw_bbox(image: &mut RgbImage, bbox: [i32; 4], color: Rgb<u8>) {
  let [x, y, w, h] = bbox;
  if w <= 0 || h <= 0 {
    return;
  }
  let rect = Rect::at(x, y).of_size(w as u32, h as u32);
  draw_hollow_rect_mut(image, rect, color);

  // 第二个边框以增加可见度
  if w > 2 && h > 2 {
    let inner = Rect::at(x + 1, y + 1).of_size(w as u32 - 2, h as u32 - 2);
    draw_hollow_rect_mut(image, inner, color);
  }
}
