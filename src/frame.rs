// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 图像帧访问与预处理
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

use std::fmt;

use image::{DynamicImage, GenericImageView, Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

impl ImageSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl fmt::Display for ImageSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  Length { expected: usize, actual: usize },
}

/// 只读像素访问，按 (行, 列, 通道) 取值
pub trait ImageView {
  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn channels(&self) -> usize;
  fn channel_order(&self) -> ChannelOrder;
  fn pixel(&self, row: u32, col: u32, channel: usize) -> u8;

  fn size(&self) -> ImageSize {
    ImageSize::new(self.width(), self.height())
  }
}

impl ImageView for RgbImage {
  fn width(&self) -> u32 {
    self.dimensions().0
  }

  fn height(&self) -> u32 {
    self.dimensions().1
  }

  fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  fn channel_order(&self) -> ChannelOrder {
    ChannelOrder::Rgb
  }

  fn pixel(&self, row: u32, col: u32, channel: usize) -> u8 {
    self.get_pixel(col, row)[channel]
  }
}

impl ImageView for DynamicImage {
  fn width(&self) -> u32 {
    GenericImageView::dimensions(self).0
  }

  fn height(&self) -> u32 {
    GenericImageView::dimensions(self).1
  }

  fn channels(&self) -> usize {
    self.color().channel_count() as usize
  }

  fn channel_order(&self) -> ChannelOrder {
    ChannelOrder::Rgb
  }

  fn pixel(&self, row: u32, col: u32, channel: usize) -> u8 {
    GenericImageView::get_pixel(self, col, row).0[channel]
  }
}

/// 交错存储的 BGR 字节帧，常见于相机与视频解码输出
#[derive(Debug, Clone)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::Length {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
      Rgb([self.data[idx + 2], self.data[idx + 1], self.data[idx]])
    })
  }
}

impl From<&RgbImage> for BgrFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let data = image
      .pixels()
      .flat_map(|p| [p[2], p[1], p[0]])
      .collect::<Vec<u8>>()
      .into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }
}

impl ImageView for BgrFrame {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  fn channel_order(&self) -> ChannelOrder {
    ChannelOrder::Bgr
  }

  fn pixel(&self, row: u32, col: u32, channel: usize) -> u8 {
    let idx = (row as usize * self.width as usize + col as usize) * RGB_CHANNELS + channel;
    self.data[idx]
  }
}

/// 缩放到模型期望的输入尺寸（双线性）
pub fn resize_to(image: &RgbImage, size: ImageSize) -> RgbImage {
  if image.dimensions() == (size.width, size.height) {
    return image.clone();
  }
  image::imageops::resize(image, size.width, size.height, FilterType::Triangle)
}

/// 字节值映射到 [-1, 1]
pub fn normalize_channel(value: u8) -> f32 {
  value as f32 / 127.5 - 1.0
}

/// 三通道图像转为平面 RGB 浮点数据（通道优先）
pub fn to_planar_rgb<I: ImageView + ?Sized>(image: &I) -> Vec<f32> {
  let (width, height) = (image.width() as usize, image.height() as usize);
  let plane = width * height;
  let source_channels = match image.channel_order() {
    ChannelOrder::Rgb => [0, 1, 2],
    ChannelOrder::Bgr => [2, 1, 0],
  };

  let mut out = vec![0.0f32; plane * RGB_CHANNELS];
  for row in 0..height {
    for col in 0..width {
      let pos = row * width + col;
      for (c, &source) in source_channels.iter().enumerate() {
        out[pos + plane * c] = normalize_channel(image.pixel(row as u32, col as u32, source));
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalization_maps_bytes_to_unit_range() {
    assert_eq!(normalize_channel(0), -1.0);
    assert_eq!(normalize_channel(255), 1.0);
    assert!(normalize_channel(127).abs() < 0.01);
  }

  #[test]
  fn planar_layout_is_rgb_for_both_orders() {
    let mut rgb = RgbImage::new(2, 1);
    rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
    rgb.put_pixel(1, 0, Rgb([0, 0, 255]));
    let bgr = BgrFrame::from(&rgb);

    let expected = vec![1.0, -1.0, -1.0, -1.0, -1.0, 1.0];
    assert_eq!(to_planar_rgb(&rgb), expected);
    assert_eq!(to_planar_rgb(&bgr), expected);
  }

  #[test]
  fn bgr_frame_swaps_channels_back() {
    let frame = BgrFrame::new(1, 1, vec![10, 20, 30]).unwrap();
    assert_eq!(frame.to_rgb_image().get_pixel(0, 0), &Rgb([30, 20, 10]));
    assert!(BgrFrame::new(2, 2, vec![0; 3]).is_err());
  }

  #[test]
  fn dynamic_image_reports_channel_count() {
    let rgba = DynamicImage::new_rgba8(4, 4);
    assert_eq!(ImageView::channels(&rgba), 4);
    let rgb = DynamicImage::new_rgb8(4, 4);
    assert_eq!(ImageView::channels(&rgb), 3);
  }

  #[test]
  fn resize_hits_target_size() {
    let image = RgbImage::new(10, 6);
    let resized = resize_to(&image, ImageSize::new(4, 4));
    assert_eq!(resized.dimensions(), (4, 4));
  }
}
