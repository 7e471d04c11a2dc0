// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_masks.rs - 保存掩码与检测记录
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::RgbImage;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, SegmentResult, draw::Overlay},
};

pub const OVERLAY_FILE: &str = "overlay.png";
pub const RECORD_FILE: &str = "detections.json";

#[derive(Error, Debug)]
pub enum SaveMasksError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("路径解码失败: {0}")]
  PathDecode(String),
}

/// 把每个检测结果的掩码保存为 `mask<i>.png`，可选叠加图与 JSON 记录
///
/// `folder:///<目录>?overlay=false&record=false`
pub struct SaveMasksOutput {
  directory: PathBuf,
  overlay: Option<Overlay>,
  record: bool,
}

impl FromUrlWithScheme for SaveMasksOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for SaveMasksOutput {
  type Error = SaveMasksError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveMasksError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: uri.scheme().to_string(),
      });
    }

    let enabled = |key: &str| {
      uri
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v != "false")
        .unwrap_or(true)
    };
    let directory =
      urlencoding::decode(uri.path()).map_err(|e| SaveMasksError::PathDecode(e.to_string()))?;

    Ok(SaveMasksOutput {
      directory: PathBuf::from(directory.into_owned()),
      overlay: enabled("overlay").then(Overlay::default),
      record: enabled("record"),
    })
  }
}

impl SaveMasksOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      overlay: Some(Overlay::default()),
      record: true,
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn target_dir(&self, result: &SegmentResult) -> Result<PathBuf, SaveMasksError> {
    let directory = match &result.name {
      Some(name) => self.directory.join(name),
      None => self.directory.clone(),
    };
    if !directory.as_os_str().is_empty() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(directory)
  }

  fn write_record(
    &self,
    path: &Path,
    frame: &RgbImage,
    result: &SegmentResult,
  ) -> Result<(), SaveMasksError> {
    let detections = result
      .detections
      .iter()
      .enumerate()
      .map(|(i, d)| {
        json!({
          "candidate": d.candidate,
          "score": d.score,
          "bbox": d.bbox,
          "mask": mask_file_name(i),
        })
      })
      .collect::<Vec<_>>();
    let record = json!({
      "timestamp": Utc::now().to_rfc3339(),
      "text": result.text,
      "threshold": result.threshold,
      "image": { "width": frame.width(), "height": frame.height() },
      "detections": detections,
    });
    std::fs::write(path, serde_json::to_string_pretty(&record)?)?;
    Ok(())
  }
}

fn mask_file_name(index: usize) -> String {
  format!("mask{}.png", index)
}

impl Render<RgbImage, SegmentResult> for SaveMasksOutput {
  type Error = SaveMasksError;

  fn render_result(&self, frame: &RgbImage, result: &SegmentResult) -> Result<(), Self::Error> {
    let directory = self.target_dir(result)?;

    for (i, detection) in result.detections.iter().enumerate() {
      detection.mask.save(directory.join(mask_file_name(i)))?;
    }

    if let Some(overlay) = &self.overlay {
      let mut image = frame.clone();
      overlay.draw_detections(&mut image, &result.detections);
      image.save(directory.join(OVERLAY_FILE))?;
    }

    if self.record {
      self.write_record(&directory.join(RECORD_FILE), frame, result)?;
    }

    info!(
      "保存 {} 个分割结果到目录: {}",
      result.detections.len(),
      directory.display()
    );
    Ok(())
  }
}
