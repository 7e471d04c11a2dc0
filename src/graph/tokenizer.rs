// 该文件是 Shanan （山南西风） 项目的一部分。
// src/graph/tokenizer.rs - 文本分词器
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

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::graph::{GraphError, TextTokenizer};

/// 从 `tokenizer.json` 加载的 HuggingFace 分词器
pub struct HfTokenizer {
  inner: Tokenizer,
}

impl HfTokenizer {
  pub fn from_file(path: &Path) -> Result<Self, GraphError> {
    info!("加载分词器: {}", path.display());
    let inner = Tokenizer::from_file(path).map_err(|e| {
      GraphError::Tokenizer(format!("无法加载 {}: {}", path.display(), e))
    })?;
    Ok(Self { inner })
  }
}

impl TextTokenizer for HfTokenizer {
  // 起止标记由调用方补齐，这里不添加特殊标记
  fn encode(&self, text: &str) -> Result<Vec<i64>, GraphError> {
    let encoding = self
      .inner
      .encode(text, false)
      .map_err(|e| GraphError::Tokenizer(e.to_string()))?;
    let ids = encoding
      .get_ids()
      .iter()
      .map(|&id| id as i64)
      .collect::<Vec<_>>();
    debug!("文本 {:?} 分词结果: {:?}", text, ids);
    Ok(ids)
  }
}
