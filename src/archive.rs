//! Archive Builder Module
//!
//! パイプラインの成果物（Markdown、XLSX）を1つのZIPアーカイブにまとめる。

use std::io::{Cursor, Write};

use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::TestSpecError;
use crate::formatter::percent_encode;

/// 単体テストのアーカイブ内ファイル名
pub const UNIT_DESIGN_DOC: &str = "1_構造化設計書.md";
pub const UNIT_PERSPECTIVES: &str = "2_テスト観点.md";
pub const UNIT_TEST_SPEC: &str = "3_テスト仕様書.md";
pub const UNIT_WORKBOOK: &str = "テスト仕様書.xlsx";

/// 結合テストのアーカイブ内ファイル名
pub const INTEGRATION_TRANSITIONS: &str = "1_画面遷移.md";
pub const INTEGRATION_TEST_SPEC: &str = "2_結合テスト仕様書.md";

/// アーカイブ名の接頭辞
const UNIT_ARCHIVE_PREFIX: &str = "テスト仕様書";
const INTEGRATION_ARCHIVE_PREFIX: &str = "結合テスト仕様書";

/// ZIPエントリの共通オプション
///
/// 更新日時を固定し、同じ入力から同じバイト列が得られるようにします。
pub(crate) fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// 成果物アーカイブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// 推奨ファイル名（例: `テスト仕様書_設計書.zip`）
    pub file_name: String,

    /// ZIPのバイト列
    pub bytes: Vec<u8>,
}

impl Archive {
    /// HTTPレスポンス用の`Content-Disposition`ヘッダー値
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.file_name)
    }
}

/// 成果物を順に追加してアーカイブを作るビルダー
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    /// 空のビルダーを生成
    pub fn new() -> Self {
        Self::default()
    }

    /// Markdownテキストを追加
    pub fn with_text(self, name: impl Into<String>, text: &str) -> Self {
        self.with_bytes(name, text.as_bytes().to_vec())
    }

    /// バイナリを追加
    pub fn with_bytes(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.entries.push((name.into(), bytes));
        self
    }

    /// 追加済みのエントリ数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// エントリがひとつもないかどうか
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ZIPを作成
    ///
    /// # 引数
    ///
    /// * `file_name` - アーカイブの推奨ファイル名
    pub fn build(self, file_name: impl Into<String>) -> Result<Archive, TestSpecError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in &self.entries {
            zip.start_file(name.as_str(), entry_options())
                .map_err(|e| TestSpecError::Zip(e.to_string()))?;
            zip.write_all(content)?;
        }
        let bytes = zip
            .finish()
            .map_err(|e| TestSpecError::Zip(e.to_string()))?
            .into_inner();

        let file_name = file_name.into();
        info!(
            archive = %file_name,
            entries = self.entries.len(),
            bytes = bytes.len(),
            "Archive created"
        );

        Ok(Archive { file_name, bytes })
    }
}

/// アップロードファイル名から拡張子を除いた部分
///
/// パス区切りが含まれる場合は最後の要素を使います。
pub fn file_stem(upload_name: &str) -> &str {
    let base = upload_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(upload_name);
    match base.rfind('.') {
        Some(pos) if pos > 0 => &base[..pos],
        _ => base,
    }
}

/// 単体テストのアーカイブ名
pub fn unit_archive_name(upload_name: &str) -> String {
    format!("{}_{}.zip", UNIT_ARCHIVE_PREFIX, file_stem(upload_name))
}

/// 結合テストのアーカイブ名
pub fn integration_archive_name(upload_name: &str) -> String {
    format!("{}_{}.zip", INTEGRATION_ARCHIVE_PREFIX, file_stem(upload_name))
}

/// `Content-Disposition`ヘッダー値（RFC 5987形式のUTF-8ファイル名）
pub fn content_disposition(file_name: &str) -> String {
    format!("attachment; filename*=UTF-8''{}", percent_encode(file_name))
}
