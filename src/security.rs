//! Security Module
//!
//! アップロードされたワークブックとテンプレートに対するセキュリティ制限。
//! ZIP bomb攻撃やパストラバーサル攻撃への対策を提供します。

use std::fmt;
use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::error::TestSpecError;

/// セキュリティ設定
///
/// ファイル処理時のセキュリティ制限を定義します。
#[derive(Debug, Clone)]
pub(crate) struct SecurityConfig {
    /// 展開後の最大サイズ（バイト）
    /// デフォルト: 1GB (1_073_741_824 bytes)
    pub max_decompressed_size: u64,
    /// ZIPアーカイブ内の最大ファイル数
    /// デフォルト: 10000
    pub max_file_count: usize,
    /// 単一ファイルの最大サイズ（バイト）
    /// デフォルト: 100MB (104_857_600 bytes)
    pub max_file_size: u64,
    /// アップロードファイルの最大サイズ（バイト）
    /// デフォルト: 100MB (104_857_600 bytes)
    pub max_upload_size: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_decompressed_size: 1_073_741_824, // 1GB
            max_file_count: 10_000,
            max_file_size: 104_857_600,   // 100MB
            max_upload_size: 104_857_600, // 100MB
        }
    }
}

impl SecurityConfig {
    /// アップロードされたバイト列のサイズを検証
    pub fn check_upload_size(&self, len: usize) -> Result<(), TestSpecError> {
        if len as u64 > self.max_upload_size {
            return Err(TestSpecError::SecurityViolation(format!(
                "Input file size exceeds maximum: {} bytes (max: {} bytes)",
                len, self.max_upload_size
            )));
        }
        Ok(())
    }

    /// ZIPアーカイブのエントリ数・パス・展開後サイズを検証
    ///
    /// # 引数
    ///
    /// * `archive` - 検証するZIPアーカイブ
    ///
    /// # 戻り値
    ///
    /// * `Ok(())` - すべての制限を満たす場合
    /// * `Err(TestSpecError::SecurityViolation)` - 制限に違反した場合
    pub fn check_archive<R: Read + Seek>(
        &self,
        archive: &mut ZipArchive<R>,
    ) -> Result<(), TestSpecError> {
        if archive.len() > self.max_file_count {
            return Err(TestSpecError::SecurityViolation(format!(
                "ZIP archive contains too many files: {} (max: {})",
                archive.len(),
                self.max_file_count
            )));
        }

        let mut total_decompressed_size = 0u64;
        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| TestSpecError::Zip(format!("{}", e)))?;

            let file_name = file.name();
            validate_zip_path(file_name).map_err(|e| {
                TestSpecError::SecurityViolation(format!("Invalid ZIP path: {}", e))
            })?;

            let file_size = file.size();
            if file_size > self.max_file_size {
                return Err(TestSpecError::SecurityViolation(format!(
                    "File '{}' exceeds maximum size: {} bytes (max: {} bytes)",
                    file_name, file_size, self.max_file_size
                )));
            }

            total_decompressed_size = total_decompressed_size
                .checked_add(file_size)
                .ok_or_else(|| {
                    TestSpecError::SecurityViolation(
                        "Total decompressed size calculation overflow".to_string(),
                    )
                })?;

            if total_decompressed_size > self.max_decompressed_size {
                return Err(TestSpecError::SecurityViolation(format!(
                    "Total decompressed size exceeds maximum: {} bytes (max: {} bytes)",
                    total_decompressed_size, self.max_decompressed_size
                )));
            }
        }

        Ok(())
    }
}

/// ZIPエントリ名が危険である理由
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UnsafePath {
    Empty,
    Absolute(String),
    Traversal(String),
    Backslash(String),
}

impl fmt::Display for UnsafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafePath::Empty => write!(f, "Empty path is not allowed"),
            UnsafePath::Absolute(p) => write!(f, "Absolute path is not allowed: {}", p),
            UnsafePath::Traversal(p) => write!(f, "Path traversal detected: {}", p),
            UnsafePath::Backslash(p) => write!(f, "Backslash in path is not allowed: {}", p),
        }
    }
}

/// ZIPエントリ名を検証する
///
/// 空のパス、絶対パス（`/`始まり、ドライブレター付き）、`..`、バックスラッシュを拒否します。
pub(crate) fn validate_zip_path(path: &str) -> Result<(), UnsafePath> {
    let bytes = path.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';

    if path.is_empty() {
        Err(UnsafePath::Empty)
    } else if path.starts_with('/') || has_drive {
        Err(UnsafePath::Absolute(path.to_string()))
    } else if path.contains("..") {
        Err(UnsafePath::Traversal(path.to_string()))
    } else if path.contains('\\') {
        Err(UnsafePath::Backslash(path.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::{FileOptions, ZipWriter};

    fn build_zip(entries: &[&str]) -> Vec<u8> {
        let mut data = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut data));
            for name in entries {
                zip.start_file(*name, FileOptions::default()).unwrap();
                zip.write_all(b"<x/>").unwrap();
            }
            zip.finish().unwrap();
        }
        data
    }

    #[test]
    fn test_validate_zip_path_valid() {
        assert!(validate_zip_path("xl/workbook.xml").is_ok());
        assert!(validate_zip_path("xl/worksheets/sheet1.xml").is_ok());
    }

    #[test]
    fn test_validate_zip_path_rejects_unsafe_paths() {
        assert_eq!(validate_zip_path(""), Err(UnsafePath::Empty));
        assert!(matches!(validate_zip_path("/etc/passwd"), Err(UnsafePath::Absolute(_))));
        assert!(matches!(
            validate_zip_path("c:\\xl\\workbook.xml"),
            Err(UnsafePath::Absolute(_))
        ));
        assert!(matches!(validate_zip_path("D:/xl/workbook.xml"), Err(UnsafePath::Absolute(_))));
        assert!(matches!(
            validate_zip_path("xl/../../etc/passwd"),
            Err(UnsafePath::Traversal(_))
        ));
        assert!(matches!(
            validate_zip_path("xl\\workbook.xml"),
            Err(UnsafePath::Backslash(_))
        ));
    }

    #[test]
    fn test_check_upload_size() {
        let config = SecurityConfig {
            max_upload_size: 10,
            ..Default::default()
        };
        assert!(config.check_upload_size(10).is_ok());
        assert!(matches!(
            config.check_upload_size(11),
            Err(TestSpecError::SecurityViolation(_))
        ));
    }

    #[test]
    fn test_check_archive_too_many_files() {
        let data = build_zip(&["xl/a.xml", "xl/b.xml", "xl/c.xml"]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let config = SecurityConfig {
            max_file_count: 2,
            ..Default::default()
        };
        match config.check_archive(&mut archive) {
            Err(TestSpecError::SecurityViolation(msg)) => assert!(msg.contains("too many files")),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_check_archive_path_traversal() {
        let data = build_zip(&["xl/../evil.xml"]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        let result = SecurityConfig::default().check_archive(&mut archive);
        assert!(matches!(result, Err(TestSpecError::SecurityViolation(_))));
    }

    #[test]
    fn test_check_archive_ok() {
        let data = build_zip(&["xl/workbook.xml", "xl/worksheets/sheet1.xml"]);
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        assert!(SecurityConfig::default().check_archive(&mut archive).is_ok());
    }
}
