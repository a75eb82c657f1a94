//! Error Types Module
//!
//! クレート全体で使用する構造化エラー型を定義するモジュール。
//! `thiserror`を使用して、エラーの自動変換とメッセージフォーマットを実現する。

use thiserror::Error;

/// xlsxtestspecクレート全体で使用するエラー型
///
/// ワークブックの読み込み、LLM呼び出し、表の抽出、テンプレートへの書き込み、
/// アーカイブ作成の各段階で発生するエラーを統一的に扱います。
///
/// # エラーの種類
///
/// - `Config`: LLM接続情報の不足・不正（パイプライン開始前に検出）
/// - `Provider`: スロットリング以外のLLMプロバイダーエラー（即時失敗、リトライなし）
/// - `RateLimitExceeded`: スロットリングがリトライ上限まで続いた
/// - `MissingTable` / `SchemaMismatch`: LLM出力からテスト仕様表を復元できない
/// - `InputValidation`: アップロード内容の不備（クライアントエラー）
///
/// シート単位のクレンジング失敗・AI構造化失敗はこの型では表現しません。
/// それらは各モジュール内で吸収され、ログにのみ記録されます。
#[derive(Error, Debug)]
pub enum TestSpecError {
    /// I/O操作中に発生したエラー
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Excelファイルの解析中に発生したエラー（calamine由来）
    #[error("Failed to parse Excel file: {0}")]
    Parse(#[from] calamine::Error),

    /// ZIPアーカイブの読み書きエラー
    #[error("ZIP archive error: {0}")]
    Zip(String),

    /// テンプレートXMLの解析・書き出しエラー
    #[error("XML error: {0}")]
    Xml(String),

    /// 設定の検証に失敗したエラー
    ///
    /// LLMサービス名が不正、必須の接続情報が未設定、
    /// またはパイプライン設定が矛盾している場合に発生します。
    #[error("Configuration error: {0}")]
    Config(String),

    /// スロットリング以外のプロバイダーエラー
    ///
    /// HTTPエラー、通信エラー、想定外のレスポンス形式などを含みます。
    #[error("{provider} API call failed: {message}")]
    Provider {
        /// プロバイダー名（`AZURE` / `AWS`）
        provider: String,
        /// エラーの詳細
        message: String,
    },

    /// スロットリングによるリトライが上限に達したエラー
    #[error("{provider} is rate limiting requests (gave up after {attempts} attempts); please retry later")]
    RateLimitExceeded {
        /// プロバイダー名
        provider: String,
        /// 試行回数
        attempts: u32,
    },

    /// LLM出力にMarkdown表が見つからない
    #[error("No Markdown table found in the generated test specification")]
    MissingTable,

    /// 抽出したMarkdown表を表データとして読めない
    #[error("Failed to read Markdown table: {0}")]
    Table(#[from] csv::Error),

    /// 表の列構成が想定スキーマと一致しない
    #[error("Test specification table is missing columns: {}", missing.join(", "))]
    SchemaMismatch {
        /// 不足している列名（スキーマの定義順）
        missing: Vec<String>,
    },

    /// アップロード内容の検証エラー
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// セキュリティ制限に違反したエラー
    #[error("Security violation: {0}")]
    SecurityViolation(String),
}

impl TestSpecError {
    /// クライアント起因のエラーかどうか
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TestSpecError::InputValidation(_) | TestSpecError::SecurityViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "template not found");
        let error: TestSpecError = io_err.into();

        match error {
            TestSpecError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_parse_error_display() {
        let error: TestSpecError = calamine::Error::Msg("Corrupted file").into();
        let error_msg = error.to_string();
        assert!(error_msg.contains("Failed to parse Excel file"));
        assert!(error_msg.contains("Corrupted file"));
    }

    #[test]
    fn test_schema_mismatch_names_every_column() {
        let error = TestSpecError::SchemaMismatch {
            missing: vec!["テストケース".to_string(), "期待結果".to_string()],
        };
        let error_msg = error.to_string();
        assert!(error_msg.contains("テストケース"));
        assert!(error_msg.contains("期待結果"));
    }

    #[test]
    fn test_rate_limit_display() {
        let error = TestSpecError::RateLimitExceeded {
            provider: "AWS".to_string(),
            attempts: 5,
        };
        let error_msg = error.to_string();
        assert!(error_msg.contains("AWS"));
        assert!(error_msg.contains("5 attempts"));
        assert!(error_msg.contains("retry later"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(TestSpecError::InputValidation("no file".to_string()).is_client_error());
        assert!(TestSpecError::SecurityViolation("too big".to_string()).is_client_error());
        assert!(!TestSpecError::MissingTable.is_client_error());
        assert!(!TestSpecError::Config("missing key".to_string()).is_client_error());
    }

    #[test]
    fn test_error_conversion_with_question_mark() {
        fn io_operation() -> Result<(), TestSpecError> {
            let _file = std::fs::File::open("nonexistent_template.xlsx")?;
            Ok(())
        }

        match io_operation() {
            Err(TestSpecError::Io(_)) => {}
            _ => panic!("Expected Io error from ? operator"),
        }
    }
}
