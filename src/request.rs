//! Request Module
//!
//! HTTP層から受け取ったアップロード内容の検証と、
//! パイプラインのエラーをレスポンス（ステータスコード＋メッセージ）に変換する処理。
//! ルーティングやマルチパートの解析はHTTP層の責務であり、ここでは扱わない。

use tracing::{error, info};

use crate::api::PipelineMode;
use crate::archive::Archive;
use crate::error::TestSpecError;
use crate::llm::CompletionService;
use crate::pipeline::{DesignText, Pipeline};
use crate::security::SecurityConfig;

const WORKBOOK_EXTENSION: &str = ".xlsx";

const MSG_NO_FILE: &str = "ファイルがアップロードされていません";
const MSG_EMPTY_FILE: &str = "アップロードされたファイルが空です";
const MSG_NOT_XLSX: &str = "Excelファイル(.xlsx)のみ対応しています";
const MSG_NO_DESIGN: &str = "設計書ファイルがアップロードされていません";
const MSG_INTERNAL: &str = "サーバー内部でエラーが発生しました";
const MSG_MISSING_TABLE: &str = "テスト仕様書の生成に失敗しました（表形式が見つかりません）";
const MSG_RATE_LIMIT: &str =
    "AIサービスへのリクエストが集中しています。しばらく時間をおいてから再度お試しください";

/// アップロードされたファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// クライアントが送ったファイル名
    pub name: String,

    /// ファイルの内容
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// 新しいファイルを生成
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// パイプラインへの入力
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// 実行するパイプライン
    pub mode: PipelineMode,

    /// 設計書（単体）または画面一覧・画面遷移（結合）のワークブック
    pub workbook: Option<UploadedFile>,

    /// 構造化済み設計書（結合テストのみ）
    pub design_documents: Vec<UploadedFile>,
}

impl UploadRequest {
    /// 単体テストのリクエストを生成
    pub fn unit(workbook: UploadedFile) -> Self {
        Self {
            mode: PipelineMode::Unit,
            workbook: Some(workbook),
            design_documents: Vec::new(),
        }
    }

    /// 結合テストのリクエストを生成
    pub fn integration(workbook: UploadedFile, design_documents: Vec<UploadedFile>) -> Self {
        Self {
            mode: PipelineMode::Integration,
            workbook: Some(workbook),
            design_documents,
        }
    }

    /// アップロード内容を検証する
    ///
    /// # 戻り値
    ///
    /// * `Ok(&UploadedFile)` - 検証済みのワークブック
    /// * `Err(TestSpecError::InputValidation)` - ファイルがない、空、拡張子が`.xlsx`でない、
    ///   結合テストで設計書がない場合
    /// * `Err(TestSpecError::SecurityViolation)` - サイズ上限を超えた場合
    pub fn validate(&self) -> Result<&UploadedFile, TestSpecError> {
        let workbook = validate_workbook(self.workbook.as_ref())?;

        if self.mode == PipelineMode::Integration {
            if self.design_documents.is_empty() {
                return Err(TestSpecError::InputValidation(MSG_NO_DESIGN.to_string()));
            }
            for document in &self.design_documents {
                design_text(document)?;
            }
        }

        Ok(workbook)
    }
}

/// ワークブックの有無・中身・拡張子・サイズを検証する
pub fn validate_workbook(file: Option<&UploadedFile>) -> Result<&UploadedFile, TestSpecError> {
    let file = file.ok_or_else(|| TestSpecError::InputValidation(MSG_NO_FILE.to_string()))?;

    if !file.name.to_lowercase().ends_with(WORKBOOK_EXTENSION) {
        return Err(TestSpecError::InputValidation(MSG_NOT_XLSX.to_string()));
    }
    if file.bytes.is_empty() {
        return Err(TestSpecError::InputValidation(MSG_EMPTY_FILE.to_string()));
    }
    SecurityConfig::default().check_upload_size(file.bytes.len())?;

    Ok(file)
}

/// 設計書ファイルをUTF-8テキストとして読む
fn design_text(file: &UploadedFile) -> Result<DesignText, TestSpecError> {
    if file.bytes.is_empty() {
        return Err(TestSpecError::InputValidation(format!(
            "{}: {}",
            MSG_EMPTY_FILE, file.name
        )));
    }
    SecurityConfig::default().check_upload_size(file.bytes.len())?;

    let body = std::str::from_utf8(&file.bytes).map_err(|_| {
        TestSpecError::InputValidation(format!(
            "設計書はUTF-8のテキストファイルである必要があります: {}",
            file.name
        ))
    })?;
    Ok(DesignText::new(&file.name, body))
}

/// エラーレスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// HTTPステータスコード
    pub status: u16,

    /// クライアントに返すメッセージ
    pub message: String,
}

impl ErrorResponse {
    /// エラーをレスポンスに変換する
    ///
    /// 入力起因のエラーは400、それ以外は500です。500の場合は内部の詳細を返さず、
    /// 表の形式不正とレート制限のみ利用者が対処できる内容を返します。
    pub fn from_error(err: &TestSpecError) -> Self {
        match err {
            TestSpecError::InputValidation(msg) => Self::new(400, msg.clone()),
            TestSpecError::SecurityViolation(_) => Self::new(400, err.to_string()),
            TestSpecError::SchemaMismatch { missing } => Self::new(
                500,
                format!("テスト仕様書の形式が不正です（不足列: {}）", missing.join(", ")),
            ),
            TestSpecError::MissingTable => Self::new(500, MSG_MISSING_TABLE.to_string()),
            TestSpecError::RateLimitExceeded { .. } => Self::new(500, MSG_RATE_LIMIT.to_string()),
            _ => Self::new(500, MSG_INTERNAL.to_string()),
        }
    }

    fn new(status: u16, message: String) -> Self {
        Self { status, message }
    }

    /// クライアントエラーかどうか
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl From<&TestSpecError> for ErrorResponse {
    fn from(err: &TestSpecError) -> Self {
        Self::from_error(err)
    }
}

/// リクエストを検証し、モードに応じたパイプラインを実行する
///
/// 失敗時は詳細をログに記録し、クライアント向けのレスポンスを返します。
///
/// # 引数
///
/// * `pipeline` - 構築済みパイプライン
/// * `service` - LLMサービス
/// * `request` - アップロード内容
/// * `template` - 単体テスト用テンプレートのバイト列（結合テストでは使わない）
pub fn handle(
    pipeline: &Pipeline,
    service: &dyn CompletionService,
    request: UploadRequest,
    template: &[u8],
) -> Result<Archive, ErrorResponse> {
    run(pipeline, service, request, template).map_err(|err| {
        let response = ErrorResponse::from_error(&err);
        if response.is_client_error() {
            info!(status = response.status, error = %err, "Request rejected");
        } else {
            error!(status = response.status, error = %err, "Pipeline failed");
        }
        response
    })
}

fn run(
    pipeline: &Pipeline,
    service: &dyn CompletionService,
    request: UploadRequest,
    template: &[u8],
) -> Result<Archive, TestSpecError> {
    let workbook = request.validate()?;
    info!(file = %workbook.name, mode = ?request.mode, "Upload received");

    let output = match request.mode {
        PipelineMode::Unit => {
            pipeline.run_unit(service, &workbook.name, workbook.bytes.clone(), template)?
        }
        PipelineMode::Integration => {
            let designs = request
                .design_documents
                .iter()
                .map(design_text)
                .collect::<Result<Vec<_>, _>>()?;
            pipeline.run_integration(service, &workbook.name, workbook.bytes.clone(), &designs)?
        }
    };
    Ok(output.archive)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xlsx(name: &str) -> UploadedFile {
        UploadedFile::new(name, vec![0x50, 0x4b, 0x03, 0x04])
    }

    #[test]
    fn test_missing_file() {
        let request = UploadRequest::default();
        match request.validate() {
            Err(TestSpecError::InputValidation(msg)) => assert_eq!(msg, MSG_NO_FILE),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert!(validate_workbook(Some(&xlsx("設計書.XLSX"))).is_ok());
        assert!(validate_workbook(Some(&xlsx("設計書.xlsx"))).is_ok());
        match validate_workbook(Some(&xlsx("設計書.xls"))) {
            Err(TestSpecError::InputValidation(msg)) => assert_eq!(msg, MSG_NOT_XLSX),
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(validate_workbook(Some(&xlsx("xlsx"))).is_err());
    }

    #[test]
    fn test_empty_file() {
        let file = UploadedFile::new("設計書.xlsx", Vec::new());
        assert!(matches!(
            validate_workbook(Some(&file)),
            Err(TestSpecError::InputValidation(_))
        ));
    }

    #[test]
    fn test_integration_requires_design_documents() {
        let request = UploadRequest::integration(xlsx("画面遷移.xlsx"), Vec::new());
        match request.validate() {
            Err(TestSpecError::InputValidation(msg)) => assert_eq!(msg, MSG_NO_DESIGN),
            other => panic!("Unexpected result: {:?}", other),
        }

        let request = UploadRequest::integration(
            xlsx("画面遷移.xlsx"),
            vec![UploadedFile::new("設計書.md", vec![0xff, 0xfe])],
        );
        assert!(matches!(
            request.validate(),
            Err(TestSpecError::InputValidation(_))
        ));

        let request = UploadRequest::integration(
            xlsx("画面遷移.xlsx"),
            vec![UploadedFile::new("設計書.md", "# 設計書".as_bytes().to_vec())],
        );
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_error_response_mapping() {
        let response = ErrorResponse::from_error(&TestSpecError::InputValidation(
            MSG_NOT_XLSX.to_string(),
        ));
        assert_eq!(response, ErrorResponse::new(400, MSG_NOT_XLSX.to_string()));
        assert!(response.is_client_error());

        let response =
            ErrorResponse::from_error(&TestSpecError::SecurityViolation("too big".to_string()));
        assert_eq!(response.status, 400);

        let response = ErrorResponse::from_error(&TestSpecError::SchemaMismatch {
            missing: vec!["テストケース".to_string(), "期待結果".to_string()],
        });
        assert_eq!(response.status, 500);
        assert!(response.message.contains("テストケース, 期待結果"));

        let response = ErrorResponse::from_error(&TestSpecError::RateLimitExceeded {
            provider: "AZURE".to_string(),
            attempts: 5,
        });
        assert_eq!(response.status, 500);
        assert_eq!(response.message, MSG_RATE_LIMIT);
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = TestSpecError::Provider {
            provider: "AZURE".to_string(),
            message: "HTTP 401: invalid api-key abc123".to_string(),
        };
        let response = ErrorResponse::from(&err);
        assert_eq!(response.status, 500);
        assert_eq!(response.message, MSG_INTERNAL);

        let response = ErrorResponse::from(&TestSpecError::Config(
            "AZURE_OPENAI_API_KEY".to_string(),
        ));
        assert!(!response.message.contains("AZURE_OPENAI_API_KEY"));
    }
}
