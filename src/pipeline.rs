//! Pipeline Orchestrator
//!
//! ステージを順に呼び出し、前段の出力を後段のプロンプトに埋め込んで成果物を作る。
//!
//! # 単体テスト
//!
//! 1. ワークブックの全シートを読み込み、シートごとにAI構造化またはクレンジング＋表出力
//! 2. 目次付きの設計書に組み立て
//! 3. テスト観点抽出
//! 4. テスト仕様書生成
//! 5. 表を抽出してテンプレートに書き込み
//! 6. 4つの成果物をZIPにまとめる
//!
//! # 結合テスト
//!
//! 1. 画面一覧・画面遷移のワークブックを読み込み、画面一覧と画面遷移を順に構造化
//! 2. 構造化済み設計書と画面遷移から結合テスト仕様書を生成
//! 3. 表の列構成を検証し、2つの成果物をZIPにまとめる
//!
//! シート単位のAI構造化の失敗はプレースホルダーに置き換えて続行し、
//! それ以外のステージの失敗はパイプライン全体を中断します。

use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::api::TestSpecSchema;
use crate::archive::{
    integration_archive_name, unit_archive_name, Archive, ArchiveBuilder,
    INTEGRATION_TEST_SPEC, INTEGRATION_TRANSITIONS, UNIT_DESIGN_DOC, UNIT_PERSPECTIVES,
    UNIT_TEST_SPEC, UNIT_WORKBOOK,
};
use crate::builder::PipelineConfig;
use crate::cleaner::SheetCleaner;
use crate::error::TestSpecError;
use crate::extractor::extract_table;
use crate::llm::CompletionService;
use crate::parser::WorkbookParser;
use crate::prompts;
use crate::serializer::{
    DesignDocument, DocumentSection, SheetSerializer, AI_FAILURE_PLACEHOLDER,
    EMPTY_SHEET_PLACEHOLDER,
};
use crate::types::{PipelineArtifact, RawSheet, Stage};
use crate::writer::{write_rows, TemplateWorkbook};

/// 画面遷移文書のセクション見出し
const SCREEN_LIST_HEADING: &str = "画面一覧";
const TRANSITIONS_HEADING: &str = "画面遷移";

/// 結合テストに渡す構造化済み設計書
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignText {
    /// ファイル名
    pub name: String,

    /// 本文（Markdown）
    pub body: String,
}

impl DesignText {
    /// 新しい設計書を生成
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// パイプラインの実行結果
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// 返却するアーカイブ
    pub archive: Archive,

    /// 各ステージのLLM応答（実行順）
    pub artifacts: Vec<PipelineArtifact>,

    /// テンプレート・検証に使った表の行数
    pub rows: usize,
}

impl PipelineOutput {
    /// 指定ステージの最後の応答
    pub fn artifact(&self, stage: Stage) -> Option<&PipelineArtifact> {
        self.artifacts.iter().rev().find(|a| a.stage == stage)
    }
}

/// パイプライン
///
/// [`crate::PipelineBuilder`]で構築します。LLMへの問い合わせは
/// 実行時に渡される[`CompletionService`]を通して行います。
///
/// # 使用例
///
/// ```rust,no_run
/// use xlsxtestspec::{LlmGateway, PipelineBuilder};
///
/// # fn main() -> Result<(), xlsxtestspec::TestSpecError> {
/// let gateway = LlmGateway::from_env()?;
/// let pipeline = PipelineBuilder::new().build()?;
/// let workbook = std::fs::read("設計書.xlsx")?;
/// let template = std::fs::read("単体テスト仕様書.xlsx")?;
/// let output = pipeline.run_unit(&gateway, "設計書.xlsx", workbook, &template)?;
/// std::fs::write(&output.archive.file_name, &output.archive.bytes)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    serializer: SheetSerializer,
}

impl Pipeline {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        Self {
            serializer: SheetSerializer::new(SheetCleaner::new(config.header_policy)),
            config,
        }
    }

    /// テスト仕様表のスキーマ
    pub fn schema(&self) -> TestSpecSchema {
        self.config.schema
    }

    /// 単体テスト仕様書を生成する
    ///
    /// # 引数
    ///
    /// * `service` - LLMサービス
    /// * `file_name` - アップロードされたファイル名（設計書のタイトルとアーカイブ名に使う）
    /// * `workbook` - 設計書ワークブックのバイト列
    /// * `template` - テスト仕様書テンプレートのバイト列
    ///
    /// # 戻り値
    ///
    /// * `Ok(PipelineOutput)` - すべての成果物を生成できた場合
    /// * `Err(TestSpecError)` - いずれかのステージが失敗した場合（部分的な成果物は返さない）
    pub fn run_unit(
        &self,
        service: &dyn CompletionService,
        file_name: &str,
        workbook: Vec<u8>,
        template: &[u8],
    ) -> Result<PipelineOutput, TestSpecError> {
        info!(file = file_name, schema = ?self.config.schema, "Unit pipeline started");
        service.ready()?;

        let sheets = WorkbookParser::open(workbook)?.read_all()?;
        // ステージの前にテンプレートを検証しておく
        let mut template = TemplateWorkbook::open(template)?;

        let mut artifacts = Vec::new();
        let sections = self.serialize_sheets(service, &sheets, &mut artifacts);
        info!(sections = sections.len(), "All sheets processed; assembling design document");
        let design = DesignDocument::assemble(file_name, sections).to_string();

        let perspectives = self.run_stage(
            service,
            Stage::Perspectives,
            &prompts::perspectives_prompt(&design),
        )?;
        let test_spec = self.run_stage(
            service,
            Stage::TestSpec,
            &prompts::test_spec_prompt(self.config.stage_input, &design, &perspectives.body),
        )?;

        let table = extract_table(&test_spec.body, self.config.schema)?;
        let written = write_rows(&mut template, &table.rows, &self.config.mapping);
        info!(
            rows = table.len(),
            cells = written,
            start_row = self.config.mapping.start_row(),
            "Wrote test rows to template"
        );
        let workbook = template.save_to_buffer()?;

        let archive = ArchiveBuilder::new()
            .with_text(UNIT_DESIGN_DOC, &design)
            .with_text(UNIT_PERSPECTIVES, &perspectives.body)
            .with_text(UNIT_TEST_SPEC, &test_spec.body)
            .with_bytes(UNIT_WORKBOOK, workbook)
            .build(unit_archive_name(file_name))?;

        artifacts.push(perspectives);
        artifacts.push(test_spec);
        Ok(PipelineOutput {
            archive,
            artifacts,
            rows: table.len(),
        })
    }

    /// 結合テスト仕様書を生成する
    ///
    /// # 引数
    ///
    /// * `service` - LLMサービス
    /// * `file_name` - 画面一覧・画面遷移ワークブックのファイル名
    /// * `workbook` - 画面一覧・画面遷移ワークブックのバイト列
    /// * `designs` - 構造化済み設計書（1件以上）
    pub fn run_integration(
        &self,
        service: &dyn CompletionService,
        file_name: &str,
        workbook: Vec<u8>,
        designs: &[DesignText],
    ) -> Result<PipelineOutput, TestSpecError> {
        if designs.is_empty() {
            return Err(TestSpecError::InputValidation(
                "結合テストには設計書が1件以上必要です".to_string(),
            ));
        }
        info!(
            file = file_name,
            designs = designs.len(),
            "Integration pipeline started"
        );
        service.ready()?;

        let sheets = WorkbookParser::open(workbook)?.read_all()?;
        let raw_text = self.workbook_text(&sheets);

        let screen_list = self.run_stage(
            service,
            Stage::ScreenList,
            &prompts::screen_list_prompt(&raw_text),
        )?;
        let transitions = self.run_stage(
            service,
            Stage::Transitions,
            &prompts::transitions_prompt(&raw_text, &screen_list.body),
        )?;
        let transition_document = DesignDocument::assemble(
            file_name,
            vec![
                DocumentSection::new(SCREEN_LIST_HEADING, screen_list.body.as_str()),
                DocumentSection::new(TRANSITIONS_HEADING, transitions.body.as_str()),
            ],
        )
        .to_string();

        let integration = self.run_stage(
            service,
            Stage::IntegrationSpec,
            &prompts::integration_prompt(
                designs.iter().map(|d| (d.name.as_str(), d.body.as_str())),
                &transition_document,
            ),
        )?;
        let table = extract_table(&integration.body, TestSpecSchema::Integration)?;

        let archive = ArchiveBuilder::new()
            .with_text(INTEGRATION_TRANSITIONS, &transition_document)
            .with_text(INTEGRATION_TEST_SPEC, &integration.body)
            .build(integration_archive_name(file_name))?;

        Ok(PipelineOutput {
            archive,
            artifacts: vec![screen_list, transitions, integration],
            rows: table.len(),
        })
    }

    /// 全シートをセクションに変換する（シート順を保持）
    ///
    /// AI構造化は並列に実行し、結果を元のシート順に並べ直します。
    fn serialize_sheets(
        &self,
        service: &dyn CompletionService,
        sheets: &[RawSheet],
        artifacts: &mut Vec<PipelineArtifact>,
    ) -> Vec<DocumentSection> {
        let mut results: Vec<(usize, DocumentSection, Option<PipelineArtifact>)> = sheets
            .par_iter()
            .enumerate()
            .map(|(index, sheet)| {
                let (section, artifact) = self.serialize_sheet(service, sheet);
                (index, section, artifact)
            })
            .collect();

        results.sort_by_key(|(index, ..)| *index);

        results
            .into_iter()
            .map(|(_, section, artifact)| {
                artifacts.extend(artifact);
                section
            })
            .collect()
    }

    fn serialize_sheet(
        &self,
        service: &dyn CompletionService,
        sheet: &RawSheet,
    ) -> (DocumentSection, Option<PipelineArtifact>) {
        if !self.config.ai_sheets.applies_to(&sheet.name) {
            info!(sheet = %sheet.name, route = "cleaning", "Serializing sheet");
            return (self.serializer.table_section(sheet), None);
        }

        if sheet.rows.iter().flatten().all(|cell| cell.is_empty()) {
            info!(sheet = %sheet.name, route = "empty", "Serializing sheet");
            return (DocumentSection::new(&sheet.name, EMPTY_SHEET_PLACEHOLDER), None);
        }

        info!(sheet = %sheet.name, route = "ai", "Serializing sheet");
        let prompt = prompts::structuring_prompt(&self.serializer.raw_text(sheet));
        match self.run_stage(service, Stage::Structuring, &prompt) {
            Ok(artifact) => (
                DocumentSection::new(&sheet.name, artifact.body.as_str()),
                Some(artifact),
            ),
            Err(e) => {
                warn!(sheet = %sheet.name, error = %e, "AI structuring failed; using placeholder");
                (DocumentSection::new(&sheet.name, AI_FAILURE_PLACEHOLDER), None)
            }
        }
    }

    /// 結合テスト用に、空でないシートを見出し付きの平文にまとめる
    fn workbook_text(&self, sheets: &[RawSheet]) -> String {
        sheets
            .iter()
            .filter(|sheet| sheet.rows.iter().flatten().any(|cell| !cell.is_empty()))
            .map(|sheet| format!("## {}\n{}", sheet.name, self.serializer.raw_text(sheet)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn run_stage(
        &self,
        service: &dyn CompletionService,
        stage: Stage,
        user_prompt: &str,
    ) -> Result<PipelineArtifact, TestSpecError> {
        let started = Instant::now();
        info!(stage = stage.as_str(), prompt_chars = user_prompt.chars().count(), "Stage started");

        let body = service.complete(prompts::system_prompt(stage, self.config.schema), user_prompt)?;

        info!(
            stage = stage.as_str(),
            response_chars = body.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage completed"
        );
        Ok(PipelineArtifact::new(stage, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AiSheetPolicy;
    use crate::builder::PipelineBuilder;
    use crate::types::CellValue;
    use std::sync::Mutex;

    /// システムプロンプトで応答を切り替えるスタブ
    struct StubService {
        structuring: Result<String, ()>,
        test_spec: String,
        calls: Mutex<Vec<Stage>>,
    }

    impl StubService {
        fn new(test_spec: &str) -> Self {
            Self {
                structuring: Ok("### 処理1\n- 初期表示".to_string()),
                test_spec: test_spec.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CompletionService for StubService {
        fn complete(&self, system_prompt: &str, _user_prompt: &str) -> Result<String, TestSpecError> {
            let stage = [
                Stage::Structuring,
                Stage::ScreenList,
                Stage::Transitions,
                Stage::Perspectives,
                Stage::TestSpec,
                Stage::IntegrationSpec,
            ]
            .into_iter()
            .find(|s| {
                prompts::system_prompt(*s, TestSpecSchema::Legacy) == system_prompt
                    || prompts::system_prompt(*s, TestSpecSchema::Traceable) == system_prompt
            })
            .ok_or_else(|| TestSpecError::Config("unknown prompt".to_string()))?;
            self.calls.lock().unwrap().push(stage);

            match stage {
                Stage::Structuring => self.structuring.clone().map_err(|_| TestSpecError::Provider {
                    provider: "AZURE".to_string(),
                    message: "HTTP 500".to_string(),
                }),
                Stage::Perspectives => Ok("## 初期表示\n- **テスト観点**: 表示".to_string()),
                _ => Ok(self.test_spec.clone()),
            }
        }
    }

    fn sheet(name: &str, rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            name,
            rows.iter()
                .map(|r| r.iter().map(|&c| CellValue::from(c)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_sections_keep_sheet_order() {
        let pipeline = PipelineBuilder::new().build().unwrap();
        let service = StubService::new("");
        let sheets: Vec<RawSheet> = (0..8)
            .map(|i| sheet(&format!("シート{}", i), &[&["項目", "値"], &["a", "1"]]))
            .collect();

        let mut artifacts = Vec::new();
        let sections = pipeline.serialize_sheets(&service, &sheets, &mut artifacts);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        let expected: Vec<String> = (0..8).map(|i| format!("シート{}", i)).collect();
        assert_eq!(headings, expected);
        assert_eq!(artifacts.len(), 8);
    }

    #[test]
    fn test_ai_failure_degrades_to_placeholder() {
        let pipeline = PipelineBuilder::new().build().unwrap();
        let mut service = StubService::new("");
        service.structuring = Err(());

        let (section, artifact) = pipeline.serialize_sheet(&service, &sheet("処理", &[&["x"]]));
        assert_eq!(section.body, AI_FAILURE_PLACEHOLDER);
        assert!(artifact.is_none());
    }

    #[test]
    fn test_empty_sheet_skips_ai() {
        let pipeline = PipelineBuilder::new().build().unwrap();
        let service = StubService::new("");

        let (section, _) = pipeline.serialize_sheet(&service, &sheet("空", &[&["", " "]]));
        assert_eq!(section.body, EMPTY_SHEET_PLACEHOLDER);
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_allow_list_routes_other_sheets_to_cleaning() {
        let pipeline = PipelineBuilder::new()
            .with_ai_sheets(AiSheetPolicy::Names(vec!["処理詳細".to_string()]))
            .build()
            .unwrap();
        let service = StubService::new("");

        let (section, artifact) =
            pipeline.serialize_sheet(&service, &sheet("画面項目", &[&["項目", "桁"], &["氏名", "20"]]));
        assert!(section.body.starts_with("| 項目"));
        assert!(artifact.is_none());
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_integration_requires_designs() {
        let pipeline = PipelineBuilder::new().build().unwrap();
        let service = StubService::new("");
        assert!(matches!(
            pipeline.run_integration(&service, "画面遷移.xlsx", Vec::new(), &[]),
            Err(TestSpecError::InputValidation(_))
        ));
        assert!(service.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_not_ready_service_runs_no_stage() {
        struct Unconfigured;
        impl CompletionService for Unconfigured {
            fn complete(&self, _: &str, _: &str) -> Result<String, TestSpecError> {
                panic!("must not be called");
            }
            fn ready(&self) -> Result<(), TestSpecError> {
                Err(TestSpecError::Config("AZURE_OPENAI_API_KEY".to_string()))
            }
        }

        let pipeline = PipelineBuilder::new().build().unwrap();
        assert!(matches!(
            pipeline.run_unit(&Unconfigured, "a.xlsx", Vec::new(), &[]),
            Err(TestSpecError::Config(_))
        ));
    }

    #[test]
    fn test_workbook_text_skips_empty_sheets() {
        let pipeline = PipelineBuilder::new().build().unwrap();
        let text = pipeline.workbook_text(&[
            sheet("画面一覧", &[&["ID", "画面名"], &["S01", "ログイン"]]),
            sheet("空", &[]),
        ]);
        assert_eq!(text, "## 画面一覧\nID 画面名\nS01 ログイン");
    }
}
