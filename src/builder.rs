//! Builder Module
//!
//! Fluent Builder APIを提供し、`Pipeline`インスタンスを段階的に構築する。

use crate::api::{AiSheetPolicy, HeaderPolicy, StageInput, TestSpecSchema};
use crate::error::TestSpecError;
use crate::pipeline::Pipeline;
use crate::writer::CellMapping;

/// AI構造化の対象とする従来のシート名
const LEGACY_AI_SHEETS: [&str; 2] = [
    "処理詳細仕様(初期処理)",
    "処理詳細仕様(当月仕掛発生PJ出力)",
];

/// 検証済みのパイプライン設定
#[derive(Debug, Clone)]
pub(crate) struct PipelineConfig {
    /// テスト仕様表のスキーマ
    pub schema: TestSpecSchema,

    /// AI構造化の対象シート
    pub ai_sheets: AiSheetPolicy,

    /// ヘッダー行の検出方式
    pub header_policy: HeaderPolicy,

    /// テスト仕様書生成ステージへの入力構成
    pub stage_input: StageInput,

    /// テンプレートへの書き込み位置
    pub mapping: CellMapping,
}

/// Fluent Builder APIを提供する構造体
///
/// すべての設定項目にデフォルト値が設定されており、必要な設定のみをオーバーライドできます。
///
/// # 使用例
///
/// ```rust
/// use xlsxtestspec::{AiSheetPolicy, HeaderPolicy, PipelineBuilder};
///
/// # fn main() -> Result<(), xlsxtestspec::TestSpecError> {
/// let pipeline = PipelineBuilder::new()
///     .with_ai_sheets(AiSheetPolicy::None)
///     .with_header_policy(HeaderPolicy::Scan)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    schema: TestSpecSchema,
    ai_sheets: AiSheetPolicy,
    header_policy: HeaderPolicy,
    stage_input: StageInput,
    /// 未指定の場合はスキーマの既定の対応表を使う
    mapping: Option<CellMapping>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// デフォルト設定を持つビルダーインスタンスを生成する
    ///
    /// # デフォルト設定
    ///
    /// - スキーマ: 6列構成（トレース元付き）
    /// - AI構造化: すべてのシート
    /// - ヘッダー検出: 1行目固定
    /// - 仕様書生成の入力: テスト観点＋設計書
    /// - 書き込み位置: 11行目から A/B/F/J/W/AP列
    pub fn new() -> Self {
        Self {
            schema: TestSpecSchema::Traceable,
            ai_sheets: AiSheetPolicy::All,
            header_policy: HeaderPolicy::Fixed,
            stage_input: StageInput::DesignAndPerspectives,
            mapping: None,
        }
    }

    /// 4列構成の従来設定でビルダーを生成する
    ///
    /// - スキーマ: 4列構成
    /// - AI構造化: 処理詳細仕様の2シートのみ
    /// - 書き込み位置: 11行目から A/B/F/S列
    pub fn legacy() -> Self {
        Self {
            schema: TestSpecSchema::Legacy,
            ai_sheets: AiSheetPolicy::Names(
                LEGACY_AI_SHEETS.iter().map(|s| s.to_string()).collect(),
            ),
            ..Self::new()
        }
    }

    /// テスト仕様表のスキーマを指定する
    ///
    /// 結合テストのスキーマは指定できません（`build()`時にエラー）。
    pub fn with_schema(mut self, schema: TestSpecSchema) -> Self {
        self.schema = schema;
        self
    }

    /// AI構造化の対象シートを指定する
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use xlsxtestspec::{AiSheetPolicy, PipelineBuilder};
    ///
    /// let builder = PipelineBuilder::new()
    ///     .with_ai_sheets(AiSheetPolicy::Names(vec!["処理詳細仕様(初期処理)".to_string()]));
    /// ```
    pub fn with_ai_sheets(mut self, policy: AiSheetPolicy) -> Self {
        self.ai_sheets = policy;
        self
    }

    /// ヘッダー行の検出方式を指定する
    pub fn with_header_policy(mut self, policy: HeaderPolicy) -> Self {
        self.header_policy = policy;
        self
    }

    /// テスト仕様書生成ステージへの入力構成を指定する
    pub fn with_stage_input(mut self, input: StageInput) -> Self {
        self.stage_input = input;
        self
    }

    /// テンプレートへの書き込み位置を指定する
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use xlsxtestspec::{CellMapping, PipelineBuilder, TestSpecSchema};
    ///
    /// let mapping = CellMapping::new(5)
    ///     .with_column("No", 1)
    ///     .with_column("区分", 2)
    ///     .with_column("テストケース", 3)
    ///     .with_column("期待結果", 4);
    /// let builder = PipelineBuilder::new()
    ///     .with_schema(TestSpecSchema::Legacy)
    ///     .with_cell_mapping(mapping);
    /// ```
    pub fn with_cell_mapping(mut self, mapping: CellMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// 設定を検証し、`Pipeline`インスタンスを生成する
    ///
    /// # 戻り値
    ///
    /// * `Ok(Pipeline)`: 設定が有効な場合
    /// * `Err(TestSpecError::Config)`: 設定が無効な場合
    ///
    /// # 発生し得るエラー
    ///
    /// * AI構造化の対象シート名が空
    /// * スキーマに結合テストの列構成を指定した
    /// * 書き込み位置がスキーマの列をすべて対応付けていない、または行・列が0
    pub fn build(self) -> Result<Pipeline, TestSpecError> {
        // 1. AI構造化の対象シート
        if let AiSheetPolicy::Names(names) = &self.ai_sheets {
            if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
                return Err(TestSpecError::Config(
                    "AI sheet allow-list must contain at least one non-empty sheet name"
                        .to_string(),
                ));
            }
        }

        // 2. スキーマと書き込み位置
        let mapping = match self.mapping {
            Some(mapping) => mapping,
            None => CellMapping::for_schema(self.schema).ok_or_else(|| {
                TestSpecError::Config(format!(
                    "Schema {:?} cannot be written to a spreadsheet template",
                    self.schema
                ))
            })?,
        };
        if self.schema == TestSpecSchema::Integration {
            return Err(TestSpecError::Config(
                "Integration schema is used only by the integration pipeline".to_string(),
            ));
        }
        mapping.validate(self.schema)?;

        Ok(Pipeline::new(PipelineConfig {
            schema: self.schema,
            ai_sheets: self.ai_sheets,
            header_policy: self.header_policy,
            stage_input: self.stage_input,
            mapping,
        }))
    }
}
