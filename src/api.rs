//! Public API Types
//!
//! パイプラインの振る舞いを切り替える公開列挙型を定義するモジュール。

use std::str::FromStr;

use crate::error::TestSpecError;

/// ヘッダー行の検出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum HeaderPolicy {
    /// 先頭5行のうち空セルが最も少ない行をヘッダーとする
    ///
    /// ヘッダー位置が不明なシート向けです。
    Scan,

    /// 常に1行目をヘッダーとする（デフォルト）
    #[default]
    Fixed,
}

/// AI構造化の対象シートを決める方式
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum AiSheetPolicy {
    /// AI構造化を行わない（すべてクレンジング＋表出力）
    None,

    /// シート名の完全一致で対象を指定
    ///
    /// 例: `AiSheetPolicy::Names(vec!["処理詳細仕様(初期処理)".to_string()])`
    Names(Vec<String>),

    /// すべてのシートをAIで構造化（デフォルト）
    #[default]
    All,
}

impl AiSheetPolicy {
    /// 指定シートをAIで構造化するかどうか
    pub fn applies_to(&self, sheet_name: &str) -> bool {
        match self {
            AiSheetPolicy::None => false,
            AiSheetPolicy::Names(names) => names.iter().any(|n| n == sheet_name),
            AiSheetPolicy::All => true,
        }
    }
}

/// テスト仕様表の列スキーマ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum TestSpecSchema {
    /// 4列構成（No / 区分 / テストケース / 期待結果）
    Legacy,

    /// 6列構成（No / 大分類 / 中分類 / テストケース / 期待結果 / トレース元）（デフォルト）
    #[default]
    Traceable,

    /// 結合テストのシナリオ表（No / シナリオ / 画面遷移 / 操作手順 / テストデータ / 期待結果）
    Integration,
}

impl TestSpecSchema {
    /// スキーマが要求する列名（出力順）
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TestSpecSchema::Legacy => &["No", "区分", "テストケース", "期待結果"],
            TestSpecSchema::Traceable => &[
                "No",
                "大分類",
                "中分類",
                "テストケース",
                "期待結果",
                "トレース元",
            ],
            TestSpecSchema::Integration => &[
                "No",
                "シナリオ",
                "画面遷移",
                "操作手順",
                "テストデータ",
                "期待結果",
            ],
        }
    }
}

/// テスト仕様書生成ステージへの入力構成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum StageInput {
    /// 直前ステージ（テスト観点）の出力のみを渡す
    ChainOnly,

    /// テスト観点と元の設計書の両方を渡す（デフォルト）
    ///
    /// テスト観点を優先し、設計書は構成順序の参照に使うようモデルに指示します。
    #[default]
    DesignAndPerspectives,
}

/// 実行するパイプラインの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum PipelineMode {
    /// 単体テスト仕様書の生成（デフォルト）
    #[default]
    Unit,

    /// 結合テスト仕様書の生成
    Integration,
}

impl FromStr for PipelineMode {
    type Err = TestSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unit" => Ok(PipelineMode::Unit),
            "integration" => Ok(PipelineMode::Integration),
            other => Err(TestSpecError::InputValidation(format!(
                "Unknown pipeline mode: '{}'",
                other
            ))),
        }
    }
}
