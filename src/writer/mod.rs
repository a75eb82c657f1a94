//! Spreadsheet Writer Module
//!
//! 抽出したテスト仕様表の行を、テンプレートの決まったセル位置に書き込む。

mod template;

pub use template::TemplateWorkbook;

use tracing::info;

use crate::api::TestSpecSchema;
use crate::error::TestSpecError;
use crate::extractor::TestRow;

/// 列名とテンプレート上の列番号の対応、および書き込み開始行
///
/// 行・列はどちらも1始まり（列1 = `A`列）です。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMapping {
    start_row: u32,
    columns: Vec<(String, u32)>,
}

impl CellMapping {
    /// 空の対応表を生成
    pub fn new(start_row: u32) -> Self {
        Self {
            start_row,
            columns: Vec::new(),
        }
    }

    /// 列の対応を追加（同じ列名は上書き）
    pub fn with_column(mut self, name: impl Into<String>, column: u32) -> Self {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = column,
            None => self.columns.push((name, column)),
        }
        self
    }

    /// 4列スキーマ用の対応（11行目から、A/B/F/S列）
    pub fn legacy() -> Self {
        Self::new(11)
            .with_column("No", 1)
            .with_column("区分", 2)
            .with_column("テストケース", 6)
            .with_column("期待結果", 19)
    }

    /// 6列スキーマ用の対応（11行目から、A/B/F/J/W/AP列）
    pub fn traceable() -> Self {
        Self::new(11)
            .with_column("No", 1)
            .with_column("大分類", 2)
            .with_column("中分類", 6)
            .with_column("テストケース", 10)
            .with_column("期待結果", 23)
            .with_column("トレース元", 42)
    }

    /// スキーマに対応する既定の対応表
    ///
    /// 結合テストのスキーマはスプレッドシートに出力しないため`None`を返します。
    pub fn for_schema(schema: TestSpecSchema) -> Option<Self> {
        match schema {
            TestSpecSchema::Legacy => Some(Self::legacy()),
            TestSpecSchema::Traceable => Some(Self::traceable()),
            TestSpecSchema::Integration => None,
        }
    }

    /// 書き込み開始行
    pub fn start_row(&self) -> u32 {
        self.start_row
    }

    /// 列名に対応する列番号
    pub fn column(&self, name: &str) -> Option<u32> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| *column)
    }

    /// スキーマのすべての列が対応付けられ、座標が1以上であることを検証
    pub(crate) fn validate(&self, schema: TestSpecSchema) -> Result<(), TestSpecError> {
        if self.start_row == 0 {
            return Err(TestSpecError::Config(
                "Cell mapping start row must be 1 or greater".to_string(),
            ));
        }
        if let Some((name, _)) = self.columns.iter().find(|(_, column)| *column == 0) {
            return Err(TestSpecError::Config(format!(
                "Cell mapping column for '{}' must be 1 or greater",
                name
            )));
        }

        let unmapped: Vec<&str> = schema
            .columns()
            .iter()
            .copied()
            .filter(|column| self.column(column).is_none())
            .collect();
        if !unmapped.is_empty() {
            return Err(TestSpecError::Config(format!(
                "Cell mapping does not cover columns: {}",
                unmapped.join(", ")
            )));
        }
        Ok(())
    }
}

/// 行をテンプレートに書き込む
///
/// `i`番目（0始まり）の行は`start_row + i`行目に書き込みます。
/// 行に値がない列（空セル）や対応表にない列には何も書かず、テンプレートの内容が残ります。
///
/// # 戻り値
///
/// 書き込んだセルの数
pub fn write_rows(template: &mut TemplateWorkbook, rows: &[TestRow], mapping: &CellMapping) -> usize {
    let mut written = 0;
    for (i, row) in rows.iter().enumerate() {
        let physical_row = mapping.start_row() + i as u32;
        for (name, value) in row.iter() {
            if let Some(column) = mapping.column(name) {
                template.write_cell(physical_row, column, value);
                written += 1;
            }
        }
    }
    written
}

/// テンプレートを開き、行を書き込んだXLSXのバイト列を返す
pub fn populate_template(
    template_bytes: &[u8],
    rows: &[TestRow],
    mapping: &CellMapping,
) -> Result<Vec<u8>, TestSpecError> {
    let mut template = TemplateWorkbook::open(template_bytes)?;
    let written = write_rows(&mut template, rows, mapping);
    info!(
        rows = rows.len(),
        cells = written,
        start_row = mapping.start_row(),
        "Wrote test rows to template"
    );
    template.save_to_buffer()
}
