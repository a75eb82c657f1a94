//! Workbook Parser
//!
//! calamineのラッパーとして、ワークブック全体を`RawSheet`の列に変換します。

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use std::io::Cursor;
use tracing::debug;
use zip::ZipArchive;

use crate::error::TestSpecError;
use crate::security::SecurityConfig;
use crate::types::{CellValue, RawSheet};

/// ワークブックパーサー
///
/// アップロードされたバイト列をメモリ上で開きます。XLSX形式のみサポートします。
pub struct WorkbookParser {
    /// calamineのワークブック
    workbook: Xlsx<Cursor<Vec<u8>>>,
}

impl WorkbookParser {
    /// バイト列からワークブックを開く
    ///
    /// # 引数
    ///
    /// * `bytes` - XLSXファイルのバイト列
    ///
    /// # 戻り値
    ///
    /// * `Ok(WorkbookParser)` - 読み込みに成功した場合
    /// * `Err(TestSpecError::SecurityViolation)` - サイズ上限、エントリ数の上限を超えた場合、
    ///   または危険なエントリパスを含む場合
    /// * `Err(TestSpecError::Zip)` - ZIPとして読めない場合
    /// * `Err(TestSpecError::Parse)` - XLSXとして解析できない場合
    pub fn open(bytes: Vec<u8>) -> Result<Self, TestSpecError> {
        let security = SecurityConfig::default();
        security.check_upload_size(bytes.len())?;

        // calamineに渡す前にZIPの構造を検証
        {
            let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
                .map_err(|e| TestSpecError::Zip(e.to_string()))?;
            security.check_archive(&mut archive)?;
        }

        let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
            .map_err(|e: calamine::XlsxError| TestSpecError::Parse(e.into()))?;

        Ok(Self { workbook })
    }

    /// すべてのシート名をブック内の順序で取得
    pub fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names().to_vec()
    }

    /// 指定シートを読み込む
    ///
    /// calamineは先頭の空行・空列を省いた範囲を返すため、
    /// 元の行・列位置を保つように空セルで埋め戻します。
    pub fn read_sheet(&mut self, sheet_name: &str) -> Result<RawSheet, TestSpecError> {
        let range = self
            .workbook
            .worksheet_range(sheet_name)
            .map_err(|e: calamine::XlsxError| TestSpecError::Parse(e.into()))?;

        let (start_row, start_col) = range.start().unwrap_or((0, 0));

        let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(range.height() + start_row as usize);
        rows.extend((0..start_row).map(|_| Vec::new()));

        for row in range.rows() {
            let mut cells = vec![CellValue::Empty; start_col as usize];
            cells.extend(row.iter().map(convert_cell));
            rows.push(cells);
        }

        debug!(
            sheet = sheet_name,
            rows = rows.len(),
            "Loaded sheet"
        );

        Ok(RawSheet::new(sheet_name, rows))
    }

    /// すべてのシートをブック内の順序で読み込む
    pub fn read_all(&mut self) -> Result<Vec<RawSheet>, TestSpecError> {
        let names = self.sheet_names();
        let mut sheets = Vec::with_capacity(names.len());
        for name in &names {
            sheets.push(self.read_sheet(name)?);
        }
        Ok(sheets)
    }
}

/// calamineのセル値を内部表現に変換
fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::String(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::String(s.clone()),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::Empty => CellValue::Empty,
    }
}
