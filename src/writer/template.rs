//! Template Workbook
//!
//! テンプレートXLSXのアクティブシートにセル値を書き込む。
//! XLSXはZIPアーカイブ内のXMLなので、対象シートのXMLだけを書き換え、
//! それ以外のエントリ（書式、結合セル、印刷設定など）はそのまま残す。

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;
use zip::{ZipArchive, ZipWriter};

use crate::archive::entry_options;
use crate::error::TestSpecError;
use crate::security::SecurityConfig;
use crate::types::CellCoord;

const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";

/// 書き込む値
#[derive(Debug, Clone, PartialEq)]
enum CellWrite {
    Number(f64),
    Text(String),
}

impl CellWrite {
    /// 数値として書き戻しても表記が変わらない文字列だけを数値セルにする
    ///
    /// `007`, `1.50`, `+5`, `1e3`などは表記を保つため文字列のまま扱います。
    fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() && n.to_string() == trimmed => CellWrite::Number(n),
            _ => CellWrite::Text(value.to_string()),
        }
    }
}

/// 書き込み対象のテンプレートワークブック
///
/// セル値の書き込みはメモリ上に蓄積され、[`TemplateWorkbook::save_to_buffer`]で
/// 新しいXLSXとして出力されます。書き込まなかったセルはテンプレートの内容を保持します。
pub struct TemplateWorkbook {
    /// ZIPエントリ（元の順序）
    entries: Vec<(String, Vec<u8>)>,
    /// アクティブシートのXMLパス
    sheet_path: String,
    /// 書き込み予定のセル（0始まり座標）
    edits: BTreeMap<CellCoord, CellWrite>,
}

impl TemplateWorkbook {
    /// テンプレートのバイト列を開く
    ///
    /// # 戻り値
    ///
    /// * `Ok(TemplateWorkbook)` - 読み込みに成功した場合
    /// * `Err(TestSpecError::SecurityViolation)` - サイズ超過や危険なエントリパスを含む場合
    /// * `Err(TestSpecError::Zip)` / `Err(TestSpecError::Xml)` - XLSXとして読めない場合
    pub fn open(bytes: &[u8]) -> Result<Self, TestSpecError> {
        let security = SecurityConfig::default();
        security.check_upload_size(bytes.len())?;

        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_err)?;
        security.check_archive(&mut archive)?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(zip_err)?;
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)?;
            entries.push((file.name().to_string(), content));
        }

        let sheet_path = active_sheet_path(&entries)?;
        debug!(sheet = %sheet_path, "Opened template workbook");

        Ok(Self {
            entries,
            sheet_path,
            edits: BTreeMap::new(),
        })
    }

    /// アクティブシートのXMLパス（例: `xl/worksheets/sheet1.xml`）
    pub fn sheet_path(&self) -> &str {
        &self.sheet_path
    }

    /// セルに値を書き込む（1始まりの行・列）
    ///
    /// 同じセルへの再書き込みは後勝ちです。行・列が0の場合は無視します。
    pub fn write_cell(&mut self, row: u32, col: u32, value: &str) {
        if row == 0 || col == 0 {
            return;
        }
        self.edits
            .insert(CellCoord::new(row - 1, col - 1), CellWrite::from_text(value));
    }

    /// 書き込み予定のセル数
    pub fn pending_writes(&self) -> usize {
        self.edits.len()
    }

    /// 書き込みを反映したXLSXをバイト列として出力
    pub fn save_to_buffer(&self) -> Result<Vec<u8>, TestSpecError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (name, content) in &self.entries {
            if name.ends_with('/') {
                zip.add_directory(name.as_str(), entry_options())
                    .map_err(zip_err)?;
                continue;
            }

            zip.start_file(name.as_str(), entry_options())
                .map_err(zip_err)?;
            if *name == self.sheet_path {
                zip.write_all(&patch_sheet(content, &self.edits)?)?;
            } else {
                zip.write_all(content)?;
            }
        }

        let cursor = zip.finish().map_err(zip_err)?;
        Ok(cursor.into_inner())
    }
}

/// アクティブシートのXMLパスを求める
///
/// `workbookView`の`activeTab`（省略時0）番目の`sheet`からリレーションIDを取り、
/// `workbook.xml.rels`でターゲットパスに解決します。
fn active_sheet_path(entries: &[(String, Vec<u8>)]) -> Result<String, TestSpecError> {
    let workbook = find_entry(entries, WORKBOOK_PATH)?;
    let rels = find_entry(entries, WORKBOOK_RELS_PATH)?;

    let mut reader = Reader::from_reader(workbook);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut active_tab = 0usize;
    let mut sheet_ids: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbookView" => {
                    if let Some(tab) = attribute(&e, b"activeTab")? {
                        active_tab = tab.parse().unwrap_or(0);
                    }
                }
                b"sheet" => {
                    if let Some(id) = attribute(&e, b"r:id")? {
                        sheet_ids.push(id);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let sheet_id = sheet_ids
        .get(active_tab)
        .or_else(|| sheet_ids.first())
        .ok_or_else(|| TestSpecError::Xml("Template workbook has no sheets".to_string()))?;

    let mut reader = Reader::from_reader(rels);
    reader.trim_text(true);
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if attribute(&e, b"Id")?.as_deref() == Some(sheet_id.as_str()) {
                    let target = attribute(&e, b"Target")?.ok_or_else(|| {
                        TestSpecError::Xml(format!("Relationship '{}' has no target", sheet_id))
                    })?;
                    return Ok(resolve_target(&target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(TestSpecError::Xml(format!(
        "Worksheet relationship '{}' not found",
        sheet_id
    )))
}

/// リレーションのターゲットをアーカイブ内のパスにする
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn find_entry<'a>(entries: &'a [(String, Vec<u8>)], path: &str) -> Result<&'a [u8], TestSpecError> {
    entries
        .iter()
        .find(|(name, _)| name == path)
        .map(|(_, content)| content.as_slice())
        .ok_or_else(|| TestSpecError::Xml(format!("Template is missing '{}'", path)))
}

/// 属性値を文字列で取得
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, TestSpecError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == key {
            let raw = std::str::from_utf8(&attr.value).map_err(xml_err)?;
            let value = quick_xml::escape::unescape(raw).map_err(xml_err)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// シートXMLに書き込みを反映する
///
/// 既存のセルは値だけを置き換え、スタイル（`s`属性）を引き継ぎます。
/// 存在しない行・セルは行番号・列番号の順序を保つ位置に挿入します。
fn patch_sheet(xml: &[u8], edits: &BTreeMap<CellCoord, CellWrite>) -> Result<Vec<u8>, TestSpecError> {
    // 1始まりの行番号 -> (列番号 -> 値)
    let mut rows: BTreeMap<u32, BTreeMap<u32, &CellWrite>> = BTreeMap::new();
    for (coord, value) in edits {
        rows.entry(coord.row + 1)
            .or_default()
            .insert(coord.col + 1, value);
    }

    let mut patcher = SheetPatcher {
        writer: Writer::new(Vec::with_capacity(xml.len())),
        rows,
        current: None,
        prefix: String::new(),
    };

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_sheet_data = false;
    let mut last_row = 0u32;
    let mut last_col = 0u32;
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf).map_err(xml_err)?;

        // 置き換え対象セルの元の中身（<v>, <f>, <is>）は読み飛ばす
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = true;
                patcher.prefix = element_prefix(&e);
                patcher.write(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                patcher.prefix = element_prefix(&e);
                let end = e.to_end().into_owned();
                patcher.write(Event::Start(e))?;
                patcher.write_rows_before(u32::MAX)?;
                patcher.write(Event::End(end))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = false;
                patcher.write_rows_before(u32::MAX)?;
                patcher.write(Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let row = row_number(&e, last_row)?;
                last_row = row;
                last_col = 0;
                patcher.write_rows_before(row)?;
                match patcher.rows.remove(&row) {
                    Some(cells) => {
                        patcher.write(Event::Start(without_spans(&e)?))?;
                        patcher.current = Some((row, cells));
                    }
                    None => patcher.write(Event::Start(e))?,
                }
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let row = row_number(&e, last_row)?;
                last_row = row;
                patcher.write_rows_before(row)?;
                match patcher.rows.remove(&row) {
                    Some(cells) => {
                        patcher.write(Event::Start(without_spans(&e)?))?;
                        for (col, value) in cells {
                            patcher.write_cell(row, col, None, value)?;
                        }
                        patcher.write(Event::End(e.to_end()))?;
                    }
                    None => patcher.write(Event::Empty(e))?,
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"row" && patcher.current.is_some() => {
                patcher.write_cells_before(u32::MAX)?;
                patcher.current = None;
                patcher.write(Event::End(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" && patcher.current.is_some() => {
                let col = cell_column(&e, last_col)?;
                last_col = col;
                if patcher.replace_cell(col, &e)? {
                    skip_depth = 1;
                } else {
                    patcher.write(Event::Start(e))?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" && patcher.current.is_some() => {
                let col = cell_column(&e, last_col)?;
                last_col = col;
                if !patcher.replace_cell(col, &e)? {
                    patcher.write(Event::Empty(e))?;
                }
            }
            other => patcher.write(other)?,
        }
        buf.clear();
    }

    Ok(patcher.writer.into_inner())
}

/// シートXMLの書き換え状態
struct SheetPatcher<'e> {
    writer: Writer<Vec<u8>>,
    /// まだ出力していない行
    rows: BTreeMap<u32, BTreeMap<u32, &'e CellWrite>>,
    /// 書き換え中の行とその残りのセル
    current: Option<(u32, BTreeMap<u32, &'e CellWrite>)>,
    /// `sheetData`要素の名前空間プレフィックス（`x:`など）
    prefix: String,
}

impl<'e> SheetPatcher<'e> {
    fn write(&mut self, event: Event<'_>) -> Result<(), TestSpecError> {
        self.writer.write_event(event).map_err(xml_err)
    }

    fn name(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    /// 指定行より前の未出力行を新しい行として出力
    fn write_rows_before(&mut self, row: u32) -> Result<(), TestSpecError> {
        while let Some(entry) = self.rows.first_entry() {
            if *entry.key() >= row {
                break;
            }
            let (number, cells) = entry.remove_entry();
            let number_text = number.to_string();
            let mut start = BytesStart::new(self.name("row"));
            start.push_attribute(("r", number_text.as_str()));
            let end = start.to_end().into_owned();
            self.write(Event::Start(start))?;
            for (col, value) in cells {
                self.write_cell(number, col, None, value)?;
            }
            self.write(Event::End(end))?;
        }
        Ok(())
    }

    /// 書き換え中の行で、指定列より前の未出力セルを出力
    fn write_cells_before(&mut self, col: u32) -> Result<(), TestSpecError> {
        let Some((row, mut cells)) = self.current.take() else {
            return Ok(());
        };
        while let Some(entry) = cells.first_entry() {
            if *entry.key() >= col {
                break;
            }
            let (c, value) = entry.remove_entry();
            self.write_cell(row, c, None, value)?;
        }
        self.current = Some((row, cells));
        Ok(())
    }

    /// 既存セルを置き換える場合は新しいセルを出力して`true`を返す
    fn replace_cell(&mut self, col: u32, original: &BytesStart<'_>) -> Result<bool, TestSpecError> {
        self.write_cells_before(col)?;
        let Some((row, cells)) = self.current.as_mut() else {
            return Ok(false);
        };
        let row = *row;
        match cells.remove(&col) {
            Some(value) => {
                let style = attribute(original, b"s")?;
                self.write_cell(row, col, style.as_deref(), value)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// セル要素を出力
    fn write_cell(
        &mut self,
        row: u32,
        col: u32,
        style: Option<&str>,
        value: &CellWrite,
    ) -> Result<(), TestSpecError> {
        let reference = CellCoord::new(row - 1, col - 1).to_a1_notation();
        let mut cell = BytesStart::new(self.name("c"));
        cell.push_attribute(("r", reference.as_str()));
        if let Some(style) = style {
            cell.push_attribute(("s", style));
        }

        let cell_end = cell.to_end().into_owned();
        match value {
            CellWrite::Number(n) => {
                let text = n.to_string();
                self.write(Event::Start(cell))?;
                self.write(Event::Start(BytesStart::new(self.name("v"))))?;
                self.write(Event::Text(BytesText::new(&text)))?;
                self.write(Event::End(BytesEnd::new(self.name("v"))))?;
            }
            CellWrite::Text(text) => {
                cell.push_attribute(("t", "inlineStr"));
                self.write(Event::Start(cell))?;
                self.write(Event::Start(BytesStart::new(self.name("is"))))?;
                let mut t = BytesStart::new(self.name("t"));
                t.push_attribute(("xml:space", "preserve"));
                self.write(Event::Start(t))?;
                self.write(Event::Text(BytesText::new(text)))?;
                self.write(Event::End(BytesEnd::new(self.name("t"))))?;
                self.write(Event::End(BytesEnd::new(self.name("is"))))?;
            }
        }
        self.write(Event::End(cell_end))
    }
}

/// 要素名の名前空間プレフィックス（区切りの`:`を含む）
fn element_prefix(e: &BytesStart<'_>) -> String {
    let name = e.name();
    let full = name.as_ref();
    let local = e.local_name().as_ref().len();
    String::from_utf8_lossy(&full[..full.len() - local]).into_owned()
}

/// 行番号（`r`属性、省略時は直前の行の次）
fn row_number(e: &BytesStart<'_>, last_row: u32) -> Result<u32, TestSpecError> {
    match attribute(e, b"r")? {
        Some(r) => r
            .parse()
            .map_err(|_| TestSpecError::Xml(format!("Invalid row number: '{}'", r))),
        None => Ok(last_row + 1),
    }
}

/// 列番号（`r`属性のA1参照から、省略時は直前のセルの次）
fn cell_column(e: &BytesStart<'_>, last_col: u32) -> Result<u32, TestSpecError> {
    match attribute(e, b"r")? {
        Some(r) => CellCoord::from_a1_notation(&r)
            .map(|coord| coord.col + 1)
            .ok_or_else(|| TestSpecError::Xml(format!("Invalid cell reference: '{}'", r))),
        None => Ok(last_col + 1),
    }
}

/// `spans`属性を除いた行要素（挿入したセルで範囲が変わるため）
fn without_spans(e: &BytesStart<'_>) -> Result<BytesStart<'static>, TestSpecError> {
    let mut row = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() != b"spans" {
            row.push_attribute(attr);
        }
    }
    Ok(row)
}

fn xml_err(e: impl std::fmt::Display) -> TestSpecError {
    TestSpecError::Xml(e.to_string())
}

fn zip_err(e: zip::result::ZipError) -> TestSpecError {
    TestSpecError::Zip(e.to_string())
}
