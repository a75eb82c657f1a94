//! Types Module
//!
//! クレート全体で使用する共通データ型を定義するモジュール。

use serde::Serialize;

/// セルの値を表す列挙型
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// 数値（f64）
    Number(f64),

    /// 文字列
    String(String),

    /// 論理値
    Bool(bool),

    /// 日付・時刻（Excelシリアル値）
    DateTime(f64),

    /// エラー値（例: #DIV/0!）
    Error(String),

    /// 空セル
    Empty,
}

impl CellValue {
    /// 値が空かどうかを判定
    ///
    /// 空白のみの文字列も空として扱います。
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

/// セル座標（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    /// 新しい座標を生成
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// A1形式の文字列に変換（例: (0, 0) -> "A1"）
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        let col_str = Self::col_index_to_letter(self.col);
        format!("{}{}", col_str, self.row + 1)
    }

    /// A1形式の文字列から座標を生成（例: "B11" -> (10, 1)）
    pub fn from_a1_notation(reference: &str) -> Option<Self> {
        let split = reference.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = reference.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
            return None;
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            col = col.checked_mul(26)?.checked_add(c as u32 - 'A' as u32 + 1)?;
        }
        let row: u32 = digits.parse().ok()?;
        if row == 0 {
            return None;
        }

        Some(Self::new(row - 1, col - 1))
    }

    /// 列インデックスを文字列に変換（0 -> "A", 25 -> "Z", 26 -> "AA"）
    pub fn col_index_to_letter(mut col: u32) -> String {
        let mut result = String::new();
        loop {
            let remainder = col % 26;
            result.insert(0, (b'A' + remainder as u8) as char);
            if col < 26 {
                break;
            }
            col = col / 26 - 1;
        }
        result
    }
}

/// ワークブックから読み込んだ生のシート
///
/// シートの並び順がそのまま設計書のセクション順になります。
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    /// シート名
    pub name: String,

    /// セル値のグリッド（行 × 列）
    pub rows: Vec<Vec<CellValue>>,
}

impl RawSheet {
    /// 新しいシートを生成
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// 行数
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// 列数（最長の行に合わせる）
    pub fn col_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// 指定位置のセル値（範囲外は空セル）
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&CellValue::Empty)
    }
}

/// ヘッダー行と本体を持つ正規化済みテーブル
///
/// すべてのレコードはヘッダーと同じ列数を持ちます。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CleanTable {
    /// 列名（重複・空の列名は除外済み）
    pub header: Vec<String>,

    /// レコード（各行の長さは`header.len()`と一致）
    pub rows: Vec<Vec<CellValue>>,
}

impl CleanTable {
    /// データ行がないかどうか
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 1回のLLM応答（Markdown）と、それを生成したステージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineArtifact {
    /// 生成元ステージ
    pub stage: Stage,

    /// 応答本文
    pub body: String,
}

impl PipelineArtifact {
    /// 新しい成果物を生成
    pub fn new(stage: Stage, body: String) -> Self {
        Self { stage, body }
    }
}
