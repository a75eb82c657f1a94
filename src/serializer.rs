//! Sheet Serializer Module
//!
//! シートをMarkdownのセクションに変換し、目次付きの設計書にまとめる。

use std::collections::HashSet;
use std::fmt;

use unicode_width::UnicodeWidthStr;

use crate::cleaner::SheetCleaner;
use crate::formatter::CellFormatter;
use crate::types::{CleanTable, RawSheet};

/// クレンジング後にデータが残らなかったシートの本文
pub const EMPTY_SHEET_PLACEHOLDER: &str = "（このシートは空です）";

/// シート単位のAI構造化に失敗した場合の本文
pub const AI_FAILURE_PLACEHOLDER: &str = "（AIによる構造化に失敗しました）";

/// AI向け平文で同じ行のセルを区切る文字
const RAW_TEXT_CELL_SEPARATOR: &str = " ";

/// セクション区切り
const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// 目次の見出し
const TOC_HEADING: &str = "## 目次";

/// 見出しからアンカーを生成する
///
/// 前後の空白を除いて小文字化し、空白をハイフンに置換したうえで、
/// `[a-z0-9-]`以外の文字をすべて取り除きます。重複の解消は行いません。
///
/// # 使用例
///
/// ```rust
/// use xlsxtestspec::anchor;
///
/// assert_eq!(anchor("Screen List"), "screen-list");
/// assert_eq!(anchor("処理 詳細 (Rev.1)"), "--rev1");
/// ```
pub fn anchor(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect()
}

/// 設計書の1セクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSection {
    /// 見出し（シート名）
    pub heading: String,

    /// 見出しから生成したアンカー
    pub anchor: String,

    /// 本文（Markdown表、またはLLM出力）
    pub body: String,
}

impl DocumentSection {
    /// 新しいセクションを生成
    pub fn new(heading: impl Into<String>, body: impl Into<String>) -> Self {
        let heading = heading.into();
        Self {
            anchor: anchor(&heading),
            heading,
            body: body.into(),
        }
    }

    fn render(&self) -> String {
        format!("## {}\n\n{}", self.heading, self.body)
    }
}

/// 目次付きの設計書
///
/// 1回のアップロードにつき1度だけ組み立てられ、以降は平文として後続ステージに渡されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignDocument {
    /// タイトル（アップロードファイル名）
    pub title: String,

    /// シート順のセクション
    pub sections: Vec<DocumentSection>,
}

impl DesignDocument {
    /// セクションから設計書を組み立てる
    ///
    /// 同じアンカーが複数ある場合は、2つ目以降に`-1`, `-2`…を付けて一意にします。
    /// 付与後のアンカーが既存のものと衝突する場合は、空いている番号まで進めます。
    pub fn assemble(title: impl Into<String>, mut sections: Vec<DocumentSection>) -> Self {
        let mut used: HashSet<String> = HashSet::new();
        for section in &mut sections {
            let mut candidate = section.anchor.clone();
            let mut suffix = 1;
            while used.contains(&candidate) {
                candidate = format!("{}-{}", section.anchor, suffix);
                suffix += 1;
            }
            used.insert(candidate.clone());
            section.anchor = candidate;
        }

        Self {
            title: title.into(),
            sections,
        }
    }

    /// 目次行（`- [見出し](#アンカー)`）
    pub fn toc(&self) -> Vec<String> {
        self.sections
            .iter()
            .map(|s| format!("- [{}](#{})", s.heading, s.anchor))
            .collect()
    }
}

impl fmt::Display for DesignDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "# {}\n\n{}\n\n", self.title, TOC_HEADING)?;
        write!(f, "{}", self.toc().join("\n"))?;
        write!(f, "{}", SECTION_SEPARATOR)?;
        let bodies: Vec<String> = self.sections.iter().map(DocumentSection::render).collect();
        write!(f, "{}", bodies.join(SECTION_SEPARATOR))
    }
}

/// シートのシリアライザー
///
/// AIを使わない経路（クレンジング＋Markdown表）を担当します。
#[derive(Debug, Default)]
pub struct SheetSerializer {
    cleaner: SheetCleaner,
    formatter: CellFormatter,
}

impl SheetSerializer {
    /// クレンジング方式を指定して生成
    pub fn new(cleaner: SheetCleaner) -> Self {
        Self {
            cleaner,
            formatter: CellFormatter::new(),
        }
    }

    /// シートをクレンジングしてMarkdown表のセクションにする
    pub fn table_section(&self, sheet: &RawSheet) -> DocumentSection {
        let table = self.cleaner.clean(sheet);
        let body = if table.is_empty() {
            EMPTY_SHEET_PLACEHOLDER.to_string()
        } else {
            self.render_table(&table)
        };
        DocumentSection::new(&sheet.name, body)
    }

    /// シートをAIに渡す平文に変換する
    ///
    /// 行内のセルを空白で連結し、行を改行で連結します。空セルは空文字列になります。
    pub fn raw_text(&self, sheet: &RawSheet) -> String {
        sheet
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| self.formatter.plain_text(cell))
                    .collect::<Vec<_>>()
                    .join(RAW_TEXT_CELL_SEPARATOR)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// CleanTableをMarkdown表として出力
    ///
    /// 列幅は表示幅（全角文字は2）で揃えます。
    pub fn render_table(&self, table: &CleanTable) -> String {
        let header: Vec<String> = table
            .header
            .iter()
            .map(|h| self.formatter.format_cell(&h.as_str().into()))
            .collect();
        let body: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|row| row.iter().map(|c| self.formatter.format_cell(c)).collect())
            .collect();

        let col_widths = Self::calculate_column_widths(&header, &body);

        let mut lines = Vec::with_capacity(body.len() + 2);
        lines.push(Self::render_row(&header, &col_widths));
        lines.push(Self::generate_separator(&col_widths));
        for row in &body {
            lines.push(Self::render_row(row, &col_widths));
        }
        lines.join("\n")
    }

    /// 列ごとの最大表示幅（最小3）
    fn calculate_column_widths(header: &[String], body: &[Vec<String>]) -> Vec<usize> {
        let mut widths = vec![3; header.len()];
        for row in std::iter::once(header).chain(body.iter().map(Vec::as_slice)) {
            for (col_idx, content) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(col_idx) {
                    *width = (*width).max(content.width());
                }
            }
        }
        widths
    }

    fn render_row(cells: &[String], col_widths: &[usize]) -> String {
        let mut line = String::from("|");
        for (content, &width) in cells.iter().zip(col_widths) {
            line.push(' ');
            line.push_str(content);
            line.push_str(&" ".repeat(width.saturating_sub(content.width())));
            line.push_str(" |");
        }
        line
    }

    fn generate_separator(col_widths: &[usize]) -> String {
        let mut line = String::from("|");
        for &width in col_widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('|');
        }
        line
    }
}
