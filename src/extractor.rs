//! Markdown Table Extractor
//!
//! LLMが出力したMarkdown表を行データに戻すモジュール。
//! ステージ間は平文でやり取りするため、構造を復元するのはこのモジュールだけです。
//!
//! # 処理フロー
//!
//! 1. 前後の空白を除いて`|`で始まる行だけを拾う（前後の文章は無視）
//! 2. 外側の`|`を外し、セル区切りの`|`をタブに置き換える（`\|`はセル内の`|`）
//! 3. 罫線行（`|---|:---:|`）を除く
//! 4. 1行目をヘッダーとしてタブ区切りデータを読み、スキーマの列がそろっているか検証

use csv::{ReaderBuilder, Trim};
use tracing::debug;

use crate::api::TestSpecSchema;
use crate::error::TestSpecError;

/// テスト仕様表の1行
///
/// スキーマの列名と値の組をスキーマの列順で保持します。
/// 空のセルは保持しません（テンプレート側の値を残すため）。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestRow {
    values: Vec<(&'static str, String)>,
}

impl TestRow {
    /// 列の値を取得（空セルは`None`）
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value.as_str())
    }

    /// 値を持つ列を列順に走査
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.values.iter().map(|(name, value)| (*name, value.as_str()))
    }

    /// 値を持つ列の数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// すべての列が空かどうか
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 抽出結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTable {
    /// 検証に使ったスキーマ
    pub schema: TestSpecSchema,

    /// 表の本体（出現順）
    pub rows: Vec<TestRow>,
}

impl TestTable {
    /// 行数
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 行がひとつもないかどうか
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Markdownテキストから表を抽出し、スキーマで検証する
///
/// # 引数
///
/// * `markdown` - LLMの出力（表の前後に文章があってもよい）
/// * `schema` - 期待する列構成
///
/// # 戻り値
///
/// * `Ok(TestTable)` - 抽出に成功した場合
/// * `Err(TestSpecError::MissingTable)` - `|`で始まる行がひとつもない場合
/// * `Err(TestSpecError::SchemaMismatch)` - スキーマの列が不足している場合（不足列をすべて含む）
///
/// # 使用例
///
/// ```rust
/// use xlsxtestspec::{extract_table, TestSpecSchema};
///
/// let markdown = "| No | 区分 | テストケース | 期待結果 |\n\
///                 |---|---|---|---|\n\
///                 | 1 | 初期表示 | 画面を開く | 入力欄が空白で表示されること |";
/// let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
/// assert_eq!(table.rows.len(), 1);
/// assert_eq!(table.rows[0].get("No"), Some("1"));
/// ```
pub fn extract_table(markdown: &str, schema: TestSpecSchema) -> Result<TestTable, TestSpecError> {
    let lines: Vec<Vec<String>> = markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .map(split_cells)
        .collect();

    if lines.is_empty() {
        return Err(TestSpecError::MissingTable);
    }

    let block = lines
        .iter()
        .filter(|cells| !is_rule_row(cells))
        .map(|cells| cells.join("\t"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(block.as_bytes());

    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let missing: Vec<String> = schema
        .columns()
        .iter()
        .filter(|column| !header.iter().any(|h| h == *column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TestSpecError::SchemaMismatch { missing });
    }

    // スキーマ列ごとのヘッダー上の位置（重複ヘッダーは先頭を採用）
    let positions: Vec<(&'static str, usize)> = schema
        .columns()
        .iter()
        .filter_map(|column| {
            header
                .iter()
                .position(|h| h == column)
                .map(|pos| (*column, pos))
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let values: Vec<(&'static str, String)> = positions
            .iter()
            .filter_map(|(column, pos)| {
                record
                    .get(*pos)
                    .filter(|value| !value.is_empty())
                    .map(|value| (*column, restore_line_breaks(value)))
            })
            .collect();

        if !values.is_empty() {
            rows.push(TestRow { values });
        }
    }

    debug!(rows = rows.len(), columns = header.len(), "Extracted test table");

    Ok(TestTable { schema, rows })
}

/// 1行をセルに分割する
///
/// 外側の`|`を取り除き、エスケープされていない`|`で区切ります。
/// セル内のタブは区切り文字と衝突するため空白に置き換えます。
fn split_cells(line: &str) -> Vec<String> {
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = match inner.strip_suffix('|') {
        Some(rest) if !rest.ends_with('\\') => rest,
        _ => inner,
    };

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                current.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current)),
            '\t' => current.push(' '),
            _ => current.push(c),
        }
    }
    cells.push(current);
    cells
}

/// 罫線行（ダッシュとコロンだけのセル、または空セルのみ）かどうか
fn is_rule_row(cells: &[String]) -> bool {
    let mut has_rule = false;
    for cell in cells {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let dashes = cell.trim_start_matches(':').trim_end_matches(':');
        if dashes.is_empty() || !dashes.chars().all(|c| c == '-') {
            return false;
        }
        has_rule = true;
    }
    has_rule
}

/// セル内改行として出力された`<br>`を改行に戻す
fn restore_line_breaks(value: &str) -> String {
    value
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_TABLE: &str = "| No | 区分 | テストケース | 期待結果 |\n\
                                |---|---|---|---|\n\
                                | 1 | 初期表示 | 画面を開く | 入力欄が空白で表示されること |";

    #[test]
    fn test_extract_single_row() {
        let table = extract_table(LEGACY_TABLE, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.get("No"), Some("1"));
        assert_eq!(row.get("区分"), Some("初期表示"));
        assert_eq!(row.get("テストケース"), Some("画面を開く"));
        assert_eq!(row.get("期待結果"), Some("入力欄が空白で表示されること"));
    }

    #[test]
    fn test_surrounding_prose_is_ignored() {
        let markdown = format!(
            "以下がテスト仕様書です。\n\n{}\n\n以上です。確認してください。",
            LEGACY_TABLE
        );
        let table = extract_table(&markdown, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_indented_lines_are_accepted() {
        let markdown = "  | No | 区分 | テストケース | 期待結果 |\n  | --- | --- | --- | --- |\n  | 1 | a | b | c |";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.rows[0].get("期待結果"), Some("c"));
    }

    #[test]
    fn test_separator_variants_do_not_become_rows() {
        let markdown = "| No | 区分 | テストケース | 期待結果 |\n\
                        |:---|:---:|---:|-|\n\
                        | 1 | a | b | c |\n\
                        | --- | --- | --- | --- |\n\
                        | 2 | d | e | f |";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[1].get("No"), Some("2"));
    }

    #[test]
    fn test_missing_table() {
        let result = extract_table("表を生成できませんでした。", TestSpecSchema::Legacy);
        assert!(matches!(result, Err(TestSpecError::MissingTable)));
    }

    #[test]
    fn test_schema_mismatch_names_all_missing_columns() {
        let markdown = "| No | 区分 | 手順 |\n|---|---|---|\n| 1 | a | b |";
        match extract_table(markdown, TestSpecSchema::Legacy) {
            Err(TestSpecError::SchemaMismatch { missing }) => {
                assert_eq!(missing, vec!["テストケース", "期待結果"]);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_traceable_schema() {
        let markdown = "| No | 大分類 | 中分類 | テストケース | 期待結果 | トレース元 |\n\
                        |----|----|----|----|----|----|\n\
                        | 1 | 初期処理 | 入力チェック | 必須項目を未入力で登録 | エラーが表示されること | 処理詳細仕様(初期処理) |\n\
                        | 2 |  |  | 全項目を入力して登録 | 登録されること | 処理詳細仕様(初期処理) |";
        let table = extract_table(markdown, TestSpecSchema::Traceable).unwrap();
        assert_eq!(table.len(), 2);
        // 省略された分類は空として扱う
        assert_eq!(table.rows[1].get("大分類"), None);
        assert_eq!(table.rows[1].get("中分類"), None);
        assert_eq!(table.rows[1].len(), 4);

        // 4列スキーマの検証は通らない
        assert!(matches!(
            extract_table(LEGACY_TABLE, TestSpecSchema::Traceable),
            Err(TestSpecError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let markdown = "| No | 備考 | 区分 | テストケース | 期待結果 |\n|---|---|---|---|---|\n| 1 | x | a | b | c |";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        let columns: Vec<&str> = table.rows[0].iter().map(|(name, _)| name).collect();
        assert_eq!(columns, vec!["No", "区分", "テストケース", "期待結果"]);
    }

    #[test]
    fn test_escaped_pipe_and_line_breaks() {
        let markdown = "| No | 区分 | テストケース | 期待結果 |\n|---|---|---|---|\n\
                        | 1 | a | A\\|Bを入力 | 1行目<br>2行目 |";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.rows[0].get("テストケース"), Some("A|Bを入力"));
        assert_eq!(table.rows[0].get("期待結果"), Some("1行目\n2行目"));
    }

    #[test]
    fn test_short_rows_and_blank_rows() {
        let markdown = "| No | 区分 | テストケース | 期待結果 |\n|---|---|---|---|\n\
                        | 1 | a |\n\
                        |  |  |  |  |\n\
                        | 2 | b | c | d |";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].get("テストケース"), None);
        assert_eq!(table.rows[1].get("No"), Some("2"));
    }

    #[test]
    fn test_header_only_table() {
        let markdown = "| No | 区分 | テストケース | 期待結果 |\n|---|---|---|---|";
        let table = extract_table(markdown, TestSpecSchema::Legacy).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_integration_schema() {
        let markdown = "| No | シナリオ | 画面遷移 | 操作手順 | テストデータ | 期待結果 |\n\
                        |---|---|---|---|---|---|\n\
                        | 1 | 新規登録 | ログイン → 一覧 → 登録 | 登録ボタンを押下 | 氏名: 山田太郎 | 一覧に表示されること |";
        let table = extract_table(markdown, TestSpecSchema::Integration).unwrap();
        assert_eq!(table.rows[0].get("テストデータ"), Some("氏名: 山田太郎"));
    }

    #[test]
    fn test_split_cells() {
        assert_eq!(split_cells("| a | b |"), vec![" a ", " b "]);
        assert_eq!(split_cells("|a|b"), vec!["a", "b"]);
        assert_eq!(split_cells("| a \\|"), vec![" a |"]);
    }

    #[test]
    fn test_is_rule_row() {
        let cells = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(is_rule_row(&cells(&["---", " :--: ", "--:"])));
        assert!(!is_rule_row(&cells(&["---", "a"])));
        assert!(!is_rule_row(&cells(&["", ""])));
        assert!(!is_rule_row(&cells(&["-1", "---"])));
    }
}
