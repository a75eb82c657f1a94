//! Sheet Cleaner Module
//!
//! 不揃いなシートデータを、ヘッダー行と本体を持つ表形式に正規化する。
//! このモジュールは呼び出し元にエラーを返さない。ヘッダー推定が失敗した場合は、
//! 空行・空列を除いただけのヘッダーなしの表に戻す。

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::api::HeaderPolicy;
use crate::formatter::CellFormatter;
use crate::types::{CellCoord, CellValue, CleanTable, RawSheet};

/// ヘッダー候補として走査する先頭行数
const HEADER_SCAN_ROWS: usize = 5;

/// ヘッダー昇格後にこの割合を下回るほど行が減ったら昇格を取り消す
const MIN_RETAINED_RATIO: f64 = 0.2;

/// 行数がこの値以下のシートには残存率チェックを適用しない
const RATIO_CHECK_MIN_ROWS: usize = 5;

/// 空行・空列を除去した中間データ
struct PrunedGrid {
    /// 残った行（各行の長さは`cols.len()`）
    rows: Vec<Vec<CellValue>>,
    /// 残った列の元の列インデックス
    cols: Vec<u32>,
}

/// シートクレンジング
#[derive(Debug, Default)]
pub struct SheetCleaner {
    policy: HeaderPolicy,
    formatter: CellFormatter,
}

impl SheetCleaner {
    /// ヘッダー検出方式を指定して生成
    pub fn new(policy: HeaderPolicy) -> Self {
        Self {
            policy,
            formatter: CellFormatter::new(),
        }
    }

    /// シートを正規化する
    ///
    /// # 処理フロー
    ///
    /// 1. 全セルが空の列・行を除去し、その時点の行数を記録
    /// 2. ヘッダー行を決定して列名に昇格
    /// 3. 列名が空の列と、全セルが空の本体行を除去
    /// 4. 本体が空、または元の行数の20%未満（元が5行超のとき）なら昇格を破棄
    /// 5. 残った空セルを空文字列に置換
    pub fn clean(&self, sheet: &RawSheet) -> CleanTable {
        let pruned = Self::prune(sheet);
        let rows_before_header = pruned.rows.len();

        if rows_before_header == 0 {
            debug!(sheet = %sheet.name, "Sheet is empty after pruning");
            return CleanTable::default();
        }

        let promoted = self
            .promote_header(&pruned)
            .filter(|table| !Self::shrank_too_much(rows_before_header, table.rows.len()));

        let table = match promoted {
            Some(table) => table,
            None => {
                warn!(
                    sheet = %sheet.name,
                    rows = rows_before_header,
                    "Header promotion discarded; keeping headerless data"
                );
                Self::headerless(pruned)
            }
        };

        Self::finalize(table)
    }

    /// 全セルが空の列・行を除去
    fn prune(sheet: &RawSheet) -> PrunedGrid {
        let col_count = sheet.col_count();
        let cols: Vec<u32> = (0..col_count)
            .filter(|&c| (0..sheet.row_count()).any(|r| !sheet.cell(r, c).is_empty()))
            .map(|c| c as u32)
            .collect();

        let rows = (0..sheet.row_count())
            .filter(|&r| sheet.rows[r].iter().any(|cell| !cell.is_empty()))
            .map(|r| {
                cols.iter()
                    .map(|&c| sheet.cell(r, c as usize).clone())
                    .collect()
            })
            .collect();

        PrunedGrid { rows, cols }
    }

    /// ヘッダー行のインデックスを決定
    fn header_index(&self, rows: &[Vec<CellValue>]) -> usize {
        match self.policy {
            HeaderPolicy::Fixed => 0,
            HeaderPolicy::Scan => rows
                .iter()
                .take(HEADER_SCAN_ROWS)
                .enumerate()
                .min_by_key(|(_, row)| row.iter().filter(|c| c.is_empty()).count())
                .map(|(idx, _)| idx)
                .unwrap_or(0),
        }
    }

    /// ヘッダー行を列名に昇格する
    ///
    /// 列名として使える列がひとつもない場合は`None`を返します。
    fn promote_header(&self, pruned: &PrunedGrid) -> Option<CleanTable> {
        let header_idx = self.header_index(&pruned.rows);
        let header_row = pruned.rows.get(header_idx)?;

        let mut seen = HashSet::new();
        let kept: Vec<(usize, String)> = header_row
            .iter()
            .enumerate()
            .filter_map(|(pos, cell)| {
                let name = self.formatter.plain_text(cell).trim().to_string();
                if name.is_empty() || !seen.insert(name.clone()) {
                    None
                } else {
                    Some((pos, name))
                }
            })
            .collect();

        if kept.is_empty() {
            return None;
        }

        let rows: Vec<Vec<CellValue>> = pruned.rows[header_idx + 1..]
            .iter()
            .map(|row| kept.iter().map(|(pos, _)| row[*pos].clone()).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .collect();

        Some(CleanTable {
            header: kept.into_iter().map(|(_, name)| name).collect(),
            rows,
        })
    }

    /// ヘッダー昇格で行が減りすぎたかどうか
    fn shrank_too_much(rows_before: usize, rows_after: usize) -> bool {
        rows_after == 0
            || (rows_before > RATIO_CHECK_MIN_ROWS
                && (rows_after as f64) < rows_before as f64 * MIN_RETAINED_RATIO)
    }

    /// ヘッダーなしの表を作る（列名は元の列記号）
    fn headerless(pruned: PrunedGrid) -> CleanTable {
        CleanTable {
            header: pruned
                .cols
                .iter()
                .map(|&c| CellCoord::col_index_to_letter(c))
                .collect(),
            rows: pruned.rows,
        }
    }

    /// 空セルを空文字列に置換
    fn finalize(mut table: CleanTable) -> CleanTable {
        for row in &mut table.rows {
            for cell in row.iter_mut() {
                if cell.is_empty() {
                    *cell = CellValue::String(String::new());
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> CellValue {
        if v.is_empty() {
            CellValue::Empty
        } else {
            CellValue::String(v.to_string())
        }
    }

    fn sheet(rows: &[&[&str]]) -> RawSheet {
        RawSheet::new(
            "Sheet1",
            rows.iter()
                .map(|row| row.iter().map(|v| s(v)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_empty_sheet() {
        let cleaner = SheetCleaner::new(HeaderPolicy::Fixed);
        let table = cleaner.clean(&RawSheet::new("Empty", vec![]));
        assert!(table.is_empty());
        assert!(table.header.is_empty());

        let blank = sheet(&[&["", ""], &["", ""]]);
        assert!(cleaner.clean(&blank).is_empty());
    }

    #[test]
    fn test_fixed_header_with_empty_rows_and_cols() {
        let raw = sheet(&[
            &["", "", "", ""],
            &["", "No", "", "項目"],
            &["", "1", "", "氏名"],
            &["", "", "", ""],
            &["", "2", "", "住所"],
        ]);
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["No", "項目"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec![s("2"), s("住所")]);
    }

    #[test]
    fn test_scan_picks_row_with_fewest_empty_cells() {
        let raw = sheet(&[
            &["画面設計書", "", ""],
            &["作成者", "山田", ""],
            &["ID", "名称", "型"],
            &["1", "氏名", "文字列"],
            &["2", "年齢", "数値"],
        ]);
        let table = SheetCleaner::new(HeaderPolicy::Scan).clean(&raw);
        assert_eq!(table.header, vec!["ID", "名称", "型"]);
        // ヘッダーより上の行は本体に含めない
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][1], s("氏名"));
    }

    #[test]
    fn test_scan_tie_prefers_first_row() {
        let raw = sheet(&[&["A", "B"], &["1", "2"], &["3", "4"]]);
        let table = SheetCleaner::new(HeaderPolicy::Scan).clean(&raw);
        assert_eq!(table.header, vec!["A", "B"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_blank_and_duplicate_header_columns_dropped() {
        let raw = sheet(&[
            &["名称", "", "名称", "備考"],
            &["a", "x", "b", "c"],
        ]);
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["名称", "備考"]);
        assert_eq!(table.rows, vec![vec![s("a"), s("c")]]);
    }

    #[test]
    fn test_guard_reverts_when_body_empty() {
        // ヘッダーのみのシートは本体が空になるため、昇格を破棄する
        let raw = sheet(&[&["only", "header"]]);
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["A", "B"]);
        assert_eq!(table.rows, vec![vec![s("only"), s("header")]]);
    }

    #[test]
    fn test_guard_reverts_when_body_shrinks_below_twenty_percent() {
        // 10行のうち、列名がある列にデータを持つ行は1行だけ
        let mut rows: Vec<Vec<CellValue>> = vec![vec![s("見出し"), CellValue::Empty]];
        rows.push(vec![s("値"), s("x")]);
        for i in 0..8 {
            rows.push(vec![CellValue::Empty, s(&format!("メモ{}", i))]);
        }
        let raw = RawSheet::new("Memo", rows);

        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        // 昇格前の10行がそのまま残る
        assert_eq!(table.rows.len(), 10);
        assert_eq!(table.header, vec!["A", "B"]);
        assert_eq!(table.rows[0][1], CellValue::String(String::new()));
    }

    #[test]
    fn test_guard_not_applied_to_small_sheets() {
        // 5行以下のシートは残存率チェックの対象外
        let raw = sheet(&[
            &["見出し", ""],
            &["値", "x"],
            &["", "メモ1"],
            &["", "メモ2"],
            &["", "メモ3"],
        ]);
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["見出し"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_fallback_uses_original_column_letters() {
        let raw = sheet(&[&["", "x", "", "y"]]);
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["B", "D"]);
    }

    #[test]
    fn test_numbers_stay_numbers() {
        let raw = RawSheet::new(
            "Numbers",
            vec![
                vec![s("No"), s("金額")],
                vec![CellValue::Number(1.0), CellValue::Number(1200.5)],
                vec![CellValue::Number(2.0), CellValue::Empty],
            ],
        );
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.rows[0][1], CellValue::Number(1200.5));
        assert_eq!(table.rows[1][1], CellValue::String(String::new()));
    }

    #[test]
    fn test_ragged_rows() {
        let raw = RawSheet::new(
            "Ragged",
            vec![
                vec![s("A"), s("B"), s("C")],
                vec![s("1")],
                vec![s("2"), s("3")],
            ],
        );
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header.len(), 3);
        assert!(table.rows.iter().all(|row| row.len() == 3));
    }

    #[test]
    fn test_prune_treats_missing_cells_as_empty() {
        let raw = RawSheet::new(
            "Ragged",
            vec![
                vec![s(""), s("項目")],
                vec![s("")],
                vec![s(""), s("氏名"), s("")],
            ],
        );
        let table = SheetCleaner::new(HeaderPolicy::Fixed).clean(&raw);
        assert_eq!(table.header, vec!["項目"]);
        assert_eq!(table.rows, vec![vec![s("氏名")]]);
    }
}
