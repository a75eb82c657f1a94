//! Parser Module
//!
//! calamineを使用してアップロードされたワークブックを読み込み、
//! シート単位の生データ（`RawSheet`）に変換します。

mod workbook;

pub use workbook::WorkbookParser;
