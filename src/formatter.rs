//! Formatter Module
//!
//! セル値を文字列に変換するモジュール。
//! Markdown表に埋め込む場合はエスケープを行い、AIに渡す平文では行いません。
//! URLパスやヘッダー値に使うパーセントエンコードもここに置いています。

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::types::CellValue;

/// セルフォーマッター
///
/// セル値のフォーマット処理のファサードとして機能します。
#[derive(Debug, Default)]
pub(crate) struct CellFormatter {
    /// 日付フォーマッター
    date_formatter: DateFormatter,
}

impl CellFormatter {
    /// 新しいCellFormatterインスタンスを生成
    pub fn new() -> Self {
        Self {
            date_formatter: DateFormatter,
        }
    }

    /// Markdown表のセルとしてフォーマット
    pub fn format_cell(&self, value: &CellValue) -> String {
        match value {
            CellValue::String(s) => self.escape_markdown(s.trim()),
            other => self.plain_text(other),
        }
    }

    /// エスケープなしの平文としてフォーマット
    ///
    /// 数値は整数値なら小数点なしで出力します（`1.0` -> `1`）。
    pub fn plain_text(&self, value: &CellValue) -> String {
        match value {
            CellValue::Number(n) => n.to_string(),
            CellValue::String(s) => s.clone(),
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::DateTime(serial) => self
                .date_formatter
                .format(*serial)
                .unwrap_or_else(|| serial.to_string()),
            CellValue::Error(e) => e.clone(),
            CellValue::Empty => String::new(),
        }
    }

    /// Markdown特殊文字をエスケープ
    fn escape_markdown(&self, s: &str) -> String {
        s.replace('\\', "\\\\")
            .replace('|', "\\|")
            .replace("\r\n", "<br>")
            .replace('\n', "<br>")
    }
}

/// 日付フォーマッター
///
/// Excelのシリアル日付値（1900年システム）を文字列に変換します。
#[derive(Debug, Default)]
pub(crate) struct DateFormatter;

impl DateFormatter {
    /// シリアル値をフォーマット
    ///
    /// 時刻部分がなければ`YYYY-MM-DD`、あれば`YYYY-MM-DD HH:MM:SS`を返します。
    /// 1899-12-30起算で、1900年3月1日以降の値はExcelの表示と一致します。
    ///
    /// # 戻り値
    ///
    /// * `Some(String)` - フォーマット済み文字列
    /// * `None` - 日付として表現できない値（負値、桁あふれ）
    pub fn format(&self, serial_value: f64) -> Option<String> {
        // 2958465 = 9999-12-31
        if !serial_value.is_finite() || !(0.0..2_958_466.0).contains(&serial_value) {
            return None;
        }

        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
        let days = serial_value.trunc() as i64;
        let seconds = ((serial_value - serial_value.trunc()) * 86_400.0).round() as i64;
        let datetime: NaiveDateTime = epoch
            .checked_add_signed(Duration::days(days))?
            .checked_add_signed(Duration::seconds(seconds))?;

        if datetime.num_seconds_from_midnight() == 0 {
            Some(datetime.format("%Y-%m-%d").to_string())
        } else {
            Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
        }
    }
}

/// RFC 3986の非予約文字以外をパーセントエンコードする
pub(crate) fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}
