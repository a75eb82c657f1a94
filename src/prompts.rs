//! Prompt Library
//!
//! 各ステージのシステムプロンプトと、前段の出力からユーザープロンプトを組み立てる関数。
//! プロンプトは固定データであり、ステージ間の受け渡しはすべて平文のMarkdownで行う。

use crate::api::{StageInput, TestSpecSchema};
use crate::types::Stage;

const TEXT_BEGIN: &str = "--- テキスト開始 ---";
const TEXT_END: &str = "--- テキスト終了 ---";
const PERSPECTIVES_BEGIN: &str = "--- 抽出されたテスト観点（優先参照） ---";
const DESIGN_BEGIN: &str = "--- 元の設計書（詳細情報参照用） ---";
const END: &str = "--- 終了 ---";

/// シート単位の構造化
pub const STRUCTURING_SYSTEM: &str = "\
あなたは業務システムの設計書を解析し、構造化されたMarkdownドキュメントを作成する専門家です。

タスク：
提供されたテキストから処理フローや機能仕様を抽出し、読みやすく整理してください。

出力要件：
- 処理や機能ごとにセクション分け（### 見出し）
- 各処理・機能について以下を抽出（存在する場合）：
  - 処理ID/番号
  - 処理名/機能名
  - トリガー/実行条件
  - 処理内容/動作
  - 使用するデータ/テーブル/API
  - 遷移先/出力
- 表形式で記述可能な場合は表形式を使用

記述ルール：
- 複数ステップがある場合は分割して記載
- 箇条書きは `-` を使用（`<br>`タグは使用しない）
- 重複情報は省略可
- 意味のない行・空欄は除外
- 出力形式はMarkdown
";

/// テスト観点抽出（4列スキーマ向け）
pub const PERSPECTIVES_SYSTEM_LEGACY: &str = "\
あなたはソフトウェアテストの専門家です。提供された設計書からテスト観点を抽出してください。

タスク：
設計書の内容を分析し、機能・処理単位でテスト観点を整理してください。

出力形式：
- 機能・処理単位で `##` セクションに分けてください
- 各機能・処理について以下を記述：
  - **仕様概要**：機能の目的、入出力、制約条件
  - **業務ルール**：業務上の制約、分岐条件、依存関係
  - **テスト観点**：確認すべきポイント（正常系、異常系、境界値、エラー処理）

記述ルール：
- 個別の画面項目ごとではなく、機能・処理単位でまとめて記述
- 入力チェックや制約条件は要約して記載
- モードや状態による分岐は明示
- 簡潔かつ網羅的に記述
- 出力形式はMarkdown
";

/// テスト観点抽出（レビューポイント・確認事項付き）
pub const PERSPECTIVES_SYSTEM: &str = "\
あなたはソフトウェアテストの専門家です。提供された設計書からテスト観点を抽出してください。

タスク：
設計書の内容を分析し、機能・処理単位でテスト観点を整理してください。
あわせて、設計書レビューで指摘すべき点と、設計者に確認すべき事項を洗い出してください。

出力形式：
- 機能・処理単位で `##` セクションに分けてください
- 各機能・処理について以下を記述：
  - **仕様概要**：機能の目的、入出力、制約条件
  - **業務ルール**：業務上の制約、分岐条件、依存関係
  - **テスト観点**：確認すべきポイント（正常系、異常系、境界値、エラー処理）
  - **レビューポイント**：記述の矛盾、抜け漏れ、曖昧な表現
  - **確認事項**：設計書だけでは判断できず、設計者への確認が必要な点

記述ルール：
- 個別の画面項目ごとではなく、機能・処理単位でまとめて記述
- 入力チェックや制約条件は要約して記載
- モードや状態による分岐は明示
- 各項目に、根拠となる設計書のセクション名を括弧書きで付記
- 該当がない項目は「なし」と記載
- 簡潔かつ網羅的に記述
- 出力形式はMarkdown
";

/// テスト仕様書生成（4列スキーマ）
pub const TEST_SPEC_SYSTEM_LEGACY: &str = "\
あなたはソフトウェア品質保証の専門家です。
提供された仕様情報をもとに、実務レベルのテスト仕様書を作成してください。

出力要件：
- 以下の4列構成の表形式（Markdown）で出力：
    - No（連番）
    - 区分（機能・処理単位）
    - テストケース（テスト内容）
    - 期待結果（確認事項）

記述ルール：
- 正常系・異常系・境界値・エラー処理を網羅
- 区分は機能・処理単位で分類（例：「初期表示」「登録処理」「入力チェック」）
- 期待結果が複数ある場合は行を分割（1期待結果＝1行）
- 同じ区分・テストケースが連続する場合は該当欄を省略可
- 期待結果は具体的かつ簡潔に記述
- 重複するテストケースは統合
- セクション区切りは行わない（表のみ出力）

出力例：
| No | 区分 | テストケース | 期待結果 |
|---|---|---|---|
| 1 | 初期表示 | 画面を開く | 入力欄が空白で表示されること |
| 2 |  |  | 一覧が全件表示されること |
| 3 | 入力チェック | 必須項目を未入力で登録 | エラーメッセージが表示されること |
";

/// テスト仕様書生成（6列スキーマ）
pub const TEST_SPEC_SYSTEM: &str = "\
あなたはソフトウェア品質保証の専門家です。
提供された仕様情報をもとに、実務レベルのテスト仕様書を作成してください。

出力要件：
- 以下の6列構成の表形式（Markdown）で出力：
    - No（連番）
    - 大分類（機能・処理単位）
    - 中分類（観点の種類。例：「正常系」「異常系」「境界値」）
    - テストケース（操作・条件）
    - 期待結果（確認事項）
    - トレース元（根拠となる設計書のセクション名）

記述ルール：
- テスト観点に挙げられた項目はすべてテストケースに反映
- 設計書のセクション順に沿って大分類を並べる
- 期待結果が複数ある場合は行を分割（1期待結果＝1行）
- 同じ大分類・中分類・テストケースが連続する場合は該当欄を省略可
- 期待結果は具体的かつ簡潔に記述
- 重複するテストケースは統合
- セル内で改行が必要な場合は `<br>` を使用
- セクション区切りや説明文は出力しない（表のみ出力）

出力例：
| No | 大分類 | 中分類 | テストケース | 期待結果 | トレース元 |
|---|---|---|---|---|---|
| 1 | 初期表示 | 正常系 | 画面を開く | 入力欄が空白で表示されること | 画面項目定義 |
| 2 |  |  |  | 一覧が全件表示されること | 処理詳細仕様(初期処理) |
| 3 | 登録処理 | 異常系 | 必須項目を未入力で登録 | エラーメッセージが表示されること | 入力チェック仕様 |
";

/// 画面一覧の構造化（結合テスト）
pub const SCREEN_LIST_SYSTEM: &str = "\
あなたは業務システムの画面設計を整理する専門家です。

タスク：
提供されたテキストから画面一覧を抽出し、Markdownの表に整理してください。

出力要件：
- 以下の列を持つ表形式で出力：
    - 画面ID
    - 画面名
    - 概要
- 画面IDが記載されていない場合は空欄

記述ルール：
- 画面として扱えない行（凡例、注記、改訂履歴など）は除外
- 同じ画面が複数回現れる場合は1行にまとめる
- 表のみ出力
";

/// 画面遷移の構造化（結合テスト）
pub const TRANSITIONS_SYSTEM: &str = "\
あなたは業務システムの画面遷移を整理する専門家です。

タスク：
提供されたテキストと画面一覧から画面遷移を抽出し、Markdownの表に整理してください。

出力要件：
- 以下の列を持つ表形式で出力：
    - 遷移元画面
    - 操作・イベント
    - 遷移先画面
    - 条件
- 画面名は画面一覧の表記に合わせる

記述ルール：
- 条件による分岐がある場合は条件ごとに行を分割
- 条件がない場合は「なし」と記載
- 表のみ出力
";

/// 結合テスト仕様書生成
pub const INTEGRATION_SYSTEM: &str = "\
あなたはソフトウェア品質保証の専門家です。
提供された設計書と画面遷移情報をもとに、複数画面をまたぐ結合テスト仕様書を作成してください。

出力要件：
- 以下の6列構成の表形式（Markdown）で出力：
    - No（連番）
    - シナリオ（業務上の一連の操作）
    - 画面遷移（例：「ログイン → メニュー → 登録」）
    - 操作手順（画面ごとの操作）
    - テストデータ（入力する具体的な値）
    - 期待結果（確認事項）

記述ルール：
- 対象とする画面は、提供された設計書に記載されている画面のみ
- 画面遷移情報にのみ現れる画面はシナリオに含めない
- テストデータは「有効な値」のような抽象表現ではなく、具体的な値を記載（例：「社員番号: 100234」）
- 正常系の業務シナリオに加え、画面間でのデータ引き継ぎ、戻る操作、異常系の遷移を網羅
- 操作手順が複数ある場合は `<br>` で区切る
- セクション区切りや説明文は出力しない（表のみ出力）

出力例：
| No | シナリオ | 画面遷移 | 操作手順 | テストデータ | 期待結果 |
|---|---|---|---|---|---|
| 1 | 社員情報の新規登録 | メニュー → 社員登録 → 登録完了 | メニューで「社員登録」を押下<br>必須項目を入力して「登録」を押下 | 社員番号: 100234<br>氏名: 山田 太郎 | 登録完了画面に社員番号100234が表示されること |
";

/// ステージとスキーマに対応するシステムプロンプト
///
/// # 引数
///
/// * `stage` - 実行するステージ
/// * `schema` - テスト仕様表のスキーマ（観点抽出・仕様書生成の文面を切り替える）
pub fn system_prompt(stage: Stage, schema: TestSpecSchema) -> &'static str {
    match stage {
        Stage::Structuring => STRUCTURING_SYSTEM,
        Stage::ScreenList => SCREEN_LIST_SYSTEM,
        Stage::Transitions => TRANSITIONS_SYSTEM,
        Stage::Perspectives => match schema {
            TestSpecSchema::Legacy => PERSPECTIVES_SYSTEM_LEGACY,
            _ => PERSPECTIVES_SYSTEM,
        },
        Stage::TestSpec => match schema {
            TestSpecSchema::Legacy => TEST_SPEC_SYSTEM_LEGACY,
            _ => TEST_SPEC_SYSTEM,
        },
        Stage::IntegrationSpec => INTEGRATION_SYSTEM,
    }
}

fn wrap_text(instruction: &str, text: &str) -> String {
    format!("{}\n\n{}\n{}\n{}\n", instruction, TEXT_BEGIN, text, TEXT_END)
}

/// シート単位の構造化ステージの入力
pub fn structuring_prompt(raw_text: &str) -> String {
    wrap_text(
        "以下の非構造化テキストを解析し、指定の形式で整理してください。",
        raw_text,
    )
}

/// テスト観点抽出ステージの入力
pub fn perspectives_prompt(design_document: &str) -> String {
    wrap_text(
        "以下の構造化テキストを解析し、指定の形式で整理してください。",
        design_document,
    )
}

/// テスト仕様書生成ステージの入力
///
/// `StageInput::ChainOnly`ではテスト観点のみを渡し、
/// `StageInput::DesignAndPerspectives`ではテスト観点を優先参照として先に置き、
/// 元の設計書を詳細情報として後ろに添えます。
pub fn test_spec_prompt(input: StageInput, design_document: &str, perspectives: &str) -> String {
    match input {
        StageInput::ChainOnly => wrap_text(
            "以下のテスト観点に基づいて、実務レベルのテスト仕様書を作成してください。",
            perspectives,
        ),
        StageInput::DesignAndPerspectives => format!(
            "以下は対象システムの設計書とテスト観点です。\n\
             この情報に基づいて、実務レベルのテスト仕様書を作成してください。\n\n\
             重要：設計書の詳細情報を参照しつつ、テスト観点で抽出された重要ポイントを中心にテストケースを作成してください。\n\
             テストケースの並び順は設計書の構成に合わせてください。\n\n\
             {}\n{}\n\n{}\n{}\n{}\n",
            PERSPECTIVES_BEGIN, perspectives, DESIGN_BEGIN, design_document, END
        ),
    }
}

/// 画面一覧構造化ステージの入力
pub fn screen_list_prompt(raw_text: &str) -> String {
    wrap_text(
        "以下のテキストから画面一覧を抽出し、指定の形式で整理してください。",
        raw_text,
    )
}

/// 画面遷移構造化ステージの入力
pub fn transitions_prompt(raw_text: &str, screen_list: &str) -> String {
    format!(
        "以下の画面一覧とテキストから画面遷移を抽出し、指定の形式で整理してください。\n\n\
         --- 画面一覧 ---\n{}\n\n{}\n{}\n{}\n",
        screen_list, TEXT_BEGIN, raw_text, TEXT_END
    )
}

/// 結合テスト仕様書生成ステージの入力
///
/// # 引数
///
/// * `design_documents` - 構造化済み設計書の（ファイル名, 本文）
/// * `transition_document` - 画面一覧と画面遷移をまとめた文書
pub fn integration_prompt<'a, I>(design_documents: I, transition_document: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut prompt = String::from(
        "以下は対象システムの設計書と画面遷移情報です。\n\
         この情報に基づいて、結合テスト仕様書を作成してください。\n\n\
         重要：設計書に記載されている画面のみを対象とし、テストデータには具体的な値を記載してください。\n\n",
    );

    for (name, body) in design_documents {
        prompt.push_str(&format!("--- 設計書: {} ---\n{}\n\n", name, body));
    }
    prompt.push_str(&format!(
        "--- 画面遷移情報 ---\n{}\n{}\n",
        transition_document, END
    ));
    prompt
}
