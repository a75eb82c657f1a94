//! xlsxtestspec CLI
//!
//! 設計書ワークブックから単体テスト仕様書を、画面遷移ワークブックと構造化済み設計書から
//! 結合テスト仕様書を生成し、成果物のZIPを書き出す。

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use xlsxtestspec::{
    handle, HeaderPolicy, LlmGateway, PipelineBuilder, StageInput, TestSpecError, UploadRequest,
    UploadedFile,
};

const DEFAULT_TEMPLATE: &str = "単体テスト仕様書.xlsx";

/// xlsxtestspec - design workbook to test specification
#[derive(Parser)]
#[command(name = "xlsxtestspec")]
#[command(about = "Generate test specifications from design workbooks using an LLM pipeline")]
#[command(long_about = r#"
xlsxtestspec turns a business-system design workbook into a structured Markdown
design document, test perspectives, a test-specification table, and a populated
spreadsheet template, packaged as one ZIP archive.

EXAMPLES:
  # Unit test specification (6-column, every sheet structured by the LLM)
  xlsxtestspec unit 設計書.xlsx --template 単体テスト仕様書.xlsx

  # Legacy 4-column specification
  xlsxtestspec unit 設計書.xlsx --legacy

  # Integration test specification from a screen/transition workbook
  xlsxtestspec integration 画面遷移.xlsx --design 1_構造化設計書.md --design other.md

CONFIGURATION:
  LLM_SERVICE selects AZURE (default) or AWS. Provider credentials are read from
  AZURE_OPENAI_* or AWS_* variables; a .env file in the working directory is loaded.
"#)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a unit test specification from a design workbook
    Unit {
        /// Design workbook (.xlsx)
        workbook: PathBuf,

        /// Test-specification template (falls back to TEMPLATE_PATH, then 単体テスト仕様書.xlsx)
        #[arg(long)]
        template: Option<PathBuf>,

        /// Use the 4-column schema and structure only the 処理詳細仕様 sheets with the LLM
        #[arg(long)]
        legacy: bool,

        /// Detect the header row among the first 5 rows instead of using row 1
        #[arg(long)]
        header_scan: bool,

        /// Pass only the perspectives to the test-spec stage
        #[arg(long)]
        chain_only: bool,

        /// Output archive path (defaults to the suggested archive name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate an integration test specification
    Integration {
        /// Screen list / transition workbook (.xlsx)
        workbook: PathBuf,

        /// Structured design documents (Markdown)
        #[arg(long = "design", required = true)]
        designs: Vec<PathBuf>,

        /// Output archive path (defaults to the suggested archive name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(path) => {
            info!(path = %path.display(), "Archive written");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("xlsxtestspec=debug,info")
            } else {
                EnvFilter::try_new("xlsxtestspec=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // 既に初期化済みの場合は何もしない
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

fn run(command: Command) -> Result<PathBuf, String> {
    let gateway = LlmGateway::from_env().map_err(|e| e.to_string())?;

    let (pipeline, request, template, output) = match command {
        Command::Unit {
            workbook,
            template,
            legacy,
            header_scan,
            chain_only,
            output,
        } => {
            let mut builder = if legacy {
                PipelineBuilder::legacy()
            } else {
                PipelineBuilder::new()
            };
            if header_scan {
                builder = builder.with_header_policy(HeaderPolicy::Scan);
            }
            if chain_only {
                builder = builder.with_stage_input(StageInput::ChainOnly);
            }
            let template_path = template
                .or_else(|| std::env::var_os("TEMPLATE_PATH").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE));
            let template = std::fs::read(&template_path).map_err(|e| {
                format!("failed to read template {}: {}", template_path.display(), e)
            })?;

            (
                builder.build(),
                UploadRequest::unit(read_upload(&workbook)?),
                template,
                output,
            )
        }
        Command::Integration {
            workbook,
            designs,
            output,
        } => {
            let designs = designs
                .iter()
                .map(|path| read_upload(path))
                .collect::<Result<Vec<_>, _>>()?;
            (
                PipelineBuilder::new().build(),
                UploadRequest::integration(read_upload(&workbook)?, designs),
                Vec::new(),
                output,
            )
        }
    };
    let pipeline = pipeline.map_err(|e: TestSpecError| e.to_string())?;

    let archive = handle(&pipeline, &gateway, request, &template).map_err(|response| {
        error!(status = response.status, "Generation failed");
        response.message
    })?;

    let path = output.unwrap_or_else(|| PathBuf::from(&archive.file_name));
    std::fs::write(&path, &archive.bytes)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    Ok(path)
}

fn read_upload(path: &Path) -> Result<UploadedFile, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedFile::new(name, bytes))
}
