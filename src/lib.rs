//! xlsxtestspec - Turn design workbooks into test specifications with an LLM pipeline
//!
//! This crate reads a business-system design workbook (XLSX), serializes its sheets
//! into a single Markdown design document, and runs a chained LLM pipeline
//! (test-perspective extraction, then test-specification generation). The resulting
//! Markdown table is written back into a spreadsheet template, and every artifact is
//! packaged into one ZIP archive.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xlsxtestspec::{LlmGateway, PipelineBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads LLM_SERVICE, AZURE_OPENAI_* / AWS_* from the environment
//!     let gateway = LlmGateway::from_env()?;
//!     let pipeline = PipelineBuilder::new().build()?;
//!
//!     let workbook = std::fs::read("設計書.xlsx")?;
//!     let template = std::fs::read("単体テスト仕様書.xlsx")?;
//!     let output = pipeline.run_unit(&gateway, "設計書.xlsx", workbook, &template)?;
//!
//!     std::fs::write(&output.archive.file_name, &output.archive.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! # Legacy 4-column Specification
//!
//! ```rust,no_run
//! use xlsxtestspec::{HeaderPolicy, LlmGateway, PipelineBuilder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = LlmGateway::from_env()?;
//!     let pipeline = PipelineBuilder::legacy()
//!         .with_header_policy(HeaderPolicy::Scan)
//!         .build()?;
//!
//!     let workbook = std::fs::read("設計書.xlsx")?;
//!     let template = std::fs::read("単体テスト仕様書.xlsx")?;
//!     let output = pipeline.run_unit(&gateway, "設計書.xlsx", workbook, &template)?;
//!     println!("{} rows written", output.rows);
//!     Ok(())
//! }
//! ```
//!
//! # Testing Without a Network
//!
//! The pipeline talks to the LLM only through [`CompletionService`], so tests can
//! substitute a fixed responder:
//!
//! ```rust
//! use xlsxtestspec::{CompletionService, TestSpecError};
//!
//! struct Canned;
//!
//! impl CompletionService for Canned {
//!     fn complete(&self, _system: &str, _user: &str) -> Result<String, TestSpecError> {
//!         Ok("| No | 区分 | テストケース | 期待結果 |\n|---|---|---|---|".to_string())
//!     }
//! }
//! ```

mod api;
mod archive;
mod builder;
mod cleaner;
mod error;
mod extractor;
mod formatter;
mod llm;
mod parser;
mod pipeline;
mod prompts;
mod request;
mod security;
mod serializer;
mod types;
mod writer;

// 公開API
pub use api::{AiSheetPolicy, HeaderPolicy, PipelineMode, StageInput, TestSpecSchema};
pub use archive::{
    content_disposition, file_stem, integration_archive_name, unit_archive_name, Archive,
    ArchiveBuilder, INTEGRATION_TEST_SPEC, INTEGRATION_TRANSITIONS, UNIT_DESIGN_DOC,
    UNIT_PERSPECTIVES, UNIT_TEST_SPEC, UNIT_WORKBOOK,
};
pub use builder::PipelineBuilder;
pub use cleaner::SheetCleaner;
pub use error::TestSpecError;
pub use extractor::{extract_table, TestRow, TestTable};
pub use llm::{
    backoff_delay, AwsSettings, AzureSettings, ChatProvider, CompletionService, LlmConfig,
    LlmGateway, LlmService, ProviderFailure,
};
pub use parser::WorkbookParser;
pub use pipeline::{DesignText, Pipeline, PipelineOutput};
pub use prompts::system_prompt;
pub use request::{handle, validate_workbook, ErrorResponse, UploadRequest, UploadedFile};
pub use serializer::{
    anchor, DesignDocument, DocumentSection, SheetSerializer, AI_FAILURE_PLACEHOLDER,
    EMPTY_SHEET_PLACEHOLDER,
};
pub use types::{CellValue, CleanTable, PipelineArtifact, RawSheet, Stage};
pub use writer::{populate_template, write_rows, CellMapping, TemplateWorkbook};
