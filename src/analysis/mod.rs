//! Questionnaire filling over downloaded reports.
//!
//! For every PDF of a company: page text → per-question ranking → one
//! generation call per question → `<stem>_BRSR_Extracted.json` next to the PDF.

pub mod generator;
pub mod questionnaire;
pub mod ranker;

use crate::config::AnalysisConfig;
use crate::loader::{discover_pdf_files, extract_pages};
use crate::storage::Layout;
use crate::utils::preview;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use self::generator::{TextGenerator, build_prompt};
use self::questionnaire::{ANSWER, Questionnaire};
use self::ranker::rank_pages;

/// Recorded when no page mentions any keyword of the question.
pub const NO_CONTEXT_ANSWER: &str = "Data not found (Keyword mismatch)";
pub const OUTPUT_SUFFIX: &str = "_BRSR_Extracted.json";
const ERROR_PREFIX: &str = "Error: ";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalysisStats {
    pub reports: usize,
    pub answered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Any `answer` recorded from a failed generation call.
fn has_failed_answer(doc: &Value) -> bool {
    match doc {
        Value::Object(map) => map.iter().any(|(key, value)| match value {
            Value::String(answer) if key == ANSWER => answer.starts_with(ERROR_PREFIX),
            other => has_failed_answer(other),
        }),
        Value::Array(items) => items.iter().any(has_failed_answer),
        _ => false,
    }
}

pub fn output_path(pdf: &Path) -> PathBuf {
    let stem = pdf.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    pdf.with_file_name(format!("{}{}", stem, OUTPUT_SUFFIX))
}

pub struct Analyzer {
    questionnaire: Questionnaire,
    generator: Box<dyn TextGenerator>,
    top_k: usize,
    context_char_budget: usize,
    skip_existing: bool,
}

impl Analyzer {
    pub fn new(
        questionnaire: Questionnaire,
        generator: Box<dyn TextGenerator>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            questionnaire,
            generator,
            top_k: config.top_k,
            context_char_budget: config.context_char_budget,
            skip_existing: config.skip_existing,
        }
    }

    /// One answer. Generation failures become `Error: ...` in the document.
    async fn answer(&self, question: &str, pages: &[String], stats: &mut AnalysisStats) -> String {
        let context = rank_pages(question, pages, self.top_k);
        if context.is_empty() {
            stats.answered += 1;
            return NO_CONTEXT_ANSWER.to_string();
        }

        let prompt = build_prompt(question, &context, self.context_char_budget);
        match self.generator.generate(&prompt).await {
            Ok(answer) => {
                stats.answered += 1;
                answer
            }
            Err(e) => {
                warn!("Generation failed for {:?}: {}", question, e);
                stats.failed += 1;
                format!("{}{}", ERROR_PREFIX, e)
            }
        }
    }

    /// The questionnaire filled from `pages`, questions asked in document order.
    pub async fn fill(&self, pages: &[String], stats: &mut AnalysisStats) -> Value {
        let questions = self.questionnaire.questions();
        let total = questions.len();
        let mut answers = Vec::with_capacity(total);

        for (i, question) in questions.into_iter().enumerate() {
            info!("[{}/{}] Answering: {}", i + 1, total, preview(question, 50));
            answers.push(self.answer(question, pages, stats).await);
        }

        self.questionnaire.render(answers)
    }

    /// True when `pdf` already has a result without failed answers.
    fn already_extracted(&self, pdf: &Path) -> bool {
        if !self.skip_existing {
            return false;
        }
        let out = output_path(pdf);
        let Ok(raw) = std::fs::read_to_string(&out) else {
            return false;
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(doc) if !has_failed_answer(&doc) => true,
            _ => {
                info!("Redoing {:?}, earlier result is incomplete", out);
                false
            }
        }
    }

    /// Fill the questionnaire for one PDF and write the result next to it.
    pub async fn analyze_report(&self, pdf: &Path, stats: &mut AnalysisStats) -> Result<()> {
        if self.already_extracted(pdf) {
            info!("Skipping {:?} (already extracted)", pdf.file_name().unwrap_or_default());
            stats.skipped += 1;
            return Ok(());
        }

        let pages = extract_pages(pdf);
        self.analyze_pages(pdf, &pages, stats).await
    }

    async fn analyze_pages(
        &self,
        pdf: &Path,
        pages: &[String],
        stats: &mut AnalysisStats,
    ) -> Result<()> {
        let out = output_path(pdf);
        if pages.iter().all(|p| p.trim().is_empty()) {
            warn!("No text in {:?}, skipping", pdf);
            stats.skipped += 1;
            return Ok(());
        }

        info!("Processing report {:?} ({} pages)", pdf, pages.len());
        let filled = self.fill(pages, stats).await;

        let json = serde_json::to_string_pretty(&filled).context("Result did not serialize")?;
        tokio::fs::write(&out, json)
            .await
            .with_context(|| format!("Could not write {:?}", out))?;
        stats.reports += 1;
        info!("Saved extraction to {:?}", out);
        Ok(())
    }

    /// Every PDF under `<root>/*/<company>/`.
    pub async fn analyze_company(&self, layout: &Layout, company: &str) -> Result<AnalysisStats> {
        let mut stats = AnalysisStats::default();
        let dirs = layout.existing_company_dirs(company)?;
        if dirs.is_empty() {
            warn!("No download folder for {} under {:?}", company, layout.root());
            return Ok(stats);
        }

        for dir in dirs {
            info!("Analyzing reports in {:?}", dir);
            for pdf in discover_pdf_files(&dir)? {
                if let Err(e) = self.analyze_report(&pdf, &mut stats).await {
                    warn!("{:?}: {:#}", pdf, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Analysis done: {} reports | {} answers | {} failed | {} skipped",
            stats.reports, stats.answered, stats.failed, stats.skipped
        );
        Ok(stats)
    }
}
