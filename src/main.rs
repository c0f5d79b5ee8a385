mod analysis;
mod config;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::analysis::Analyzer;
use crate::analysis::generator::generator_for;
use crate::analysis::questionnaire::Questionnaire;
use crate::config::{AppConfig, GeneratorBackend};
use crate::loader::discover_pdf_files;
use crate::pipeline::{Pipeline, SourceSelection};
use crate::scraper::cleaner::source_host;
use crate::storage::{Layout, Section};

#[derive(Parser)]
#[command(
    name = "brsr-scraper",
    about = "Annual & sustainability report scraper with BRSR extraction",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Overrides for the analysis step.
#[derive(clap::Args)]
struct AnalysisArgs {
    /// Answer endpoint wire format
    #[arg(long, value_enum)]
    backend: Option<GeneratorBackend>,

    /// Questionnaire template (default: brsr_questions.json)
    #[arg(long)]
    questions: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Search the sources for a company and download its reports
    Fetch {
        #[arg(short, long)]
        company: String,

        #[arg(short, long, value_enum, default_value = "all")]
        source: SourceSelection,

        /// Run BRSR analysis against this endpoint after downloading
        #[arg(long, env = "BRSR_ANALYZE_URL")]
        analyze_url: Option<String>,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Fill the questionnaire for every downloaded report of a company
    Analyze {
        #[arg(short, long)]
        company: String,

        /// Text generation endpoint
        #[arg(short, long)]
        url: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Show the configured sources and where their files go
    Sources {
        #[arg(short, long, default_value = "<company>")]
        company: String,
    },
}

fn apply_analysis_args(config: &mut AppConfig, args: AnalysisArgs) {
    if let Some(backend) = args.backend {
        config.analysis.backend = backend;
    }
    if let Some(path) = args.questions {
        config.analysis.questions_path = path;
    }
}

/// Everything the analysis step needs, built up front so a bad template stops the run early.
fn build_analyzer(config: &AppConfig, endpoint: &str) -> Result<Analyzer> {
    let questionnaire = Questionnaire::from_path(&config.analysis.questions_path)?;
    info!(
        "Loaded {} questions from {:?}",
        questionnaire.questions().len(),
        config.analysis.questions_path
    );
    let generator =
        generator_for(&config.analysis, endpoint).context("Failed to build text generator")?;
    Ok(Analyzer::new(questionnaire, generator, &config.analysis))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "brsr_scraper=info,warn",
        1 => "brsr_scraper=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Fetch {
            company,
            source,
            analyze_url,
            analysis,
        } => {
            apply_analysis_args(&mut config, analysis);
            let endpoint = analyze_url.or_else(|| config.analysis.endpoint.clone());
            let analyzer = match &endpoint {
                Some(url) => Some(build_analyzer(&config, url)?),
                None => None,
            };

            let layout = {
                let _t = utils::Timer::start(format!("Fetch {:?} from {:?}", company, source));
                let pipeline = Pipeline::new(config.clone());
                let stats = pipeline.run(&company, source).await?;
                info!(
                    "Done: {} downloaded, {} already on disk, {} failed, {}/{} sources failed",
                    stats.downloaded,
                    stats.skipped,
                    stats.failed,
                    stats.sources_failed,
                    stats.sources_tried
                );
                pipeline.layout().clone()
            };

            if let Some(analyzer) = analyzer {
                let _t = utils::Timer::start(format!("BRSR analysis for {:?}", company));
                analyzer.analyze_company(&layout, &company).await?;
            }
        }

        Command::Analyze {
            company,
            url,
            analysis,
        } => {
            apply_analysis_args(&mut config, analysis);
            let analyzer = build_analyzer(&config, &url)?;
            let _t = utils::Timer::start(format!("BRSR analysis for {:?}", company));
            let layout = Layout::new(&config.download.root);
            let stats = analyzer.analyze_company(&layout, &company).await?;
            info!(
                "Done: {} reports, {} answers, {} failed, {} skipped",
                stats.reports, stats.answered, stats.failed, stats.skipped
            );
        }

        Command::Sources { company } => {
            let layout = Layout::new(&config.download.root);
            let s = &config.sources;
            let rows = [
                ("annualreports", source_host(&s.annual_reports_url), Section::Reports),
                ("nse", source_host(&s.nse_url), Section::Reports),
                ("nse (BRSR)", source_host(&s.nse_url), Section::Brsr),
                ("sustainability", source_host(&s.web_search_url), Section::Sustainability),
                ("benchmarks", source_host(&s.web_search_url), Section::Benchmarks),
                ("news", source_host(&s.news_rss_url), Section::News),
                ("social", source_host(&s.reddit_url), Section::Social),
            ];

            println!("─────────────────────────────────────────────────────────────");
            println!("  Sources (downloads root: {:?})", layout.root());
            println!("─────────────────────────────────────────────────────────────");
            for (name, host, section) in rows {
                let dir = layout.section_dir(&host, &company, section);
                let pdfs = discover_pdf_files(&dir).map(|f| f.len()).unwrap_or(0);
                println!("  {:<15}: {} ({} PDFs)", name, dir.display(), pdfs);
            }
            println!("─────────────────────────────────────────────────────────────");
        }
    }

    Ok(())
}

#[cfg(test)]
mod testing {
    use tokio::net::TcpListener;

    /// Serve `app` on an ephemeral local port; returns `http://127.0.0.1:<port>`.
    pub async fn spawn_server(app: axum::Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
