//! CLI binary for edgequake-schematic.
//!
//! A thin shim over the library crate: maps subcommands and flags to
//! `PipelineConfig`, drives one `Pipeline`, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_schematic::export::{export_file_name, export_json};
use edgequake_schematic::{
    resolve_input, write_export, ChatTurn, JsonFileStore, Pipeline, PipelineConfig,
    PipelineProgressCallback, ProgressCallback, Project, ProjectStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while rendering and classifying, then a bar over the selected pages.
struct CliProgressCallback {
    bar: ProgressBar,
    started: std::sync::Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Rendering");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: std::sync::Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analyzing");
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_prefix("Scanning");
        self.bar
            .set_message(format!("looking for schematics in {total_pages} page(s)…"));
    }

    fn on_classified(&self, selected: &[usize], total_pages: usize) {
        let list: Vec<String> = selected.iter().map(|p| p.to_string()).collect();
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{}/{} page(s) contain schematics", selected.len(), total_pages)),
            dim(&format!("[{}]", list.join(", "))),
        ));
        self.activate_bar(selected.len());
    }

    fn on_page_start(&self, page_number: usize, _position: usize, _total: usize) {
        if let Ok(mut t) = self.started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_number}"));
    }

    fn on_page_complete(&self, page_number: usize, _position: usize, _total: usize, components: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}  {:<16}  {}",
            green("✓"),
            page_number,
            dim(&format!("{components:>4} components")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, pages: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} page(s) analysed", green("✔"), bold(&pages.to_string()));
    }

    fn on_run_error(&self, message: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), message);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a PDF manual, print a per-page summary
  schem2json analyze amp-manual.pdf

  # Analyse and write the export document
  schem2json analyze amp-manual.pdf -o amp.json

  # A single photographed schematic
  schem2json analyze board.jpg --json > board.json

  # Stored projects
  schem2json list
  schem2json export 3f2c0e1a-... -o amp.json
  schem2json delete 3f2c0e1a-...

  # Ask about page 4 of a stored project (interactive when no question given)
  schem2json ask 3f2c0e1a-... --page 4 "What sets the gain of U1?"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to an existing libpdfium
  SCHEM2JSON_STORE_DIR    Project store directory
"#;

/// Extract structured circuit descriptions from schematic documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "schem2json",
    version,
    about = "Extract components, netlists and functional blocks from schematics using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project store directory. Defaults to the platform data directory.
    #[arg(long, global = true, env = "SCHEM2JSON_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SCHEM2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SCHEM2JSON_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse a PDF or image (local path or HTTP/HTTPS URL).
    Analyze(AnalyzeArgs),
    /// List stored projects, most recent first.
    List,
    /// Write the export document of a stored project.
    Export {
        id: String,
        /// Output file. Defaults to `<project name>_analysis.json`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored project.
    Delete { id: String },
    /// Ask questions about one page of a stored project.
    Ask {
        id: String,
        /// 1-based page number.
        #[arg(short, long)]
        page: usize,
        /// Question. Omit to start an interactive session.
        question: Option<String>,
        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Local PDF/image path or HTTP/HTTPS URL.
    input: String,

    /// Write the export document to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the export document to stdout instead of a summary.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    llm: LlmArgs,

    /// Maximum pages rasterised from a PDF.
    #[arg(long, env = "SCHEM2JSON_PAGE_CAP", default_value_t = 20)]
    page_cap: usize,

    /// Page images per classification request.
    #[arg(long, env = "SCHEM2JSON_BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    /// Render scale relative to native page size (0.5–4.0).
    #[arg(long, env = "SCHEM2JSON_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "SCHEM2JSON_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Path to a text file with a custom extraction instruction.
    #[arg(long)]
    prompt: Option<PathBuf>,

    /// Do not save the project to the store.
    #[arg(long)]
    no_save: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCHEM2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers what INFO logs would say during `analyze`.
    let show_progress = matches!(&cli.command, Command::Analyze(a) if !a.no_progress && !a.json)
        && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store_dir = match cli.store_dir.clone() {
        Some(dir) => dir,
        None => PipelineConfig::default_store_dir()
            .context("No data directory on this platform; pass --store-dir")?,
    };

    match cli.command {
        Command::Analyze(args) => analyze(args, store_dir, show_progress, cli.quiet).await,
        Command::List => list(store_dir).await,
        Command::Export { id, output } => export(store_dir, &id, output, cli.quiet).await,
        Command::Delete { id } => {
            JsonFileStore::new(&store_dir)
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete project {id}"))?;
            if !cli.quiet {
                eprintln!("{} deleted {}", green("✔"), id);
            }
            Ok(())
        }
        Command::Ask {
            id,
            page,
            question,
            llm,
        } => ask(store_dir, &id, page, question, llm).await,
    }
}

async fn analyze(args: AnalyzeArgs, store_dir: PathBuf, show_progress: bool, quiet: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let mut builder = PipelineConfig::builder()
        .page_cap(args.page_cap)
        .classify_batch_size(args.batch_size)
        .render_scale(args.scale)
        .max_tokens(args.max_tokens)
        .download_timeout_secs(args.download_timeout);
    if !args.no_save {
        builder = builder.store_dir(store_dir);
    }
    if let Some(ref path) = args.prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.extraction_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let mut config = builder.build().context("Invalid configuration")?;
    config.model = args.llm.model.clone();
    config.provider_name = args.llm.provider.clone();

    let timeout = config.download_timeout_secs;
    let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;
    let document = resolve_input(&args.input, timeout)
        .await
        .with_context(|| format!("Failed to read '{}'", args.input))?;

    let started = Instant::now();
    let project = pipeline.run(document).await.context("Analysis failed")?;

    if args.json {
        let json = export_json(&project, chrono::Utc::now()).context("Failed to serialise export")?;
        println!("{json}");
    } else if !quiet {
        print_summary(&project);
    }

    if let Some(ref path) = args.output {
        write_export(&project, path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !quiet {
            eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    if !quiet {
        eprintln!(
            "   project {}  {}",
            dim(&project.id),
            dim(&format!("{:.1}s", started.elapsed().as_secs_f64())),
        );
    }
    Ok(())
}

fn print_summary(project: &Project) {
    println!("{}", bold(&project.name));
    for page in &project.pages {
        let a = &page.analysis;
        println!(
            "  page {:>3}  {}  {}",
            page.page_number,
            bold(&a.title),
            dim(&format!(
                "{} components, {} blocks, {} nets",
                a.components.len(),
                a.functional_blocks.len(),
                a.netlist.len()
            )),
        );
        for issue in &a.potential_issues {
            println!("            {} {}", cyan("⚠"), issue);
        }
    }
}

async fn list(store_dir: PathBuf) -> Result<()> {
    let projects = JsonFileStore::new(&store_dir)
        .list_all()
        .await
        .context("Failed to list projects")?;
    if projects.is_empty() {
        eprintln!("{}", dim(&format!("No projects in {}", store_dir.display())));
        return Ok(());
    }
    for p in projects {
        println!(
            "{}  {}  {:>3} page(s)  {}",
            p.id,
            p.last_modified.format("%Y-%m-%d %H:%M"),
            p.pages.len(),
            p.name
        );
    }
    Ok(())
}

async fn export(store_dir: PathBuf, id: &str, output: Option<PathBuf>, quiet: bool) -> Result<()> {
    let project = JsonFileStore::new(&store_dir)
        .get(id)
        .await
        .context("Failed to read project store")?
        .with_context(|| format!("No project with id {id}"))?;
    let path = output.unwrap_or_else(|| PathBuf::from(export_file_name(&project)));
    write_export(&project, &path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    if !quiet {
        eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
    }
    Ok(())
}

async fn ask(
    store_dir: PathBuf,
    id: &str,
    page: usize,
    question: Option<String>,
    llm: LlmArgs,
) -> Result<()> {
    let mut config = PipelineConfig::builder()
        .store_dir(store_dir)
        .build()
        .context("Invalid configuration")?;
    config.model = llm.model;
    config.provider_name = llm.provider;

    let pipeline = Pipeline::new(config).context("Failed to initialise pipeline")?;
    pipeline
        .load_project(id)
        .await
        .with_context(|| format!("Failed to load project {id}"))?;

    if let Some(q) = question {
        let reply = pipeline.ask(page, &[], &q).await.context("Chat request failed")?;
        println!("{reply}");
        return Ok(());
    }

    // Interactive: history lives here, one turn pair per question.
    let mut history: Vec<ChatTurn> = Vec::new();
    let stdin = io::stdin();
    loop {
        eprint!("{} ", cyan("?"));
        io::stderr().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read stdin")? == 0 {
            break;
        }
        let q = line.trim();
        if q.is_empty() {
            continue;
        }
        if q == "exit" || q == "quit" {
            break;
        }
        match pipeline.ask(page, &history, q).await {
            Ok(reply) => {
                println!("{reply}\n");
                history.push(ChatTurn::user(q));
                history.push(ChatTurn::assistant(reply));
            }
            Err(e) => eprintln!("{} {}", red("✘"), e),
        }
    }
    Ok(())
}
