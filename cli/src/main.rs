//! pdfocr CLI - PDF to OCR layout JSON

mod config;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use pdfocr_core::{run, Outcome, PipelineConfig};
use pdfocr_ocr::{install_models, is_models_installed, OcrError, PaddleOcrEngine};
use pdfocr_render::{PdfiumLocator, RenderError};

use config::{load_config, AppConfig, CONFIG_FILE_NAME};

#[derive(Parser)]
#[command(name = "pdfocr")]
#[command(version)]
#[command(
    about = "Rasterize a PDF, run OCR on every page and save the result as JSON",
    long_about = None
)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a PDF to OCR JSON (default)
    Run(RunArgs),

    /// Download the detection model, recognition model and dictionary
    FetchModels(FetchArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    /// Base name of the PDF, without extension
    #[arg(long, env = "PDF_FILE_NAME")]
    name: Option<String>,

    /// Input PDF file
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Directory holding <NAME>.pdf (defaults to the executable's directory)
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Output JSON file (defaults to the input path with a .json extension)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Rasterization resolution
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    dpi: Option<u32>,

    /// Config file (defaults to pdfocr.json next to the input)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory with det.onnx, rec.onnx and dict.txt
    #[arg(long, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    /// Detection model
    #[arg(long, value_name = "FILE")]
    det_model: Option<PathBuf>,

    /// Recognition model
    #[arg(long, value_name = "FILE")]
    rec_model: Option<PathBuf>,

    /// Recognition dictionary
    #[arg(long, value_name = "FILE")]
    dict: Option<PathBuf>,

    /// Directory containing the PDFium shared library
    #[arg(long, value_name = "DIR")]
    pdfium_dir: Option<PathBuf>,

    /// ONNX Runtime intra-op threads
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
struct FetchArgs {
    /// Config file with the download manifest (defaults to pdfocr.json next to the executable)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Install directory (defaults to models/ next to the executable)
    #[arg(long, value_name = "DIR")]
    models_dir: Option<PathBuf>,

    #[arg(long, value_name = "URL")]
    det_url: Option<String>,

    #[arg(long, value_name = "URL")]
    rec_url: Option<String>,

    #[arg(long, value_name = "URL")]
    dict_url: Option<String>,
}

impl RunArgs {
    fn overrides(&self) -> AppConfig {
        AppConfig {
            dpi: self.dpi,
            pdfium_library_dir: self.pdfium_dir.clone(),
            models_dir: self.models_dir.clone(),
            det_model_path: self.det_model.clone(),
            rec_model_path: self.rec_model.clone(),
            dict_path: self.dict.clone(),
            intra_threads: self.threads,
            ..Default::default()
        }
    }
}

impl FetchArgs {
    fn overrides(&self) -> AppConfig {
        let mut config = AppConfig {
            models_dir: self.models_dir.clone(),
            ..Default::default()
        };
        if let Some(url) = &self.det_url {
            config.models.det.url = url.clone();
        }
        if let Some(url) = &self.rec_url {
            config.models.rec.url = url.clone();
        }
        if let Some(url) = &self.dict_url {
            config.models.dict.url = url.clone();
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Some(Commands::Run(args)) => cmd_run(&args),
        Some(Commands::FetchModels(args)) => cmd_fetch_models(&args),
        None => cmd_run(&cli.run),
    };

    // Failures are reported, not turned into a non-zero exit status.
    if let Err(err) = result {
        report_failure(&err);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    } else if quiet {
        builder.filter_level(LevelFilter::Warn);
    }
    builder.format_target(false).init();
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let base_dir = exe_dir()?;
    let input = resolve_input(args, &base_dir)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&input));

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| input.with_file_name(CONFIG_FILE_NAME));
    let config = load_config(&config_path)?.merge(args.overrides());

    let pipeline = PipelineConfig {
        input,
        output,
        dpi: config.dpi(),
    };
    let locator = PdfiumLocator::new(config.pdfium_library_dir.clone());
    let ocr_config = config.ocr_config(&base_dir);

    log::info!("[Pipeline] processing {}", pipeline.input.display());
    let outcome = run(&pipeline, &locator, || {
        if !is_models_installed(&ocr_config) {
            log::warn!(
                "[OCR] model files missing under {}",
                config.models_dir(&base_dir).display()
            );
        }
        PaddleOcrEngine::new(&ocr_config)
    })
    .with_context(|| format!("processing {} failed", pipeline.input.display()))?;

    match outcome {
        Outcome::Written { path, pages } => {
            log::info!(
                "[Pipeline] saved OCR results for {} page(s) to {}",
                pages,
                path.display()
            );
        }
        Outcome::Aborted(reason) => {
            log::error!("[Pipeline] aborted: {}", reason);
        }
    }
    Ok(())
}

fn cmd_fetch_models(args: &FetchArgs) -> Result<()> {
    let base_dir = exe_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(CONFIG_FILE_NAME));
    let config = load_config(&config_path)?.merge(args.overrides());
    let dir = config.models_dir(&base_dir);

    let paths = install_models(&config.models, &dir, |progress| {
        log::info!(
            "[Models] {} ({}/{}): {:.0}%",
            progress.file_name,
            progress.file_index,
            progress.total_files,
            progress.percent
        );
    })
    .with_context(|| format!("installing models into {} failed", dir.display()))?;

    log::info!(
        "[Models] ready: {}, {}, {}",
        paths.det.display(),
        paths.rec.display(),
        paths.dict.display()
    );
    Ok(())
}

fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot locate the executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("executable has no parent directory"))
}

/// `--input` wins; otherwise `<dir>/<name>.pdf`.
fn resolve_input(args: &RunArgs, base_dir: &Path) -> Result<PathBuf> {
    if let Some(input) = &args.input {
        return Ok(input.clone());
    }
    let name = args
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            anyhow!("no input PDF: pass --input FILE or --name BASE (or set PDF_FILE_NAME)")
        })?;
    let dir = args.dir.as_deref().unwrap_or(base_dir);
    Ok(dir.join(format!("{}.pdf", name)))
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("json")
}

fn report_failure(err: &anyhow::Error) {
    log::error!("critical error during processing: {:#}", err);
    eprintln!("\n{:?}", err);
    eprintln!("\nTroubleshooting:");
    for hint in remediation_hints(err) {
        eprintln!("  - {}", hint);
    }
}

fn remediation_hints(err: &anyhow::Error) -> Vec<&'static str> {
    let mut hints = Vec::new();
    for cause in err.chain() {
        if let Some(RenderError::LibraryUnavailable(_)) = cause.downcast_ref::<RenderError>() {
            hints.push(
                "Install the PDFium shared library or point --pdfium-dir at its directory.",
            );
        }
        if let Some(OcrError::ModelLoad(_)) = cause.downcast_ref::<OcrError>() {
            hints.push("Install the OCR models with `pdfocr fetch-models` or pass --models-dir.");
        }
        if let Some(OcrError::Download(_)) = cause.downcast_ref::<OcrError>() {
            hints.push("Check the model URLs in pdfocr.json and your network connection.");
        }
    }
    hints.push("Confirm the input path is correct and the file is a valid PDF.");
    hints
}
