use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use quire_core::{ExportFormat, Session, SessionConfig, Workspace};
use quire_diff::{DiffConfig, DiffSummary, PageStatus};
use quire_doc_model::PageUid;
use quire_pdf_engine::{default_engine, OpenSource, PdfEngine};
use quire_storage::{Storage, StorageError};
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const JOB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "quire")]
#[command(about = "Quire page arrangement CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// List every page with its size in points.
    Pages {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write selected pages out as a new PDF, in document order.
    Extract {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based pages, comma separated, ranges allowed: "1,3-5".
        #[arg(long)]
        pages: String,
        #[arg(long)]
        output: PathBuf,
    },
    /// Rotate pages and write the whole document out.
    Rotate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based pages, comma separated, ranges allowed: "1,3-5".
        #[arg(long)]
        pages: String,
        /// Clockwise degrees, any multiple of 90.
        #[arg(long, default_value_t = 90)]
        degrees: i32,
        #[arg(long)]
        output: PathBuf,
    },
    /// Concatenate documents into one PDF.
    Merge {
        /// Input files, in output order.
        #[arg(value_name = "FILE", num_args = 2..)]
        files: Vec<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Render pages to image files, one per page.
    ExportImages {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = ImageFormat::Png)]
        format: ImageFormat,
        /// Defaults to the preview resolution from settings.
        #[arg(long)]
        dpi: Option<u32>,
        /// 1-based pages, comma separated, ranges allowed; every page when
        /// omitted.
        #[arg(long)]
        pages: Option<String>,
    },
    /// Search extracted page text and print hits as JSON.
    Search {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "QUERY")]
        query: String,
    },
    /// Compare two documents page by page.
    Diff {
        #[arg(value_name = "LEFT")]
        left: PathBuf,
        #[arg(value_name = "RIGHT")]
        right: PathBuf,
    },
    /// Print recently opened files.
    Recent {
        /// Forget all recorded files.
        #[arg(long)]
        clear: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ImageFormat {
    Png,
    Jpeg,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct PageRow {
    page: u32,
    width_pt: f32,
    height_pt: f32,
}

#[derive(Debug, Serialize)]
struct SearchHitRow {
    page: usize,
    text: String,
    x: f32,
    y: f32,
}

#[derive(Debug, Serialize)]
struct DiffRow {
    status: PageStatus,
    left_page: Option<usize>,
    right_page: Option<usize>,
}

#[derive(Debug, Serialize)]
struct DiffOutput {
    pages: Vec<DiffRow>,
    summary: DiffSummary,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    init_logging();
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Pages { file } => run_pages(&file),
        Commands::Extract { file, pages, output } => run_extract(&file, &pages, &output),
        Commands::Rotate { file, pages, degrees, output } => {
            run_rotate(&file, &pages, degrees, &output)
        }
        Commands::Merge { files, output } => run_merge(&files, &output),
        Commands::ExportImages { file, dir, format, dpi, pages } => {
            run_export_images(&file, &dir, format, dpi, pages.as_deref())
        }
        Commands::Search { file, query } => run_search(&file, &query),
        Commands::Diff { left, right } => run_diff(&left, &right),
        Commands::Recent { clear } => run_recent(clear),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let first_page_size_pt = if page_count > 0 {
        let size = engine.page_size(handle, 0)?;
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };

    let payload = InfoOutput { path: file.display().to_string(), page_count, first_page_size_pt };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    engine.close(handle)?;
    remember_file(file);
    Ok(())
}

fn run_pages(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let mut rows = Vec::with_capacity(page_count as usize);
    for index in 0..page_count {
        let size = engine.page_size(handle, index)?;
        rows.push(PageRow { page: index + 1, width_pt: size.width_pt, height_pt: size.height_pt });
    }

    println!("{}", serde_json::to_string_pretty(&rows)?);
    engine.close(handle)?;
    remember_file(file);
    Ok(())
}

fn run_extract(file: &Path, pages: &str, output: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let session = Session::open_path(file, session_config())?;
    let uids = select_pages(&session, pages)?;

    let bytes = session.extract(&uids)?;
    write_output(output, &bytes)?;
    println!("{}", output.display());

    remember_file(file);
    Ok(())
}

fn run_rotate(file: &Path, pages: &str, degrees: i32, output: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut session = Session::open_path(file, session_config())?;
    let uids = select_pages(&session, pages)?;

    session.rotate(&uids, degrees)?;
    let bytes = session.extract_all()?;
    write_output(output, &bytes)?;
    println!("{}", output.display());

    remember_file(file);
    Ok(())
}

fn run_merge(files: &[PathBuf], output: &Path) -> Result<()> {
    for file in files {
        ensure_pdf_exists(file)?;
    }

    let mut workspace = Workspace::new(session_config());
    let target = workspace.open(files[0].as_path())?;

    for file in &files[1..] {
        let source = workspace.open(file.as_path())?;
        let uids = workspace.get(source).context("source document disappeared")?.page_order();
        let at = workspace.get(target).context("merge target disappeared")?.page_count();
        workspace.merge(target, source, &uids, at)?;
        workspace.close(source)?;
    }

    let bytes = workspace.get(target).context("merge target disappeared")?.extract_all()?;
    write_output(output, &bytes)?;
    println!("{}", output.display());

    for file in files {
        remember_file(file);
    }
    Ok(())
}

fn run_export_images(
    file: &Path,
    dir: &Path,
    format: ImageFormat,
    dpi: Option<u32>,
    pages: Option<&str>,
) -> Result<()> {
    ensure_pdf_exists(file)?;

    let config = session_config();
    let dpi = dpi.unwrap_or(config.preview_dpi);
    let session = Session::open_path(file, config)?;

    let uids = match pages {
        Some(spec) => select_pages(&session, spec)?,
        None => session.page_order(),
    };
    let format = match format {
        ImageFormat::Png => ExportFormat::Png,
        ImageFormat::Jpeg => ExportFormat::jpeg(),
    };
    let written = session.export_images(&uids, dir, format, dpi)?;
    for path in &written {
        println!("{}", path.display());
    }

    remember_file(file);
    Ok(())
}

fn run_search(file: &Path, query: &str) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut session = Session::open_path(file, session_config())?;
    session.index_all();
    wait_for_jobs(&mut session, JOB_TIMEOUT)?;

    let hits: Vec<SearchHitRow> = session
        .find_all(query)
        .into_iter()
        .map(|hit| SearchHitRow {
            page: hit.page_position + 1,
            text: hit.span.text,
            x: hit.span.x,
            y: hit.span.y,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&hits)?);
    remember_file(file);
    Ok(())
}

fn run_diff(left: &Path, right: &Path) -> Result<()> {
    ensure_pdf_exists(left)?;
    ensure_pdf_exists(right)?;

    let mut workspace = Workspace::new(session_config());
    let left_id = workspace.open(left)?;
    let right_id = workspace.open(right)?;

    for id in [left_id, right_id] {
        let session = workspace.get_mut(id).context("document disappeared")?;
        session.index_all();
        wait_for_jobs(session, JOB_TIMEOUT)?;
    }

    let result = workspace.compare(left_id, right_id, DiffConfig::default())?;
    let left_pages = page_numbers(workspace.get(left_id).context("document disappeared")?);
    let right_pages = page_numbers(workspace.get(right_id).context("document disappeared")?);

    let rows: Vec<DiffRow> = result
        .pages
        .iter()
        .map(|page| DiffRow {
            status: page.status,
            left_page: page.left.and_then(|uid| left_pages.get(&uid).copied()),
            right_page: page.right.and_then(|uid| right_pages.get(&uid).copied()),
        })
        .collect();

    let payload = DiffOutput { pages: rows, summary: result.summary };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    remember_file(left);
    remember_file(right);
    Ok(())
}

fn run_recent(clear: bool) -> Result<()> {
    let storage = storage().context("no usable data directory")?;

    if clear {
        let mut recent = storage.load_recent_files()?;
        recent.clear();
        storage.save_recent_files(&recent)?;
        return Ok(());
    }

    let recent = storage.load_recent_files()?;
    let paths: Vec<String> = recent.iter().map(|path| path.display().to_string()).collect();
    println!("{}", serde_json::to_string_pretty(&paths)?);
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn storage() -> Result<Storage, StorageError> {
    match std::env::var_os("QUIRE_DATA_DIR") {
        Some(root) => Ok(Storage::with_root(PathBuf::from(root))),
        None => Storage::from_default_project(),
    }
}

fn session_config() -> SessionConfig {
    let config = SessionConfig::default();
    match storage().and_then(|storage| storage.load_settings()) {
        Ok(settings) => config.with_preview_dpi(settings.preview_dpi),
        Err(err) => {
            debug!(%err, "using default settings");
            config
        }
    }
}

/// Best effort; command results never depend on the recents file.
fn remember_file(file: &Path) {
    let path = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    let outcome = storage().and_then(|storage| {
        let mut recent = storage.load_recent_files()?;
        recent.record(path);
        storage.save_recent_files(&recent)
    });

    if let Err(err) = outcome {
        debug!(%err, "could not update recent files");
    }
}

/// Maps "1,3-5" onto page uids, in document order with duplicates dropped.
fn select_pages(session: &Session, spec: &str) -> Result<Vec<PageUid>> {
    let order = session.page_order();
    let indexes = parse_page_list(spec, order.len())?;
    Ok(indexes.into_iter().map(|index| order[index]).collect())
}

fn parse_page_list(spec: &str, page_count: usize) -> Result<Vec<usize>> {
    let mut seen = std::collections::HashSet::new();
    let mut pages = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (start, end) = match part.split_once('-') {
            Some((start, end)) => (parse_page_number(start)?, parse_page_number(end)?),
            None => {
                let page = parse_page_number(part)?;
                (page, page)
            }
        };
        if start > end {
            bail!("page range {part:?} runs backwards");
        }

        for page in start..=end {
            if page > page_count {
                bail!("page {page} is out of range; the document has {page_count} pages");
            }
            if seen.insert(page) {
                pages.push(page - 1);
            }
        }
    }

    if pages.is_empty() {
        bail!("no pages selected");
    }
    Ok(pages)
}

fn parse_page_number(text: &str) -> Result<usize> {
    let page: usize =
        text.trim().parse().with_context(|| format!("invalid page number {text:?}"))?;
    if page == 0 {
        bail!("pages are numbered from 1");
    }
    Ok(page)
}

/// Pumps background results until the session goes idle.
fn wait_for_jobs(session: &mut Session, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        session.drain_events();
        if session.is_idle() {
            session.drain_events();
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("timed out waiting for background work");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn page_numbers(session: &Session) -> HashMap<PageUid, usize> {
    session.page_order().into_iter().enumerate().map(|(index, uid)| (uid, index + 1)).collect()
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
