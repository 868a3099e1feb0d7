//! # Delimited Text Table Formatter (tabfmt)
//!
//! A CLI tool that converts delimited text files (CSV/TSV/PSV) into
//! human-readable fixed-width ASCII tables or Markdown tables.
//!
//! ## Overview
//!
//! `tabfmt` reads rows of delimiter-separated cells and lays them out as a
//! table whose columns stay visually aligned in a monospace context, even
//! when cells mix narrow ASCII with double-width East Asian glyphs.
//!
//! ## Key Components
//!
//! - **Width Engine**: Computes the rendered width of text under a
//!   monospace-with-wide-glyphs model (East Asian Width classification,
//!   with U+3000 handled specially).
//! - **Cell Pipeline**: Escaping (Markdown), width-bounded truncation with a
//!   reserved `...` budget, fullwidth-space normalization, and space padding,
//!   applied in a fixed order so reserved-width accounting stays correct.
//! - **Column Width Resolver**: Scans the dataset once to size each column
//!   at the maximum rendered cell width, floored at 3.
//! - **Renderers**: ASCII (`+---+` borders) and Markdown (`| cell |` rows,
//!   aligned or minimal) table output.
//!
//! ## Data Flow
//!
//! ```text
//! Input → Decode/Split → Escape → Truncate → Normalize → Resolve Widths
//!                                                              ↓
//! Output ← Assemble Borders/Rows ← Pad Cells ←────────────────┘
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | General error (file not found, permission denied, I/O error) |
//! | 2 | Invalid command-line arguments |
//! | 3 | Dry-run mode: output file would change |
//! | 4 | Decode error (invalid UTF-8 or binary input) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use anyhow::{Context, Result};
use clap::ValueEnum;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rich_rust::terminal;
use rich_rust::{ColorSystem, Console};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthChar;

// ─────────────────────────────────────────────────────────────────────────────
// Exit Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic exit codes for scripting and CI integration
mod exit_codes {
    /// Success - completed without errors
    pub const SUCCESS: i32 = 0;
    /// General error (file not found, permission denied, I/O error)
    pub const ERROR: i32 = 1;
    /// Invalid command-line arguments
    pub const INVALID_ARGS: i32 = 2;
    /// Dry-run mode: output file would change
    pub const WOULD_CHANGE: i32 = 3;
    /// Decode error (invalid UTF-8 or binary input detected)
    pub const DECODE_ERROR: i32 = 4;
}

#[derive(Debug)]
struct ArgError(String);

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArgError {}

#[derive(Debug)]
struct DecodeError(String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
struct RunOutcome {
    dry_run: bool,
    would_change: bool,
}

fn error_chain_has<T: std::error::Error + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<T>())
}

fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if error_chain_has::<ArgError>(err) {
        exit_codes::INVALID_ARGS
    } else if error_chain_has::<DecodeError>(err) {
        exit_codes::DECODE_ERROR
    } else {
        exit_codes::ERROR
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CLI Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFormat {
    /// Fixed-width table with +---+ borders
    Ascii,
    /// Markdown pipe table
    Markdown,
}

impl OutputFormat {
    fn label(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Markdown => "markdown",
        }
    }

    /// Extension used by --save when --save-ext is not given
    fn default_save_ext(self) -> &'static str {
        match self {
            Self::Ascii => ".txt",
            Self::Markdown => ".md",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ColorMode {
    /// Auto-detect color support
    Auto,
    /// Always emit colors (even when not a TTY)
    Always,
    /// Never emit colors
    Never,
}

/// Delimited Text Table Formatter: renders CSV/TSV/PSV as aligned tables
#[derive(Parser, Debug)]
#[command(
    name = "tabfmt",
    version,
    about,
    long_about = None,
    after_help = "EXIT CODES:\n  0  Success\n  1  General error (file not found, permission denied, I/O error)\n  2  Invalid command-line arguments\n  3  Dry-run mode: output file would change\n  4  Decode error (invalid UTF-8 or binary input)\n"
)]
struct Args {
    /// Input file(s). Reads from stdin if not provided.
    /// Multiple files can be specified.
    #[arg(value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Path to config file (default: search for .tabfmtrc)
    #[arg(long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Ignore config files
    #[arg(long = "no-config")]
    no_config: bool,

    /// Field delimiter (default: from extension; .csv=',' .tsv=TAB .psv='|')
    #[arg(short = 'd', long)]
    delimiter: Option<char>,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "ascii")]
    format: OutputFormat,

    /// Maximum rendered width per cell (longer cells are truncated with "...")
    #[arg(short = 'W', long = "max-width", value_name = "COLS")]
    max_width: Option<usize>,

    /// Replace fullwidth spaces (U+3000) with two ASCII spaces
    #[arg(long = "normalize-ws")]
    normalize_ws: bool,

    /// Skip column alignment in Markdown output (minimal form)
    #[arg(long = "no-align")]
    no_align: bool,

    /// Treat row 0 as a header row (the default)
    #[arg(long, conflicts_with = "no_header")]
    header: bool,

    /// Treat all rows as data (no header separator)
    #[arg(long = "no-header")]
    no_header: bool,

    /// Output file (default: print to stdout)
    #[arg(short = 'o', long, conflicts_with = "save")]
    output: Option<PathBuf>,

    /// Derive the output path from the input path (.txt for ascii, .md for markdown)
    #[arg(long)]
    save: bool,

    /// Extension for --save output files (e.g. --save-ext .out)
    #[arg(long = "save-ext", requires = "save")]
    save_ext: Option<String>,

    /// Process files recursively in directories
    #[arg(short = 'r', long, conflicts_with = "output")]
    recursive: bool,

    /// Glob pattern to match files when recursing (comma-separated)
    #[arg(long, default_value = "*.csv,*.tsv,*.psv", requires = "recursive")]
    glob: String,

    /// Do not respect .gitignore when recursing
    #[arg(long = "no-gitignore", requires = "recursive")]
    no_gitignore: bool,

    /// Maximum directory depth (0 = unlimited)
    #[arg(long, default_value = "0", requires = "recursive")]
    max_depth: usize,

    /// Check whether output files would change without writing (exit 0=up to date, 3=would change)
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Show a unified diff between the existing output file and the fresh render
    #[arg(long)]
    diff: bool,

    /// Watch the input file and re-render the output on every change
    #[arg(short = 'w', long, conflicts_with_all = ["recursive", "diff", "dry_run", "json"])]
    watch: bool,

    /// Debounce interval in milliseconds (for --watch mode)
    #[arg(long, default_value = "500", requires = "watch")]
    debounce_ms: u64,

    /// Create a backup before overwriting an existing output file
    #[arg(long)]
    backup: bool,

    /// Extension for backup files (default: .bak)
    #[arg(long, default_value = ".bak", requires = "backup")]
    backup_ext: String,

    /// Verbose output showing conversion progress
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Color output: auto, always, or never
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Output results as JSON for programmatic processing
    #[arg(long, conflicts_with_all = ["verbose", "diff"])]
    json: bool,

    /// Subcommand (config management)
    #[command(subcommand)]
    command: Option<Commands>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config management actions
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Initialize a new .tabfmtrc config file
    Init {
        /// Create in home directory instead of current
        #[arg(long)]
        global: bool,
    },
    /// Show effective configuration (merged file + CLI)
    Show,
    /// Show path to active config file
    Path,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration derived from CLI args
#[derive(Debug)]
struct Config {
    format: OutputFormat,
    delimiter: Option<char>,
    max_width: Option<usize>,
    normalize_ws: bool,
    align: bool,
    has_header: bool,
    output: Option<PathBuf>,
    save: bool,
    save_ext: Option<String>,
    recursive: bool,
    glob: String,
    gitignore: bool,
    max_depth: usize,
    color: ColorMode,
    verbose: bool,
    diff: bool,
    dry_run: bool,
    watch: bool,
    debounce_ms: u64,
    backup: bool,
    backup_ext: String,
    json: bool,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            format: args.format,
            delimiter: args.delimiter,
            max_width: args.max_width,
            normalize_ws: args.normalize_ws,
            align: !args.no_align,
            has_header: !args.no_header,
            output: args.output.clone(),
            save: args.save,
            save_ext: args.save_ext.clone(),
            recursive: args.recursive,
            glob: args.glob.clone(),
            gitignore: !args.no_gitignore,
            max_depth: args.max_depth,
            color: args.color,
            verbose: args.verbose,
            diff: args.diff,
            dry_run: args.dry_run,
            watch: args.watch,
            debounce_ms: args.debounce_ms,
            backup: args.backup,
            backup_ext: args.backup_ext.clone(),
            json: args.json,
        }
    }
}

impl Config {
    /// Delimiter to use for a given input path, honoring an explicit -d flag
    fn delimiter_for(&self, path: Option<&Path>) -> char {
        match self.delimiter {
            Some(d) => d,
            None => path.map(delimiter_for_path).unwrap_or(','),
        }
    }
}

struct VerboseStyle {
    use_color: bool,
}

impl VerboseStyle {
    fn new(use_color: bool) -> Self {
        Self { use_color }
    }

    fn wrap(&self, tag: &str, text: impl fmt::Display) -> String {
        if self.use_color {
            format!("[{}]{}[/]", tag, text)
        } else {
            text.to_string()
        }
    }

    fn header(&self, text: impl fmt::Display) -> String {
        self.wrap("bold cyan", text)
    }

    fn success(&self, text: impl fmt::Display) -> String {
        self.wrap("bold green", text)
    }

    fn dim(&self, text: impl fmt::Display) -> String {
        self.wrap("dim", text)
    }

    fn bold(&self, text: impl fmt::Display) -> String {
        self.wrap("bold", text)
    }

    fn stat_label(&self, text: impl fmt::Display) -> String {
        self.wrap("bold blue", text)
    }

    fn separator(&self) -> String {
        self.wrap("dim", "───")
    }
}

/// Print a statistics summary to stderr
fn print_stats_summary(
    stats: &Stats,
    files_processed: usize,
    files_written: usize,
    errors: usize,
    console: &Console,
    styles: &VerboseStyle,
) {
    console.print("");
    console.print(&format!(
        "{} Summary {}",
        styles.separator(),
        styles.separator()
    ));

    // File statistics (for multiple files)
    if files_processed > 1 {
        console.print(&format!(
            "  {} {} processed, {} written, {} unchanged",
            styles.stat_label("Files:"),
            files_processed,
            files_written,
            files_processed.saturating_sub(files_written)
        ));
    }

    // Input statistics
    console.print(&format!(
        "  {} {} row(s), {} cell(s)",
        styles.stat_label("Input:"),
        stats.rows,
        stats.cells
    ));

    // Truncation statistics
    if stats.cells_truncated > 0 {
        console.print(&format!(
            "  {} {} cell(s)",
            styles.stat_label("Truncated:"),
            stats.cells_truncated
        ));
    }

    // Output statistics
    console.print(&format!(
        "  {} {} line(s)",
        styles.stat_label("Output:"),
        stats.render_lines
    ));

    // Performance statistics
    let elapsed_ms = stats.elapsed.as_secs_f64() * 1000.0;
    let rows_per_sec = stats.rows_per_second();
    console.print(&format!(
        "  {} {:.2}ms ({:.0} rows/sec)",
        styles.stat_label("Time:"),
        elapsed_ms,
        rows_per_sec
    ));

    // Error count if any
    if errors > 0 {
        console.print(&format!(
            "  {} {}",
            styles.wrap("bold red", "Errors:"),
            errors
        ));
    }

    console.print("");
}

fn build_console(color: ColorMode) -> (Console, VerboseStyle) {
    match color {
        ColorMode::Never => (Console::new(), VerboseStyle::new(false)),
        ColorMode::Always => {
            let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
            let console = Console::builder()
                .force_terminal(true)
                .color_system(system)
                .build();
            (console, VerboseStyle::new(true))
        }
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                return (Console::new(), VerboseStyle::new(false));
            }

            if std::env::var("FORCE_COLOR").is_ok() {
                let system = terminal::detect_color_system().unwrap_or(ColorSystem::Standard);
                let console = Console::builder()
                    .force_terminal(true)
                    .color_system(system)
                    .build();
                return (console, VerboseStyle::new(true));
            }

            let console = Console::new();
            let use_color = console.is_color_enabled();
            (console, VerboseStyle::new(use_color))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config File Support
// ─────────────────────────────────────────────────────────────────────────────

/// Config file names searched in order
const CONFIG_FILENAMES: &[&str] = &[".tabfmtrc", ".tabfmtrc.toml", "tabfmtrc.toml"];

/// Configuration loaded from a .tabfmtrc file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    /// Output format: ascii or markdown
    format: Option<OutputFormat>,
    /// Field delimiter (single character)
    delimiter: Option<char>,
    /// Maximum rendered width per cell
    max_width: Option<usize>,
    /// Replace fullwidth spaces with two ASCII spaces
    normalize_ws: Option<bool>,
    /// Align Markdown columns
    align: Option<bool>,
    /// Treat row 0 as a header row
    header: Option<bool>,
    /// Extension for --save output files
    save_ext: Option<String>,
    /// Show verbose output
    verbose: Option<bool>,
    /// Color mode: auto, always, never
    color: Option<ColorMode>,
    /// Output as JSON
    json: Option<bool>,
    /// Create backup before overwriting an output file
    backup: Option<bool>,
    /// Backup file extension
    backup_ext: Option<String>,
    /// Enable recursive mode
    recursive: Option<bool>,
    /// Glob patterns for recursive mode
    glob: Option<String>,
    /// Respect .gitignore
    gitignore: Option<bool>,
    /// Maximum directory depth
    max_depth: Option<usize>,
}

/// Search for a config file starting from the given directory
fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    // Search up the directory tree
    loop {
        for filename in CONFIG_FILENAMES {
            let config_path = current.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    // Check home directory
    if let Some(home) = dirs::home_dir() {
        for filename in CONFIG_FILENAMES {
            let config_path = home.join(filename);
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Create Config by merging file config with CLI args (CLI wins)
fn create_config(args: &Args) -> Result<Config> {
    let mut config = Config::from(args);

    // Skip config file loading if --no-config is set
    if args.no_config {
        return Ok(config);
    }

    // Find and load config file
    let config_path = if let Some(ref path) = args.config_file {
        // Explicit config file specified
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        Some(path.clone())
    } else {
        // Search for config file
        let start_dir = args
            .inputs
            .first()
            .and_then(|p| {
                if p.is_dir() {
                    Some(p.clone())
                } else {
                    p.parent().map(|p| p.to_path_buf())
                }
            })
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        find_config_file(&start_dir)
    };

    if let Some(path) = config_path {
        let file_config = load_config_file(&path)?;

        // Merge file config with CLI config (CLI wins)
        // Only apply file config values when CLI used defaults
        if args.format == OutputFormat::Ascii {
            if let Some(format) = file_config.format {
                config.format = format;
            }
        }

        if args.delimiter.is_none() {
            config.delimiter = file_config.delimiter;
        }

        if args.max_width.is_none() {
            config.max_width = file_config.max_width;
        }

        if !args.normalize_ws {
            if let Some(n) = file_config.normalize_ws {
                config.normalize_ws = n;
            }
        }

        if !args.no_align {
            if let Some(a) = file_config.align {
                config.align = a;
            }
        }

        // Header: file value applies only when neither --header nor --no-header given
        if !args.header && !args.no_header {
            if let Some(h) = file_config.header {
                config.has_header = h;
            }
        }

        if args.save_ext.is_none() {
            config.save_ext = file_config.save_ext;
        }

        // Boolean flags: use file value if CLI flag wasn't set
        if !args.verbose {
            if let Some(v) = file_config.verbose {
                config.verbose = v;
            }
        }

        if args.color == ColorMode::Auto {
            if let Some(c) = file_config.color {
                config.color = c;
            }
        }

        if !args.json {
            if let Some(j) = file_config.json {
                config.json = j;
            }
        }

        if !args.backup {
            if let Some(b) = file_config.backup {
                config.backup = b;
            }
        }

        // backup_ext: use file value if CLI used default
        if args.backup_ext == ".bak" {
            if let Some(ext) = file_config.backup_ext {
                config.backup_ext = ext;
            }
        }

        // Recursive options
        if !args.recursive {
            if let Some(r) = file_config.recursive {
                config.recursive = r;
            }
        }

        if args.glob == "*.csv,*.tsv,*.psv" {
            if let Some(g) = file_config.glob {
                config.glob = g;
            }
        }

        if !args.no_gitignore {
            if let Some(gi) = file_config.gitignore {
                config.gitignore = gi;
            }
        }

        if args.max_depth == 0 {
            if let Some(d) = file_config.max_depth {
                config.max_depth = d;
            }
        }
    }

    Ok(config)
}

/// Default config file content
const DEFAULT_CONFIG: &str = r#"# .tabfmtrc - tabfmt configuration file

# Output format: ascii or markdown
format = "ascii"

# Field delimiter (default: derived from the input extension)
# delimiter = ","

# Cap the rendered width of each cell; longer cells end in "..."
# max_width = 20

# Replace fullwidth spaces (U+3000) with two ASCII spaces
# normalize_ws = false

# Align Markdown columns (set false for the minimal form)
# align = true

# Treat row 0 as a header row
# header = true

# Output options
# verbose = false
# color = "auto"
# json = false

# Save options (for --save)
# save_ext = ".out"

# Backup options (when overwriting output files)
# backup = false
# backup_ext = ".bak"

# Recursive mode defaults
# recursive = false
# glob = "*.csv,*.tsv,*.psv"
# gitignore = true
# max_depth = 0
"#;

/// Handle the config subcommand
fn run_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { global } => {
            let path = if *global {
                dirs::home_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?
                    .join(".tabfmtrc")
            } else {
                PathBuf::from(".tabfmtrc")
            };

            if path.exists() {
                return Err(anyhow::anyhow!(
                    "Config file already exists: {}",
                    path.display()
                ));
            }

            fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to create config file: {}", path.display()))?;

            eprintln!("Created config file: {}", path.display());
            Ok(())
        }

        ConfigAction::Show => {
            // Parse minimal args to get effective config
            let args = Args::parse_from(["tabfmt"]);
            let config = create_config(&args)?;

            eprintln!("Effective configuration:");
            eprintln!("  format: {}", config.format.label());
            match config.delimiter {
                Some(d) => eprintln!("  delimiter: {:?}", d),
                None => eprintln!("  delimiter: (from extension)"),
            }
            match config.max_width {
                Some(w) => eprintln!("  max_width: {}", w),
                None => eprintln!("  max_width: (unlimited)"),
            }
            eprintln!("  normalize_ws: {}", config.normalize_ws);
            eprintln!("  align: {}", config.align);
            eprintln!("  header: {}", config.has_header);
            if let Some(ref ext) = config.save_ext {
                eprintln!("  save_ext: {}", ext);
            }
            eprintln!("  verbose: {}", config.verbose);
            eprintln!("  color: {:?}", config.color);
            eprintln!("  json: {}", config.json);
            eprintln!("  backup: {}", config.backup);
            eprintln!("  backup_ext: {}", config.backup_ext);
            eprintln!("  recursive: {}", config.recursive);
            eprintln!("  glob: {}", config.glob);
            eprintln!("  gitignore: {}", config.gitignore);
            eprintln!("  max_depth: {}", config.max_depth);

            // Show config file path if found
            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                eprintln!();
                eprintln!("Config file: {}", path.display());
            }

            Ok(())
        }

        ConfigAction::Path => {
            let start_dir = std::env::current_dir().unwrap_or_default();
            if let Some(path) = find_config_file(&start_dir) {
                println!("{}", path.display());
                Ok(())
            } else {
                eprintln!("No config file found");
                std::process::exit(1);
            }
        }
    }
}

fn validate_args(args: &Args) -> Result<()> {
    if args.max_width == Some(0) {
        return Err(ArgError("--max-width must be at least 1".to_string()).into());
    }

    if args.delimiter == Some('"') {
        return Err(ArgError("--delimiter must not be the quote character".to_string()).into());
    }

    if args.recursive && args.inputs.is_empty() {
        return Err(ArgError("--recursive requires at least one input path".to_string()).into());
    }

    if args.save && args.inputs.is_empty() {
        return Err(ArgError("--save requires at least one input file".to_string()).into());
    }

    if args.output.is_some() && args.inputs.len() > 1 {
        return Err(ArgError(
            "--output cannot be used with multiple input files (use --save)".to_string(),
        )
        .into());
    }

    if args.dry_run && args.output.is_none() && !args.save {
        return Err(ArgError("--dry-run requires --output or --save".to_string()).into());
    }

    if args.diff && args.output.is_none() && !args.save {
        return Err(ArgError("--diff requires --output or --save".to_string()).into());
    }

    if args.watch && args.output.is_none() && !args.save {
        return Err(ArgError("--watch requires --output or --save".to_string()).into());
    }

    if args.backup && args.output.is_none() && !args.save {
        return Err(ArgError("--backup requires --output or --save".to_string()).into());
    }

    Ok(())
}

/// Statistics collected during conversion
#[derive(Default, Clone)]
struct Stats {
    /// Number of input rows
    rows: usize,
    /// Number of columns (from row 0)
    columns: usize,
    /// Total number of cells across all rows
    cells: usize,
    /// Number of cells wider than --max-width (truncated in the output)
    cells_truncated: usize,
    /// Number of rendered output lines
    render_lines: usize,
    /// Processing elapsed time
    elapsed: Duration,
}

impl Stats {
    /// Merge another Stats into this one (for aggregating across files)
    fn merge(&mut self, other: &Stats) {
        self.rows += other.rows;
        self.columns += other.columns;
        self.cells += other.cells;
        self.cells_truncated += other.cells_truncated;
        self.render_lines += other.render_lines;
        self.elapsed += other.elapsed;
    }

    /// Calculate rows processed per second
    fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows as f64 / secs
        } else {
            self.rows as f64
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON Output Structures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonOutput {
    version: &'static str,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    format: &'static str,
    input: InputStats,
    processing: ProcessingStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<OutputStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct InputStats {
    rows: usize,
    columns: usize,
    cells: usize,
}

#[derive(Serialize)]
struct ProcessingStats {
    cells_truncated: usize,
    aligned: bool,
}

#[derive(Serialize)]
struct OutputStats {
    lines: usize,
    bytes: usize,
    changed: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Display Width Engine
// ─────────────────────────────────────────────────────────────────────────────

/// A single table cell; absent values render as the empty string
type Cell = Option<String>;

/// One input row of cells
type Row = Vec<Cell>;

/// The fullwidth (ideographic) space, U+3000
const FULLWIDTH_SPACE: char = '\u{3000}';

/// Marker glyph substituted for U+3000 in visible normalization mode
const VISIBLE_SPACE_MARKER: &str = "□";

/// Truncation marker appended to over-wide cells
const ELLIPSIS: &str = "...";

/// Rendered width reserved for the truncation marker
const ELLIPSIS_WIDTH: usize = 3;

/// Minimum rendered width enforced per column
const MIN_COLUMN_WIDTH: usize = 3;

/// Fixed sentinel returned by both renderers for an empty dataset
const EMPTY_DATA_SENTINEL: &str = "(no data)";

/// Text of a cell, with absent values mapped to the empty string
fn cell_text(cell: &Cell) -> &str {
    cell.as_deref().unwrap_or("")
}

/// Rendered width of a single character in terminal columns.
///
/// U+3000 is special-cased to 2 because its East Asian Width classification
/// is unreliable across terminals. Every other code point counts 2 when the
/// East Asian Width property is Fullwidth or Wide, and 1 otherwise. The
/// Ambiguous category counts 1 — an approximation, since true width is
/// terminal and font dependent.
fn char_cells(c: char) -> usize {
    if c == FULLWIDTH_SPACE {
        return 2;
    }
    // Code points unicode-width reports as zero-width or unclassified
    // (combining marks, controls) still occupy one cell under this model.
    match UnicodeWidthChar::width(c) {
        Some(2) => 2,
        _ => 1,
    }
}

/// Rendered width of a string in terminal columns.
///
/// ```text
/// display_width("Hello")     == 5   // ASCII only
/// display_width("データ")    == 6   // 3 wide chars × 2 columns
/// display_width("Hello世界") == 9   // 5 ASCII + 2 wide chars
/// ```
fn display_width(s: &str) -> usize {
    s.chars().map(char_cells).sum()
}

/// Normalize fullwidth spaces in a cell.
///
/// Visible mode substitutes a marker glyph for inspection (changes the
/// rendered width; diagnostic only). Default mode substitutes two ASCII
/// spaces, preserving the rendered width of 2 while using characters whose
/// classification is stable across terminals. Idempotent either way.
fn normalize_whitespace(text: &str, visible: bool) -> String {
    if visible {
        text.replace(FULLWIDTH_SPACE, VISIBLE_SPACE_MARKER)
    } else {
        text.replace(FULLWIDTH_SPACE, "  ")
    }
}

/// Truncate text so its rendered width fits within `max_width`.
///
/// Exact fits are returned unchanged with no marker. Otherwise the text is
/// walked code point by code point with 3 columns reserved for the `...`
/// marker; the walk never splits a double-width character. When
/// `max_width` is smaller than the marker itself the result degrades to the
/// bare marker. The result can under-fill by one column when a double-width
/// character straddles the budget.
fn truncate_to_width(text: &str, max_width: usize, normalize_ws: bool) -> String {
    let text = if normalize_ws {
        normalize_whitespace(text, false)
    } else {
        text.to_string()
    };

    if display_width(&text) <= max_width {
        return text;
    }

    let budget = max_width.saturating_sub(ELLIPSIS_WIDTH);
    let mut result = String::new();
    let mut current_width = 0;

    for c in text.chars() {
        let width = char_cells(c);
        if current_width + width > budget {
            result.push_str(ELLIPSIS);
            break;
        }
        result.push(c);
        current_width += width;
    }

    result
}

/// Pad text with trailing ASCII spaces to the target rendered width.
///
/// Text already at or beyond the target is returned unchanged; padding is
/// always single-width spaces, so the arithmetic is exact regardless of the
/// content's own wide characters.
fn pad_to_width(text: &str, target_width: usize, normalize_ws: bool) -> String {
    let mut text = if normalize_ws {
        normalize_whitespace(text, false)
    } else {
        text.to_string()
    };

    let current_width = display_width(&text);
    if current_width >= target_width {
        return text;
    }

    text.push_str(&" ".repeat(target_width - current_width));
    text
}

/// Apply the width-sensitive cell pipeline: truncate, then normalize.
///
/// The order is load-bearing: truncation computes its reserved budget on the
/// pre-normalization text, and normalization runs after (re-normalizing
/// inside the truncator is a no-op by idempotence).
fn prepare_cell(text: &str, max_width: Option<usize>, normalize_ws: bool) -> String {
    let mut text = match max_width {
        Some(max) => truncate_to_width(text, max, normalize_ws),
        None => text.to_string(),
    };

    if normalize_ws {
        text = normalize_whitespace(&text, false);
    }

    text
}

// ─────────────────────────────────────────────────────────────────────────────
// Column Width Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Compute the rendered width of each column across the dataset.
///
/// The column count comes from row 0; cells beyond it in later rows are
/// ignored, and shorter rows contribute nothing for the missing positions.
/// Each column is sized at the maximum rendered width among its cells after
/// the truncate/normalize pipeline, floored at [`MIN_COLUMN_WIDTH`] so
/// all-empty columns still render visibly.
fn resolve_column_widths(data: &[Row], max_width: Option<usize>, normalize_ws: bool) -> Vec<usize> {
    let Some(first_row) = data.first() else {
        return Vec::new();
    };

    let mut widths = vec![0usize; first_row.len()];

    for row in data {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            let text = prepare_cell(cell_text(cell), max_width, normalize_ws);
            widths[i] = widths[i].max(display_width(&text));
        }
    }

    widths
        .into_iter()
        .map(|w| w.max(MIN_COLUMN_WIDTH))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Table Renderers
// ─────────────────────────────────────────────────────────────────────────────

/// Escape literal pipes so cell content cannot break Markdown table syntax.
/// Must run before any width computation: the backslash changes the width.
fn escape_markdown_pipes(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Build the `+---+---+` border line for the given column widths
fn ascii_border(widths: &[usize]) -> String {
    let segments: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
    format!("+{}+", segments.join("+"))
}

/// Render the dataset as a fixed-width ASCII table.
///
/// Rows iterate their own length: cells beyond the resolved column count are
/// skipped, and short rows simply emit fewer cells. The border line is
/// re-emitted after row 0 when `has_header` is set.
fn render_ascii(
    data: &[Row],
    max_width: Option<usize>,
    has_header: bool,
    normalize_ws: bool,
) -> String {
    if data.is_empty() {
        return EMPTY_DATA_SENTINEL.to_string();
    }

    let widths = resolve_column_widths(data, max_width, normalize_ws);
    let border = ascii_border(&widths);

    let mut lines = Vec::with_capacity(data.len() + 3);
    lines.push(border.clone());

    for (row_idx, row) in data.iter().enumerate() {
        let mut parts = Vec::with_capacity(row.len());
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                let text = prepare_cell(cell_text(cell), max_width, normalize_ws);
                let padded = pad_to_width(&text, widths[i], normalize_ws);
                parts.push(format!(" {} ", padded));
            }
        }
        lines.push(format!("|{}|", parts.join("|")));

        if has_header && row_idx == 0 {
            lines.push(border.clone());
        }
    }

    lines.push(border);
    lines.join("\n")
}

/// Render the dataset as a Markdown pipe table.
///
/// Pipes are escaped in every cell before the width-sensitive pipeline runs.
/// Aligned mode resolves column widths over the processed cells and pads;
/// unaligned mode emits the processed cells as-is. The header separator row
/// after row 0 matches row 0's own cell count.
fn render_markdown(
    data: &[Row],
    max_width: Option<usize>,
    has_header: bool,
    normalize_ws: bool,
    align_columns: bool,
) -> String {
    if data.is_empty() {
        return EMPTY_DATA_SENTINEL.to_string();
    }

    // Escape first, then truncate/normalize: the pipeline order decides what
    // the truncation budget is measured against.
    let processed: Vec<Row> = data
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| {
                    let escaped = escape_markdown_pipes(cell_text(cell));
                    Some(prepare_cell(&escaped, max_width, normalize_ws))
                })
                .collect()
        })
        .collect();

    let widths = if align_columns {
        resolve_column_widths(&processed, max_width, normalize_ws)
    } else {
        Vec::new()
    };

    let mut lines = Vec::with_capacity(processed.len() + 1);

    for (row_idx, row) in processed.iter().enumerate() {
        let cells: Vec<String> = if align_columns {
            row.iter()
                .enumerate()
                .map(|(i, cell)| {
                    let text = cell_text(cell);
                    if i < widths.len() {
                        pad_to_width(text, widths[i], normalize_ws)
                    } else {
                        text.to_string()
                    }
                })
                .collect()
        } else {
            row.iter().map(|cell| cell_text(cell).to_string()).collect()
        };

        lines.push(format!("| {} |", cells.join(" | ")));

        if has_header && row_idx == 0 {
            let separator_cells: Vec<String> = if align_columns {
                widths.iter().take(row.len()).map(|w| "-".repeat(*w)).collect()
            } else {
                vec!["---".to_string(); row.len()]
            };
            lines.push(format!("| {} |", separator_cells.join(" | ")));
        }
    }

    lines.join("\n")
}

/// Render the dataset in the configured format
fn render_table(data: &[Row], config: &Config) -> String {
    match config.format {
        OutputFormat::Ascii => render_ascii(
            data,
            config.max_width,
            config.has_header,
            config.normalize_ws,
        ),
        OutputFormat::Markdown => render_markdown(
            data,
            config.max_width,
            config.has_header,
            config.normalize_ws,
            config.align,
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delimited Input
// ─────────────────────────────────────────────────────────────────────────────

/// Delimiter implied by a file extension; comma when unrecognized
fn delimiter_for_path(path: &Path) -> char {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => ',',
        Some("tsv") => '\t',
        Some("psv") => '|',
        _ => ',',
    }
}

/// Split one line into fields, honoring RFC 4180-style double quotes.
///
/// A quote is only special at the start of a field; `""` inside a quoted
/// field is a literal quote. Records are line-based: embedded newlines in
/// quoted fields are not supported.
fn split_record(line: &str, delimiter: char) -> Row {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(Some(std::mem::take(&mut field)));
        } else {
            field.push(c);
        }
    }

    fields.push(Some(field));
    fields
}

/// Maximum file size (100 MB) - reject larger files to prevent memory issues
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Read a delimited file and return its rows
fn read_file(path: &Path, delimiter: char) -> Result<Vec<Row>> {
    // Check file size before reading
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;

    if metadata.len() > MAX_FILE_SIZE {
        return Err(DecodeError(format!(
            "File too large: {} ({} MB). Maximum supported size is {} MB.",
            path.display(),
            metadata.len() / (1024 * 1024),
            MAX_FILE_SIZE / (1024 * 1024)
        ))
        .into());
    }

    let source_label = path.display().to_string();
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    parse_bytes_to_rows(bytes, delimiter, &source_label)
}

/// Read delimited content from stdin and return its rows
fn read_stdin_rows(delimiter: char) -> Result<Vec<Row>> {
    let mut buf = Vec::new();
    io::stdin()
        .read_to_end(&mut buf)
        .context("Failed to read stdin")?;
    parse_bytes_to_rows(buf, delimiter, "stdin")
}

/// Convert raw bytes to rows, checking for binary content and valid UTF-8.
/// Blank lines are skipped; every other line becomes one row of cells.
fn parse_bytes_to_rows(bytes: Vec<u8>, delimiter: char, source_label: &str) -> Result<Vec<Row>> {
    if bytes.contains(&0) {
        return Err(DecodeError(format!("Input appears to be binary: {}", source_label)).into());
    }

    let content = String::from_utf8(bytes).map_err(|err| {
        let utf8_err = err.utf8_error();
        let valid_up_to = utf8_err.valid_up_to();
        let byte = err.as_bytes().get(valid_up_to).copied();
        let detail = match byte {
            Some(b) => format!(
                "Invalid UTF-8 at byte position {} (byte value: 0x{:02X}) in {}",
                valid_up_to, b, source_label
            ),
            None => format!("Invalid UTF-8 in {}", source_label),
        };
        DecodeError(detail)
    })?;

    Ok(content
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| split_record(line, delimiter))
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve where the rendered table should be written, if anywhere.
///
/// An explicit `-o` wins; `--save` swaps the input extension for the format's
/// default (or `--save-ext`). `None` means print to stdout.
fn resolve_output_path(input: Option<&Path>, config: &Config) -> Option<PathBuf> {
    if let Some(ref output) = config.output {
        return Some(output.clone());
    }

    if config.save {
        let input = input?;
        let ext = config
            .save_ext
            .clone()
            .unwrap_or_else(|| config.format.default_save_ext().to_string());
        let ext = ext.strip_prefix('.').unwrap_or(&ext).to_string();
        return Some(input.with_extension(ext));
    }

    None
}

/// Rendered table as file content: the table plus a trailing newline
fn rendered_file_content(rendered: &str) -> String {
    let mut content = rendered.to_string();
    if !content.is_empty() {
        content.push('\n');
    }
    content
}

/// Creates a backup of the file by appending the extension to the filename.
/// For example: "table.txt" with extension ".bak" becomes "table.txt.bak"
fn create_backup(path: &Path, ext: &str) -> Result<PathBuf> {
    let mut backup_name = path.as_os_str().to_owned();
    backup_name.push(ext);
    let backup_path = PathBuf::from(backup_name);

    fs::copy(path, &backup_path)
        .with_context(|| format!("Failed to create backup at {}", backup_path.display()))?;

    Ok(backup_path)
}

/// Write the rendered table to a file, backing up any existing file first
/// when --backup is set
fn write_rendered(
    path: &Path,
    rendered: &str,
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> Result<()> {
    if config.backup && path.exists() {
        let backup_path = create_backup(path, &config.backup_ext)?;
        if config.verbose {
            console.print(
                &styles
                    .dim(format!("Created backup: {}", backup_path.display()))
                    .to_string(),
            );
        }
    }

    fs::write(path, rendered_file_content(rendered))
        .with_context(|| format!("Failed to write to file: {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Recursive File Discovery
// ─────────────────────────────────────────────────────────────────────────────

fn build_globset(patterns: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut added = 0;

    for raw in patterns.split(',') {
        let pattern = raw.trim();
        if pattern.is_empty() {
            continue;
        }

        let glob = Glob::new(pattern)
            .map_err(|err| ArgError(format!("Invalid glob pattern '{}': {}", pattern, err)))?;
        builder.add(glob);
        added += 1;
    }

    if added == 0 {
        return Err(ArgError("--glob must include at least one pattern".to_string()).into());
    }

    builder
        .build()
        .map_err(|err| ArgError(format!("Invalid glob set: {}", err)).into())
}

fn discover_recursive_files(
    paths: &[PathBuf],
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> Result<Vec<PathBuf>> {
    let globs = build_globset(&config.glob)?;
    let mut files = std::collections::BTreeSet::new();

    for path in paths {
        if path.is_file() {
            files.insert(path.clone());
            continue;
        }

        if !path.is_dir() {
            if config.verbose {
                console.print(
                    &styles
                        .dim(format!("Warning: path does not exist: {}", path.display()))
                        .to_string(),
                );
            }
            continue;
        }

        let mut walker = WalkBuilder::new(path);
        walker.git_ignore(config.gitignore);
        walker.git_exclude(config.gitignore);
        walker.git_global(config.gitignore);
        walker.ignore(config.gitignore);
        walker.hidden(false);

        if config.max_depth > 0 {
            walker.max_depth(Some(config.max_depth));
        }

        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if config.verbose {
                        console.print(&styles.dim(format!("Warning: {}", err)));
                    }
                    continue;
                }
            };

            let entry_path = entry.path();
            if entry_path.is_file() {
                if let Some(name) = entry_path.file_name() {
                    if globs.is_match(name) {
                        files.insert(entry_path.to_path_buf());
                    }
                }
            }
        }
    }

    Ok(files.into_iter().collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

/// Result of processing a single input (file or stdin)
struct FileResult {
    filename: String,
    rendered: String,
    stats: Stats,
    output_path: Option<PathBuf>,
    would_change: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit_codes::SUCCESS,
                _ => exit_codes::INVALID_ARGS,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // Handle subcommands first
    if let Some(command) = &args.command {
        let exit_code = match run_command(command) {
            Ok(()) => exit_codes::SUCCESS,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                exit_code_for_error(&err)
            }
        };
        std::process::exit(exit_code);
    }

    let exit_code = match run(args) {
        Ok(outcome) => {
            if outcome.dry_run && outcome.would_change {
                exit_codes::WOULD_CHANGE
            } else {
                exit_codes::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code_for_error(&err)
        }
    };

    std::process::exit(exit_code);
}

/// Run a subcommand
fn run_command(command: &Commands) -> Result<()> {
    match command {
        Commands::Config { action } => run_config_command(action),
    }
}

/// Convert one input (file or stdin) and collect the result
fn process_input(
    rows: Vec<Row>,
    filename: String,
    input_path: Option<&Path>,
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> FileResult {
    let start_time = Instant::now();

    let mut stats = Stats {
        rows: rows.len(),
        columns: rows.first().map(Vec::len).unwrap_or(0),
        ..Stats::default()
    };

    for row in &rows {
        stats.cells += row.len();
        if let Some(max) = config.max_width {
            for cell in row {
                if display_width(cell_text(cell)) > max {
                    stats.cells_truncated += 1;
                }
            }
        }
    }

    if config.verbose {
        console.print(
            &styles
                .bold(format!(
                    "Rendering {} ({} row(s) × {} column(s), {})...",
                    filename,
                    stats.rows,
                    stats.columns,
                    config.format.label()
                ))
                .to_string(),
        );
    }

    let rendered = render_table(&rows, config);
    stats.render_lines = rendered.lines().count();
    stats.elapsed = start_time.elapsed();

    let output_path = resolve_output_path(input_path, config);
    let would_change = match output_path {
        Some(ref path) => match fs::read_to_string(path) {
            Ok(existing) => existing != rendered_file_content(&rendered),
            Err(_) => true,
        },
        None => false,
    };

    FileResult {
        filename,
        rendered,
        stats,
        output_path,
        would_change,
    }
}

/// Output a unified diff between the existing output file and the fresh render
fn output_diff(result: &FileResult) -> Result<()> {
    if !result.would_change {
        return Ok(());
    }

    let Some(ref path) = result.output_path else {
        return Ok(());
    };

    let existing = fs::read_to_string(path).unwrap_or_default();
    let fresh = rendered_file_content(&result.rendered);
    let diff = TextDiff::from_lines(&existing, &fresh);
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "--- a/{}", path.display())?;
    writeln!(stdout, "+++ b/{}", path.display())?;

    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        writeln!(stdout, "{}", hunk.header())?;
        for change in hunk.iter_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            let line = change.value();
            if line.ends_with('\n') {
                write!(stdout, "{}{}", sign, line)?;
            } else {
                writeln!(stdout, "{}{}", sign, line)?;
            }
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Watch Mode
// ─────────────────────────────────────────────────────────────────────────────

/// Watch an input file and re-render the output on every change
fn watch_and_convert(
    path: &Path,
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
) -> Result<RunOutcome> {
    // Validate that the file exists and is readable
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    if !path.is_file() {
        anyhow::bail!(
            "--watch requires a file, not a directory: {}",
            path.display()
        );
    }

    let output_path = resolve_output_path(Some(path), config)
        .ok_or_else(|| ArgError("--watch requires --output or --save".to_string()))?;

    if output_path == path {
        anyhow::bail!(
            "Output path equals the watched input: {}",
            output_path.display()
        );
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Set up file watcher
    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )
    .context("Failed to create file watcher")?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch file: {}", path.display()))?;

    let debounce = Duration::from_millis(config.debounce_ms);
    let mut last_event = Instant::now() - debounce; // Allow immediate first run

    eprintln!(
        "Watching {} for changes (Ctrl+C to stop)...",
        path.display()
    );

    let mut any_changes = false;
    let delimiter = config.delimiter_for(Some(path));

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                // Only process file modification events
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let now = Instant::now();
                    if now.duration_since(last_event) >= debounce {
                        last_event = now;

                        // Re-read and re-render the file
                        match read_file(path, delimiter) {
                            Ok(rows) => {
                                let result = process_input(
                                    rows,
                                    path.display().to_string(),
                                    Some(path),
                                    config,
                                    console,
                                    styles,
                                );

                                if result.would_change {
                                    match write_rendered(
                                        &output_path,
                                        &result.rendered,
                                        config,
                                        console,
                                        styles,
                                    ) {
                                        Ok(()) => {
                                            eprintln!(
                                                "✓ Wrote {} line(s) to {}",
                                                result.stats.render_lines,
                                                output_path.display()
                                            );
                                            any_changes = true;
                                        }
                                        Err(e) => {
                                            eprintln!("✗ Failed to write: {}", e);
                                        }
                                    }
                                } else {
                                    eprintln!("✓ Output up to date");
                                }
                            }
                            Err(e) => {
                                eprintln!("✗ Error reading file: {}", e);
                            }
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Just continue waiting
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Watcher disconnected, exit
                break;
            }
        }
    }

    eprintln!("\nWatch mode stopped.");

    Ok(RunOutcome {
        dry_run: false,
        would_change: any_changes,
    })
}

fn run(args: Args) -> Result<RunOutcome> {
    validate_args(&args)?;

    let config = create_config(&args)?;
    let (console, styles) = build_console(config.color);

    // Handle watch mode - must have exactly one file input
    if config.watch {
        if args.inputs.len() != 1 {
            anyhow::bail!("--watch requires exactly one input file");
        }
        let path = &args.inputs[0];
        return watch_and_convert(path, &config, &console, &styles);
    }

    if config.recursive {
        let files = discover_recursive_files(&args.inputs, &config, &console, &styles)?;
        if files.is_empty() {
            let message = format!(
                "Warning: No files matched pattern '{}' in provided paths",
                config.glob
            );
            if config.verbose {
                console.print(&styles.dim(message));
            } else {
                eprintln!("{}", message);
            }
            return Ok(RunOutcome {
                dry_run: config.dry_run,
                would_change: false,
            });
        }

        return output_multiple_results(&config, &console, &styles, &files);
    }

    // Determine if we're processing stdin or files
    if args.inputs.is_empty() {
        // Stdin mode - single input
        let rows = read_stdin_rows(config.delimiter_for(None))?;
        let result = process_input(rows, "stdin".to_string(), None, &config, &console, &styles);
        output_single_result(&config, &console, &styles, result)
    } else if args.inputs.len() == 1 {
        // Single file mode
        let path = &args.inputs[0];
        let rows = read_file(path, config.delimiter_for(Some(path)))?;
        let result = process_input(
            rows,
            path.display().to_string(),
            Some(path),
            &config,
            &console,
            &styles,
        );
        output_single_result(&config, &console, &styles, result)
    } else {
        // Multiple file mode
        output_multiple_results(&config, &console, &styles, &args.inputs)
    }
}

/// Handle output for a single file/stdin result
fn output_single_result(
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
    result: FileResult,
) -> Result<RunOutcome> {
    let would_change = result.would_change;

    if config.json {
        output_json_single(config, console, styles, &result)?;
    } else if config.dry_run {
        output_dry_run_single(config, console, styles, &result)?;
    } else if config.diff {
        output_diff(&result)?;
    } else if let Some(ref path) = result.output_path {
        write_rendered(path, &result.rendered, config, console, styles)?;

        if config.verbose {
            console.print(
                &styles
                    .success(format!(
                        "Wrote {} line(s) to {}",
                        result.stats.render_lines,
                        path.display()
                    ))
                    .to_string(),
            );
        }
    } else {
        // Stdout mode
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", result.rendered)?;
    }

    // Print summary in verbose mode for single input
    if config.verbose {
        print_stats_summary(
            &result.stats,
            1,
            if result.output_path.is_some() && would_change {
                1
            } else {
                0
            },
            0,
            console,
            styles,
        );
    }

    Ok(RunOutcome {
        dry_run: config.dry_run,
        would_change,
    })
}

/// Output JSON for a single result
fn output_json_single(
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
    result: &FileResult,
) -> Result<()> {
    let file_content = rendered_file_content(&result.rendered);

    let json_output = JsonOutput {
        version: "1.0",
        status: if config.dry_run {
            "dry_run".to_string()
        } else {
            "success".to_string()
        },
        file: Some(result.filename.clone()),
        format: config.format.label(),
        input: InputStats {
            rows: result.stats.rows,
            columns: result.stats.columns,
            cells: result.stats.cells,
        },
        processing: ProcessingStats {
            cells_truncated: result.stats.cells_truncated,
            aligned: config.format == OutputFormat::Ascii || config.align,
        },
        output: Some(OutputStats {
            lines: result.stats.render_lines,
            bytes: file_content.len(),
            changed: result.would_change,
        }),
        content: if !config.dry_run && result.output_path.is_none() {
            Some(result.rendered.clone())
        } else {
            None
        },
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json_output).context("Failed to serialize JSON output")?
    );

    // If a file destination is set, still write it (unless dry-run)
    if !config.dry_run {
        if let Some(ref path) = result.output_path {
            write_rendered(path, &result.rendered, config, console, styles)?;
        }
    }

    Ok(())
}

/// Output dry-run info for a single result
fn output_dry_run_single(
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
    result: &FileResult,
) -> Result<()> {
    if config.diff && result.would_change {
        output_diff(result)?;
    }

    if config.verbose {
        let target = result
            .output_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| result.filename.clone());

        if result.would_change {
            console.print(
                &styles
                    .header(format!("Would write: {}", target))
                    .to_string(),
            );
            console.print(
                &styles
                    .dim(format!(
                        "  {} row(s), {} output line(s)",
                        result.stats.rows, result.stats.render_lines
                    ))
                    .to_string(),
            );
        } else {
            console.print(&styles.success(format!("Up to date: {}", target)).to_string());
        }
    }

    Ok(())
}

/// Handle output for multiple files
fn output_multiple_results(
    config: &Config,
    console: &Console,
    styles: &VerboseStyle,
    paths: &[PathBuf],
) -> Result<RunOutcome> {
    let mut total_files_processed = 0;
    let mut total_files_written = 0;
    let mut aggregated_stats = Stats::default();
    let mut any_would_change = false;
    let mut errors: Vec<(PathBuf, anyhow::Error)> = Vec::new();

    let writes_files = config.save || config.output.is_some();
    let show_file_headers = !writes_files && !config.diff && !config.json && paths.len() > 1;

    for path in paths {
        match read_file(path, config.delimiter_for(Some(path))) {
            Ok(rows) => {
                let result = process_input(
                    rows,
                    path.display().to_string(),
                    Some(path),
                    config,
                    console,
                    styles,
                );

                if result.would_change {
                    any_would_change = true;
                }
                total_files_processed += 1;
                aggregated_stats.merge(&result.stats);

                // Handle output based on mode
                if config.json {
                    // For JSON with multiple files, output each file's JSON separately
                    output_json_single(config, console, styles, &result)?;
                } else if config.dry_run {
                    output_dry_run_single(config, console, styles, &result)?;
                } else if config.diff {
                    output_diff(&result)?;
                } else if let Some(ref output_path) = result.output_path {
                    write_rendered(output_path, &result.rendered, config, console, styles)?;
                    total_files_written += 1;

                    if config.verbose {
                        console.print(
                            &styles
                                .success(format!(
                                    "{}: wrote {} line(s) to {}",
                                    path.display(),
                                    result.stats.render_lines,
                                    output_path.display()
                                ))
                                .to_string(),
                        );
                    }
                } else {
                    // Stdout mode - concatenate output with file headers
                    let mut stdout = io::stdout().lock();

                    if show_file_headers {
                        writeln!(stdout, "==> {} <==", path.display())?;
                    }

                    writeln!(stdout, "{}", result.rendered)?;

                    if show_file_headers {
                        writeln!(stdout)?; // Blank line between files
                    }
                }
            }
            Err(e) => {
                eprintln!("Error processing {}: {:#}", path.display(), e);
                errors.push((path.clone(), e));
            }
        }
    }

    // Print summary in verbose mode
    if config.verbose {
        print_stats_summary(
            &aggregated_stats,
            total_files_processed,
            total_files_written,
            errors.len(),
            console,
            styles,
        );
    }

    // If any files had errors, report them
    if !errors.is_empty() {
        let files = errors
            .iter()
            .map(|(p, _)| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let has_decode_error = errors
            .iter()
            .any(|(_, err)| error_chain_has::<DecodeError>(err));

        if has_decode_error {
            return Err(DecodeError(format!(
                "{} file(s) had decode errors: {}",
                errors.len(),
                files
            ))
            .into());
        }

        anyhow::bail!("{} file(s) had errors: {}", errors.len(), files);
    }

    Ok(RunOutcome {
        dry_run: config.dry_run,
        would_change: any_would_change,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
