//! sergen - Compile settings schemas into default blobs and descriptor tables
//!
//! This tool reads JSON schema files and generates, for each one, the C
//! declarations, descriptor tables and binary default-value blob a generic
//! runtime needs to load and save the described settings.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use sergen_core::{CodeGenerator, CodegenConfig, GeneratedCode, LayoutConfig, PointerWidth, Schema};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Compile settings schemas into default blobs and descriptor tables
#[derive(Parser, Debug)]
#[command(name = "sergen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for generated files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "c")]
    format: OutputFormat,

    /// Pointer size of the target in bytes (4 or 8)
    #[arg(long, default_value = "8", value_parser = parse_pointer_width)]
    pointer_width: PointerWidth,

    /// C++ namespace wrapping the generated code
    #[arg(long, env = "SERGEN_NAMESPACE")]
    namespace: Option<String>,

    /// Leave field comments out of the generated header
    #[arg(long)]
    no_comments: bool,

    /// Dry run - don't write files, just show what would be generated
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files that differ from the generated output
    #[arg(long)]
    force: bool,

    /// Conflict resolution strategy for same-name different-content outputs
    #[arg(long, value_enum, default_value = "hash-suffix")]
    conflict_strategy: ConflictStrategy,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single schema file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of schema files (*.json) to process
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// What to generate for each schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// C header and source: <name>.h and <name>.cpp
    C,
    /// The raw default blob: <name>.bin
    Bin,
    /// The annotated default blob as a C array: <name>.inc
    Listing,
}

/// Strategy for resolving naming conflicts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictStrategy {
    /// Append a short content hash: Settings~a1b2c3d4.h
    HashSuffix,
    /// Append source schema name: Settings~from-schema.h
    SourceSuffix,
    /// Skip conflicting files (keep first occurrence only)
    SkipConflicts,
}

fn parse_pointer_width(s: &str) -> std::result::Result<PointerWidth, String> {
    s.parse::<u32>()
        .ok()
        .and_then(PointerWidth::from_bytes)
        .ok_or_else(|| format!("pointer width must be 4 or 8, got '{}'", s))
}

/// One file to be written
struct Output {
    name: String,
    content: Vec<u8>,
}

/// Tracks generated files for deduplication
#[derive(Default)]
struct OutputRegistry {
    /// Maps output filename -> (content_hash, output_path)
    seen: HashMap<String, Vec<(String, PathBuf)>>,
    /// Statistics
    stats: RegistryStats,
}

#[derive(Default)]
struct RegistryStats {
    total: usize,
    duplicates_skipped: usize,
    conflicts_renamed: usize,
    unchanged: usize,
    written: usize,
}

impl OutputRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn content_hash(content: &[u8]) -> String {
        let hash = blake3::hash(content);
        hash.to_hex()[..8].to_string()
    }

    /// Check if this exact content was already seen for this filename
    fn is_duplicate(&self, filename: &str, content_hash: &str) -> bool {
        self.seen
            .get(filename)
            .map(|entries| entries.iter().any(|(h, _)| h == content_hash))
            .unwrap_or(false)
    }

    /// Get the number of variants we've seen for this filename
    fn variant_count(&self, filename: &str) -> usize {
        self.seen.get(filename).map(|e| e.len()).unwrap_or(0)
    }

    /// Register an output file and return the resolved output path
    fn register(
        &mut self,
        filename: &str,
        content_hash: &str,
        output_dir: &Path,
        source_schema: Option<&Path>,
        strategy: ConflictStrategy,
    ) -> Option<PathBuf> {
        self.stats.total += 1;

        if self.is_duplicate(filename, content_hash) {
            debug!("Skipping duplicate: {} (hash: {})", filename, content_hash);
            self.stats.duplicates_skipped += 1;
            return None;
        }

        let output_path = if self.variant_count(filename) == 0 {
            output_dir.join(filename)
        } else {
            match strategy {
                ConflictStrategy::SkipConflicts => {
                    debug!(
                        "Skipping conflict: {} (different content, hash: {})",
                        filename, content_hash
                    );
                    self.stats.duplicates_skipped += 1;
                    return None;
                }
                ConflictStrategy::HashSuffix => {
                    let new_name = Self::add_suffix(filename, &format!("~{}", content_hash));
                    info!(
                        "Conflict resolved: {} -> {} (content differs)",
                        filename, new_name
                    );
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
                ConflictStrategy::SourceSuffix => {
                    let source_name = source_schema
                        .and_then(|p| p.file_stem())
                        .and_then(|s| s.to_str())
                        .unwrap_or("unknown");
                    let new_name = Self::add_suffix(filename, &format!("~from-{}", source_name));
                    info!(
                        "Conflict resolved: {} -> {} (from {})",
                        filename, new_name, source_name
                    );
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
            }
        };

        self.seen
            .entry(filename.to_string())
            .or_default()
            .push((content_hash.to_string(), output_path.clone()));

        Some(output_path)
    }

    /// Add a suffix before the file extension
    fn add_suffix(filename: &str, suffix: &str) -> String {
        let path = Path::new(filename);
        match (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) {
            (Some(stem), Some(ext)) => path
                .with_file_name(format!("{}{}.{}", stem, suffix, ext))
                .to_string_lossy()
                .into_owned(),
            _ => format!("{}{}", filename, suffix),
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} generated, {} duplicates skipped, {} conflicts renamed, {} unchanged, {} written",
            self.stats.total,
            self.stats.duplicates_skipped,
            self.stats.conflicts_renamed,
            self.stats.unchanged,
            self.stats.written
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Process a single schema file
fn process_single_file(cli: &Cli, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let mut registry = OutputRegistry::new();
    process_schema(cli, file, &mut registry)?;

    if !cli.dry_run {
        registry.print_summary();
    }

    Ok(())
}

/// Process every schema file below a directory
fn process_directory(cli: &Cli, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut registry = OutputRegistry::new();
    let mut processed = 0;
    let mut failed = 0;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_schema_file(path) {
            trace!("Skipping: {}", path.display());
            continue;
        }

        debug!("Processing schema: {}", path.display());
        if let Err(e) = process_schema(cli, path, &mut registry) {
            // Log error but continue with other files
            warn!("Error processing {}: {:#}", path.display(), e);
            failed += 1;
        }
        processed += 1;
    }

    info!("Processed {} schema files", processed);

    if !cli.dry_run {
        registry.print_summary();
    }

    if failed > 0 {
        bail!("{} of {} schema files failed", failed, processed);
    }
    Ok(())
}

/// Visible `.json` files
fn is_schema_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    let json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    !hidden && json
}

fn codegen_config(cli: &Cli) -> CodegenConfig {
    let mut config = CodegenConfig::new()
        .include_comments(!cli.no_comments)
        .layout(LayoutConfig::new().pointer_width(cli.pointer_width));
    if let Some(ns) = &cli.namespace {
        config = config.namespace(ns);
    }
    config
}

/// The files to write for one generated schema
fn render_outputs(code: &GeneratedCode, format: OutputFormat) -> Vec<Output> {
    let name = &code.file_name;
    match format {
        OutputFormat::C => vec![
            Output {
                name: format!("{}.h", name),
                content: code.header.clone().into_bytes(),
            },
            Output {
                name: format!("{}.cpp", name),
                content: code.source.clone().into_bytes(),
            },
        ],
        OutputFormat::Bin => vec![Output {
            name: format!("{}.bin", name),
            content: code.artifact.bytes().to_vec(),
        }],
        OutputFormat::Listing => vec![Output {
            name: format!("{}.inc", name),
            content: code.listing.clone().into_bytes(),
        }],
    }
}

/// Generate everything for one schema, then write it
fn process_schema(cli: &Cli, schema_path: &Path, registry: &mut OutputRegistry) -> Result<()> {
    trace!("Reading {}", schema_path.display());
    let schema = Schema::from_file(schema_path)
        .with_context(|| format!("Failed to load schema: {}", schema_path.display()))?;

    let code = CodeGenerator::new(&schema)
        .with_config(codegen_config(cli))
        .generate()
        .with_context(|| format!("Failed to generate code for: {}", schema_path.display()))?;

    debug!(
        "{}: {} records, {} bytes",
        schema_path.display(),
        code.artifact.records().len(),
        code.artifact.len()
    );

    let mut planned = Vec::new();
    for output in render_outputs(&code, cli.format) {
        let content_hash = OutputRegistry::content_hash(&output.content);
        let Some(output_path) = registry.register(
            &output.name,
            &content_hash,
            &cli.output,
            Some(schema_path),
            cli.conflict_strategy,
        ) else {
            continue;
        };

        if cli.dry_run {
            println!("Would write: {}", output_path.display());
            if cli.verbose > 0 && cli.format != OutputFormat::Bin {
                println!("---");
                println!("{}", String::from_utf8_lossy(&output.content));
                println!("---");
            }
            continue;
        }
        planned.push((output_path, output.content));
    }

    // Check every output first so a schema's files are written together or not at all
    let mut writes = Vec::with_capacity(planned.len());
    for (output_path, content) in planned {
        match check_output(&output_path, &content, cli.force)? {
            WriteOutcome::Written => writes.push((output_path, content)),
            WriteOutcome::Unchanged => {
                debug!("Unchanged: {}", output_path.display());
                registry.stats.unchanged += 1;
            }
        }
    }

    for (output_path, content) in writes {
        write_output(&output_path, &content)?;
        println!("Wrote {}", output_path.display());
        registry.stats.written += 1;
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    Unchanged,
}

/// Decide what writing `content` to `output_path` would do, without writing
fn check_output(output_path: &Path, content: &[u8], force: bool) -> Result<WriteOutcome> {
    if output_path.is_dir() {
        bail!("Output path is a directory: {}", output_path.display());
    }
    if !output_path.exists() {
        return Ok(WriteOutcome::Written);
    }

    let existing = fs::read(output_path)
        .with_context(|| format!("Failed to read file: {}", output_path.display()))?;
    if blake3::hash(&existing) == blake3::hash(content) {
        return Ok(WriteOutcome::Unchanged);
    }
    if !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }
    Ok(WriteOutcome::Written)
}

/// Write a generated file, creating parent directories as needed
fn write_output(output_path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}
