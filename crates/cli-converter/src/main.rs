use anyhow::{bail, Context, Result};
use clap::Parser;
use converter::{
    formats::{formats_for, format_label},
    Category, ConvertError, ConverterConfig, DirectorySink, ItemState, LogKind, Queue, SourceFile,
};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Convert video, audio and image files locally
#[derive(Parser, Debug)]
#[command(name = "swk", author, version, about, long_about = None)]
struct Args {
    /// Files or directories to convert
    #[arg(required_unless_present = "list_formats")]
    paths: Vec<PathBuf>,

    /// Target format for every file that supports it (e.g. mp4, mp3, webp)
    #[arg(short, long)]
    format: Option<String>,

    /// Directory converted files are written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Print the supported output formats and exit
    #[arg(long)]
    list_formats: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if args.list_formats {
        print_catalog();
        return Ok(());
    }

    let mut cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = &args.output_dir {
        cfg.output_dir = dir.clone();
    }

    debug!("Configuration: {:?}", cfg);

    let inputs = collect_inputs(&args.paths, args.recursive);
    if inputs.is_empty() {
        bail!("No input files found");
    }
    info!("Found {} input file(s)", inputs.len());

    let mut files = Vec::with_capacity(inputs.len());
    for path in &inputs {
        match SourceFile::from_path(path).await {
            Ok(file) => files.push(file),
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }

    let mut queue = Queue::native(&cfg);
    let ids = queue.enqueue(files);

    if let Some(format) = &args.format {
        let format = format.trim_start_matches('.').to_lowercase();
        for id in &ids {
            match queue.set_format(*id, &format) {
                Ok(_) => {}
                Err(ConvertError::UnsupportedFormat { category: Category::Unknown, .. }) => {}
                Err(e) => {
                    let name = queue.get(*id).map(|i| i.display_name().to_string()).unwrap_or_default();
                    warn!("{}: {}, keeping default", name, e);
                }
            }
        }
    }

    let summary = queue.convert_all().await;

    let sink = DirectorySink::new(cfg.output_dir.clone());
    let delivered = queue.download_all(&sink).await;

    print_console(&queue);

    let counts = queue.counts();
    println!();
    println!(
        "{} converted, {} failed, {} unsupported; {} file(s) written to {}",
        summary.converted,
        counts.error,
        counts.unknown,
        delivered,
        sink.dir().display()
    );

    for item in queue.items().iter().filter(|i| i.state() == ItemState::Error) {
        println!("  ✗ {}: {}", item.display_name(), item.error().unwrap_or("unknown error"));
    }

    if counts.error > 0 {
        bail!("{} conversion(s) failed", counts.error);
    }

    Ok(())
}

/// Expand the command-line paths into the list of files to convert, in the order given
fn collect_inputs(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut inputs = Vec::new();

    for path in paths {
        if path.is_file() {
            inputs.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            warn!("Input does not exist: {}", path.display());
            continue;
        }

        inputs.extend(scan_directory(path, recursive));
    }

    inputs
}

fn scan_directory(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            found.push(entry.into_path());
        }
    }

    debug!("Scanned {}: {} file(s)", root.display(), found.len());
    found
}

fn print_catalog() {
    for category in [Category::Video, Category::Audio, Category::Image] {
        let labels: Vec<String> = formats_for(category).iter().map(|f| format_label(f)).collect();
        println!("{:<6} {}", category.as_str(), labels.join(", "));
    }
}

fn print_console(queue: &Queue) {
    for entry in queue.console() {
        let marker = match entry.kind {
            LogKind::Info => " ",
            LogKind::Success => "✓",
            LogKind::Warning => "!",
            LogKind::Error => "✗",
        };
        println!("[{}] {} {}", entry.timestamp, marker, entry.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_collect_inputs_flat_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mp4"));
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("nested/c.wav"));

        let flat = collect_inputs(&[dir.path().to_path_buf()], false);
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, ["a.png", "b.mp4"]);

        let deep = collect_inputs(&[dir.path().to_path_buf()], true);
        assert_eq!(deep.len(), 3);
        assert!(deep.iter().any(|p| p.ends_with("nested/c.wav")));
    }

    #[test]
    fn test_collect_inputs_keeps_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("z.mov");
        let first = dir.path().join("a.mov");
        touch(&second);
        touch(&first);

        let inputs = collect_inputs(&[second.clone(), dir.path().join("missing.mp3"), first.clone()], false);
        assert_eq!(inputs, [second, first]);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["swk", "-f", "webm", "-r", "clips/"]);
        assert_eq!(args.format.as_deref(), Some("webm"));
        assert!(args.recursive);
        assert_eq!(args.paths, [PathBuf::from("clips/")]);

        assert!(Args::try_parse_from(["swk"]).is_err());
        assert!(Args::try_parse_from(["swk", "--list-formats"]).is_ok());
    }
}
