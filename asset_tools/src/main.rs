use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use asset_core::asset::downcast;
use asset_core::config::AssetConfig;
use asset_core::loaders::PngLoader;
use asset_core::{logging, observability, AssetIds, AssetKey, AssetManager, LoaderRegistry, Texture};
use clap::{Parser, Subcommand};
use log::LevelFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_CONFIG: i32 = 10;
const EXIT_IO: i32 = 11;
const EXIT_DECODE: i32 = 12;
const EXIT_LOAD: i32 = 13;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "asset_tools", version, about = "Asset loading tools CLI")]
struct Cli {
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one PNG file and print its format.
    Inspect(InspectArgs),
    /// Load content paths through an asset manager and report outcomes.
    Load(LoadArgs),
}

#[derive(Parser)]
struct InspectArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,

    #[arg(long)]
    flip: bool,
}

#[derive(Parser)]
struct LoadArgs {
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    inline: bool,

    /// Extra extensions loaded as raw bytes.
    #[arg(long = "bytes", value_name = "EXT")]
    bytes: Vec<String>,

    /// Reload paths even when they are already pending or resident.
    #[arg(long)]
    no_reuse: bool,

    #[arg(required = true, value_name = "PATH")]
    paths: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::install(level);
    observability::install_panic_hook();
    let exit_code = match cli.command {
        Commands::Inspect(args) => run_inspect(args),
        Commands::Load(args) => run_load(args),
    };
    std::process::exit(exit_code);
}

fn run_inspect(args: InspectArgs) -> i32 {
    let ids = AssetIds::new();
    let key = match inspect_key(&ids, &args.file) {
        Ok(key) => key,
        Err(code) => return code,
    };
    let loaders = LoaderRegistry::new();
    let loader = if args.flip {
        PngLoader::flipped()
    } else {
        PngLoader::default()
    };
    match ids.kind("png") {
        Ok(png) => loaders.register(Arc::new(loader), &[png]),
        Err(err) => {
            eprintln!("{}", err);
            return EXIT_USAGE;
        }
    }

    let file = match File::open(&args.file) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open {}: {}", args.file.display(), err);
            return EXIT_IO;
        }
    };
    let asset = match loaders.load_inline(&key, Box::new(BufReader::new(file))) {
        Ok(asset) => asset,
        Err(err) => {
            eprintln!("{}", err);
            return EXIT_DECODE;
        }
    };
    let Some(texture) = downcast::<Texture>(asset) else {
        eprintln!("{} did not decode to a texture", key);
        return EXIT_DECODE;
    };
    println!(
        "{}: {}x{} {} ({} bytes)",
        args.file.display(),
        texture.width,
        texture.height,
        texture.format.label(),
        texture.pixels.len()
    );
    EXIT_SUCCESS
}

fn inspect_key(ids: &AssetIds, file: &Path) -> Result<AssetKey, i32> {
    let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
        eprintln!("not a file path: {}", file.display());
        return Err(EXIT_USAGE);
    };
    ids.key(name).map_err(|err| {
        eprintln!("{}", err);
        EXIT_USAGE
    })
}

fn run_load(args: LoadArgs) -> i32 {
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let manager = AssetManager::from_config(&config);
    if !args.bytes.is_empty() {
        let extensions: Vec<&str> = args.bytes.iter().map(String::as_str).collect();
        if let Err(err) = manager.register_bytes(&extensions) {
            eprintln!("{}", err);
            return EXIT_USAGE;
        }
    }

    let mut keys = Vec::new();
    let mut rejected = 0usize;
    for path in &args.paths {
        match manager.request_path(path, !args.no_reuse) {
            Ok(key) => keys.push(key),
            Err(err) => {
                println!("fail {}: {}", path, err);
                rejected += 1;
            }
        }
    }

    let mut last_percent = None;
    while manager.is_loading() {
        let percent = (manager.progress() * 100.0) as u32;
        if last_percent != Some(percent) {
            log::info!(
                "progress {}% ({} workers busy, {} queued)",
                percent,
                manager.active_worker_count(),
                manager.queue_depth()
            );
            last_percent = Some(percent);
        }
        thread::sleep(POLL_INTERVAL);
    }

    let mut failed = rejected;
    for key in &keys {
        match manager.resolve(key) {
            Ok(asset) => println!("ok   {} ({} bytes)", key, asset.decoded_size()),
            Err(err) => {
                println!("fail {}: {}", key, err);
                failed += 1;
            }
        }
    }

    let stats = manager.stats();
    println!(
        "requested={} loaded={} failed={} resident={} ({} bytes)",
        stats.requested,
        stats.loaded,
        stats.failed,
        stats.resident,
        manager.resident_bytes()
    );
    if failed > 0 {
        EXIT_LOAD
    } else {
        EXIT_SUCCESS
    }
}

fn load_config(args: &LoadArgs) -> Result<AssetConfig, i32> {
    let config = match &args.config {
        Some(path) => AssetConfig::load(path).map_err(|err| {
            eprintln!("{}", err);
            EXIT_CONFIG
        })?,
        None => AssetConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if args.inline {
        config.inline_jobs = true;
    }

    let validation = config.validate();
    for warning in &validation.warnings {
        eprintln!("config warning: {}", warning);
    }
    if !validation.is_ok() {
        for error in &validation.errors {
            eprintln!("config error: {}", error);
        }
        return Err(EXIT_CONFIG);
    }
    if !config.root.is_dir() {
        eprintln!("content root not found: {}", config.root.display());
        return Err(EXIT_CONFIG);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_requires_paths() {
        assert!(Cli::try_parse_from(["asset_tools", "load", "--root", "content"]).is_err());
        let cli = Cli::try_parse_from([
            "asset_tools",
            "load",
            "--inline",
            "--bytes",
            "toml",
            "--bytes",
            "txt",
            "tex/wall.png",
        ])
        .unwrap();
        let Commands::Load(args) = cli.command else {
            panic!("expected load command");
        };
        assert!(args.inline);
        assert_eq!(args.bytes, vec!["toml", "txt"]);
        assert_eq!(args.paths, vec!["tex/wall.png"]);
    }

    #[test]
    fn inspect_key_uses_file_name() {
        let ids = AssetIds::new();
        let key = inspect_key(&ids, Path::new("/tmp/shots/wall.png")).unwrap();
        assert_eq!(key.path(), "wall.png");
        assert_eq!(key.kind().extension(), "PNG");
        assert_eq!(inspect_key(&ids, Path::new("/tmp/README")).err(), Some(EXIT_USAGE));
    }
}
