mod server;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use atelier_contracts::credentials::{mask_key, KeyStore};
use atelier_contracts::events::EventLog;
use atelier_contracts::history::{GeneratedImage, HistoryStore};
use atelier_contracts::store::FileKvStore;
use atelier_contracts::usage::{UsageCounter, DAILY_LIMIT};
use atelier_contracts::wire::AspectRatio;
use atelier_engine::config::{ClientConfig, ProxyConfig};
use atelier_engine::prompt::ScenePreset;
use atelier_engine::{keys, GenerationGateway, HttpProxyClient, Studio};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Outfit composite generation client and proxy")]
struct Cli {
    /// Data directory for key, usage and history (overrides ATELIER_HOME).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Serve(ServeArgs),
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },
    Usage,
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    character: PathBuf,
    #[arg(long)]
    outfit: PathBuf,
    #[arg(long)]
    context: Option<PathBuf>,
    #[arg(long, conflicts_with = "preset")]
    prompt: Option<String>,
    #[arg(long)]
    preset: Option<ScenePreset>,
    #[arg(long, default_value = "3:4")]
    aspect_ratio: AspectRatio,
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Write each generated image to DIR/<id>.png.
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    /// Verify a personal key and store it.
    Set { key: String },
    Clear,
    Status,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List,
    Delete {
        id: String,
    },
    Export {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Generate(args) => run_generate(&ClientConfig::from_env(cli.home)?, args),
        Command::Key { action } => run_key(&ClientConfig::from_env(cli.home)?, action),
        Command::Usage => run_usage(&ClientConfig::from_env(cli.home)?),
        Command::History { action } => run_history(&ClientConfig::from_env(cli.home)?, action),
    }
}

fn run_serve(args: ServeArgs) -> Result<i32> {
    server::init_tracing();
    let mut config = ProxyConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    server::serve(config)?;
    Ok(0)
}

fn open_studio(config: &ClientConfig) -> Result<Studio<FileKvStore, FileKvStore>> {
    let gateway = GenerationGateway::new(
        config.upstream.direct_transport(),
        Box::new(HttpProxyClient::new(
            &config.proxy_url,
            config.upstream.request_timeout,
        )),
    );
    Studio::new(
        gateway,
        FileKvStore::new(config.local_storage_path()),
        FileKvStore::new(config.history_path()),
        Some(EventLog::open(config.events_path())),
    )
}

fn run_generate(config: &ClientConfig, args: GenerateArgs) -> Result<i32> {
    let mut studio = open_studio(config)?;
    let state = studio.state_mut();
    state.set_character(Some(read_image_data_uri(&args.character)?));
    state.set_outfit(Some(read_image_data_uri(&args.outfit)?));
    if let Some(path) = &args.context {
        state.set_context(Some(read_image_data_uri(path)?));
    }
    if let Some(preset) = args.preset {
        state.apply_preset(preset);
    }
    if let Some(prompt) = args.prompt {
        state.set_prompt(prompt);
    }
    state.set_aspect_ratio(args.aspect_ratio);
    state.set_image_count(args.count);

    println!("Generating in {} mode...", studio.mode().as_str());
    let outcome = studio.generate()?;
    for image in &outcome.images {
        println!("{}", image.id);
    }
    if let Some(dir) = &args.export {
        for image in &outcome.images {
            let path = dir.join(format!("{}.png", image.id));
            write_image(image, &path)?;
            println!("Saved {}", path.display());
        }
    }
    if let Some(notice) = outcome.notice {
        eprintln!("{notice}");
    }
    Ok(0)
}

fn run_key(config: &ClientConfig, action: KeyCommand) -> Result<i32> {
    let mut store = KeyStore::new(FileKvStore::new(config.local_storage_path()));
    match action {
        KeyCommand::Set { key } => {
            let transport = config.upstream.direct_transport();
            keys::verify_and_store(transport.as_ref(), &mut store, &key)?;
            println!("API key verified and saved ({}).", mask_key(key.trim()));
        }
        KeyCommand::Clear => {
            store.clear()?;
            println!("API key removed; generations go through the shared proxy.");
        }
        KeyCommand::Status => match store.get() {
            Some(key) => println!("direct mode (personal key {})", mask_key(&key)),
            None => println!("proxy mode (no personal key)"),
        },
    }
    Ok(0)
}

fn run_usage(config: &ClientConfig) -> Result<i32> {
    let mut usage = UsageCounter::new(FileKvStore::new(config.local_storage_path()));
    usage.check_and_reset_daily()?;
    let record = usage.record();
    println!("used today: {}/{DAILY_LIMIT}", record.count);
    println!("last reset: {}", record.last_reset_date.as_deref().unwrap_or("never"));
    println!("near limit: {}", usage.is_near_limit());
    Ok(0)
}

fn run_history(config: &ClientConfig, action: HistoryCommand) -> Result<i32> {
    match action {
        HistoryCommand::List => {
            let history = HistoryStore::new(FileKvStore::new(config.history_path()));
            let images = history.get_all_images();
            if images.is_empty() {
                println!("No saved images.");
            }
            for image in images {
                println!("{}\t{}\t{} bytes", image.id, image.timestamp, image.url.len());
            }
            Ok(0)
        }
        HistoryCommand::Delete { id } => {
            let mut studio = open_studio(config)?;
            if studio.delete_history(&id)? {
                println!("Deleted {id}");
                Ok(0)
            } else {
                eprintln!("No image with id {id}");
                Ok(1)
            }
        }
        HistoryCommand::Export { id, out } => {
            let history = HistoryStore::new(FileKvStore::new(config.history_path()));
            let Some(image) = history.get_image(&id) else {
                bail!("no image with id {id}");
            };
            write_image(&image, &out)?;
            println!("Saved {}", out.display());
            Ok(0)
        }
    }
}

fn read_image_data_uri(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(format!(
        "data:{};base64,{}",
        guess_image_mime(path),
        BASE64.encode(bytes)
    ))
}

fn guess_image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" | "heif" => "image/heic",
        _ => "image/png",
    }
}

fn decode_data_uri(url: &str) -> Result<Vec<u8>> {
    let Some((_, payload)) = url.trim().strip_prefix("data:").and_then(|rest| rest.split_once(','))
    else {
        bail!("image is not an embedded data URI");
    };
    BASE64
        .decode(payload.trim())
        .context("image data is not valid base64")
}

fn write_image(image: &GeneratedImage, path: &Path) -> Result<()> {
    let bytes = decode_data_uri(&image.url)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
