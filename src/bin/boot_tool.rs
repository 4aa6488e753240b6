use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use privexec::{
    BootProfile, BootSequence, DirRepository, LocalIdentity, MemStore, ReadOnlyStatus, Repository,
    SealedRepository, StoreImage,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "boot-tool")]
#[command(about = "Operator tooling for the privexec boot sequence")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty store image
    Init {
        #[arg(long)]
        store: PathBuf,
    },
    /// Probe a deployment and report its read-only status
    Probe {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Treat the database as read-only regardless of the image
        #[arg(long)]
        db_read_only: bool,
    },
    /// List persisted startup check markers
    Markers {
        #[arg(long)]
        store: PathBuf,
    },
    /// Remove one check marker so the check runs again on next boot
    ClearMarker {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        key: String,
    },
    /// Run the full boot sequence against a store image
    RunChecks {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
        version: String,
        #[arg(long, default_value_t = 0)]
        patch: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Init { store } => init(&store),
        Command::Probe {
            store,
            repo,
            db_read_only,
        } => probe(&store, repo.as_deref(), db_read_only).await,
        Command::Markers { store } => markers(&store),
        Command::ClearMarker { store, key } => clear_marker(&store, &key),
        Command::RunChecks {
            store,
            repo,
            version,
            patch,
        } => run_checks(&store, repo.as_deref(), &version, patch).await,
    }
}

fn load_image(path: &Path) -> Result<StoreImage> {
    let raw = fs::read(path)
        .with_context(|| format!("Failed to read store image '{}'", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse store image '{}'", path.display()))
}

fn save_image(path: &Path, image: &StoreImage) -> Result<()> {
    let json = serde_json::to_vec_pretty(image).context("Failed to serialize store image")?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write store image '{}'", path.display()))?;
    Ok(())
}

fn repository_for(repo: Option<&Path>) -> Arc<dyn Repository> {
    match repo {
        Some(dir) => Arc::new(DirRepository::new(dir)),
        None => Arc::new(SealedRepository),
    }
}

fn init(store: &Path) -> Result<()> {
    if store.exists() {
        return Err(anyhow!(
            "Store image '{}' already exists, refusing to overwrite",
            store.display()
        ));
    }

    save_image(store, &StoreImage::empty())?;
    println!("Created empty store image: {}", store.display());
    Ok(())
}

async fn probe(store_path: &Path, repo: Option<&Path>, db_read_only: bool) -> Result<()> {
    let image = load_image(store_path)?;
    let store = if db_read_only {
        MemStore::from_image_read_only(image)?
    } else {
        MemStore::from_image(image)?
    };

    let status = ReadOnlyStatus::detect(&store, repository_for(repo).as_ref()).await;

    println!("Store: {}", store_path.display());
    println!(
        "Database: {}",
        if status.is_db_read_only() {
            "read-only"
        } else {
            "writable"
        }
    );
    println!(
        "Repository: {}",
        if status.is_repo_read_only() {
            "read-only"
        } else {
            "writable"
        }
    );
    println!("{}", store.stats().await);
    Ok(())
}

fn markers(store_path: &Path) -> Result<()> {
    let image = load_image(store_path)?;

    let mut entries: Vec<(&String, &String)> = image
        .config
        .iter()
        .filter(|(key, _)| key.starts_with("check."))
        .collect();
    entries.sort();

    if entries.is_empty() {
        println!("No check markers in {}", store_path.display());
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }

    if let Some(patch) = image.config.get("schema.patch") {
        println!("schema.patch = {patch}");
    }
    Ok(())
}

fn clear_marker(store_path: &Path, key: &str) -> Result<()> {
    let mut image = load_image(store_path)?;
    let marker_key = format!("check.{key}");

    match image.config.remove(&marker_key) {
        Some(value) => {
            save_image(store_path, &image)?;
            println!("Cleared {marker_key} (was '{value}')");
        }
        None => println!("No marker {marker_key} in {}", store_path.display()),
    }
    Ok(())
}

async fn run_checks(
    store_path: &Path,
    repo: Option<&Path>,
    version: &str,
    patch: u32,
) -> Result<()> {
    let store = Arc::new(MemStore::load(store_path).await?);

    let core = BootSequence::new(
        store.clone(),
        repository_for(repo),
        Arc::new(LocalIdentity::new()),
    )
    .profile(BootProfile::new(version).patch(patch))
    .run()
    .await?;

    if core.check_outcomes().is_empty() {
        println!("No checks ran");
    } else {
        for (key, outcome) in core.check_outcomes() {
            println!("{key}: {outcome}");
        }
    }
    println!("Status: {}", core.status());
    println!("{}", core.executor().stats());

    store.save(store_path).await?;
    println!("Store image updated: {}", store_path.display());
    Ok(())
}
