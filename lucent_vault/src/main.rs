//! Lucent Vault - CLI
//!
//! Command-line interface for vault operations.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use lucent_vault::{Album, BatchReport, CancelFlag, PhotoId, PhotoVault, VaultConfig};

/// Environment variable consulted when `--passphrase` is not given
const PASSPHRASE_ENV: &str = "LUCENT_PASSPHRASE";

#[derive(Parser)]
#[command(name = "lucent")]
#[command(version = lucent_vault::VERSION)]
#[command(about = "Lucent Vault - encrypted photo storage")]
struct Cli {
    /// Vault path
    #[arg(short, long, default_value = "./vault")]
    vault: PathBuf,

    /// Vault passphrase (falls back to $LUCENT_PASSPHRASE)
    #[arg(short, long, global = true)]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault
    Init,

    /// Import photos (directories are scanned recursively)
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List photos
    List {
        /// Only photos in this album (system albums included)
        #[arg(long)]
        album: Option<String>,

        /// Only photos with this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete photos
    Delete {
        #[arg(required = true)]
        ids: Vec<PhotoId>,
    },

    /// Mark photos as favorites
    Favorite {
        #[arg(required = true)]
        ids: Vec<PhotoId>,

        /// Remove the favorite mark instead
        #[arg(long)]
        off: bool,
    },

    /// Add tags to photos
    Tag {
        #[arg(required = true)]
        ids: Vec<PhotoId>,

        /// Tag to add (repeatable)
        #[arg(short, long = "tag", required = true)]
        tags: Vec<String>,

        /// Remove the tags instead
        #[arg(long)]
        remove: bool,
    },

    /// Add photos to an album (created if missing)
    Move {
        album: String,

        #[arg(required = true)]
        ids: Vec<PhotoId>,
    },

    /// Export decrypted copies
    Export {
        /// Output directory
        output: PathBuf,

        #[arg(required = true)]
        ids: Vec<PhotoId>,
    },

    /// List, create or delete albums
    Albums {
        /// Create an album with this name
        #[arg(long, conflicts_with = "delete")]
        create: Option<String>,

        /// Delete the album with this name
        #[arg(long)]
        delete: Option<String>,
    },

    /// Show vault statistics
    Stats,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn passphrase(cli: &Cli) -> Result<SecretString> {
    let raw = match &cli.passphrase {
        Some(p) => p.clone(),
        None => std::env::var(PASSPHRASE_ENV)
            .with_context(|| format!("No passphrase given (use --passphrase or ${})", PASSPHRASE_ENV))?,
    };
    if raw.is_empty() {
        bail!("Passphrase must not be empty");
    }
    Ok(SecretString::new(raw))
}

fn print_report(report: &BatchReport) {
    println!("{}", report.summary());
    for (id, failure) in report.failures() {
        println!("   {} - {} ({})", id, failure.message, failure.kind);
    }
}

fn open_vault(path: &Path, secret: &SecretString) -> Result<PhotoVault> {
    PhotoVault::open(path, secret)
        .with_context(|| format!("Could not open vault at {}", path.display()))
}

async fn run(cli: Cli) -> Result<()> {
    let secret = passphrase(&cli)?;

    match cli.command {
        Commands::Init => {
            PhotoVault::create(&cli.vault, &secret, VaultConfig::default())
                .with_context(|| format!("Could not create vault at {}", cli.vault.display()))?;
            println!("Vault created at: {}", cli.vault.display());
            println!("   photos/       sealed photos");
            println!("   thumbs/       sealed thumbnails");
            println!("   catalog.db    sealed catalog");
            println!("   keystore.json passphrase-sealed master key");
        }

        Commands::Import { paths } => {
            let vault = open_vault(&cli.vault, &secret)?;
            let report = vault.import_files(&paths, &CancelFlag::new()).await?;
            for photo in &report.imported {
                println!("{}  {}", photo.id(), photo.original_filename);
            }
            for (path, failure) in &report.failed {
                println!("   {} - {}", path.display(), failure.message);
            }
            println!(
                "{} imported, {} failed",
                report.imported.len(),
                report.failed.len()
            );
        }

        Commands::List { album, tag } => {
            let vault = open_vault(&cli.vault, &secret)?;
            let mut photos = match &album {
                Some(name) => vault.photos_in_album(name).await?,
                None => vault.list_all_photos().await?,
            };
            if let Some(tag) = &tag {
                photos.retain(|p| p.metadata.has_tag(tag));
            }

            if photos.is_empty() {
                println!("No photos");
            }
            for photo in photos {
                let fav = if photo.is_favorite { "*" } else { " " };
                println!(
                    "{} {}  {}  {} bytes  [{}]",
                    fav,
                    photo.id(),
                    photo.original_filename,
                    photo.metadata.file_size,
                    photo.tags().join(", ")
                );
            }
        }

        Commands::Delete { ids } => {
            let vault = open_vault(&cli.vault, &secret)?;
            print_report(&vault.delete_photos(&ids).await?);
        }

        Commands::Favorite { ids, off } => {
            let vault = open_vault(&cli.vault, &secret)?;
            print_report(&vault.set_favorites(&ids, !off).await?);
        }

        Commands::Tag { ids, tags, remove } => {
            let vault = open_vault(&cli.vault, &secret)?;
            let report = if remove {
                vault.remove_tags_from_photos(&ids, &tags).await?
            } else {
                vault.add_tags_to_photos(&ids, &tags).await?
            };
            print_report(&report);
        }

        Commands::Move { album, ids } => {
            let vault = open_vault(&cli.vault, &secret)?;
            print_report(&vault.move_photos_to_album(&ids, &album).await?);
        }

        Commands::Export { output, ids } => {
            let vault = open_vault(&cli.vault, &secret)?;
            let report = vault.export_photos(&ids, &output, &CancelFlag::new()).await?;
            for path in report.outputs() {
                println!("   {}", path.display());
            }
            print_report(&report);
        }

        Commands::Albums { create, delete } => {
            let vault = open_vault(&cli.vault, &secret)?;
            if let Some(name) = create {
                let album = vault.create_album(Album::new(name)).await?;
                println!("Created album: {}", album.name);
            } else if let Some(name) = delete {
                let detached = vault.delete_album(&name).await?;
                println!("Deleted album: {} ({} photos detached)", name, detached);
            } else {
                for album in vault.albums().await? {
                    let count = vault.photos_in_album(&album.name).await?.len();
                    let marker = if album.is_system { "(system)" } else { "" };
                    println!("{:<24} {:>6} {}", album.name, count, marker);
                }
            }
        }

        Commands::Stats => {
            let vault = open_vault(&cli.vault, &secret)?;
            let stats = vault.stats().await?;
            println!("Lucent Vault Statistics");
            println!("{:-<40}", "");
            println!("Total photos:     {}", stats.total_photos);
            println!("Favorite photos:  {}", stats.favorite_photos);
            println!("With thumbnail:   {}", stats.with_thumbnail);
            println!("User albums:      {}", stats.user_albums);
            println!("Original size:    {} KB", stats.original_bytes / 1024);
            println!("On disk:          {} KB", stats.disk_bytes / 1024);
        }
    }

    Ok(())
}
