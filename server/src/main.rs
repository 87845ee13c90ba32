//! NAS media server (nas-media)

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod config;
mod media;

use config::Config;
use media::{MediaError, MediaLibrary, MediaPath, MediaRoot, PrivateLockStore};

#[derive(Parser)]
#[command(name = "nas-media")]
#[command(about = "Browse, stream and upload media from a NAS directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server in the foreground
    Serve,
    /// Manage password-protected directories (run while the server is stopped)
    Private {
        #[command(subcommand)]
        command: PrivateCommands,
    },
}

#[derive(Subcommand)]
enum PrivateCommands {
    /// Protect a directory, replacing any existing password
    Set {
        /// Directory relative to the media root
        path: String,
    },
    /// Remove protection from a directory
    Remove {
        /// Directory relative to the media root
        path: String,
    },
    /// List protected directories
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nas_media=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::Private { command } => match command {
            PrivateCommands::Set { path } => set_private(&config, &path).await?,
            PrivateCommands::Remove { path } => remove_private(&config, &path).await?,
            PrivateCommands::List => list_private(&config).await?,
        },
    }

    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let library = MediaLibrary::open(&config).await?;
    tracing::info!(
        root = %library.root.path().display(),
        upload_conflict = %library.uploads.policy(),
        grant_ttl_secs = library.locks.policy().grant_ttl.as_secs(),
        "media library ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port).parse()?;
    let state = api::AppState::new(library, config);
    api::rest::serve(addr, state).await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn open_locks(config: &Config) -> anyhow::Result<(MediaRoot, PrivateLockStore)> {
    let root = MediaRoot::new(&config.video_dir)?;
    tokio::fs::create_dir_all(&config.state_dir).await?;
    let locks = PrivateLockStore::open(root.path(), config.registry_path(), config.lock_policy()).await?;
    Ok((root, locks))
}

async fn prompt_password(prompt: &'static str) -> anyhow::Result<String> {
    use std::io::{self, Write};

    print!("{}", prompt);
    io::stdout().flush()?;

    let password = tokio::task::spawn_blocking(|| -> anyhow::Result<String> {
        let pass = rpassword::read_password()?;
        Ok(pass)
    })
    .await??;
    Ok(password)
}

async fn set_private(config: &Config, path: &str) -> anyhow::Result<()> {
    let (root, locks) = open_locks(config).await?;
    let target = match root.resolve_str(path).await {
        Ok(resolved) => resolved.media,
        Err(MediaError::NotFound) => anyhow::bail!("no such directory: {}", path),
        Err(e) => return Err(e.into()),
    };
    if target.is_root() {
        anyhow::bail!("the media root itself cannot be protected");
    }

    // SECURITY: Always prompt for password interactively
    let password = prompt_password("Password: ").await?;
    let confirm = prompt_password("Confirm password: ").await?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    println!("Hashing password...");
    let record = match locks.set_private(&target, &password).await {
        Ok(record) => record,
        Err(MediaError::NotFound) => anyhow::bail!("not a directory: {}", path),
        Err(e) => return Err(e.into()),
    };
    println!("protected: {} (since {})", record.path, record.created_at);
    Ok(())
}

async fn remove_private(config: &Config, path: &str) -> anyhow::Result<()> {
    let (root, locks) = open_locks(config).await?;
    let parsed = MediaPath::parse(path)?;
    // Records may point at directories that no longer exist.
    let target = match root.resolve_dir(&parsed).await {
        Ok(resolved) => resolved.media,
        Err(_) => parsed,
    };

    if locks.remove_private(&target).await? {
        println!("unprotected: {}", target);
    } else {
        println!("not protected: {}", target);
    }
    Ok(())
}

async fn list_private(config: &Config) -> anyhow::Result<()> {
    let (_root, locks) = open_locks(config).await?;
    let directories = locks.list().await?;

    if directories.is_empty() {
        println!("no protected directories");
    } else {
        for dir in directories {
            println!("{} (since {})", dir.path, dir.created_at.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}
