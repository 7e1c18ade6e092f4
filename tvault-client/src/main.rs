//! tv: command-line client for a TensorVault server.
//!
//! # Usage
//!
//! ```bash
//! # Upload files (skipped when the server already has the content)
//! tv push model.safetensors data/train.parquet
//!
//! # Upload and record a snapshot on a branch
//! tv commit -m "new weights" -b main model.safetensors
//!
//! # Stream content to stdout, or to a verified local file
//! tv cat 3f9a2c
//! tv get 3f9a2c -o model.safetensors --sha256 <digest> --size <bytes>
//!
//! # Ask whether a local file is already stored
//! tv check model.safetensors
//!
//! # Show a branch head
//! tv head -b main
//! ```

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tvault_client::HttpTransport;
use tvault_core::{
    ClientConfig, ContentAddress, DataTransport, FileFingerprint, Fingerprinter, MetaTransport,
    Vault,
};

#[derive(Parser, Debug)]
#[command(name = "tv")]
#[command(author = "TensorVault Contributors")]
#[command(version = "0.1.0")]
#[command(about = "TensorVault client")]
struct Cli {
    /// Config file (default: ~/.tvault/config.json)
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    /// Server URL, overrides config and TV_SERVER
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload files and print their content addresses
    Push {
        /// Local files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Upload files and commit them as one snapshot
    Commit {
        /// Local files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Target branch
        #[arg(short, long, default_value = "main")]
        branch: String,
        /// Commit author (default: from config)
        #[arg(long)]
        author: Option<String>,
    },

    /// Write stored content to stdout
    Cat {
        /// Content address or unambiguous prefix
        address: String,
    },

    /// Download stored content to a local file
    Get {
        /// Content address or unambiguous prefix
        address: String,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
        /// Expected SHA-256 of the content
        #[arg(long, requires = "size")]
        sha256: Option<String>,
        /// Expected size in bytes
        #[arg(long, requires = "sha256")]
        size: Option<u64>,
    },

    /// Check whether the server already stores a local file
    Check {
        /// Local file
        file: PathBuf,
    },

    /// Show a branch head
    Head {
        /// Branch name
        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Show the effective configuration, optionally saving a server URL
    Config {
        /// Server URL to store in the config file
        #[arg(long = "set-server")]
        set_server: Option<String>,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so `tv cat` output stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tv=info".parse()?)
                .add_directive("tvault_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config_file.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?
        .with_env();
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }

    match cli.command {
        Commands::Push { files } => cmd_push(config, files),
        Commands::Commit {
            files,
            message,
            branch,
            author,
        } => cmd_commit(config, files, message, branch, author),
        Commands::Cat { address } => cmd_cat(config, address),
        Commands::Get {
            address,
            output,
            sha256,
            size,
        } => cmd_get(config, address, output, sha256.zip(size)),
        Commands::Check { file } => cmd_check(config, file),
        Commands::Head { branch } => cmd_head(config, branch),
        Commands::Config { set_server } => cmd_config(config, config_path, set_server),
    }
}

fn connect(config: ClientConfig) -> Result<Vault<HttpTransport>> {
    let transport = HttpTransport::from_config(&config)?;
    tracing::debug!("Using server {}", transport.base_url());
    Ok(Vault::new(transport, config))
}

fn cmd_push(config: ClientConfig, files: Vec<PathBuf>) -> Result<()> {
    let vault = connect(config)?;
    for file in files {
        let receipt = vault
            .upload_detailed(&file)
            .with_context(|| format!("Failed to upload {}", file.display()))?;
        let how = if receipt.deduplicated {
            "already stored".to_string()
        } else {
            format!("{} frames", receipt.chunks_sent)
        };
        println!(
            "{}  {}  {} ({})",
            receipt.address,
            file.display(),
            format_size(receipt.fingerprint.size),
            how
        );
    }
    Ok(())
}

fn cmd_commit(
    config: ClientConfig,
    files: Vec<PathBuf>,
    message: String,
    branch: String,
    author: Option<String>,
) -> Result<()> {
    let author = author.unwrap_or_else(|| config.author.clone());
    let vault = connect(config)?;
    let mut index = vault.index();
    for file in &files {
        let address = index
            .add(file, None)
            .with_context(|| format!("Failed to add {}", file.display()))?;
        println!("added {}  {}", address.short(), file.display());
    }

    match index.commit(&message, &branch, &author)? {
        Some(hash) => {
            let head = vault.transport().get_head(&branch)?;
            println!("\nCommitted {} files to {}", files.len(), branch);
            println!("  Commit:  {}", hash);
            println!("  Version: {}", head.version);
        }
        None => println!("Nothing to commit."),
    }
    Ok(())
}

fn cmd_cat(config: ClientConfig, address: String) -> Result<()> {
    let block = config.chunk_size;
    let vault = connect(config)?;
    let mut reader = vault.open_for_read(&ContentAddress::from(address))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    loop {
        let data = reader.read_best_effort(block)?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
    }
    out.flush()?;
    reader.close();
    Ok(())
}

fn cmd_get(
    config: ClientConfig,
    address: String,
    output: PathBuf,
    expected: Option<(String, u64)>,
) -> Result<()> {
    let vault = connect(config)?;
    let expected = expected.map(|(digest, size)| FileFingerprint::new(digest.to_lowercase(), size));
    let written = vault
        .download_to(&ContentAddress::from(address), &output, expected.as_ref())
        .with_context(|| format!("Failed to download to {}", output.display()))?;
    println!("{}  {}", written.digest, output.display());
    println!("{} written", format_size(written.size));
    Ok(())
}

fn cmd_check(config: ClientConfig, file: PathBuf) -> Result<()> {
    let fingerprinter = Fingerprinter::new(config.hash_buffer_size);
    let vault = connect(config)?;
    let fingerprint = fingerprinter
        .fingerprint_file(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let check = vault
        .transport()
        .check_existence(&fingerprint.digest, fingerprint.size)?;

    println!("File:    {}", file.display());
    println!("SHA-256: {}", fingerprint.digest);
    println!("Size:    {}", format_size(fingerprint.size));
    match (check.exists, check.address) {
        (true, Some(address)) => println!("Stored:  yes ({})", address),
        (true, None) => return Err(anyhow!("Server reported the file as stored without an address")),
        (false, _) => println!("Stored:  no"),
    }
    Ok(())
}

fn cmd_head(config: ClientConfig, branch: String) -> Result<()> {
    let vault = connect(config)?;
    let head = vault.transport().get_head(&branch)?;
    match head.hash {
        Some(hash) if head.exists => {
            println!("Branch:  {}", branch);
            println!("Commit:  {}", hash);
            println!("Version: {}", head.version);
        }
        _ => println!("Branch {} has no commits.", branch),
    }
    Ok(())
}

fn cmd_config(config: ClientConfig, path: PathBuf, set_server: Option<String>) -> Result<()> {
    let mut config = config;
    if let Some(server) = set_server {
        config.server_url = server;
        config.validate()?;
        config
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tvault")
        .join("config.json")
}

/// Format byte size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    match bytes {
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}
