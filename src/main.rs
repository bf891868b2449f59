//! gcs-vfs command-line entry point

use std::path::PathBuf;
use std::time::Duration;

use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gcs_vfs::config::Config;
use gcs_vfs::vfs::{FileType, GcsFileProvider, LocalFile, Selector};
use gcs_vfs::GcsVfsError;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: gcs-vfs <config.yaml> <command> [args...]");
    eprintln!();
    eprintln!("gcs-vfs - browse and copy Google Cloud Storage buckets as file trees");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  type <uri>              Print FILE, FOLDER or IMAGINARY");
    eprintln!("  ls <uri>                List the children of a folder");
    eprintln!("  cat <uri>               Write a file's content to stdout");
    eprintln!("  put <local-path> <uri>  Copy a local file or directory into a bucket");
    eprintln!("  cp <src-uri> <dst-uri>  Copy a file or folder between bucket paths");
    eprintln!("  rm <uri>                Delete a file, or a folder and its contents");
    eprintln!("  sign <uri> [seconds]    Print a signed URL for a file");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  gcs-vfs config.yaml ls gcs://npd-test/docs/");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Loaded configuration from {:?}", config_path);

    if let Err(e) = run(&config, &args[2], &args[3..]).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: &Config, command: &str, args: &[String]) -> Result<(), GcsVfsError> {
    let provider = GcsFileProvider::new();
    let options = &config.options;

    match (command, args) {
        ("type", [uri]) => {
            let mut file = provider.resolve_file(uri, options).await?;
            let label = match file.file_type().await? {
                FileType::File => "FILE",
                FileType::Folder => "FOLDER",
                FileType::Imaginary => "IMAGINARY",
            };
            println!("{}", label);
        }
        ("ls", [uri]) => {
            let mut file = provider.resolve_file(uri, options).await?;
            match file.file_type().await? {
                FileType::Folder => {
                    let mut children = file.list_children().await?;
                    children.sort();
                    for child in children {
                        println!("{}", child);
                    }
                }
                FileType::File => return Err(GcsVfsError::NotAFolder(file.uri())),
                FileType::Imaginary => return Err(GcsVfsError::NotFound(file.uri())),
            }
        }
        ("cat", [uri]) => {
            let mut file = provider.resolve_file(uri, options).await?;
            let mut stream = file.open_read().await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.try_next().await? {
                stdout.write_all(&chunk).await?;
            }
            stdout.flush().await?;
        }
        ("put", [local, uri]) => {
            let mut destination = provider.resolve_file(uri, options).await?;
            let mut source = LocalFile::new(local);
            let mut progress = |total: u64, _chunk: usize, size: u64| {
                debug!("{}: {}/{} bytes", local, total, size);
            };
            destination
                .copy_from(&mut source, &Selector::All, Some(&mut progress))
                .await?;
            info!("Copied {} to {}", local, destination.uri());
        }
        ("cp", [source_uri, destination_uri]) => {
            let mut source = provider.resolve_file(source_uri, options).await?;
            let mut destination = provider.resolve_file(destination_uri, options).await?;
            destination
                .copy_from(&mut source, &Selector::All, None)
                .await?;
            info!("Copied {} to {}", source.uri(), destination.uri());
        }
        ("rm", [uri]) => {
            let mut file = provider.resolve_file(uri, options).await?;
            let removed = match file.file_type().await? {
                FileType::Folder => file.delete_all().await?,
                FileType::File => u64::from(file.delete().await?),
                FileType::Imaginary => return Err(GcsVfsError::NotFound(file.uri())),
            };
            info!("Removed {} object(s)", removed);
        }
        ("sign", [uri, rest @ ..]) if rest.len() <= 1 => {
            let ttl = match rest.first() {
                Some(seconds) => Duration::from_secs(seconds.parse().map_err(|_| {
                    GcsVfsError::NotSupported(format!("invalid lifetime '{}'", seconds))
                })?),
                None => config.signed_url_ttl,
            };
            let mut file = provider.resolve_file(uri, options).await?;
            match file.signed_url(ttl).await? {
                Some(url) => println!("{}", url),
                None => return Err(GcsVfsError::NotFound(file.uri())),
            }
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
