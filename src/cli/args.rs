//! Command-line argument parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "image-courier")]
#[command(about = "Bulk download and upload of container images against Docker registry v2 endpoints")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download the images of an image set into a working directory
    #[command(alias = "pull")]
    Download(DownloadArgs),
    /// Upload previously downloaded images to a registry
    #[command(alias = "push")]
    Upload(UploadArgs),
}

/// Options shared by both operations
#[derive(clap::Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(
        long = "registry",
        short = 'r',
        default_value = "https://registry-1.docker.io",
        help = "The host of the registry"
    )]
    pub registry: String,

    #[arg(long = "user", short = 'u', help = "Registry account username")]
    pub username: Option<String>,

    #[arg(long = "pass", short = 'p', help = "Registry account password")]
    pub password: Option<String>,

    #[arg(
        long = "organization",
        short = 'o',
        help = "Organization (namespace) of the images"
    )]
    pub org: Option<String>,

    #[arg(
        long = "dir",
        short = 'd',
        default_value = "images",
        help = "Working directory holding blobs and transfer manifests"
    )]
    pub dir: String,

    #[arg(
        long = "retry",
        short = 't',
        default_value = "3",
        help = "Retry attempts for each registry request"
    )]
    pub retry: u32,

    #[arg(
        long = "max-backoff",
        default_value = "5",
        help = "Upper bound of the retry backoff in seconds"
    )]
    pub max_backoff: u64,

    #[arg(
        long = "timeout",
        default_value = "7200",
        help = "Timeout for a single registry request in seconds"
    )]
    pub timeout: u64,

    #[arg(
        long = "concurrency",
        short = 'j',
        default_value = "8",
        help = "Maximum number of blobs transferred at the same time"
    )]
    pub concurrency: usize,

    #[arg(
        long = "skip-tls",
        short = 'k',
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    #[arg(long = "force", short = 'f', help = "Ignore the process lock")]
    pub force: bool,

    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', help = "Only report errors")]
    pub quiet: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(
        long = "image-set",
        short = 'i',
        default_value = "images.yaml",
        help = "YAML file listing the images to download"
    )]
    pub image_set: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct UploadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(
        long = "overwrite",
        short = 'w',
        help = "Upload images whose tag already exists on the registry"
    )]
    pub overwrite: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    pub fn common(&self) -> &CommonArgs {
        match &self.command {
            Command::Download(args) => &args.common,
            Command::Upload(args) => &args.common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_defaults() {
        let args = Args::try_parse_from(["image-courier", "download"]).unwrap();
        let Command::Download(download) = &args.command else {
            panic!("expected download");
        };
        assert_eq!(download.image_set, "images.yaml");
        assert_eq!(download.common.registry, "https://registry-1.docker.io");
        assert_eq!(download.common.dir, "images");
        assert_eq!(download.common.retry, 3);
        assert!(!download.common.force);
    }

    #[test]
    fn test_upload_flags() {
        let args = Args::try_parse_from([
            "image-courier",
            "push",
            "-r",
            "http://localhost:5000",
            "-u",
            "admin",
            "-p",
            "secret",
            "-o",
            "mirror",
            "-w",
            "-f",
        ])
        .unwrap();
        let Command::Upload(upload) = &args.command else {
            panic!("expected upload");
        };
        assert!(upload.overwrite);
        assert_eq!(args.common().registry, "http://localhost:5000");
        assert_eq!(args.common().username.as_deref(), Some("admin"));
        assert_eq!(args.common().org.as_deref(), Some("mirror"));
        assert!(args.common().force);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["image-courier"]).is_err());
    }
}
