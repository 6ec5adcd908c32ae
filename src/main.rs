// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use repogen::checksum::ChecksumType;
use repogen::compress::Compression;
use repogen::config::{RepoTags, RunConfig};
use repogen::repository::{modify, scan};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repogen")]
#[command(author, version, about = "Generate RPM repository metadata", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate repodata for a directory of packages
    Generate(GenerateArgs),
    /// Extract one chunk of packages (started by `generate --workers`)
    #[command(hide = true)]
    Worker {
        /// Request file written by the supervisor
        #[arg(long)]
        request: PathBuf,
    },
    /// Add or remove an extra metadata file in an existing repodata directory
    Modify {
        /// Metadata file to add, or the file name/type to remove
        input: String,
        /// The repodata directory holding repomd.xml
        repodata: PathBuf,
        /// Remove the metadata instead of adding it
        #[arg(long)]
        remove: bool,
        /// Data type, derived from the file name if not given
        #[arg(long)]
        mdtype: Option<String>,
        /// Compress the file even if it already is compressed
        #[arg(long)]
        compress: bool,
        /// Compression format for the added file
        #[arg(long, default_value = "gz")]
        compress_type: Compression,
        /// Checksum type for the catalog entry
        #[arg(short = 's', long, default_value = "sha256")]
        checksum: ChecksumType,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Directory containing the packages
    directory: PathBuf,

    /// Output directory for repodata (default: the package directory)
    #[arg(short, long)]
    outputdir: Option<PathBuf>,

    /// Base URL written as xml:base on every package location
    #[arg(short = 'u', long)]
    baseurl: Option<String>,

    /// Glob of packages to exclude (repeatable)
    #[arg(short = 'x', long = "excludes")]
    excludes: Vec<String>,

    /// File listing the packages to index, one relative path per line
    #[arg(short = 'i', long)]
    pkglist: Option<PathBuf>,

    /// Directory for the package checksum cache
    #[arg(short = 'c', long)]
    cachedir: Option<PathBuf>,

    /// Only keep the newest N changelog entries
    #[arg(long)]
    changelog_limit: Option<usize>,

    /// Checksum type for packages and metadata
    #[arg(short = 's', long, default_value = "sha256")]
    checksum: ChecksumType,

    /// Also generate sqlite databases
    #[arg(short = 'd', long)]
    database: bool,

    /// Reuse metadata of unchanged packages from the existing repodata
    #[arg(long)]
    update: bool,

    /// Trust reused metadata without checking package size and mtime
    #[arg(long)]
    skip_stat: bool,

    /// Prefix metadata file names with their checksum
    #[arg(long)]
    unique_md_filenames: bool,

    /// Compression for the XML documents
    #[arg(long, default_value = "gz")]
    compress_type: Compression,

    /// Number of worker processes for package extraction
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Group (comps) file to include
    #[arg(short = 'g', long)]
    groupfile: Option<PathBuf>,

    /// Catalog revision (default: current time)
    #[arg(long)]
    revision: Option<String>,

    /// Content tag for the catalog (repeatable)
    #[arg(long)]
    content: Vec<String>,

    /// Repo tag for the catalog (repeatable)
    #[arg(long)]
    repo: Vec<String>,

    /// Distro tag as `cpeid,name` or `name` (repeatable)
    #[arg(long)]
    distro: Vec<String>,

    /// Do nothing if no package is newer than the existing repodata
    #[arg(short = 'C', long)]
    checkts: bool,

    /// Ignore symlinked packages
    #[arg(short = 'S', long)]
    skip_symlinks: bool,
}

impl GenerateArgs {
    fn into_config(self) -> Result<RunConfig> {
        let directory = std::fs::canonicalize(&self.directory)
            .with_context(|| format!("Directory {} must exist", self.directory.display()))?;
        let mut config = RunConfig::new(&directory);
        if let Some(outputdir) = self.outputdir {
            config.output_dir = outputdir;
        }

        config.extract.checksum = self.checksum;
        config.extract.cache_dir = self.cachedir;
        config.extract.changelog_limit = self.changelog_limit;
        config.extract.base_url = self.baseurl;

        config.excludes = self.excludes;
        if let Some(list) = self.pkglist {
            config.pkglist = Some(scan::read_pkglist(&list)?);
        }
        config.skip_symlinks = self.skip_symlinks;
        config.update = self.update;
        config.skip_stat = self.skip_stat;
        config.database = self.database;
        config.unique_md_filenames = self.unique_md_filenames;
        config.compression = self.compress_type;
        config.workers = self.workers;
        config.revision = self.revision;
        config.groupfile = self.groupfile.map(|g| {
            if g.is_relative() && !g.exists() {
                directory.join(g)
            } else {
                g
            }
        });
        config.checkts = self.checkts;
        config.tags = RepoTags {
            content: self.content,
            repo: self.repo,
            distro: self
                .distro
                .into_iter()
                .map(|d| match d.split_once(',') {
                    Some((cpeid, name)) => (Some(cpeid.to_string()), name.to_string()),
                    None => (None, d),
                })
                .collect(),
        };
        Ok(config)
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        Some("debug")
    } else if cli.quiet {
        Some("warn")
    } else {
        None
    };
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    if matches!(cli.command, Commands::Worker { .. }) {
        // Errors on stderr, everything else on stdout, relayed by the supervisor
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Generate(args) => {
            let config = args.into_config()?;
            match repogen::generate(&config)? {
                Some(summary) => {
                    let stats = &summary.stats;
                    println!(
                        "Wrote {} packages ({} reused, {} extracted, {} skipped) to {}",
                        stats.reused + stats.extracted,
                        stats.reused,
                        stats.extracted,
                        stats.skipped,
                        config.final_dir().display()
                    );
                }
                None => println!("repodata is up to date"),
            }
            Ok(())
        }
        Commands::Worker { request } => {
            repogen::worker::run(&request)?;
            Ok(())
        }
        Commands::Modify {
            input,
            repodata,
            remove,
            mdtype,
            compress,
            compress_type,
            checksum,
        } => {
            if remove {
                match modify::remove(&repodata, &input, mdtype.as_deref())? {
                    Some(entry) => println!("Removed {} ({})", entry.data_type, entry.href),
                    None => println!("Metadata not found: {}", input),
                }
            } else {
                let options = modify::ModifyOptions {
                    data_type: mdtype,
                    force_compress: compress,
                    compression: compress_type,
                    checksum,
                };
                let entry = modify::add(&repodata, PathBuf::from(&input).as_path(), &options)?;
                info!("Catalog updated in {}", repodata.display());
                println!("Added {} as {}", entry.data_type, entry.href);
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "repogen", &mut std::io::stdout());
            Ok(())
        }
    }
}
