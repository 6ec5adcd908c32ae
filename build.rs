// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("repogen")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Generate RPM repository metadata")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Show debug output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Only show warnings and errors"),
        )
        .subcommand(
            Command::new("generate")
                .about("Generate repodata for a directory of packages")
                .arg(Arg::new("directory").required(true).help("Directory containing the packages"))
                .arg(
                    Arg::new("outputdir")
                        .short('o')
                        .long("outputdir")
                        .value_name("DIR")
                        .help("Output directory for repodata"),
                )
                .arg(
                    Arg::new("baseurl")
                        .short('u')
                        .long("baseurl")
                        .value_name("URL")
                        .help("Base URL written as xml:base on every package location"),
                )
                .arg(
                    Arg::new("excludes")
                        .short('x')
                        .long("excludes")
                        .action(ArgAction::Append)
                        .value_name("GLOB")
                        .help("Glob of packages to exclude"),
                )
                .arg(
                    Arg::new("pkglist")
                        .short('i')
                        .long("pkglist")
                        .value_name("FILE")
                        .help("File listing the packages to index"),
                )
                .arg(
                    Arg::new("cachedir")
                        .short('c')
                        .long("cachedir")
                        .value_name("DIR")
                        .help("Directory for the package checksum cache"),
                )
                .arg(
                    Arg::new("changelog_limit")
                        .long("changelog-limit")
                        .value_name("N")
                        .help("Only keep the newest N changelog entries"),
                )
                .arg(
                    Arg::new("checksum")
                        .short('s')
                        .long("checksum")
                        .default_value("sha256")
                        .help("Checksum type for packages and metadata"),
                )
                .arg(
                    Arg::new("database")
                        .short('d')
                        .long("database")
                        .action(ArgAction::SetTrue)
                        .help("Also generate sqlite databases"),
                )
                .arg(
                    Arg::new("update")
                        .long("update")
                        .action(ArgAction::SetTrue)
                        .help("Reuse metadata of unchanged packages"),
                )
                .arg(
                    Arg::new("skip_stat")
                        .long("skip-stat")
                        .action(ArgAction::SetTrue)
                        .help("Trust reused metadata without checking size and mtime"),
                )
                .arg(
                    Arg::new("unique_md_filenames")
                        .long("unique-md-filenames")
                        .action(ArgAction::SetTrue)
                        .help("Prefix metadata file names with their checksum"),
                )
                .arg(
                    Arg::new("compress_type")
                        .long("compress-type")
                        .default_value("gz")
                        .help("Compression for the XML documents (gz, bz2, xz, zst)"),
                )
                .arg(
                    Arg::new("workers")
                        .long("workers")
                        .default_value("0")
                        .help("Number of worker processes for package extraction"),
                )
                .arg(
                    Arg::new("groupfile")
                        .short('g')
                        .long("groupfile")
                        .value_name("FILE")
                        .help("Group (comps) file to include"),
                )
                .arg(Arg::new("revision").long("revision").help("Catalog revision"))
                .arg(
                    Arg::new("content")
                        .long("content")
                        .action(ArgAction::Append)
                        .help("Content tag for the catalog"),
                )
                .arg(
                    Arg::new("repo")
                        .long("repo")
                        .action(ArgAction::Append)
                        .help("Repo tag for the catalog"),
                )
                .arg(
                    Arg::new("distro")
                        .long("distro")
                        .action(ArgAction::Append)
                        .value_name("CPEID,NAME")
                        .help("Distro tag for the catalog"),
                )
                .arg(
                    Arg::new("checkts")
                        .short('C')
                        .long("checkts")
                        .action(ArgAction::SetTrue)
                        .help("Do nothing if no package is newer than the repodata"),
                )
                .arg(
                    Arg::new("skip_symlinks")
                        .short('S')
                        .long("skip-symlinks")
                        .action(ArgAction::SetTrue)
                        .help("Ignore symlinked packages"),
                ),
        )
        .subcommand(
            Command::new("modify")
                .about("Add or remove an extra metadata file in a repodata directory")
                .arg(Arg::new("input").required(true).help("Metadata file, or the name to remove"))
                .arg(Arg::new("repodata").required(true).help("The repodata directory"))
                .arg(
                    Arg::new("remove")
                        .long("remove")
                        .action(ArgAction::SetTrue)
                        .help("Remove the metadata instead of adding it"),
                )
                .arg(Arg::new("mdtype").long("mdtype").help("Data type of the metadata"))
                .arg(
                    Arg::new("compress")
                        .long("compress")
                        .action(ArgAction::SetTrue)
                        .help("Compress even if the file already is compressed"),
                )
                .arg(
                    Arg::new("compress_type")
                        .long("compress-type")
                        .default_value("gz")
                        .help("Compression format for the added file"),
                )
                .arg(
                    Arg::new("checksum")
                        .short('s')
                        .long("checksum")
                        .default_value("sha256")
                        .help("Checksum type for the catalog entry"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("repogen.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
