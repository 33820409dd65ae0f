// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ifs_core::{CopyOption, IfsConfig, IfsPath, IfsProvider, OpenOption};
use ifs_logging::CliLoggingArgs;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect and modify an Internal File System catalog")]
struct Cli {
    /// Provider configuration (TOML)
    #[arg(long, env = "IFS_CONFIG")]
    config: PathBuf,

    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the root directory of an owner
    Mkroot { owner: String },
    /// Remove an owner's root, which must be empty
    Rmroot { owner: String },
    /// List owners that have a root (one per line)
    Roots,
    /// Create a directory; the parent must exist
    Mkdir { path: String },
    /// Copy a local file into the filesystem, creating missing directories
    Put {
        path: String,
        local: PathBuf,
        /// Fail if the target already exists
        #[arg(long)]
        create_new: bool,
    },
    /// Write a file's content to stdout
    Cat { path: String },
    /// List a directory's entries (one per line)
    Ls { path: String },
    /// Delete a file or an empty directory
    Rm { path: String },
    /// Copy a file, or create an empty copy of a directory
    Cp {
        source: String,
        target: String,
        /// Keep the source checksum, modification time and additional data
        #[arg(long)]
        copy_attributes: bool,
        /// Overwrite an existing file or empty directory
        #[arg(long)]
        replace: bool,
    },
    /// Move an entry by copying it and deleting the source
    Mv {
        source: String,
        target: String,
        /// Overwrite an existing file or empty directory
        #[arg(long)]
        replace: bool,
    },
    /// Print attributes as JSON
    Stat {
        path: String,
        #[arg(long, value_enum, default_value_t = View::Md5)]
        view: View,
    },
    /// Print the store backing a path as JSON
    Df { path: String },
    /// Print the detected content type of a file
    Probe { path: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum View {
    Basic,
    Md5,
}

impl Command {
    fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Mkroot { .. }
                | Command::Rmroot { .. }
                | Command::Mkdir { .. }
                | Command::Put { .. }
                | Command::Rm { .. }
                | Command::Cp { .. }
                | Command::Mv { .. }
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.clone().init("ifs-cli")?;

    let config = IfsConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    let provider = IfsProvider::new(config).context("failed to open provider")?;

    let mutating = cli.command.is_mutating();
    let stdout = io::stdout();
    run(&provider, cli.command, &mut stdout.lock())?;
    if mutating {
        provider.persist().context("failed to persist catalog")?;
    }
    Ok(())
}

/// Accept both `ifs:///owner:/a/b` URIs and `owner:/a/b` path strings
fn parse_path(provider: &IfsProvider, arg: &str) -> Result<IfsPath> {
    let path = if arg.starts_with("ifs:") {
        provider.resolve_uri(arg)
    } else {
        IfsPath::parse(arg)
    }
    .with_context(|| format!("invalid path {arg}"))?;
    provider.check_absolute(&path).with_context(|| format!("not an absolute path: {arg}"))?;
    Ok(path)
}

fn run<W: Write>(provider: &IfsProvider, command: Command, out: &mut W) -> Result<()> {
    debug!(?command, "running command");
    match command {
        Command::Mkroot { owner } => {
            provider.create_root(&owner).with_context(|| format!("mkroot {owner}"))?;
        }
        Command::Rmroot { owner } => {
            provider.remove_root(&owner).with_context(|| format!("rmroot {owner}"))?;
        }
        Command::Roots => {
            for owner in provider.list_roots() {
                writeln!(out, "{owner}")?;
            }
        }
        Command::Mkdir { path } => {
            let target = parse_path(provider, &path)?;
            provider.create_directory(&target).with_context(|| format!("mkdir {path}"))?;
        }
        Command::Put { path, local, create_new } => {
            let target = parse_path(provider, &path)?;
            let mut source =
                File::open(&local).with_context(|| format!("cannot read {}", local.display()))?;
            let creation = if create_new { OpenOption::CreateNew } else { OpenOption::Create };
            let mut channel = provider
                .new_byte_channel(&target, &[creation, OpenOption::Write, OpenOption::TruncateExisting], &[])
                .with_context(|| format!("put {path}"))?;
            let written = io::copy(&mut source, &mut channel)?;
            channel.close().with_context(|| format!("put {path}"))?;
            debug!(written, path = %target, "stored file");
        }
        Command::Cat { path } => {
            let target = parse_path(provider, &path)?;
            let mut channel = provider
                .new_byte_channel(&target, &[OpenOption::Read], &[])
                .with_context(|| format!("cat {path}"))?;
            io::copy(&mut channel, out)?;
        }
        Command::Ls { path } => {
            let target = parse_path(provider, &path)?;
            let stream = provider.new_directory_stream(&target).with_context(|| format!("ls {path}"))?;
            for entry in stream.iter()? {
                writeln!(out, "{entry}")?;
            }
            stream.close();
        }
        Command::Rm { path } => {
            let target = parse_path(provider, &path)?;
            provider.delete_path(&target).with_context(|| format!("rm {path}"))?;
        }
        Command::Cp { source, target, copy_attributes, replace } => {
            let options = copy_options(copy_attributes, replace);
            let from = parse_path(provider, &source)?;
            let to = parse_path(provider, &target)?;
            provider
                .copy_path(&from, &to, &options)
                .with_context(|| format!("cp {source} {target}"))?;
        }
        Command::Mv { source, target, replace } => {
            let options = copy_options(false, replace);
            let from = parse_path(provider, &source)?;
            let to = parse_path(provider, &target)?;
            provider
                .move_path(&from, &to, &options)
                .with_context(|| format!("mv {source} {target}"))?;
        }
        Command::Stat { path, view } => {
            let target = parse_path(provider, &path)?;
            let json = match view {
                View::Basic => serde_json::to_string_pretty(&provider.read_attributes(&target)?)?,
                View::Md5 => serde_json::to_string_pretty(&provider.read_md5_attributes(&target)?)?,
            };
            writeln!(out, "{json}")?;
        }
        Command::Df { path } => {
            let target = parse_path(provider, &path)?;
            let store = provider.file_store(&target).with_context(|| format!("df {path}"))?;
            let json = serde_json::json!({
                "name": store.name(),
                "type": store.type_name(),
                "baseDir": store.base_dir(),
                "totalSpace": store.total_space()?,
                "usableSpace": store.usable_space()?,
                "unallocatedSpace": store.unallocated_space()?,
                "readOnly": store.is_read_only()?,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?;
        }
        Command::Probe { path } => {
            let target = parse_path(provider, &path)?;
            match provider.probe_content_type(&target)? {
                Some(content_type) => writeln!(out, "{content_type}")?,
                None => writeln!(out, "-")?,
            }
        }
    }
    Ok(())
}

fn copy_options(copy_attributes: bool, replace: bool) -> Vec<CopyOption> {
    let mut options = Vec::new();
    if copy_attributes {
        options.push(CopyOption::CopyAttributes);
    }
    if replace {
        options.push(CopyOption::ReplaceExisting);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dir: &tempfile::TempDir) -> IfsProvider {
        IfsProvider::new(IfsConfig::with_local_store(dir.path().join("store"))).unwrap()
    }

    fn output(provider: &IfsProvider, command: Command) -> String {
        let mut out = Vec::new();
        run(provider, command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_put_cat_and_ls() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);
        let local = dir.path().join("hello.txt");
        std::fs::write(&local, "hello").unwrap();

        output(
            &provider,
            Command::Put {
                path: "ifs:///d1:/docs/hello.txt".into(),
                local,
                create_new: true,
            },
        );
        assert_eq!(output(&provider, Command::Cat { path: "d1:/docs/hello.txt".into() }), "hello");
        assert_eq!(output(&provider, Command::Ls { path: "d1:/docs".into() }), "d1:/docs/hello.txt\n");
        assert_eq!(output(&provider, Command::Roots), "d1\n");

        let stat = output(
            &provider,
            Command::Stat {
                path: "d1:/docs/hello.txt".into(),
                view: View::Md5,
            },
        );
        let json: serde_json::Value = serde_json::from_str(&stat).unwrap();
        assert_eq!(json["md5"], "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(json["size"], 5);
        assert_eq!(output(&provider, Command::Probe { path: "d1:/docs/hello.txt".into() }), "text/plain\n");
        assert_eq!(output(&provider, Command::Probe { path: "d1:/docs".into() }), "-\n");
    }

    #[test]
    fn test_every_subcommand_has_help() {
        use clap::CommandFactory;
        let cli = Cli::command();
        for sub in cli.get_subcommands() {
            assert!(sub.get_about().is_some(), "{} has no help text", sub.get_name());
        }
        let cp = cli.find_subcommand("cp").unwrap();
        for flag in ["copy_attributes", "replace"] {
            let arg = cp.get_arguments().find(|a| a.get_id() == flag).unwrap();
            assert!(arg.get_help().is_some(), "cp --{flag} has no help text");
        }
    }

    #[test]
    fn test_relative_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(&dir);
        let mut out = Vec::new();
        assert!(run(&provider, Command::Mkdir { path: "a/b".into() }, &mut out).is_err());
    }

    #[test]
    fn test_copy_options() {
        assert_eq!(copy_options(false, false), vec![]);
        assert_eq!(
            copy_options(true, true),
            vec![CopyOption::CopyAttributes, CopyOption::ReplaceExisting]
        );
        assert!(!Command::Roots.is_mutating());
        assert!(Command::Rm { path: "o:/x".into() }.is_mutating());
    }
}
