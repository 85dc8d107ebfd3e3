//! Subcommands, each one a single call (or two) into the [`FileSystem`].

use crate::error::{ErrorKind, Result};
use clap::Subcommand;
use exn::ResultExt;
use futures::TryStreamExt;
use futures::io::AsyncWriteExt as _;
use ossdav_vfs::{FileSystem, Resource, ResourceType, VirtualPath};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a directory
    Ls {
        #[arg(value_name = "PATH", default_value = "/")]
        path: String,
        /// Show type, size and modification time
        #[arg(short, long)]
        long: bool,
    },
    /// Show the metadata of a file or directory
    Stat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Create a directory
    Mkdir {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Delete a file or a directory tree
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Move or rename a file or directory tree
    Mv {
        #[arg(value_name = "FROM")]
        from: String,
        #[arg(value_name = "TO")]
        to: String,
    },
    /// Copy a file or directory tree
    Cp {
        #[arg(value_name = "FROM")]
        from: String,
        #[arg(value_name = "TO")]
        to: String,
    },
    /// Write a file's contents to stdout
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Upload a local file
    Put {
        #[arg(value_name = "LOCAL")]
        local: PathBuf,
        #[arg(value_name = "REMOTE")]
        remote: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ls { .. } => "ls",
            Self::Stat { .. } => "stat",
            Self::Mkdir { .. } => "mkdir",
            Self::Rm { .. } => "rm",
            Self::Mv { .. } => "mv",
            Self::Cp { .. } => "cp",
            Self::Cat { .. } => "cat",
            Self::Put { .. } => "put",
        }
    }
}

fn type_name(resource: &Resource) -> &'static str {
    match resource.resource_type() {
        ResourceType::File => "file",
        ResourceType::Directory => "directory",
    }
}

/// Run `command` against `fs`, writing any output to `out`.
pub async fn run<F, W>(fs: &F, command: Command, out: &mut W) -> Result<()>
where
    F: FileSystem + ?Sized,
    W: AsyncWrite + Unpin,
{
    let label = command.name();
    let failed = || ErrorKind::Command(label.to_string());
    tracing::debug!(command = label, "Running");
    match command {
        Command::Ls { path, long } => {
            let path = VirtualPath::parse(&path).or_raise(failed)?;
            for child in fs.read_dir(&path).await.or_raise(failed)? {
                let resource = fs.metadata(&child).await.or_raise(failed)?;
                let suffix = if resource.is_dir() { "/" } else { "" };
                let line = match long {
                    true => {
                        let size = resource.size().map_or_else(|| "-".to_string(), |s| s.to_string());
                        let modified = resource.last_modified().format(&Rfc3339).or_raise(failed)?;
                        format!("{:<9} {size:>12} {modified} {}{suffix}\n", type_name(&resource), child.name())
                    },
                    false => format!("{}{suffix}\n", child.name()),
                };
                out.write_all(line.as_bytes()).await.or_raise(failed)?;
            }
        },
        Command::Stat { path } => {
            let path = VirtualPath::parse(&path).or_raise(failed)?;
            let resource = fs.metadata(&path).await.or_raise(failed)?;
            let mut lines = vec![
                format!("path: {path}"),
                format!("name: {}", resource.display_name()),
                format!("type: {}", type_name(&resource)),
            ];
            if let Some(size) = resource.size() {
                lines.push(format!("size: {size}"));
            }
            if let Some(etag) = resource.etag() {
                lines.push(format!("etag: {etag}"));
            }
            if let Some(class) = &resource.storage_class {
                lines.push(format!("storage-class: {class}"));
            }
            lines.push(format!("created: {}", resource.creation_date().format(&Rfc3339).or_raise(failed)?));
            lines.push(format!("modified: {}", resource.last_modified().format(&Rfc3339).or_raise(failed)?));
            lines.push(format!("locks: {}", resource.locks.len()));
            for (name, value) in &resource.properties {
                lines.push(format!("property {name}: {value}"));
            }
            out.write_all(format!("{}\n", lines.join("\n")).as_bytes()).await.or_raise(failed)?;
        },
        Command::Mkdir { path } => {
            let path = VirtualPath::parse(&path).or_raise(failed)?;
            fs.create(&path, ResourceType::Directory).await.or_raise(failed)?;
        },
        Command::Rm { path } => {
            let path = VirtualPath::parse(&path).or_raise(failed)?;
            fs.delete(&path).await.or_raise(failed)?;
        },
        Command::Mv { from, to } => {
            let from = VirtualPath::parse(&from).or_raise(failed)?;
            let to = VirtualPath::parse(&to).or_raise(failed)?;
            fs.move_to(&from, &to).await.or_raise(failed)?;
        },
        Command::Cp { from, to } => {
            let from = VirtualPath::parse(&from).or_raise(failed)?;
            let to = VirtualPath::parse(&to).or_raise(failed)?;
            fs.copy(&from, &to).await.or_raise(failed)?;
        },
        Command::Cat { path } => {
            let path = VirtualPath::parse(&path).or_raise(failed)?;
            let mut body = fs.read_stream(&path).await.or_raise(failed)?;
            while let Some(chunk) = body.try_next().await.or_raise(failed)? {
                out.write_all(&chunk).await.or_raise(failed)?;
            }
        },
        Command::Put { local, remote } => {
            let remote = VirtualPath::parse(&remote).or_raise(failed)?;
            let mut file = tokio::fs::File::open(&local).await.or_raise(failed)?;
            let mut writer = fs.write_stream(&remote).await.or_raise(failed)?;
            let mut buffer = vec![0; READ_BUFFER];
            let mut total = 0;
            loop {
                let read = file.read(&mut buffer).await.or_raise(failed)?;
                if read == 0 {
                    break;
                }
                writer.write_all(&buffer[..read]).await.or_raise(failed)?;
                total += read;
            }
            writer.close().await.or_raise(failed)?;
            tracing::info!(local = %local.display(), remote = %remote, bytes = total, "Uploaded");
        },
    }
    out.flush().await.or_raise(failed)?;
    Ok(())
}
