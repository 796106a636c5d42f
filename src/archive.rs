//! Sources of named byte buffers: a directory tree, or a bundle file that
//! packs the same entries into one bincode blob.

use crate::error::{Bundle as BundleError, Io, Result};
use crate::ips::HEADER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
}

pub trait ArchiveReader {
    fn entries(&self) -> Result<Vec<Entry>>;
}

/// Reads every file below `root`. Entry names are `/`-separated paths
/// relative to `root`, in sorted order.
#[derive(Clone, Debug)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        DirectoryArchive { root: root.into() }
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<Entry>) -> Result<()> {
        let mut children = fs::read_dir(dir)
            .context(Io { path: dir })?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .context(Io { path: dir })?;
        children.sort();

        for path in children {
            let file_name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{}/{}", prefix, file_name)
            };

            if path.is_dir() {
                self.walk(&path, &name, out)?;
            } else {
                let data = read_file(&path)?;
                out.push(Entry { name, data });
            }
        }
        Ok(())
    }
}

impl ArchiveReader for DirectoryArchive {
    fn entries(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        self.walk(&self.root, "", &mut entries)?;
        debug!("read {} entries from {}", entries.len(), self.root.display());
        Ok(entries)
    }
}

/// A flat list of entries stored with bincode.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct Bundle {
    pub entries: Vec<Entry>,
}

impl Bundle {
    pub fn from_archive<A: ArchiveReader + ?Sized>(archive: &A) -> Result<Self> {
        Ok(Bundle {
            entries: archive.entries()?,
        })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        bincode::deserialize_from(reader).context(BundleError)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self).context(BundleError)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).context(Io { path })?;
        Bundle::from_reader(std::io::BufReader::new(file))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path).context(Io { path })?;
        let mut writer = std::io::BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush().context(Io { path })
    }
}

impl ArchiveReader for Bundle {
    fn entries(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.clone())
    }
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).context(Io { path })
}

pub fn write_file<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, data).context(Io { path })
}

/// Keeps the entries that are IPS patches: a `.ips` name (any case) and a
/// `PATCH` header. Misnamed or headerless `.ips` files are skipped.
pub fn patch_entries(entries: Vec<Entry>) -> Vec<Entry> {
    entries
        .into_iter()
        .filter(|entry| {
            if entry.name.ends_with('/') || !entry.name.to_lowercase().ends_with(".ips") {
                return false;
            }
            if !entry.data.starts_with(HEADER) {
                warn!("skipping {}: not an IPS patch", entry.name);
                return false;
            }
            true
        })
        .collect()
}
