//! BagIt assembly and zip archiving
//!
//! The SIP tree is realized under `<work>/<name>/data/`, the BagIt tag files
//! are written next to it, and the whole bag is zipped into
//! `<output>/<name>.bag.zip`. The archive is written under a `.partial` name
//! and only renamed once the zip is finalized, so a present `.bag.zip` is
//! always complete.
//!
//! Everything here is blocking filesystem work; async callers wrap
//! [`BagAssembler::assemble`] in `spawn_blocking`.

use chrono::Utc;
use sipin_common::checksum::compute_file_md5;
use sipin_common::types::ChecksumAlgorithm;
use sipin_common::{Result, SipError};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const BAGIT_VERSION: &str = "0.97";
const PAYLOAD_DIR: &str = "data";
const BAGIT_TXT: &str = "bagit.txt";
const BAG_INFO_TXT: &str = "bag-info.txt";

/// How the essence gets into the bag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Rename into the bag, falling back to copy + delete across filesystems
    #[default]
    Move,
    /// Leave the original in place
    Copy,
}

impl FromStr for TransferMode {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "move" => Ok(TransferMode::Move),
            "copy" => Ok(TransferMode::Copy),
            other => Err(SipError::Config(format!(
                "Invalid essence transfer mode '{}', expected 'move' or 'copy'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BagConfig {
    /// Where archives land; defaults to the essence's directory
    pub output_dir: Option<PathBuf>,
    /// Where working trees are built; defaults to the essence's directory
    pub work_dir: Option<PathBuf>,
    pub transfer: TransferMode,
    /// Value of `Bag-Software-Agent`
    pub software_agent: String,
}

impl Default for BagConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            work_dir: None,
            transfer: TransferMode::default(),
            software_agent: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

/// What goes into one bag, as paths relative to the SIP root
#[derive(Debug, Clone)]
pub struct SipLayout {
    /// Unique per job; names the working tree and the archive
    pub name: String,
    /// Directories to create, including ones that stay empty
    pub directories: Vec<String>,
    /// Generated documents: relative path and content
    pub documents: Vec<(String, String)>,
    pub essence_source: PathBuf,
    pub essence_target: String,
}

/// One `manifest-md5.txt` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the bag root, e.g. `data/mets.xml`
    pub path: String,
    pub md5: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct AssembledBag {
    pub archive_path: PathBuf,
    pub archive_size: u64,
    pub manifest: Vec<ManifestEntry>,
    /// Manifest checksum of the essence, computed after placement
    pub essence_md5: String,
    pub essence_size: u64,
}

pub struct BagAssembler {
    config: BagConfig,
}

impl BagAssembler {
    pub fn new(config: BagConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BagConfig {
        &self.config
    }

    /// Archive path a layout will be written to
    pub fn archive_path(&self, layout: &SipLayout) -> PathBuf {
        self.config
            .output_dir
            .clone()
            .unwrap_or_else(|| source_dir(&layout.essence_source))
            .join(format!("{}.bag.zip", layout.name))
    }

    fn work_root(&self, layout: &SipLayout) -> PathBuf {
        self.config
            .work_dir
            .clone()
            .unwrap_or_else(|| source_dir(&layout.essence_source))
            .join(&layout.name)
    }

    /// Build the bag, zip it and remove the working tree
    ///
    /// An existing working tree or archive of the same name is never touched:
    /// the working tree is claimed with a non-recursive `create_dir` and the
    /// archive is published with a hard link, both of which fail when the
    /// target exists. On any other failure the working tree and any partial
    /// archive are removed and a moved essence is put back where it came from.
    pub fn assemble(&self, layout: &SipLayout) -> Result<AssembledBag> {
        let work_root = self.work_root(layout);
        let archive_path = self.archive_path(layout);
        let partial_path = PathBuf::from(format!("{}.partial", archive_path.display()));

        claim_work_root(&work_root)?;

        let built = self
            .build(layout, &work_root, &archive_path, &partial_path)
            .and_then(|bag| publish_archive(&partial_path, &archive_path).map(|_| bag));

        match built {
            Ok(mut bag) => {
                if let Err(e) = fs::remove_dir_all(&work_root) {
                    warn!(path = %work_root.display(), error = %e, "Failed to remove working directory");
                }
                bag.archive_path = archive_path;
                info!(
                    archive = %bag.archive_path.display(),
                    size = bag.archive_size,
                    files = bag.manifest.len(),
                    "Bag archived"
                );
                Ok(bag)
            },
            Err(e) => {
                self.rollback(layout, &work_root, &partial_path);
                Err(e)
            },
        }
    }

    fn build(
        &self,
        layout: &SipLayout,
        work_root: &Path,
        archive: &Path,
        partial: &Path,
    ) -> Result<AssembledBag> {
        // Checked before the essence moves, so a refusal leaves it in place
        if archive.exists() {
            return Err(already_exists(archive, "archive already exists"));
        }

        let payload = work_root.join(PAYLOAD_DIR);
        for dir in &layout.directories {
            create_dir(&payload.join(dir))?;
        }

        self.place_essence(&layout.essence_source, &payload.join(&layout.essence_target))?;

        for (relative, content) in &layout.documents {
            let path = payload.join(relative);
            if let Some(parent) = path.parent() {
                create_dir(parent)?;
            }
            fs::write(&path, content).map_err(|e| SipError::filesystem(&path, e))?;
            debug!("Wrote {} ({} bytes)", relative, content.len());
        }

        let manifest = payload_manifest(work_root)?;
        let essence_entry = format!("{}/{}", PAYLOAD_DIR, layout.essence_target);
        let essence = manifest
            .iter()
            .find(|entry| entry.path == essence_entry)
            .ok_or_else(|| {
                SipError::Invariant(format!("Essence {} missing from manifest", essence_entry))
            })?
            .clone();

        self.write_tag_files(work_root, &manifest)?;
        let archive_size = zip_directory(work_root, partial)?;

        Ok(AssembledBag {
            archive_path: partial.to_path_buf(),
            archive_size,
            manifest,
            essence_md5: essence.md5,
            essence_size: essence.size,
        })
    }

    fn place_essence(&self, source: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }
        match self.config.transfer {
            TransferMode::Move => move_file(source, target),
            TransferMode::Copy => fs::copy(source, target)
                .map(|_| ())
                .map_err(|e| SipError::filesystem(source, e)),
        }
    }

    fn write_tag_files(&self, work_root: &Path, manifest: &[ManifestEntry]) -> Result<()> {
        let algorithm = ChecksumAlgorithm::Md5.bagit_name();
        let manifest_name = format!("manifest-{}.txt", algorithm);

        let bagit = format!(
            "BagIt-Version: {}\nTag-File-Character-Encoding: UTF-8\n",
            BAGIT_VERSION
        );
        write_file(&work_root.join(BAGIT_TXT), &bagit)?;
        write_file(&work_root.join(&manifest_name), &manifest_lines(manifest))?;

        let octets: u64 = manifest.iter().map(|entry| entry.size).sum();
        let bag_info = format!(
            "Bag-Software-Agent: {}\nBagging-Date: {}\nPayload-Oxum: {}.{}\n",
            self.config.software_agent,
            Utc::now().format("%Y-%m-%d"),
            octets,
            manifest.len()
        );
        write_file(&work_root.join(BAG_INFO_TXT), &bag_info)?;

        let mut tags = Vec::new();
        for name in [BAG_INFO_TXT, BAGIT_TXT, manifest_name.as_str()] {
            let path = work_root.join(name);
            let size = fs::metadata(&path)
                .map_err(|e| SipError::filesystem(&path, e))?
                .len();
            tags.push(ManifestEntry {
                path: name.to_string(),
                md5: compute_file_md5(&path)?,
                size,
            });
        }
        write_file(
            &work_root.join(format!("tagmanifest-{}.txt", algorithm)),
            &manifest_lines(&tags),
        )
    }

    fn rollback(&self, layout: &SipLayout, work_root: &Path, partial: &Path) {
        if self.config.transfer == TransferMode::Move && !layout.essence_source.exists() {
            let placed = work_root.join(PAYLOAD_DIR).join(&layout.essence_target);
            if placed.exists() {
                match move_file(&placed, &layout.essence_source) {
                    Ok(()) => info!(
                        essence = %layout.essence_source.display(),
                        "Restored essence after failed packaging"
                    ),
                    Err(e) => warn!(error = %e, "Failed to restore essence"),
                }
            }
        }
        if work_root.exists() {
            if let Err(e) = fs::remove_dir_all(work_root) {
                warn!(path = %work_root.display(), error = %e, "Failed to remove working directory");
            }
        }
        if partial.exists() {
            if let Err(e) = fs::remove_file(partial) {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial archive");
            }
        }
    }
}

fn source_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn already_exists(path: &Path, message: &str) -> SipError {
    SipError::filesystem(path, io::Error::new(io::ErrorKind::AlreadyExists, message))
}

/// Create the working tree root, failing if it is already there
fn claim_work_root(work_root: &Path) -> Result<()> {
    if let Some(parent) = work_root.parent() {
        create_dir(parent)?;
    }
    fs::create_dir(work_root).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            already_exists(work_root, "working directory already exists")
        } else {
            SipError::filesystem(work_root, e)
        }
    })
}

/// Move the finished archive to its final name without replacing anything
fn publish_archive(partial: &Path, archive: &Path) -> Result<()> {
    fs::hard_link(partial, archive).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            already_exists(archive, "archive already exists")
        } else {
            SipError::filesystem(archive, e)
        }
    })?;
    if let Err(e) = fs::remove_file(partial) {
        warn!(path = %partial.display(), error = %e, "Failed to remove partial archive");
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| SipError::filesystem(path, e))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| SipError::filesystem(path, e))
}

/// Rename, or copy and delete when source and target are on different devices
fn move_file(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).map_err(|e| SipError::filesystem(source, e))?;
    fs::remove_file(source).map_err(|e| SipError::filesystem(source, e))
}

fn manifest_lines(entries: &[ManifestEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}  {}\n", entry.md5, entry.path))
        .collect()
}

/// `/`-separated path of `path` below `root`
fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        SipError::Invariant(format!("{} is not below {}", path.display(), root.display()))
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn walk_error(root: &Path, e: walkdir::Error) -> SipError {
    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    SipError::filesystem(path, io::Error::from(e))
}

/// Checksum every payload file, sorted by path
fn payload_manifest(work_root: &Path) -> Result<Vec<ManifestEntry>> {
    let mut manifest = Vec::new();
    for entry in WalkDir::new(work_root.join(PAYLOAD_DIR)) {
        let entry = entry.map_err(|e| walk_error(work_root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| walk_error(work_root, e))?
            .len();
        manifest.push(ManifestEntry {
            path: relative_name(work_root, entry.path())?,
            md5: compute_file_md5(entry.path())?,
            size,
        });
    }
    manifest.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(manifest)
}

/// Zip `root` (directories included) into `target`, returning the archive size
fn zip_directory(root: &Path, target: &Path) -> Result<u64> {
    let zip_err = |e: zip::result::ZipError| SipError::filesystem(target, io::Error::other(e));

    let file = File::create_new(target).map_err(|e| SipError::filesystem(target, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = || SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let name = relative_name(root, entry.path())?;
        if entry.file_type().is_dir() {
            zip.add_directory(name, options()).map_err(zip_err)?;
            continue;
        }

        let size = entry.metadata().map_err(|e| walk_error(root, e))?.len();
        zip.start_file(name, options().large_file(size >= u64::from(u32::MAX)))
            .map_err(zip_err)?;
        let mut source =
            File::open(entry.path()).map_err(|e| SipError::filesystem(entry.path(), e))?;
        io::copy(&mut source, &mut zip).map_err(|e| SipError::filesystem(entry.path(), e))?;
    }

    let writer = zip.finish().map_err(zip_err)?;
    drop(writer);

    let size = fs::metadata(target)
        .map_err(|e| SipError::filesystem(target, e))?
        .len();
    Ok(size)
}
