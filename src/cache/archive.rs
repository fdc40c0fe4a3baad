//! Tar archives of dependency directories
//!
//! Entries are named relative to the archived directory with a literal `./`
//! root (`./`, `./gems/`, `./gems/rack.gem`), matching
//! `tar -C <dir> -cf - .`. Extraction strips that first component, so an
//! archive restores into any directory regardless of where it was built.
//!
//! Both functions are blocking; callers run them on a blocking thread.

use crate::cache::marker::Marker;
use crate::error::{DepcacheError, DepcacheResult};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header, HeaderMode};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Size of the name and linkname fields in a tar header
const NAME_FIELD_LEN: usize = 100;

/// Name GNU tar gives to long-name pseudo entries
const GNU_LONG_LINK: &[u8] = b"././@LongLink";

/// What went into an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Entries written, including directories and the root
    pub entries: usize,
    /// Total bytes of regular file content
    pub bytes: u64,
}

/// Archive the contents of `source` into `dest`.
///
/// Symlinks are stored as links, never followed. Files sharing an inode are
/// stored once with hard link entries for the rest. The install marker at the
/// top of `source` is host-local state and is left out.
pub fn pack_dir(source: &Path, dest: &Path, compress: bool) -> DepcacheResult<ArchiveStats> {
    let is_populated = fs::read_dir(source)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !is_populated {
        return Err(DepcacheError::SourceEmpty(source.to_path_buf()));
    }

    let file = File::create(dest)
        .map_err(|e| DepcacheError::io(format!("creating archive {}", dest.display()), e))?;
    let writer = BufWriter::new(file);

    let stats = if compress {
        let encoder = GzEncoder::new(writer, Compression::default());
        let (encoder, stats) = write_tree(encoder, source)?;
        let writer = encoder
            .finish()
            .map_err(|e| DepcacheError::io("finishing gzip stream", e))?;
        flush(writer, dest)?;
        stats
    } else {
        let (writer, stats) = write_tree(writer, source)?;
        flush(writer, dest)?;
        stats
    };

    debug!(
        "Packed {} entries ({} bytes) from {} into {}",
        stats.entries,
        stats.bytes,
        source.display(),
        dest.display()
    );
    Ok(stats)
}

fn flush(writer: BufWriter<File>, dest: &Path) -> DepcacheResult<()> {
    let file = writer
        .into_inner()
        .map_err(|e| DepcacheError::io(format!("flushing {}", dest.display()), e.into_error()))?;
    file.sync_all()
        .map_err(|e| DepcacheError::io(format!("syncing {}", dest.display()), e))
}

fn write_tree<W: Write>(writer: W, source: &Path) -> DepcacheResult<(W, ArchiveStats)> {
    let mut builder = Builder::new(writer);
    let mut stats = ArchiveStats::default();
    let mut seen_inodes: HashMap<(u64, u64), Vec<u8>> = HashMap::new();

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == OsStr::new(Marker::FILE_NAME)));

    for entry in walker {
        let entry = entry.map_err(|e| DepcacheError::io("walking dependency directory", e.into()))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(source)
            .map_err(|_| DepcacheError::Internal(format!("{} escaped walk root", path.display())))?;
        let meta = fs::symlink_metadata(path)
            .map_err(|e| DepcacheError::io(format!("reading metadata of {}", path.display()), e))?;

        let name = entry_name(rel, meta.is_dir());
        let wrap = |e: io::Error| DepcacheError::io(format!("archiving {}", path.display()), e);

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&meta, HeaderMode::Complete);

        if meta.is_dir() {
            append_raw(&mut builder, &mut header, &name, None, io::empty()).map_err(wrap)?;
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(wrap)?;
            header.set_size(0);
            append_raw(
                &mut builder,
                &mut header,
                &name,
                Some(&os_bytes(target.as_os_str())),
                io::empty(),
            )
            .map_err(wrap)?;
        } else if meta.is_file() {
            match inode_key(&meta).and_then(|key| seen_inodes.get(&key).cloned()) {
                Some(first) => {
                    header.set_entry_type(EntryType::Link);
                    header.set_size(0);
                    append_raw(&mut builder, &mut header, &name, Some(&first), io::empty())
                        .map_err(wrap)?;
                }
                None => {
                    let file = File::open(path).map_err(wrap)?;
                    append_raw(&mut builder, &mut header, &name, None, BufReader::new(file))
                        .map_err(wrap)?;
                    stats.bytes += meta.len();
                    if let Some(key) = inode_key(&meta) {
                        seen_inodes.insert(key, name.clone());
                    }
                }
            }
        } else {
            trace!("Skipping special file {}", path.display());
            continue;
        }

        stats.entries += 1;
    }

    let writer = builder
        .into_inner()
        .map_err(|e| DepcacheError::io("finishing tar stream", e))?;
    Ok((writer, stats))
}

/// `./`-rooted entry name for a path relative to the archive root
fn entry_name(rel: &Path, is_dir: bool) -> Vec<u8> {
    let mut name = b"./".to_vec();
    for (i, component) in rel.components().enumerate() {
        if i > 0 {
            name.push(b'/');
        }
        name.extend_from_slice(&os_bytes(component.as_os_str()));
    }
    if is_dir && !rel.as_os_str().is_empty() {
        name.push(b'/');
    }
    name
}

/// Append an entry whose name bytes are written verbatim.
///
/// `Header::set_path` normalizes away the leading `./`, so the name (and link
/// name) fields are filled by hand, with GNU long-name records in front when
/// they do not fit.
fn append_raw<W: Write, R: Read>(
    builder: &mut Builder<W>,
    header: &mut Header,
    name: &[u8],
    link: Option<&[u8]>,
    data: R,
) -> io::Result<()> {
    if name.len() >= NAME_FIELD_LEN {
        append_long_name(builder, EntryType::GNULongName, name)?;
    }
    if let Some(link) = link {
        if link.len() >= NAME_FIELD_LEN {
            append_long_name(builder, EntryType::GNULongLink, link)?;
        }
    }

    let gnu = header
        .as_gnu_mut()
        .ok_or_else(|| io::Error::other("expected a GNU header"))?;
    fill_field(&mut gnu.name, name);
    if let Some(link) = link {
        fill_field(&mut gnu.linkname, link);
    }
    header.set_cksum();
    builder.append(header, data)
}

fn append_long_name<W: Write>(
    builder: &mut Builder<W>,
    kind: EntryType,
    value: &[u8],
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    let gnu = header
        .as_gnu_mut()
        .ok_or_else(|| io::Error::other("expected a GNU header"))?;
    fill_field(&mut gnu.name, GNU_LONG_LINK);
    header.set_mode(0o644);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(value.len() as u64 + 1);
    header.set_entry_type(kind);
    header.set_cksum();
    builder.append(&header, value.chain(&[0u8][..]))
}

fn fill_field(slot: &mut [u8; NAME_FIELD_LEN], bytes: &[u8]) {
    let len = bytes.len().min(NAME_FIELD_LEN);
    slot[..len].copy_from_slice(&bytes[..len]);
    slot[len..].fill(0);
}

#[cfg(unix)]
fn os_bytes(s: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(s: &OsStr) -> Vec<u8> {
    s.to_string_lossy().replace('\\', "/").into_bytes()
}

#[cfg(unix)]
fn inode_key(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    (meta.nlink() > 1).then(|| (meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn inode_key(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Extract `archive` into `target`, stripping the leading path component.
///
/// Gzip is detected from the stream's magic bytes, so compressed and plain
/// archives are both accepted regardless of file name. Entries that would
/// land outside `target` fail the extraction. Returns the number of entries
/// written.
pub fn unpack_into(archive: &Path, target: &Path) -> DepcacheResult<usize> {
    let mut file = File::open(archive)
        .map_err(|e| DepcacheError::io(format!("opening archive {}", archive.display()), e))?;

    let reader: Box<dyn Read> = if is_gzip(&mut file)
        .map_err(|e| DepcacheError::io(format!("reading archive {}", archive.display()), e))?
    {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    fs::create_dir_all(target)
        .map_err(|e| DepcacheError::io(format!("creating {}", target.display()), e))?;
    let root = fs::canonicalize(target)
        .map_err(|e| DepcacheError::io(format!("resolving {}", target.display()), e))?;

    let mut tar = Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let read_err = |e: io::Error| DepcacheError::io(format!("reading archive {}", archive.display()), e);
    let mut count = 0;

    for entry in tar.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let entry_label = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let raw = entry.path().map_err(read_err)?.into_owned();

        let Some(rel) = strip_root(&raw).map_err(|reason| DepcacheError::ArchiveEntry {
            entry: entry_label.clone(),
            reason,
        })?
        else {
            continue;
        };
        let dest = root.join(&rel);
        let kind = entry.header().entry_type();
        let entry_err = |e: io::Error| DepcacheError::ArchiveEntry {
            entry: entry_label.clone(),
            reason: e.to_string(),
        };

        prepare_parents(&root, &rel, true).map_err(|reason| DepcacheError::ArchiveEntry {
            entry: entry_label.clone(),
            reason,
        })?;

        match kind {
            EntryType::Directory => {
                if fs::symlink_metadata(&dest).is_ok_and(|m| !m.is_dir()) {
                    fs::remove_file(&dest).map_err(entry_err)?;
                }
                fs::create_dir_all(&dest).map_err(entry_err)?;
            }
            EntryType::Link => {
                let link = entry
                    .link_name()
                    .map_err(entry_err)?
                    .map(|l| l.into_owned())
                    .ok_or_else(|| DepcacheError::ArchiveEntry {
                        entry: entry_label.clone(),
                        reason: "hard link without a target".to_string(),
                    })?;
                let source = strip_root(&link)
                    .and_then(|l| l.ok_or_else(|| "hard link to archive root".to_string()))
                    .map_err(|reason| DepcacheError::ArchiveEntry {
                        entry: entry_label.clone(),
                        reason,
                    })?;
                prepare_parents(&root, &source, false).map_err(|reason| {
                    DepcacheError::ArchiveEntry {
                        entry: entry_label.clone(),
                        reason,
                    }
                })?;
                clear_path(&dest).map_err(entry_err)?;
                fs::hard_link(root.join(source), &dest).map_err(entry_err)?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse | EntryType::Symlink => {
                clear_path(&dest).map_err(entry_err)?;
                entry.unpack(&dest).map_err(entry_err)?;
            }
            other => {
                trace!("Skipping {:?} entry {}", other, entry_label);
                continue;
            }
        }

        count += 1;
    }

    debug!(
        "Unpacked {} entries from {} into {}",
        count,
        archive.display(),
        target.display()
    );
    Ok(count)
}

fn is_gzip(file: &mut File) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(read == 2 && magic == [0x1f, 0x8b])
}

/// Drop the leading `.` (or first name) component and reject anything that
/// could escape the extraction root. `Ok(None)` means the archive root itself.
fn strip_root(raw: &Path) -> Result<Option<PathBuf>, String> {
    let mut components = raw.components();
    match components.next() {
        None => return Ok(None),
        Some(Component::CurDir | Component::Normal(_)) => {}
        Some(_) => return Err("absolute path".to_string()),
    }

    let mut rel = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err("path contains `..`".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute path".to_string())
            }
        }
    }

    Ok((!rel.as_os_str().is_empty()).then_some(rel))
}

/// Walk the parent directories of `rel` under `root` one component at a
/// time, rejecting any symlink that resolves outside `root`. With `create`,
/// missing directories are made and non-directories replaced; nothing is
/// created before the components above it have been checked.
fn prepare_parents(root: &Path, rel: &Path, create: bool) -> Result<(), String> {
    let Some(parent) = rel.parent() else {
        return Ok(());
    };

    let mut current = root.to_path_buf();
    for component in parent.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let resolved = fs::canonicalize(&current)
                    .map_err(|e| format!("{}: {}", current.display(), e))?;
                if !resolved.starts_with(root) {
                    return Err(format!(
                        "{} resolves outside target to {}",
                        current.display(),
                        resolved.display()
                    ));
                }
                if !resolved.is_dir() {
                    return Err(format!("{} is not a directory", current.display()));
                }
            }
            Ok(meta) if meta.is_dir() => {}
            Ok(_) if create => {
                fs::remove_file(&current).map_err(|e| e.to_string())?;
                fs::create_dir(&current).map_err(|e| e.to_string())?;
            }
            Ok(_) => return Err(format!("{} is not a directory", current.display())),
            Err(e) if create && e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&current).map_err(|e| e.to_string())?;
            }
            Err(e) => return Err(format!("{}: {}", current.display(), e)),
        }
    }
    Ok(())
}

/// Remove whatever is at `path` so an entry can take its place
fn clear_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
