// src/ipk/mod.rs

//! Deterministic ipk archive emission
//!
//! An ipk is a GNU `ar` archive with exactly three members, in order:
//! `debian-binary` (the bytes `2.0\n`), `control.tar.gz` (package
//! metadata and maintainer scripts), and `data.tar.gz` (the staged
//! file tree). Consumers include Opkg.
//!
//! Reproducibility is owned entirely by this module: every tar entry
//! carries the recipe's pinned timestamp, `uid`/`gid` 0, and empty
//! owner names; file modes are masked to the low 12 bits; data
//! entries are emitted in sorted path order; gzip streams carry no
//! timestamp or name; and the `ar` members use BSD-format names with
//! zeroed metadata. Nothing here reads the wall clock, so two runs
//! over identical inputs produce byte-identical archives.

pub mod scripts;

pub use scripts::maintainer_scripts;

use crate::error::{Error, Result};
use flate2::{Compression, GzBuilder};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Payload of the `debian-binary` member
const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// File mode bits preserved from the staged tree
const MODE_MASK: u32 = 0o7777;

fn member_error(member: &str, source: std::io::Error) -> Error {
    Error::ArchiveWrite {
        member: member.to_string(),
        source,
    }
}

/// Write a complete ipk archive to `path`.
///
/// `control` is the rendered control block, `scripts` the maintainer
/// scripts keyed by member name, `conffiles` the configuration file
/// paths to record, and `pkg_dir` the staged tree that becomes
/// `data.tar.gz` (an empty data archive is emitted when absent).
/// The archive file's own timestamps are pinned to `epoch` as well.
pub fn write_path(
    path: &Path,
    epoch: u64,
    control: &str,
    scripts: &BTreeMap<String, String>,
    conffiles: &[String],
    pkg_dir: Option<&Path>,
) -> Result<()> {
    let file = File::create(path).map_err(|e| member_error("ipk", e))?;
    write(file, epoch, control, scripts, conffiles, pkg_dir)?;

    let mtime = filetime::FileTime::from_unix_time(epoch as i64, 0);
    filetime::set_file_times(path, mtime, mtime).map_err(|e| member_error("ipk", e))?;

    debug!("wrote {}", path.display());
    Ok(())
}

/// Write a complete ipk archive to an arbitrary writer.
pub fn write<W: Write>(
    writer: W,
    epoch: u64,
    control: &str,
    scripts: &BTreeMap<String, String>,
    conffiles: &[String],
    pkg_dir: Option<&Path>,
) -> Result<()> {
    let control_member = write_control(epoch, control, scripts, conffiles)?;
    let data_member = write_data(epoch, pkg_dir)?;

    let mut archive = ar::Builder::new(writer);

    // ar::Header::new zeroes mtime, uid, and gid
    for (name, payload) in [
        ("debian-binary", DEBIAN_BINARY),
        ("control.tar.gz", control_member.as_slice()),
        ("data.tar.gz", data_member.as_slice()),
    ] {
        let header = ar::Header::new(name.as_bytes().to_vec(), payload.len() as u64);
        archive
            .append(&header, payload)
            .map_err(|e| member_error(name, e))?;
    }

    Ok(())
}

/// Build the `control.tar.gz` member in memory.
fn write_control(
    epoch: u64,
    control: &str,
    scripts: &BTreeMap<String, String>,
    conffiles: &[String],
) -> Result<Vec<u8>> {
    let member = "control.tar.gz";
    let mut builder = tar::Builder::new(gzip_writer(Vec::new()));

    append_root_dir(&mut builder, epoch).map_err(|e| member_error(member, e))?;
    append_file(&mut builder, epoch, "./control", 0o644, control.as_bytes())
        .map_err(|e| member_error(member, e))?;

    if !conffiles.is_empty() {
        let listing = conffiles.join("\n") + "\n";
        append_file(&mut builder, epoch, "./conffiles", 0o644, listing.as_bytes())
            .map_err(|e| member_error(member, e))?;
    }

    for (name, script) in scripts {
        let path = format!("./{}", name);
        append_file(&mut builder, epoch, &path, 0o755, script.as_bytes())
            .map_err(|e| member_error(member, e))?;
    }

    finish_targz(builder).map_err(|e| member_error(member, e))
}

/// Build the `data.tar.gz` member in memory from the staged tree.
fn write_data(epoch: u64, pkg_dir: Option<&Path>) -> Result<Vec<u8>> {
    let member = "data.tar.gz";
    let mut builder = tar::Builder::new(gzip_writer(Vec::new()));

    append_root_dir(&mut builder, epoch).map_err(|e| member_error(member, e))?;

    if let Some(pkg_dir) = pkg_dir {
        // Collect and sort so emission order never depends on readdir
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(pkg_dir).min_depth(1) {
            let entry = entry.map_err(|e| Error::ArchiveWrite {
                member: member.to_string(),
                source: std::io::Error::other(e),
            })?;
            paths.push(entry.into_path());
        }
        paths.sort();

        for path in paths {
            let relative = path
                .strip_prefix(pkg_dir)
                .map_err(|e| Error::ArchiveWrite {
                    member: member.to_string(),
                    source: std::io::Error::other(e),
                })?;
            let name = format!("./{}", relative.display());
            append_path(&mut builder, epoch, &name, &path)
                .map_err(|e| member_error(&name, e))?;
        }
    }

    finish_targz(builder).map_err(|e| member_error(member, e))
}

/// Gzip writer with pinned header fields (no mtime, no filename).
fn gzip_writer<W: Write>(writer: W) -> flate2::write::GzEncoder<W> {
    GzBuilder::new().mtime(0).write(writer, Compression::best())
}

fn finish_targz<W: Write>(builder: tar::Builder<flate2::write::GzEncoder<W>>) -> std::io::Result<W> {
    let encoder = builder.into_inner()?;
    encoder.finish()
}

/// Fixed header fields shared by every entry.
fn clean_header(header: &mut tar::Header, epoch: u64, mode: u32) {
    header.set_mode(mode & MODE_MASK);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(epoch);
    let _ = header.set_username("");
    let _ = header.set_groupname("");
}

/// Store an entry name verbatim in the classic name field.
///
/// `Header::set_path` strips `./` components, but ipk consumers expect
/// every member rooted at `./`, so names are written directly.
fn set_name_raw(header: &mut tar::Header, bytes: &[u8]) {
    let gnu = header.as_gnu_mut().expect("header was created as GNU");
    gnu.name[..bytes.len()].copy_from_slice(bytes);
}

/// Append an entry with its name stored verbatim, emitting a GNU
/// long-name pseudo-entry when the name exceeds the classic field.
fn append_entry<W: Write, R: std::io::Read>(
    builder: &mut tar::Builder<W>,
    header: &mut tar::Header,
    name: &str,
    data: R,
) -> std::io::Result<()> {
    let bytes = name.as_bytes();

    if bytes.len() > 100 {
        let mut long = tar::Header::new_gnu();
        long.set_entry_type(tar::EntryType::GNULongName);
        long.set_size(bytes.len() as u64 + 1);
        clean_header(&mut long, 0, 0o644);
        set_name_raw(&mut long, b"././@LongLink");
        long.set_cksum();

        let mut payload = bytes.to_vec();
        payload.push(0);
        builder.append(&long, payload.as_slice())?;
    }

    set_name_raw(header, &bytes[..bytes.len().min(100)]);
    header.set_cksum();
    builder.append(&*header, data)
}

/// Append the `./` directory entry that roots both sub-archives.
fn append_root_dir<W: Write>(builder: &mut tar::Builder<W>, epoch: u64) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    clean_header(&mut header, epoch, 0o755);
    append_entry(builder, &mut header, "./", &[][..])
}

/// Append an in-memory file entry.
fn append_file<W: Write>(
    builder: &mut tar::Builder<W>,
    epoch: u64,
    name: &str,
    mode: u32,
    data: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    clean_header(&mut header, epoch, mode);
    append_entry(builder, &mut header, name, data)
}

/// Append one on-disk entry from the staged tree.
fn append_path<W: Write>(
    builder: &mut tar::Builder<W>,
    epoch: u64,
    name: &str,
    path: &Path,
) -> std::io::Result<()> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::symlink_metadata(path)?;
    let mut header = tar::Header::new_gnu();

    if metadata.file_type().is_symlink() {
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        clean_header(&mut header, epoch, 0o777);
        let target = fs::read_link(path)?;
        header.set_link_name(&target)?;
        append_entry(builder, &mut header, name, &[][..])
    } else if metadata.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        clean_header(&mut header, epoch, metadata.mode());
        append_entry(builder, &mut header, name, &[][..])
    } else {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        clean_header(&mut header, epoch, metadata.mode());
        let file = File::open(path)?;
        append_entry(builder, &mut header, name, file)
    }
}
