//! Snapshot persistence: dump a store to a file and load it back.
//!
//! The file is a JSON document `{"sessions": [...]}` written with the
//! protocol crate's [`JsonCodec`]. It carries no version; only the build
//! that wrote it is expected to read it.
//!
//! A dump never truncates the previous snapshot in place. The new data
//! goes to a hidden sibling temp file, is flushed and fsynced, and then
//! renamed over the target, so a crash mid-dump leaves either the old
//! snapshot or the new one. On Unix the file is created owner-only
//! (`0600`), since it holds every live token, and the directory is synced
//! after the rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use linkforge_protocol::{Codec, JsonCodec};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{PersistenceError, Session, SessionError, SessionStore};

#[derive(Serialize)]
struct SnapshotRef<'a> {
    sessions: &'a [Session],
}

#[derive(Deserialize)]
struct SnapshotFile {
    sessions: Vec<Session>,
}

/// Write every record in `store` to `path`, atomically replacing any
/// previous snapshot. Returns the number of records written.
///
/// # Errors
/// [`SessionError::Persistence`] if encoding or any file operation fails.
/// The previous snapshot is left untouched in that case.
pub fn dump<S: SessionStore + ?Sized>(store: &S, path: &Path) -> Result<usize, SessionError> {
    let sessions = store.export()?;
    let bytes = JsonCodec
        .encode(&SnapshotRef { sessions: &sessions })
        .map_err(PersistenceError::Codec)?;

    let tmp = temp_sibling(path)?;
    let written = write_synced(&tmp, &bytes)
        .and_then(|()| fs::rename(&tmp, path))
        .and_then(|()| sync_parent(path));
    if let Err(e) = written {
        // Best effort: the temp file may not exist if creation failed.
        let _ = fs::remove_file(&tmp);
        return Err(PersistenceError::Io(e).into());
    }

    debug!(path = %path.display(), sessions = sessions.len(), bytes = bytes.len(), "snapshot written");
    Ok(sessions.len())
}

/// Replace the contents of `store` with the snapshot at `path`. Returns
/// the number of records loaded.
///
/// This is a destructive bulk load meant for startup, before the store
/// serves traffic: whatever the store held before is discarded.
///
/// # Errors
/// [`SessionError::Persistence`] if the file can't be read or doesn't
/// decode. The file is decoded completely before the store is touched, so
/// a corrupt or truncated snapshot leaves the store as it was.
pub fn restore<S: SessionStore + ?Sized>(store: &S, path: &Path) -> Result<usize, SessionError> {
    let bytes = fs::read(path).map_err(PersistenceError::Io)?;
    let file: SnapshotFile = JsonCodec.decode(&bytes).map_err(PersistenceError::Codec)?;
    let loaded = store.import(file.sessions)?;

    debug!(path = %path.display(), sessions = loaded, "snapshot loaded");
    Ok(loaded)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// `dir/.name.<random>.tmp` next to `path`. The random suffix keeps a
/// manual dump and the background job from sharing a temp file.
fn temp_sibling(path: &Path) -> Result<PathBuf, SessionError> {
    let name = path.file_name().ok_or_else(|| {
        PersistenceError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("snapshot path {} has no file name", path.display()),
        ))
    })?;
    let suffix: u64 = rand::rng().random();
    let mut tmp_name = std::ffi::OsString::from(".");
    tmp_name.push(name);
    tmp_name.push(format!(".{suffix:016x}.tmp"));
    Ok(path.with_file_name(tmp_name))
}
