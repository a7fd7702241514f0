//! The `fuser` filesystem implementation.

use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use stripefs_engine::{Cluster, EngineError};
use tracing::{debug, warn};

use crate::inode::{InodeTable, ROOT_INO};

/// How long the kernel may cache entries and attributes.
const TTL: Duration = Duration::from_secs(1);

/// Maps engine failures onto the single errno the kernel sees.
fn errno_for(error: &EngineError) -> c_int {
    match error {
        EngineError::NotOpen => libc::EBADF,
        _ => libc::EIO,
    }
}

/// Clamps a kernel read request to the file's logical length.
///
/// Returns the starting offset and byte count to fetch, or `None` when the
/// request lies entirely past end of file.
fn read_span(logical: u64, offset: i64, size: u32) -> Option<(u64, usize)> {
    if offset < 0 {
        return None;
    }
    let offset = offset as u64;
    if offset >= logical {
        return None;
    }
    let want = (size as u64).min(logical - offset) as usize;
    (want > 0).then_some((offset, want))
}

fn attr_for(ino: u64, meta: &fs::Metadata) -> FileAttr {
    let kind = if meta.is_dir() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };
    let timestamp = |secs: i64| {
        if secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(secs as u64)
        } else {
            UNIX_EPOCH
        }
    };

    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: timestamp(meta.atime()),
        mtime: timestamp(meta.mtime()),
        ctime: timestamp(meta.ctime()),
        crtime: UNIX_EPOCH,
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// The mounted filesystem: local metadata root plus the striping engine.
pub struct StripeFs {
    cluster: Arc<Cluster>,
    root: PathBuf,
    inodes: InodeTable,
}

impl StripeFs {
    /// Creates the filesystem over `cluster` with metadata under `root`.
    #[must_use]
    pub fn new(cluster: Arc<Cluster>, root: PathBuf) -> Self {
        Self {
            cluster,
            root,
            inodes: InodeTable::new(),
        }
    }

    fn local_path(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Engine paths carry the mount-absolute form the daemon expects.
    fn engine_path(relative: &str) -> String {
        format!("/{relative}")
    }

    fn metadata_of(&self, ino: u64) -> Option<(String, fs::Metadata)> {
        let relative = self.inodes.path_of(ino)?.to_owned();
        let meta = fs::metadata(self.local_path(&relative)).ok()?;
        Some((relative, meta))
    }
}

impl Filesystem for StripeFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match fs::metadata(self.local_path(name)) {
            Ok(meta) => {
                let ino = self.inodes.assign(name);
                reply.entry(&TTL, &attr_for(ino, &meta), 0);
            }
            Err(_) => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.metadata_of(ino) {
            Some((_, meta)) => reply.attr(&TTL, &attr_for(ino, &meta)),
            None => reply.error(libc::ENOENT),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some((relative, _)) = self.metadata_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(size) = size {
            let resized = OpenOptions::new()
                .write(true)
                .open(self.local_path(&relative))
                .and_then(|file| file.set_len(size));
            if let Err(error) = resized {
                warn!(%relative, %error, "metadata resize failed");
                reply.error(libc::EIO);
                return;
            }
        }

        match self.metadata_of(ino) {
            Some((_, meta)) => reply.attr(&TTL, &attr_for(ino, &meta)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };

        match fs::File::create(self.local_path(name)) {
            Ok(file) => {
                let meta = match file.metadata() {
                    Ok(meta) => meta,
                    Err(_) => {
                        reply.error(libc::EIO);
                        return;
                    }
                };
                let ino = self.inodes.assign(name);
                reply.created(&TTL, &attr_for(ino, &meta), 0, 0, 0);
            }
            Err(error) => {
                warn!(name, %error, "create failed");
                reply.error(error.raw_os_error().unwrap_or(libc::EIO));
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };

        match fs::remove_file(self.local_path(name)) {
            Ok(()) => {
                self.inodes.forget(name);
                reply.ok();
            }
            Err(error) => reply.error(error.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some((relative, meta)) = self.metadata_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => {
                // Empty files never touch the nodes.
                if meta.len() > 0 {
                    if let Err(error) = self.cluster.open_for_read(&Self::engine_path(&relative)) {
                        warn!(%relative, %error, "read open failed");
                        reply.error(errno_for(&error));
                        return;
                    }
                }
                reply.opened(0, 0);
            }
            // Striping happens when the data arrives.
            libc::O_WRONLY => reply.opened(0, 0),
            _ => reply.error(libc::EACCES),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some((relative, meta)) = self.metadata_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let Some((offset, want)) = read_span(meta.len(), offset, size) else {
            reply.data(&[]);
            return;
        };

        let mut buf = vec![0u8; want];
        match self.cluster.read(&mut buf, offset) {
            Ok(copied) => reply.data(&buf[..copied]),
            Err(error) => {
                warn!(%relative, offset, %error, "read failed");
                reply.error(errno_for(&error));
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some((relative, _)) = self.metadata_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        // Whole-file overwrites only; random writes are unsupported.
        if offset != 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.cluster.write_file(&Self::engine_path(&relative), data) {
            Ok(written) => {
                // Record the logical length locally so stats and reads see it.
                let recorded = OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(self.local_path(&relative))
                    .and_then(|file| file.set_len(written as u64));
                if let Err(error) = recorded {
                    warn!(%relative, %error, "failed to record logical length");
                    reply.error(libc::EIO);
                    return;
                }
                reply.written(written as u32);
            }
            Err(error) => {
                warn!(%relative, %error, "striped write failed");
                reply.error(errno_for(&error));
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        // Metadata is not replicated; only the local root is listed.
        if ino != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }

        let mut names = Vec::new();
        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Ok(name) = entry.file_name().into_string() {
                        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                            names.push(name);
                        }
                    }
                }
            }
            Err(error) => {
                reply.error(error.raw_os_error().unwrap_or(libc::EIO));
                return;
            }
        }
        names.sort();

        let mut entries = vec![
            (ROOT_INO, FileType::Directory, String::from(".")),
            (ROOT_INO, FileType::Directory, String::from("..")),
        ];
        for name in names {
            let ino = self.inodes.assign(&name);
            entries.push((ino, FileType::RegularFile, name));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, "release");
        reply.ok();
    }
}

/// Mounts the filesystem and blocks until unmount.
///
/// `extra` options are handed through to the FUSE layer verbatim.
pub fn mount(
    cluster: Arc<Cluster>,
    root: PathBuf,
    mountpoint: &Path,
    extra: &[String],
) -> io::Result<()> {
    let mut options = vec![
        MountOption::FSName(String::from("stripefs")),
        MountOption::DefaultPermissions,
    ];
    options.extend(extra.iter().cloned().map(MountOption::CUSTOM));
    fuser::mount2(StripeFs::new(cluster, root), mountpoint, &options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_span_clamps_to_logical_length() {
        assert_eq!(read_span(100, 0, 40), Some((0, 40)));
        assert_eq!(read_span(100, 80, 40), Some((80, 20)));
        assert_eq!(read_span(100, 100, 40), None);
        assert_eq!(read_span(100, 150, 40), None);
        assert_eq!(read_span(0, 0, 40), None);
        assert_eq!(read_span(100, -1, 40), None);
    }

    #[test]
    fn engine_errors_collapse_to_single_errnos() {
        assert_eq!(errno_for(&EngineError::DataLoss), libc::EIO);
        assert_eq!(errno_for(&EngineError::NodeStream { node: 2 }), libc::EIO);
        assert_eq!(errno_for(&EngineError::NotOpen), libc::EBADF);
        assert_eq!(
            errno_for(&EngineError::NonSequentialRead { offset: 42 }),
            libc::EIO
        );
    }

    #[test]
    fn attr_reflects_local_metadata() {
        let dir = tempfile::TempDir::new().expect("temp root");
        let path = dir.path().join("meta.bin");
        std::fs::write(&path, vec![0u8; 1234]).expect("seed file");

        let meta = fs::metadata(&path).expect("metadata");
        let attr = attr_for(7, &meta);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 1234);
        assert_eq!(attr.kind, FileType::RegularFile);
    }

    #[test]
    fn engine_paths_are_mount_absolute() {
        assert_eq!(StripeFs::engine_path("data.bin"), "/data.bin");
    }
}
