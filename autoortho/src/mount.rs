//! The Mount Adapter: translates FUSE callbacks into Read-Path Policy and
//! DSF Parser invocations, passing everything else straight through to
//! the underlying root directory.
//!
//! Per §4.5/§6: `.dds` paths matching the tile grammar route `getattr`
//! and `open` through the policy engine (with the Path Map caching the
//! `getattr` resolution for the following `open`); `.dsf` paths matching
//! the scenery grammar trigger the DSF Parser on `open`; everything else
//! is a plain passthrough to `root`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use libc::{EIO, ENOENT};

use crate::cache::TileCache;
use crate::config::AutoOrthoConfig;
use crate::dsf;
use crate::flight::FlightState;
use crate::policy;
use crate::tile_key::{is_dsf_path, parse_dds_path};

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

/// Bidirectional inode table mapping FUSE inodes to paths relative to
/// `root`. Inode `1` is always the root directory.
#[derive(Default)]
struct InodeTable {
    paths: HashMap<u64, PathBuf>,
    inos: HashMap<PathBuf, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut paths = HashMap::new();
        paths.insert(ROOT_INO, PathBuf::new());
        let mut inos = HashMap::new();
        inos.insert(PathBuf::new(), ROOT_INO);
        Self {
            paths,
            inos,
            next: 2,
        }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.paths.get(&ino).cloned()
    }

    fn ino_of(&mut self, rel: &Path) -> u64 {
        if let Some(&ino) = self.inos.get(rel) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, rel.to_path_buf());
        self.inos.insert(rel.to_path_buf(), ino);
        ino
    }
}

/// The AutoOrtho FUSE filesystem: a passthrough over `root` that
/// intercepts `.dds` and `.dsf` paths per §4.5.
pub struct AutoOrthoFs {
    root: PathBuf,
    cache: Arc<TileCache>,
    flight: Arc<FlightState>,
    config: AutoOrthoConfig,
    inodes: Mutex<InodeTable>,
    /// The Path Map: virtual path (relative to `root`) -> last-resolved
    /// artifact path, so `open` doesn't need to re-consult the policy.
    path_map: Mutex<HashMap<PathBuf, PathBuf>>,
    open_files: Mutex<HashMap<u64, File>>,
    next_fh: AtomicU64,
}

impl AutoOrthoFs {
    pub fn new(root: PathBuf, cache: Arc<TileCache>, flight: Arc<FlightState>, config: AutoOrthoConfig) -> Self {
        Self {
            root,
            cache,
            flight,
            config,
            inodes: Mutex::new(InodeTable::new()),
            path_map: Mutex::new(HashMap::new()),
            open_files: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn full_path(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// The virtual path as the tile/DSF regexes expect it: root-relative,
    /// leading slash.
    fn virtual_path(rel: &Path) -> String {
        format!("/{}", rel.to_string_lossy())
    }

    /// Runs the Read-Path Policy for a tile path, recording the result in
    /// the Path Map. Returns `None` for the `"ZL"` sentinel (passthrough).
    fn resolve_tile(&self, rel: &Path) -> Option<PathBuf> {
        let key = parse_dds_path(&Self::virtual_path(rel))?;
        let flight = self.flight.snapshot();
        let resolved = policy::resolve(&self.cache, &key, flight, &self.config)?;
        self.path_map
            .lock()
            .unwrap()
            .insert(rel.to_path_buf(), resolved.clone());
        Some(resolved)
    }

    fn next_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

fn attr_from_metadata(ino: u64, meta: &fs::Metadata) -> FileAttr {
    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };

    let to_time = |secs: i64, nanos: i64| {
        UNIX_EPOCH + Duration::new(secs.max(0) as u64, nanos.max(0) as u32)
    };

    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: to_time(meta.atime(), meta.atime_nsec()),
        mtime: to_time(meta.mtime(), meta.mtime_nsec()),
        ctime: to_time(meta.ctime(), meta.ctime_nsec()),
        crtime: SystemTime::now(),
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

impl Filesystem for AutoOrthoFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_rel) = self.inodes.lock().unwrap().path_of(parent) else {
            reply.error(ENOENT);
            return;
        };
        let rel = parent_rel.join(name);

        let tile_resolved = self.resolve_tile(&rel);
        let stat_path = tile_resolved.unwrap_or_else(|| self.full_path(&rel));

        match fs::symlink_metadata(&stat_path) {
            Ok(meta) => {
                let ino = self.inodes.lock().unwrap().ino_of(&rel);
                reply.entry(&TTL, &attr_from_metadata(ino, &meta), 0);
            }
            Err(_) => reply.error(ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(rel) = self.inodes.lock().unwrap().path_of(ino) else {
            reply.error(ENOENT);
            return;
        };

        let tile_resolved = self.resolve_tile(&rel);
        let stat_path = tile_resolved.unwrap_or_else(|| self.full_path(&rel));

        match fs::symlink_metadata(&stat_path) {
            Ok(meta) => reply.attr(&TTL, &attr_from_metadata(ino, &meta)),
            Err(_) => reply.error(ENOENT),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(rel) = self.inodes.lock().unwrap().path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let virt = Self::virtual_path(&rel);

        let target_path = if is_dsf_path(&virt) {
            let flight = self.flight.snapshot();
            let extra_fast = flight.spd > self.config.policy_fast_speed
                && flight.alt > self.config.policy_low_altitude;
            let full = self.full_path(&rel);
            if let Err(err) = dsf::prefetch(&full, &self.cache, extra_fast) {
                tracing::error!(error = %err, path = %full.display(), "DSF prefetch failed");
            }
            full
        } else if let Some(key) = parse_dds_path(&virt) {
            if key.is_zl_sentinel() {
                self.full_path(&rel)
            } else {
                let cached = self.path_map.lock().unwrap().get(&rel).cloned();
                cached.unwrap_or_else(|| self.cache.get_quick(&key, None, 1))
            }
        } else {
            self.full_path(&rel)
        };

        // Mirror the open-mode bits the kernel asked for so a later
        // `write` on this handle (passthrough, per §4.5/§6) isn't
        // rejected by a read-only handle.
        let accmode = flags & libc::O_ACCMODE;
        let mut options = fs::OpenOptions::new();
        options.read(true);
        if accmode == libc::O_WRONLY || accmode == libc::O_RDWR {
            options.write(true);
        }

        match options.open(&target_path) {
            Ok(file) => {
                let fh = self.next_fh();
                self.open_files.lock().unwrap().insert(fh, file);
                reply.opened(fh, 0);
            }
            Err(_) => reply.error(ENOENT),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        use std::io::{Read, Seek, SeekFrom};

        let mut files = self.open_files.lock().unwrap();
        let Some(file) = files.get_mut(&fh) else {
            reply.error(EIO);
            return;
        };

        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            reply.error(EIO);
            return;
        }
        let mut buf = vec![0u8; size as usize];
        match file.read(&mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(_) => reply.error(EIO),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        use std::io::{Seek, SeekFrom, Write};

        let mut files = self.open_files.lock().unwrap();
        let Some(file) = files.get_mut(&fh) else {
            reply.error(EIO);
            return;
        };

        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            reply.error(EIO);
            return;
        }
        match file.write(data) {
            Ok(n) => reply.written(n as u32),
            Err(_) => reply.error(EIO),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.open_files.lock().unwrap().remove(&fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(rel) = self.inodes.lock().unwrap().path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let full = self.full_path(&rel);

        let dir_entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(_) => {
                reply.error(ENOENT);
                return;
            }
        };

        let parent_rel = rel.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        let parent_ino = self.inodes.lock().unwrap().ino_of(&parent_rel);

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for entry in dir_entries.flatten() {
            let child_rel = rel.join(entry.file_name());
            let kind = match entry.file_type() {
                Ok(t) if t.is_dir() => FileType::Directory,
                Ok(t) if t.is_symlink() => FileType::Symlink,
                _ => FileType::RegularFile,
            };
            let child_ino = self.inodes.lock().unwrap().ino_of(&child_rel);
            entries.push((child_ino, kind, entry.file_name().to_string_lossy().to_string()));
        }

        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(rel) = self.inodes.lock().unwrap().path_of(ino) else {
            reply.error(ENOENT);
            return;
        };
        let full = self.full_path(&rel);
        let c_path = std::ffi::CString::new(full.as_os_str().as_bytes()).unwrap();
        let ret = unsafe { libc::access(c_path.as_ptr(), mask) };
        if ret == 0 {
            reply.ok();
        } else {
            reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(EIO));
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let c_path = std::ffi::CString::new(self.root.as_os_str().as_bytes()).unwrap();
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            reply.error(EIO);
            return;
        }
        reply.statfs(
            stat.f_blocks,
            stat.f_bfree,
            stat.f_bavail,
            stat.f_files,
            stat.f_ffree,
            stat.f_bsize as u32,
            stat.f_namemax as u32,
            stat.f_frsize as u32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::PlaceholderRenderer;
    use tempfile::tempdir;

    fn test_fs() -> (AutoOrthoFs, tempfile::TempDir, tempfile::TempDir) {
        let root = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let config = AutoOrthoConfig {
            cache_dir: cache_dir.path().to_path_buf(),
            ..AutoOrthoConfig::default()
        };
        let renderer = Arc::new(PlaceholderRenderer::default());
        let cache = Arc::new(TileCache::new(config.clone(), renderer).unwrap());
        let flight = Arc::new(FlightState::default());
        (
            AutoOrthoFs::new(root.path().to_path_buf(), cache, flight, config),
            root,
            cache_dir,
        )
    }

    #[test]
    fn resolve_tile_skips_zl_sentinel() {
        let (fs, _root, _cache_dir) = test_fs();
        let rel = Path::new("earth/+50-010/20_30_ZL16.dds");
        assert!(fs.resolve_tile(rel).is_none());
    }

    #[test]
    fn resolve_tile_returns_cache_artifact_when_disconnected() {
        let (fs, _root, cache_dir) = test_fs();
        let rel = Path::new("earth/+50-010/20_30_BI16.dds");
        let resolved = fs.resolve_tile(rel).unwrap();
        assert_eq!(resolved, cache_dir.path().join("20_30_BI_13.dds"));
    }

    #[test]
    fn inode_table_reuses_ino_for_same_path() {
        let mut table = InodeTable::new();
        let ino1 = table.ino_of(Path::new("a/b.dsf"));
        let ino2 = table.ino_of(Path::new("a/b.dsf"));
        assert_eq!(ino1, ino2);
        assert_eq!(table.path_of(ino1).unwrap(), Path::new("a/b.dsf"));
    }

    #[test]
    fn root_inode_is_one_with_empty_path() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INO).unwrap(), Path::new(""));
    }
}
