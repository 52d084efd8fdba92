use crate::config::ConfigError;
use crossbeam_channel::{bounded, Receiver, Sender};
use notify::{Config, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Filesystems where native change notifications are unreliable.
const REMOTE_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smb3",
    "smbfs",
    "fuse.sshfs",
    "9p",
    "afs",
    "ceph",
    "glusterfs",
];

/// How the file is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchMode {
    pub force_poll: bool,
    pub poll_interval: Duration,
}

impl Default for WatchMode {
    fn default() -> Self {
        Self {
            force_poll: false,
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Change notifications for a single file.
///
/// The parent directory is watched so editors that replace the file by
/// rename still produce events. Bursts collapse into one pending signal.
/// Falls back to polling on remote filesystems, when forced, or when the
/// native backend cannot be set up.
pub struct FileWatcher {
    dir: PathBuf,
    file_name: Option<OsString>,
    mode: WatchMode,
    backend: Box<dyn Watcher + Send>,
    polling: bool,
    tx: Sender<()>,
    events: Receiver<()>,
    watching: bool,
}

impl FileWatcher {
    pub fn new(path: &Path, mode: WatchMode) -> Result<Self, ConfigError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory(dir));
        }
        let file_name: Option<OsString> = path.file_name().map(|name| name.to_os_string());
        let (tx, rx) = bounded(1);

        let remote = remote_fs_type(&dir);
        let poll = mode.force_poll || remote.is_some();
        let native = if poll {
            None
        } else {
            match RecommendedWatcher::new(
                signal_handler(file_name.clone(), tx.clone()),
                Config::default(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(
                        event = "watch_poll_fallback",
                        error = %err,
                        "native watcher unavailable"
                    );
                    None
                }
            }
        };
        let (backend, polling): (Box<dyn Watcher + Send>, bool) = match native {
            Some(watcher) => (Box::new(watcher), false),
            None => {
                let watcher = poll_watcher(&file_name, &tx, mode.poll_interval).map_err(
                    |source| ConfigError::Watcher {
                        path: path.to_path_buf(),
                        source,
                    },
                )?;
                (Box::new(watcher), true)
            }
        };
        if polling {
            info!(
                event = "watch_polling",
                dir = %dir.display(),
                forced = mode.force_poll,
                fs_type = remote.as_deref().unwrap_or("local"),
                interval_ms = mode.poll_interval.as_millis() as u64
            );
        }

        Ok(Self {
            dir,
            file_name,
            mode,
            backend,
            polling,
            tx,
            events: rx,
            watching: false,
        })
    }

    /// Registers the watch, switching to polling if the native backend
    /// refuses the directory.
    pub fn watch(&mut self) -> notify::Result<()> {
        if self.watching {
            return Ok(());
        }
        if !self.dir.is_dir() {
            return Err(notify::Error::path_not_found().add_path(self.dir.clone()));
        }
        if let Err(err) = self.backend.watch(&self.dir, RecursiveMode::NonRecursive) {
            if self.polling {
                return Err(err);
            }
            warn!(event = "watch_poll_fallback", dir = %self.dir.display(), error = %err);
            let mut poller = poll_watcher(&self.file_name, &self.tx, self.mode.poll_interval)?;
            poller.watch(&self.dir, RecursiveMode::NonRecursive)?;
            self.backend = Box::new(poller);
            self.polling = true;
        }
        self.watching = true;
        Ok(())
    }

    pub fn unwatch(&mut self) {
        if self.watching {
            let _ = self.backend.unwatch(&self.dir);
            self.watching = false;
        }
    }

    /// Drops every watch and re-registers it, discarding queued signals.
    pub fn rewatch(&mut self) -> notify::Result<()> {
        self.unwatch();
        while self.events.try_recv().is_ok() {}
        self.watch()
    }

    pub fn events(&self) -> Receiver<()> {
        self.events.clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watching
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }
}

fn signal_handler(
    file_name: Option<OsString>,
    tx: Sender<()>,
) -> impl FnMut(notify::Result<notify::Event>) + Send + 'static {
    move |res| {
        let Ok(event) = res else {
            return;
        };
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        let relevant = match &file_name {
            Some(name) => event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(name.as_os_str())),
            None => true,
        };
        if relevant {
            let _ = tx.try_send(());
        }
    }
}

fn poll_watcher(
    file_name: &Option<OsString>,
    tx: &Sender<()>,
    interval: Duration,
) -> notify::Result<PollWatcher> {
    PollWatcher::new(
        signal_handler(file_name.clone(), tx.clone()),
        Config::default().with_poll_interval(interval),
    )
}

/// Filesystem type of `dir` when it is one of [`REMOTE_FS_TYPES`].
#[cfg(target_os = "linux")]
fn remote_fs_type(dir: &Path) -> Option<String> {
    let dir = dir.canonicalize().ok()?;
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    let fs_type = mount_fs_type(&mounts, &dir)?;
    is_remote_fs(fs_type).then(|| fs_type.to_string())
}

#[cfg(not(target_os = "linux"))]
fn remote_fs_type(_dir: &Path) -> Option<String> {
    None
}

/// Type of the mount with the longest mount point containing `dir`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn mount_fs_type<'a>(mounts: &'a str, dir: &Path) -> Option<&'a str> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?.replace("\\040", " ");
            let fs_type = fields.next()?;
            Some((PathBuf::from(mount_point), fs_type))
        })
        .filter(|(mount_point, _)| dir.starts_with(mount_point))
        .max_by_key(|(mount_point, _)| mount_point.components().count())
        .map(|(_, fs_type)| fs_type)
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn is_remote_fs(fs_type: &str) -> bool {
    REMOTE_FS_TYPES.contains(&fs_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nope").join("beads.jsonl");
        assert!(matches!(
            FileWatcher::new(&path, WatchMode::default()),
            Err(ConfigError::MissingDirectory(_))
        ));
    }

    #[test]
    fn writes_to_target_file_signal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("beads.jsonl");
        std::fs::write(&path, "").expect("seed");

        let mut watcher = FileWatcher::new(&path, WatchMode::default()).expect("watcher");
        watcher.watch().expect("watch");
        assert!(watcher.is_watching());
        let events = watcher.events();

        std::fs::write(&path, "{}\n").expect("write");
        assert!(events.recv_timeout(Duration::from_secs(5)).is_ok());

        watcher.unwatch();
        assert!(!watcher.is_watching());
    }

    #[test]
    fn forced_polling_signals_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("beads.jsonl");
        std::fs::write(&path, "").expect("seed");

        let mode = WatchMode {
            force_poll: true,
            poll_interval: Duration::from_millis(50),
        };
        let mut watcher = FileWatcher::new(&path, mode).expect("watcher");
        assert!(watcher.is_polling());
        watcher.watch().expect("watch");
        let events = watcher.events();
        std::thread::sleep(Duration::from_millis(100));
        while events.try_recv().is_ok() {}

        std::fs::write(&path, "{\"id\":\"bd-1\"}\n").expect("write");
        assert!(events.recv_timeout(Duration::from_secs(5)).is_ok());
        watcher.unwatch();
    }

    #[test]
    fn removed_directory_fails_rewatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("beads");
        std::fs::create_dir(&sub).expect("mkdir");
        let path = sub.join("beads.jsonl");

        let mut watcher = FileWatcher::new(&path, WatchMode::default()).expect("watcher");
        watcher.watch().expect("watch");
        std::fs::remove_dir_all(&sub).expect("remove dir");

        assert!(watcher.rewatch().is_err());
        assert!(!watcher.is_watching());
    }

    #[test]
    fn deepest_mount_decides_filesystem_type() {
        let mounts = "\
/dev/sda1 / ext4 rw,relatime 0 0
server:/export /mnt/share nfs4 rw,vers=4.2 0 0
/dev/sdb1 /mnt/share/local ext4 rw 0 0
//host/team /mnt/team\\040drive cifs rw 0 0
";
        assert_eq!(
            mount_fs_type(mounts, Path::new("/mnt/share/proj/.beads")),
            Some("nfs4")
        );
        assert_eq!(
            mount_fs_type(mounts, Path::new("/mnt/share/local/.beads")),
            Some("ext4")
        );
        assert_eq!(
            mount_fs_type(mounts, Path::new("/mnt/team drive/.beads")),
            Some("cifs")
        );
        assert_eq!(mount_fs_type(mounts, Path::new("/home/me")), Some("ext4"));
        assert!(is_remote_fs("nfs4"));
        assert!(is_remote_fs("fuse.sshfs"));
        assert!(!is_remote_fs("ext4"));
        assert!(!is_remote_fs("tmpfs"));
    }
}
