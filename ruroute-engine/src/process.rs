//! Process identity resolution for intercepted connections
//!
//! [`ProcessCache`] sits in front of an OS-specific [`ProcessResolver`] and
//! makes sure concurrent lookups for the same local port share a single
//! resolution. Entries live for a short TTL because ephemeral ports are
//! reused by other processes.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hop_intercept::ProcessResolver;
use lru::LruCache;
use tokio::sync::OnceCell;

/// How long a resolved name is trusted
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

/// Default maximum number of cached ports
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

struct Entry {
    created: Instant,
    name: OnceCell<String>,
}

impl Entry {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            name: OnceCell::new(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created.elapsed() >= ttl
    }
}

/// Caching, single-flight wrapper around a [`ProcessResolver`]
pub struct ProcessCache<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<LruCache<u16, Arc<Entry>>>,
}

impl<R: ProcessResolver> ProcessCache<R> {
    /// Create a cache with the default TTL and capacity
    pub fn new(inner: R) -> Self {
        Self::with_limits(inner, DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache with an explicit TTL and capacity
    pub fn with_limits(inner: R, ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached ports, expired entries included
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, port: u16) -> Arc<Entry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(&port) {
            if !entry.is_expired(self.ttl) {
                return entry.clone();
            }
        }
        let entry = Arc::new(Entry::new());
        entries.put(port, entry.clone());
        entry
    }
}

#[async_trait::async_trait]
impl<R: ProcessResolver> ProcessResolver for ProcessCache<R> {
    async fn name_by_local_port(&self, port: u16) -> String {
        let entry = self.entry(port);
        entry
            .name
            .get_or_init(|| self.inner.name_by_local_port(port))
            .await
            .clone()
    }
}

/// The best resolver available on this platform, wrapped in a [`ProcessCache`]
pub fn default_resolver() -> Arc<dyn ProcessResolver> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ProcessCache::new(procfs::ProcfsResolver))
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(ProcessCache::new(hop_intercept::UnknownProcess))
    }
}

#[cfg(target_os = "linux")]
pub use procfs::ProcfsResolver;

#[cfg(target_os = "linux")]
mod procfs {
    use std::fs;

    use hop_intercept::{ProcessResolver, UNKNOWN_PROCESS};

    const SOCKET_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

    /// Resolves process names through `/proc`
    ///
    /// The local port is looked up in the kernel socket tables to find the
    /// socket inode, then every `/proc/<pid>/fd` is scanned for that inode.
    /// Processes owned by other users are skipped silently.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ProcfsResolver;

    #[async_trait::async_trait]
    impl ProcessResolver for ProcfsResolver {
        async fn name_by_local_port(&self, port: u16) -> String {
            match tokio::task::spawn_blocking(move || lookup(port)).await {
                Ok(Some(name)) => name,
                Ok(None) => UNKNOWN_PROCESS.to_string(),
                Err(e) => {
                    log::debug!("Process lookup for port {} failed: {}", port, e);
                    UNKNOWN_PROCESS.to_string()
                }
            }
        }
    }

    fn lookup(port: u16) -> Option<String> {
        let inode = SOCKET_TABLES
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .find_map(|table| socket_inode(&table, port))?;
        let pid = owner_of(inode)?;
        let comm = fs::read_to_string(format!("/proc/{}/comm", pid)).ok()?;
        let name = comm.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    /// Inode of the first socket bound to local `port` in a `/proc/net/tcp*` table
    pub(super) fn socket_inode(table: &str, port: u16) -> Option<u64> {
        table.lines().skip(1).find_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let (_, hex_port) = local.rsplit_once(':')?;
            if u16::from_str_radix(hex_port, 16).ok()? != port {
                return None;
            }
            let inode: u64 = fields.get(9)?.parse().ok()?;
            (inode != 0).then_some(inode)
        })
    }

    fn owner_of(inode: u64) -> Option<u32> {
        let target = format!("socket:[{}]", inode);
        for proc_entry in fs::read_dir("/proc").ok()?.flatten() {
            let Some(pid) = proc_entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(proc_entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(link) = fs::read_link(fd.path()) {
                    if link.as_os_str() == target.as_str() {
                        return Some(pid);
                    }
                }
            }
        }
        None
    }
}
