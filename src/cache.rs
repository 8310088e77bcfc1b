use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;

use log::{debug, warn};

/// The two platform facilities the harness needs to steer the page cache.
pub trait CacheController {
    /// Discard the system-wide page cache.
    fn drop_caches(&self) -> io::Result<()>;
    /// Currently available memory in bytes, if the platform reports it.
    fn available_memory(&self) -> Option<u64>;
}

/// Linux implementation backed by procfs.
#[derive(Debug, Clone)]
pub struct ProcCacheController {
    pub drop_caches_path: PathBuf,
    pub meminfo_path: PathBuf,
}

impl Default for ProcCacheController {
    fn default() -> Self {
        Self {
            drop_caches_path: PathBuf::from("/proc/sys/vm/drop_caches"),
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl CacheController for ProcCacheController {
    fn drop_caches(&self) -> io::Result<()> {
        // "1" drops the page cache only, leaving dentries and inodes.
        let mut f = OpenOptions::new().write(true).open(&self.drop_caches_path)?;
        f.write_all(b"1\n")
    }

    fn available_memory(&self) -> Option<u64> {
        match fs::read_to_string(&self.meminfo_path) {
            Ok(text) => parse_mem_available(&text),
            Err(e) => {
                debug!("read {}: {}", self.meminfo_path.display(), e);
                None
            }
        }
    }
}

/// Extracts the `MemAvailable:` field (reported in kB) as bytes.
pub fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kb * 1024)
    })
}

/// Region read purely to populate the page cache. Starts right after the
/// test region and never runs past the end of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPlan {
    pub offset: u64,
    pub size: u64,
}

impl FillPlan {
    pub fn new(test_size: u64, available: u64, device_size: u64) -> Self {
        let offset = test_size;
        let size = available.min(device_size.saturating_sub(offset));
        Self { offset, size }
    }
}

/// Reads the fill region in `chunk`-sized pieces. Returns the bytes read,
/// which falls short of the plan when the device ends early or a read fails.
pub fn fill_cache(file: &File, plan: FillPlan, chunk: usize) -> u64 {
    let mut buf = vec![0u8; chunk];
    let mut remaining = plan.size;
    let mut pos = plan.offset;
    while remaining > 0 {
        let want = remaining.min(chunk as u64) as usize;
        match file.read_at(&mut buf[..want], pos) {
            Ok(0) => break,
            Ok(n) => {
                remaining -= n as u64;
                pos += n as u64;
            }
            Err(e) => {
                warn!("cache fill stopped at offset {}: {}", pos, e);
                break;
            }
        }
    }
    pos - plan.offset
}
