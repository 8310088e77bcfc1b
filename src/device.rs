use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::config::Config;

/// `_IOR(0x12, 114, size_t)`
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

/// Read-only handle to the device under test.
#[derive(Debug)]
pub struct Device {
    path: PathBuf,
    file: File,
    size: u64,
}

impl Device {
    /// Opens `path` and refuses devices that cannot hold the fill region.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let size = probe_size(&file, &path)?;
        debug!("{} reports {} bytes", path.display(), size);

        let min = config.min_device_size();
        if size < min {
            bail!(
                "device too small: {} is {} bytes, need at least {}",
                path.display(),
                size,
                min
            );
        }
        Ok(Self { path, file, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads `[0, len)` into a scratch buffer to pull it into the page cache.
    pub fn preload(&self, len: usize) {
        let mut buf = vec![0u8; len];
        let mut done = 0;
        while done < len {
            match self.file.read_at(&mut buf[done..], done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) => {
                    warn!("preload of {} stopped at {} bytes: {}", self.path.display(), done, e);
                    break;
                }
            }
        }
        debug!("preloaded {} of {} bytes", done, len);
    }
}

/// Regular files report their length; block devices report zero and need the ioctl.
fn probe_size(file: &File, path: &Path) -> Result<u64> {
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    if len > 0 {
        return Ok(len);
    }

    let mut size: u64 = 0;
    // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut size) };
    if ret < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("query size of {}", path.display()));
    }
    Ok(size)
}
