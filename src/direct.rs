use std::alloc::{self, Layout};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::ptr::NonNull;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use log::{debug, trace};

use crate::config::Config;
use crate::report::Samples;
use crate::sink::Sink;

/// Heap buffer aligned to its own size, as `O_DIRECT` requires.
struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuf {
    fn new(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, size)
            .with_context(|| format!("layout for {size}-byte aligned buffer"))?;
        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| anyhow!("allocate {size}-byte aligned buffer"))?;
        Ok(Self { ptr, layout })
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` owns `layout.size()` initialized bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

fn open_direct(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
        .with_context(|| format!("open {} with O_DIRECT", path.display()))
}

/// Times one page-sized `O_DIRECT` pread per page of the test region.
///
/// Fails only when the direct handle or the aligned buffer cannot be set up;
/// a failed individual read still yields a sample.
pub fn read_pages(path: &Path, config: &Config, sink: &mut Sink) -> Result<Samples> {
    let file = open_direct(path)?;
    let mut buf = AlignedBuf::new(config.page_size)?;
    let buf = buf.as_mut_slice();

    let mut samples = Samples::with_capacity(config.page_count);
    let mut failed = 0usize;
    for i in 0..config.page_count {
        let offset = config.page_offset(i) as u64;
        let start = Instant::now();
        let r = file.read_at(buf, offset);
        samples.push(start.elapsed().as_nanos() as f64);
        match r {
            Ok(n) if n > 0 => sink.absorb(buf[0]),
            Ok(_) => {}
            Err(e) => {
                trace!("pread at {}: {}", offset, e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        debug!("{} of {} direct reads failed", failed, config.page_count);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::fake_device;

    #[test]
    fn buffer_is_page_aligned() {
        let mut buf = AlignedBuf::new(4096).unwrap();
        let slice = buf.as_mut_slice();
        assert_eq!(slice.len(), 4096);
        assert_eq!(slice.as_ptr() as usize % 4096, 0);
        assert!(slice.iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_device_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = Sink::new();
        assert!(read_pages(&dir.path().join("nope"), &Config::default(), &mut sink).is_err());
        assert_eq!(sink.value(), 0);
    }

    #[test]
    fn one_sample_per_page_when_supported() {
        // tmpfs and some overlay filesystems reject O_DIRECT outright.
        let config = Config::default();
        let tmp = fake_device(config.min_device_size());
        let mut sink = Sink::new();
        match read_pages(tmp.path(), &config, &mut sink) {
            Ok(samples) => assert_eq!(samples.len(), config.page_count),
            Err(e) => assert!(format!("{e:#}").contains("O_DIRECT"), "{e:#}"),
        }
    }
}
