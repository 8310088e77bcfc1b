use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, trace};
use memmap2::{Mmap, MmapOptions, UncheckedAdvice};

use crate::config::Config;
use crate::device::Device;
use crate::report::Samples;
use crate::sink::Sink;

/// Action applied to each page right before it is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageHint {
    None,
    /// `MADV_DONTNEED` on the page so the touch takes a real fault.
    Evict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// One warm-up pass, then one timed pass split evenly over the pages.
    /// Only meaningful when a touch costs a few nanoseconds.
    Batched,
    /// One timer pair around every touch.
    PerPage,
}

/// Maps the test region, touches one byte per page and returns one sample
/// per page. The mapping is released before returning.
///
/// `hint` only applies to `Timing::PerPage`; the batched pass has no
/// per-page step to put it in.
pub fn touch_pages(
    device: &Device,
    config: &Config,
    hint: PageHint,
    timing: Timing,
    sink: &mut Sink,
) -> Result<Samples> {
    let len = config.test_size();
    // SAFETY: the mapping is read-only and nothing in this process writes
    // to the device while it exists.
    let map = unsafe { MmapOptions::new().offset(0).len(len).map(device.file()) }
        .with_context(|| format!("mmap {} bytes of {}", len, device.path().display()))?;
    trace!("mapped {} bytes at {:p}", len, map.as_ptr());

    let samples = match timing {
        Timing::Batched => batched(&map, config, sink),
        Timing::PerPage => per_page(&map, config, hint, sink),
    };

    drop(map);
    debug!("{:?}/{:?}: {} samples", timing, hint, samples.len());
    Ok(samples)
}

fn batched(map: &Mmap, config: &Config, sink: &mut Sink) -> Samples {
    let n = config.page_count;
    for i in 0..n {
        sink.touch(&map[config.page_offset(i)]);
    }

    let start = Instant::now();
    for i in 0..n {
        sink.touch(&map[config.page_offset(i)]);
    }
    let elapsed = start.elapsed().as_nanos() as f64;
    Samples::batched(elapsed, n)
}

fn per_page(map: &Mmap, config: &Config, hint: PageHint, sink: &mut Sink) -> Samples {
    let mut samples = Samples::with_capacity(config.page_count);
    for i in 0..config.page_count {
        if hint == PageHint::Evict {
            evict(map, config, i);
        }
        let start = Instant::now();
        sink.touch(&map[config.page_offset(i)]);
        samples.push(start.elapsed().as_nanos() as f64);
    }
    samples
}

fn evict(map: &Mmap, config: &Config, page: usize) {
    let off = config.page_offset(page);
    // SAFETY: DONTNEED on a shared read-only file mapping only drops the
    // page table entries; the next read faults the page back in from the file.
    if let Err(e) = unsafe { map.unchecked_advise_range(UncheckedAdvice::DontNeed, off, config.page_size) } {
        debug!("madvise(DONTNEED) page {}: {}", page, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::{fake_device, page_byte};

    fn open_fake(config: &Config) -> (tempfile::NamedTempFile, Device) {
        let tmp = fake_device(config.min_device_size());
        let device = Device::open(tmp.path(), config).unwrap();
        (tmp, device)
    }

    fn expected_sink(config: &Config, passes: usize) -> u8 {
        let mut acc = 0u8;
        for _ in 0..passes {
            for i in 0..config.page_count {
                acc = acc.wrapping_add(page_byte(i as u64));
            }
        }
        acc
    }

    #[test]
    fn per_page_yields_one_sample_per_page() {
        let config = Config::default();
        let (_tmp, device) = open_fake(&config);
        let mut sink = Sink::new();
        for hint in [PageHint::None, PageHint::Evict] {
            let samples = touch_pages(&device, &config, hint, Timing::PerPage, &mut sink).unwrap();
            assert_eq!(samples.len(), config.page_count);
        }
    }

    #[test]
    fn batched_samples_are_uniform() {
        let config = Config::default();
        let (_tmp, device) = open_fake(&config);
        let mut sink = Sink::new();
        let samples = touch_pages(&device, &config, PageHint::None, Timing::Batched, &mut sink).unwrap();
        assert_eq!(samples.len(), config.page_count);
        let first = samples.as_slice()[0];
        assert!(samples.as_slice().iter().all(|&s| s == first));
    }

    #[test]
    fn touches_reach_the_sink() {
        let config = Config::default();
        let (_tmp, device) = open_fake(&config);

        let mut sink = Sink::new();
        touch_pages(&device, &config, PageHint::Evict, Timing::PerPage, &mut sink).unwrap();
        assert_eq!(sink.value(), expected_sink(&config, 1));

        let mut sink = Sink::new();
        touch_pages(&device, &config, PageHint::None, Timing::Batched, &mut sink).unwrap();
        assert_eq!(sink.value(), expected_sink(&config, 2));
    }
}
