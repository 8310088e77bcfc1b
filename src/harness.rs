use std::io::Write;
use std::path::Path;

use anyhow::Result;
use log::{debug, info, warn};

use crate::cache::{fill_cache, CacheController, FillPlan};
use crate::config::Config;
use crate::device::Device;
use crate::direct;
use crate::mapping::{touch_pages, PageHint, Timing};
use crate::report::{ExperimentResult, Reporter, Unit};
use crate::sink::Sink;

pub const WARM_READ: &str = "1. warm read (cached + PTE)";
pub const MINOR_FAULT: &str = "2. minor fault (cached, no PTE)";
pub const MAJOR_FAULT: &str = "3. major fault (not cached, RAM free)";
pub const MAJOR_FAULT_EVICT: &str = "4. major fault + eviction (cache full)";
pub const DIRECT_READ: &str = "5. pread O_DIRECT (no cache, no fault overhead)";

#[derive(Debug, Default)]
pub struct Summary {
    pub results: Vec<ExperimentResult>,
    pub fill_size: u64,
    pub sink: u8,
}

/// Runs the five experiments in order against one device and writes one
/// line per experiment to `out`.
pub fn run<C, W>(path: &Path, config: &Config, cache: &C, out: W) -> Result<Summary>
where
    C: CacheController,
    W: Write,
{
    let device = Device::open(path, config)?;
    let mut harness = Harness {
        device: &device,
        config,
        cache,
        reporter: Reporter::new(out),
        sink: Sink::new(),
        summary: Summary::default(),
    };
    harness.all()?;
    Ok(harness.summary)
}

struct Harness<'a, C, W: Write> {
    device: &'a Device,
    config: &'a Config,
    cache: &'a C,
    reporter: Reporter<W>,
    sink: Sink,
    summary: Summary,
}

impl<C: CacheController, W: Write> Harness<'_, C, W> {
    fn all(&mut self) -> Result<()> {
        let path = self.device.path().display().to_string();
        self.reporter.header(&path, self.device.size())?;

        self.warm_read()?;
        self.minor_fault()?;
        self.major_fault()?;
        self.major_fault_with_eviction()?;
        self.direct_read()?;

        self.summary.sink = self.sink.value();
        self.reporter.sink(self.summary.sink)?;
        Ok(())
    }

    fn mapped(&mut self, label: &'static str, unit: Unit, hint: PageHint, timing: Timing) -> Result<()> {
        info!("running {label}");
        let samples = touch_pages(self.device, self.config, hint, timing, &mut self.sink)?;
        self.record(ExperimentResult::from_samples(label, unit, samples))
    }

    fn record(&mut self, result: ExperimentResult) -> Result<()> {
        debug!("{}: {} samples", result.label, result.samples);
        self.reporter.result(&result)?;
        self.summary.results.push(result);
        Ok(())
    }

    fn drop_caches(&self) {
        if let Err(e) = self.cache.drop_caches() {
            warn!("could not drop page cache ({e}); major-fault results may include cached pages");
        }
    }

    fn warm_read(&mut self) -> Result<()> {
        self.mapped(WARM_READ, Unit::Nanos, PageHint::None, Timing::Batched)
    }

    /// Pages are cached by a plain read, then mapped fresh without PTEs.
    fn minor_fault(&mut self) -> Result<()> {
        self.device.preload(self.config.test_size());
        self.mapped(MINOR_FAULT, Unit::Micros, PageHint::None, Timing::PerPage)
    }

    fn major_fault(&mut self) -> Result<()> {
        self.drop_caches();
        self.mapped(MAJOR_FAULT, Unit::Micros, PageHint::Evict, Timing::PerPage)
    }

    /// Same as `major_fault`, but with the page cache filled from the region
    /// after the test pages so every fault has to evict something.
    fn major_fault_with_eviction(&mut self) -> Result<()> {
        self.drop_caches();
        let available = self.cache.available_memory().unwrap_or_else(|| {
            warn!("available memory unknown; skipping cache fill");
            0
        });
        let plan = FillPlan::new(self.config.test_size() as u64, available, self.device.size());
        self.summary.fill_size = plan.size;

        self.reporter.filling(plan.size)?;
        let filled = fill_cache(self.device.file(), plan, self.config.fill_chunk);
        info!("filled {} of {} bytes starting at {}", filled, plan.size, plan.offset);

        self.mapped(MAJOR_FAULT_EVICT, Unit::Micros, PageHint::Evict, Timing::PerPage)
    }

    fn direct_read(&mut self) -> Result<()> {
        info!("running {DIRECT_READ}");
        match direct::read_pages(self.device.path(), self.config, &mut self.sink) {
            Ok(samples) => self.record(ExperimentResult::from_samples(DIRECT_READ, Unit::Micros, samples)),
            Err(e) => {
                warn!("skipping direct I/O: {e:#}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::FakeController;
    use crate::device::tests::fake_device;

    #[test]
    fn runs_every_experiment_on_minimum_device() {
        let config = Config::default();
        let tmp = fake_device(config.min_device_size());
        let cache = FakeController {
            available: Some(0),
            ..Default::default()
        };
        let mut out = Vec::new();
        let summary = run(tmp.path(), &config, &cache, &mut out).unwrap();

        assert_eq!(summary.fill_size, 0);
        assert_eq!(cache.drops.get(), 2);
        let labels: Vec<_> = summary.results.iter().map(|r| r.label).collect();
        assert_eq!(&labels[..4], &[WARM_READ, MINOR_FAULT, MAJOR_FAULT, MAJOR_FAULT_EVICT]);
        for r in &summary.results {
            assert_eq!(r.samples, config.page_count);
            assert!(r.median_ns >= 0.0 && r.mean_ns >= 0.0);
        }
        assert_eq!(summary.results[0].unit, Unit::Nanos);
        assert!(summary.results[1..].iter().all(|r| r.unit == Unit::Micros));

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(&format!("device: {}  (0.0 GB)\n\n", tmp.path().display())));
        assert!(text.contains("  filling 0.0 GB of page cache from device...\n"));
        assert!(text.ends_with(&format!("\n(sink={})\n", summary.sink)));
        for r in &summary.results {
            assert_eq!(text.lines().filter(|l| l.contains(r.label)).count(), 1);
        }
    }

    #[test]
    fn fills_from_after_test_region() {
        let config = Config::default();
        let tmp = fake_device(config.min_device_size());
        let cache = FakeController {
            available: Some(u64::MAX),
            ..Default::default()
        };
        let summary = run(tmp.path(), &config, &cache, std::io::sink()).unwrap();
        assert_eq!(
            summary.fill_size,
            config.min_device_size() - config.test_size() as u64
        );
    }

    #[test]
    fn tolerates_failed_drop_and_unknown_memory() {
        let config = Config::default();
        let tmp = fake_device(config.min_device_size());
        let cache = FakeController {
            available: None,
            fail_drop: true,
            ..Default::default()
        };
        let summary = run(tmp.path(), &config, &cache, std::io::sink()).unwrap();
        assert_eq!(summary.fill_size, 0);
        assert!(summary.results.len() >= 4);
    }

    #[test]
    fn unopenable_device_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FakeController::default();
        let mut out = Vec::new();
        let err = run(&dir.path().join("missing"), &Config::default(), &cache, &mut out).unwrap_err();
        assert!(err.to_string().starts_with("open "));
        assert!(out.is_empty());
        assert_eq!(cache.drops.get(), 0);
    }

    #[test]
    fn small_device_runs_nothing() {
        let config = Config::default();
        let tmp = fake_device(config.min_device_size() - 4096);
        let cache = FakeController::default();
        let mut out = Vec::new();
        assert!(run(tmp.path(), &config, &cache, &mut out).is_err());
        assert!(out.is_empty());
    }
}
