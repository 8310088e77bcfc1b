use std::fmt;
use std::io::Write;

use anyhow::Result;

/// Per-page elapsed times in nanoseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples(Vec<f64>);

impl Samples {
    pub fn with_capacity(n: usize) -> Self {
        Self(Vec::with_capacity(n))
    }

    /// Splits one batched measurement evenly over `n` samples.
    pub fn batched(total_ns: f64, n: usize) -> Self {
        Self(vec![total_ns / n as f64; n])
    }

    pub fn push(&mut self, ns: f64) {
        self.0.push(ns);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Sorts in place and returns the element at `n / 2`.
    pub fn median(&mut self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.0.sort_by(f64::total_cmp);
        self.0[self.0.len() / 2]
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.as_slice().iter().sum::<f64>() / self.len() as f64
    }
}

impl From<Vec<f64>> for Samples {
    fn from(v: Vec<f64>) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Nanos,
    Micros,
}

impl Unit {
    fn scale(self, ns: f64) -> f64 {
        match self {
            Unit::Nanos => ns,
            Unit::Micros => ns / 1e3,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Nanos => f.write_str("ns"),
            Unit::Micros => f.write_str("us"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentResult {
    pub label: &'static str,
    pub unit: Unit,
    pub samples: usize,
    pub median_ns: f64,
    pub mean_ns: f64,
}

impl ExperimentResult {
    /// Consumes the samples; they are not kept past this point.
    pub fn from_samples(label: &'static str, unit: Unit, mut samples: Samples) -> Self {
        let mean_ns = samples.mean();
        let median_ns = samples.median();
        Self {
            label,
            unit,
            samples: samples.len(),
            median_ns,
            mean_ns,
        }
    }
}

impl fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let median = self.unit.scale(self.median_ns);
        let mean = self.unit.scale(self.mean_ns);
        match self.unit {
            Unit::Nanos => write!(
                f,
                "  {:<44} median={:7.1} {u}   mean={:7.1} {u}",
                self.label,
                median,
                mean,
                u = self.unit
            ),
            Unit::Micros => write!(
                f,
                "  {:<44} median={:7.2} {u}   mean={:7.2} {u}",
                self.label,
                median,
                mean,
                u = self.unit
            ),
        }
    }
}

/// Line-oriented writer for the results stream.
pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self, path: &str, size: u64) -> Result<()> {
        writeln!(self.out, "device: {}  ({:.1} GB)\n", path, size as f64 / 1e9)?;
        Ok(())
    }

    pub fn result(&mut self, result: &ExperimentResult) -> Result<()> {
        writeln!(self.out, "{result}")?;
        Ok(())
    }

    /// Flushed immediately since the fill that follows can take minutes.
    pub fn filling(&mut self, bytes: u64) -> Result<()> {
        writeln!(
            self.out,
            "  filling {:.1} GB of page cache from device...",
            bytes as f64 / 1e9
        )?;
        self.out.flush()?;
        Ok(())
    }

    pub fn sink(&mut self, value: u8) -> Result<()> {
        writeln!(self.out, "\n(sink={value})")?;
        self.out.flush()?;
        Ok(())
    }
}
