/// Page size used for every offset and buffer in the experiments.
pub const PAGE_SIZE: usize = 4096;
/// Number of pages (and samples) per experiment.
pub const PAGE_COUNT: usize = 300;
/// Read size used while filling the page cache.
pub const FILL_CHUNK: usize = 1 << 20;
/// The device must hold at least this many test regions.
pub const MIN_SIZE_FACTOR: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub page_size: usize,
    pub page_count: usize,
    pub fill_chunk: usize,
    pub min_size_factor: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            page_count: PAGE_COUNT,
            fill_chunk: FILL_CHUNK,
            min_size_factor: MIN_SIZE_FACTOR,
        }
    }
}

impl Config {
    /// Size in bytes of the measured window at the start of the device.
    pub fn test_size(&self) -> usize {
        self.page_count * self.page_size
    }

    pub fn min_device_size(&self) -> u64 {
        self.min_size_factor * self.test_size() as u64
    }

    pub fn page_offset(&self, page: usize) -> usize {
        page * self.page_size
    }
}
