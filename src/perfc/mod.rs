// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Near-zero-overhead performance counters.
//!
//! A counter set is a named group of counters registered in a [`DataTree`]
//! at `/data/perfc/<group>/<family>/<set>`. The hot path is an atomic add
//! to a per-CPU cache line; everything readable (rates, histograms,
//! averages) is computed at emission time.
//!
//! Counters carry a level and a set carries a priority; a counter whose
//! level exceeds the set priority has its bitmap bit clear and all of its
//! operations are no-ops.

/// Latency interval buckets used by distribution counters.
pub mod ivl;

use crate::{
    clock,
    data_tree::{DataTree, DtElement},
    Error, Result,
};
use ivl::{LatencyIvl, PERFC_IVL_MAX};
use serde_json::{json, Value};
use std::sync::{
    atomic::{AtomicU64, Ordering::Relaxed},
    Arc, Mutex,
};

/// Distribution bucket groups (threads spread over these)
pub const PERFC_GRP_MAX: usize = 4;

/// Per-counter value stripes (one cache line each)
pub const PERFC_VALPERCNT: usize = 4;

/// Value cells per cache line
pub const PERFC_VALPERCPU: usize = 4;

/// Denominator of the scaled sample percentage
pub const PERFC_PCT_SCALE: u64 = 1024;

/// Lowest counter level
pub const PERFC_LEVEL_MIN: u8 = 0;

/// Default set priority
pub const PERFC_LEVEL_DEFAULT: u8 = 2;

/// Highest counter level
pub const PERFC_LEVEL_MAX: u8 = 9;

/// Most counters a single set may hold (bitmap is one u64)
pub const PERFC_CTRS_MAX: usize = 64;

/// Root of the counter subtree in the data tree
pub const PERFC_ROOT_PATH: &str = "/data/perfc";

/// Shape of a counter
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CounterKind {
    /// Monotone add/sub count
    Basic,

    /// Basic plus a prior sample, emitting an ops/sec rate
    Rate,

    /// Sum + hit count, no histogram
    SimpleLatency,

    /// Histogram of sampled durations
    Latency,

    /// Histogram of arbitrary sampled values
    Distribution,
}

impl CounterKind {
    fn name(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Rate => "Rate",
            Self::SimpleLatency => "SimpleLatency",
            Self::Latency => "Latency",
            Self::Distribution => "Distribution",
        }
    }

    fn is_distribution(self) -> bool {
        matches!(self, Self::Latency | Self::Distribution)
    }
}

/// Declaration of one counter inside a set
#[derive(Clone)]
pub struct CounterDef {
    /// Counter shape
    pub kind: CounterKind,

    /// Short name, unique inside the set
    pub name: &'static str,

    /// Column header for tabular display
    pub header: &'static str,

    /// Human-readable description
    pub description: &'static str,

    /// Enablement level (counter active iff `level <= set priority`)
    pub level: u8,

    /// Sampling percentage for distribution kinds (0..=100)
    pub sample_pct: u8,

    /// Bucket bounds for distribution kinds; `None` uses the default vector
    pub ivl: Option<Arc<LatencyIvl>>,
}

impl CounterDef {
    /// A counter definition with the given kind and name, level
    /// [`PERFC_LEVEL_DEFAULT`], full sampling, default bounds.
    #[must_use]
    pub fn new(kind: CounterKind, name: &'static str) -> Self {
        Self {
            kind,
            name,
            header: name,
            description: name,
            level: PERFC_LEVEL_DEFAULT,
            sample_pct: 100,
            ivl: None,
        }
    }

    /// Sets the enablement level.
    #[must_use]
    pub fn level(mut self, level: u8) -> Self {
        self.level = level.clamp(PERFC_LEVEL_MIN, PERFC_LEVEL_MAX);
        self
    }
}

struct Cell {
    vadd: AtomicU64,
    vsub: AtomicU64,
}

impl Cell {
    fn new() -> Self {
        Self {
            vadd: AtomicU64::new(0),
            vsub: AtomicU64::new(0),
        }
    }
}

// One cache line of value cells; a counter stripe owns the first cell of
// its line so concurrent threads never share a line
#[repr(align(64))]
struct CellLine {
    cells: [Cell; PERFC_VALPERCPU],
}

impl CellLine {
    fn new() -> Self {
        Self {
            cells: [Cell::new(), Cell::new(), Cell::new(), Cell::new()],
        }
    }
}

struct ValBlock {
    lines: [CellLine; PERFC_VALPERCNT],
}

impl ValBlock {
    fn new() -> Self {
        Self {
            lines: [
                CellLine::new(),
                CellLine::new(),
                CellLine::new(),
                CellLine::new(),
            ],
        }
    }

    #[allow(clippy::indexing_slicing)]
    fn cell(&self) -> &Cell {
        &self.lines[cpu_id() % PERFC_VALPERCNT].cells[0]
    }

    // Sum must stride line by line; cells 1..VALPERCPU of each line are
    // the padding that keeps stripes on distinct lines
    fn sum(&self) -> (u64, u64) {
        let mut vadd = 0;
        let mut vsub = 0;

        for line in &self.lines {
            #[allow(clippy::indexing_slicing)]
            let cell = &line.cells[0];
            vadd += cell.vadd.load(Relaxed);
            vsub += cell.vsub.load(Relaxed);
        }

        (vadd, vsub)
    }
}

struct Bucket {
    vadd: AtomicU64,
    hits: AtomicU64,
}

#[repr(align(64))]
struct BucketGroup {
    buckets: Vec<Bucket>, // IVL_MAX + 1 cells
}

struct DisCounter {
    groups: Vec<BucketGroup>, // GRP_MAX groups
    min: AtomicU64,
    max: AtomicU64,
    pct_scaled: u64,
    ivl: Arc<LatencyIvl>,
}

impl DisCounter {
    fn new(sample_pct: u8, ivl: Arc<LatencyIvl>) -> Self {
        let groups = (0..PERFC_GRP_MAX)
            .map(|_| BucketGroup {
                buckets: (0..=PERFC_IVL_MAX)
                    .map(|_| Bucket {
                        vadd: AtomicU64::new(0),
                        hits: AtomicU64::new(0),
                    })
                    .collect(),
            })
            .collect();

        Self {
            groups,
            min: AtomicU64::new(0),
            max: AtomicU64::new(0),
            pct_scaled: u64::from(sample_pct.min(100)) * PERFC_PCT_SCALE / 100,
            ivl,
        }
    }

    fn record(&self, sample: u64) {
        self.max.fetch_max(sample, Relaxed);
        let _ = self
            .min
            .fetch_update(Relaxed, Relaxed, |cur| {
                (cur == 0 || sample < cur).then_some(sample)
            });

        let bucket_idx = self.ivl.bucket(sample);

        if let Some(bucket) = self
            .groups
            .get(cpu_id() % PERFC_GRP_MAX)
            .and_then(|g| g.buckets.get(bucket_idx))
        {
            bucket.vadd.fetch_add(sample, Relaxed);
            bucket.hits.fetch_add(1, Relaxed);
        }
    }

    // (value sum, hit count) of bucket `i` across all groups
    fn bucket_sum(&self, i: usize) -> (u64, u64) {
        let mut vadd = 0;
        let mut hits = 0;

        for group in &self.groups {
            if let Some(bucket) = group.buckets.get(i) {
                vadd += bucket.vadd.load(Relaxed);
                hits += bucket.hits.load(Relaxed);
            }
        }

        (vadd, hits)
    }
}

#[derive(Default)]
struct RateSample {
    time_ns: u64,
    value: u64,
}

enum Storage {
    Basic(ValBlock),
    Rate {
        val: ValBlock,
        prior: Mutex<RateSample>,
    },
    SimpleLatency(ValBlock),
    Dis(DisCounter),
}

struct Counter {
    kind: CounterKind,
    name: &'static str,
    header: &'static str,
    description: &'static str,
    level: u8,
    storage: Storage,
}

struct SetInner {
    path: String,
    set_name: String,
    bitmap: u64,
    counters: Vec<Counter>,
}

impl SetInner {
    #[allow(clippy::cast_precision_loss)]
    fn emit_counter(&self, cidx: usize, ctr: &Counter) -> Result<Value> {
        let enabled = (self.bitmap >> cidx) & 1;

        let mut obj = serde_json::Map::new();
        obj.insert("name".into(), ctr.name.into());
        obj.insert("header".into(), ctr.header.into());
        obj.insert("description".into(), ctr.description.into());
        obj.insert("type".into(), ctr.kind.name().into());
        obj.insert("level".into(), ctr.level.into());
        obj.insert("enabled".into(), enabled.into());

        match &ctr.storage {
            Storage::Basic(val) => {
                let (vadd, vsub) = val.sum();
                obj.insert("value".into(), vadd.saturating_sub(vsub).into());
            }

            Storage::Rate { val, prior } => {
                let now_ns = clock::monotonic_ns();
                let (vadd, vsub) = val.sum();
                let curr = vadd.saturating_sub(vsub);

                #[allow(clippy::expect_used)]
                let mut prior = prior.lock().expect("lock is poisoned");

                let dt = if prior.time_ns == 0 || now_ns < prior.time_ns {
                    0
                } else {
                    now_ns - prior.time_ns
                };
                let prev = prior.value;

                prior.time_ns = now_ns;
                prior.value = curr;

                let dx = curr.saturating_sub(prev);
                let ops = if dt > 0 {
                    (u128::from(dx) * 1_000_000_000 / u128::from(dt)) as u64
                } else {
                    0
                };

                obj.insert("delta_ns".into(), dt.into());
                obj.insert("current".into(), curr.into());
                obj.insert("previous".into(), prev.into());
                obj.insert("rate".into(), ops.into());

                if vsub > 0 {
                    obj.insert("vadd".into(), vadd.into());
                    obj.insert("vsub".into(), vsub.into());
                } else {
                    obj.insert("vadd".into(), Value::Null);
                    obj.insert("vsub".into(), Value::Null);
                }
            }

            Storage::SimpleLatency(val) => {
                let (vadd, vsub) = val.sum();
                obj.insert("sum".into(), vadd.into());
                obj.insert("hits".into(), vsub.into());
            }

            Storage::Dis(dis) => {
                let mut histogram = Vec::with_capacity(dis.ivl.bound_count() + 1);
                let mut samples = 0u64;
                let mut sum = 0u64;
                let mut boundary = 0u64;

                for i in 0..=dis.ivl.bound_count() {
                    let (vadd, hits) = dis.bucket_sum(i);
                    let avg = if hits > 0 { vadd / hits } else { 0 };

                    histogram.push(json!({
                        "hits": hits,
                        "average": avg,
                        "boundary": boundary,
                    }));

                    if let Some(bound) = dis.ivl.bounds().get(i) {
                        boundary = *bound;
                    }
                    samples += hits;
                    sum += vadd;
                }

                let avg = if samples > 0 { sum / samples } else { 0 };

                obj.insert("histogram".into(), Value::Array(histogram));
                obj.insert("minimum".into(), dis.min.load(Relaxed).into());
                obj.insert("maximum".into(), dis.max.load(Relaxed).into());
                obj.insert("average".into(), avg.into());

                // field names shared with simple latency counters
                obj.insert("sum".into(), sum.into());
                obj.insert("hits".into(), samples.max(1).into());
                obj.insert(
                    "percentage".into(),
                    (dis.pct_scaled as f64 * 100.0 / PERFC_PCT_SCALE as f64).into(),
                );
            }
        }

        Ok(Value::Object(obj))
    }
}

impl DtElement for SetInner {
    fn emit(&self) -> Result<Value> {
        let mut counters = Vec::with_capacity(self.counters.len());

        // any single counter emission failure fails the whole set
        for (cidx, ctr) in self.counters.iter().enumerate() {
            counters.push(self.emit_counter(cidx, ctr)?);
        }

        Ok(json!({
            "path": self.path,
            "name": self.set_name,
            "enabled": self.bitmap,
            "counters": counters,
        }))
    }
}

/// A registered counter set instance
///
/// Cloning the handle is cheap; all clones address the same cells.
#[derive(Clone)]
pub struct CounterSet {
    inner: Arc<SetInner>,
}

impl CounterSet {
    /// Allocates a counter set and registers it in `tree` at
    /// `/data/perfc/<group>/<family>/<set_name>`.
    ///
    /// A counter is enabled iff its level is at most `prio`.
    ///
    /// # Errors
    ///
    /// - `BadArgument` for an empty or oversized definition list, or an
    ///   overlong path
    /// - `Exists` if the path is already registered
    ///
    /// Either failure leaves no partial registration behind.
    pub fn alloc(
        tree: &DataTree,
        prio: u8,
        group: &str,
        family: &str,
        set_name: &str,
        defs: &[CounterDef],
    ) -> Result<Self> {
        if defs.is_empty() || defs.len() > PERFC_CTRS_MAX {
            return Err(Error::BadArgument("bad counter count"));
        }

        let path = format!("{PERFC_ROOT_PATH}/{group}/{family}/{set_name}");

        let mut bitmap = 0u64;
        let mut counters = Vec::with_capacity(defs.len());

        for (cidx, def) in defs.iter().enumerate() {
            let level = def.level.clamp(PERFC_LEVEL_MIN, PERFC_LEVEL_MAX);

            if level <= prio {
                bitmap |= 1 << cidx;
            }

            let storage = match def.kind {
                CounterKind::Basic => Storage::Basic(ValBlock::new()),
                CounterKind::Rate => Storage::Rate {
                    val: ValBlock::new(),
                    prior: Mutex::new(RateSample::default()),
                },
                CounterKind::SimpleLatency => Storage::SimpleLatency(ValBlock::new()),
                CounterKind::Latency | CounterKind::Distribution => {
                    let ivl = def.ivl.clone().unwrap_or_else(ivl::default_ivl);
                    Storage::Dis(DisCounter::new(def.sample_pct, ivl))
                }
            };

            counters.push(Counter {
                kind: def.kind,
                name: def.name,
                header: def.header,
                description: def.description,
                level,
                storage,
            });
        }

        let inner = Arc::new(SetInner {
            path: path.clone(),
            set_name: set_name.into(),
            bitmap,
            counters,
        });

        tree.add(&path, inner.clone())?;

        Ok(Self { inner })
    }

    /// Unregisters the set; the tree drops its ownership of the cells.
    pub fn free(self, tree: &DataTree) {
        if let Err(e) = tree.remove(&self.inner.path) {
            log::warn!("could not remove counter set {}: {e}", self.inner.path);
        }
    }

    /// The set's data tree path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Bitmap of enabled counters.
    #[must_use]
    pub fn bitmap(&self) -> u64 {
        self.inner.bitmap
    }

    /// Returns `true` if counter `cidx` is enabled.
    #[must_use]
    pub fn is_on(&self, cidx: usize) -> bool {
        (self.inner.bitmap >> cidx) & 1 == 1
    }

    fn val_block(&self, cidx: usize) -> Option<&ValBlock> {
        if !self.is_on(cidx) {
            return None;
        }

        match self.inner.counters.get(cidx).map(|c| &c.storage) {
            Some(Storage::Basic(val) | Storage::Rate { val, .. } | Storage::SimpleLatency(val)) => {
                Some(val)
            }
            _ => None,
        }
    }

    fn dis(&self, cidx: usize, kind: CounterKind) -> Option<&DisCounter> {
        if !self.is_on(cidx) {
            return None;
        }

        match self.inner.counters.get(cidx) {
            Some(Counter {
                kind: k,
                storage: Storage::Dis(dis),
                ..
            }) if *k == kind => Some(dis),
            _ => None,
        }
    }

    /// Adds `value` to a basic or rate counter.
    #[inline]
    pub fn add(&self, cidx: usize, value: u64) {
        if let Some(val) = self.val_block(cidx) {
            val.cell().vadd.fetch_add(value, Relaxed);
        }
    }

    /// Adds 1 to a basic or rate counter.
    #[inline]
    pub fn inc(&self, cidx: usize) {
        self.add(cidx, 1);
    }

    /// Subtracts `value` from a basic or rate counter.
    #[inline]
    pub fn sub(&self, cidx: usize, value: u64) {
        if let Some(val) = self.val_block(cidx) {
            val.cell().vsub.fetch_add(value, Relaxed);
        }
    }

    /// Subtracts 1 from a basic or rate counter.
    #[inline]
    pub fn dec(&self, cidx: usize) {
        self.sub(cidx, 1);
    }

    /// Records one sample into a simple latency counter.
    #[inline]
    pub fn sl_record(&self, cidx: usize, sample_ns: u64) {
        if let Some(val) = self.val_block(cidx) {
            let cell = val.cell();
            cell.vadd.fetch_add(sample_ns, Relaxed);
            cell.vsub.fetch_add(1, Relaxed);
        }
    }

    /// Takes the start stamp for a latency measurement.
    #[must_use]
    pub fn lat_start(&self) -> u64 {
        clock::monotonic_ns()
    }

    /// Records the elapsed time since `start_ns` into a latency counter.
    ///
    /// Lossy by design: the start stamp doubles as the sampling draw.
    #[inline]
    pub fn lat_record(&self, cidx: usize, start_ns: u64) {
        if let Some(dis) = self.dis(cidx, CounterKind::Latency) {
            if start_ns % PERFC_PCT_SCALE < dis.pct_scaled {
                dis.record(clock::monotonic_ns().saturating_sub(start_ns));
            }
        }
    }

    /// Records `value` into a distribution counter.
    ///
    /// Lossy by design: a thread-local PRNG draw decides whether the
    /// sample is kept.
    #[inline]
    pub fn dis_record(&self, cidx: usize, value: u64) {
        if let Some(dis) = self.dis(cidx, CounterKind::Distribution) {
            if rand::random::<u64>() % PERFC_PCT_SCALE < dis.pct_scaled {
                dis.record(value);
            }
        }
    }

    /// Point-in-time `(vadd, vsub)` sums of a value-cell counter.
    #[must_use]
    pub fn read(&self, cidx: usize) -> (u64, u64) {
        self.val_block(cidx).map_or((0, 0), ValBlock::sum)
    }
}

#[cfg(target_os = "linux")]
fn cpu_id() -> usize {
    #[expect(unsafe_code, reason = "raw getcpu syscall wrapper, no memory involved")]
    let cpu = unsafe { libc::sched_getcpu() };

    usize::try_from(cpu).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn cpu_id() -> usize {
    use std::sync::atomic::AtomicUsize;

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    thread_local! {
        static STRIPE: usize = NEXT.fetch_add(1, Relaxed);
    }

    STRIPE.with(|s| *s)
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::data_tree::DataTree;
    use test_log::test;

    fn basic_defs() -> Vec<CounterDef> {
        vec![
            CounterDef::new(CounterKind::Basic, "ops"),
            CounterDef::new(CounterKind::Rate, "throughput"),
            CounterDef::new(CounterKind::SimpleLatency, "simple"),
            CounterDef::new(CounterKind::Latency, "latency"),
            CounterDef::new(CounterKind::Distribution, "sizes"),
        ]
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn basic_counter_sums_across_threads() {
        let tree = DataTree::new();
        let set = CounterSet::alloc(&tree, 9, "kvdb", "TEST", "basic_sum", &basic_defs()).unwrap();

        let handles = (0..4)
            .map(|_| {
                let set = set.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        set.add(0, 3);
                        set.sub(0, 1);
                    }
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        let (vadd, vsub) = set.read(0);
        assert_eq!(12_000, vadd);
        assert_eq!(4_000, vsub);

        let emitted = tree.emit(set.path()).unwrap();
        let ctr = &emitted[0]["counters"][0];
        assert_eq!(8_000, ctr["value"].as_u64().unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn level_gating_disables_ops() {
        let tree = DataTree::new();

        let defs = vec![
            CounterDef::new(CounterKind::Basic, "cheap").level(1),
            CounterDef::new(CounterKind::Basic, "costly").level(8),
        ];

        let set = CounterSet::alloc(&tree, 2, "kvdb", "TEST", "gating", &defs).unwrap();

        assert_eq!(0b01, set.bitmap());

        set.inc(0);
        set.inc(1);

        assert_eq!((1, 0), set.read(0));
        assert_eq!((0, 0), set.read(1));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn rate_counter_reports_ops_per_sec() {
        let tree = DataTree::new();
        let set = CounterSet::alloc(&tree, 9, "kvdb", "TEST", "rate", &basic_defs()).unwrap();

        let t0 = 1_000_000_000u64;

        clock::set_monotonic_ns_for_test(Some(t0));
        set.add(1, 100);

        let _ = tree.emit(set.path()).unwrap();

        clock::set_monotonic_ns_for_test(Some(t0 + 1_000_000_000));
        set.add(1, 200);

        let emitted = tree.emit(set.path()).unwrap();
        clock::set_monotonic_ns_for_test(None);

        let ctr = &emitted[0]["counters"][1];
        assert_eq!(1_000_000_000, ctr["delta_ns"].as_u64().unwrap());
        assert_eq!(300, ctr["current"].as_u64().unwrap());
        assert_eq!(100, ctr["previous"].as_u64().unwrap());
        assert_eq!(200, ctr["rate"].as_u64().unwrap());
        assert!(ctr["vadd"].is_null());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn latency_histogram_boundary_landing() {
        let tree = DataTree::new();

        let ivl = LatencyIvl::new(&[100, 200, 400]).unwrap();
        let defs = vec![CounterDef {
            ivl: Some(ivl),
            ..CounterDef::new(CounterKind::Distribution, "dist")
        }];

        let set = CounterSet::alloc(&tree, 9, "kvdb", "TEST", "boundary", &defs).unwrap();

        // sample equal to bound[1] must land in bucket 2
        set.dis_record(0, 200);

        let emitted = tree.emit(set.path()).unwrap();
        let histogram = emitted[0]["counters"][0]["histogram"].as_array().unwrap();

        assert_eq!(4, histogram.len());
        assert_eq!(0, histogram[1]["hits"].as_u64().unwrap());
        assert_eq!(1, histogram[2]["hits"].as_u64().unwrap());
        assert_eq!(200, histogram[2]["average"].as_u64().unwrap());
        assert_eq!(200, histogram[2]["boundary"].as_u64().unwrap());

        let ctr = &emitted[0]["counters"][0];
        assert_eq!(200, ctr["minimum"].as_u64().unwrap());
        assert_eq!(200, ctr["maximum"].as_u64().unwrap());
        assert_eq!(1, ctr["hits"].as_u64().unwrap());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn registration_conflict_cleans_up() {
        let tree = DataTree::new();

        let set =
            CounterSet::alloc(&tree, 9, "kvdb", "TEST", "conflict", &basic_defs()).unwrap();

        assert!(matches!(
            CounterSet::alloc(&tree, 9, "kvdb", "TEST", "conflict", &basic_defs()),
            Err(Error::Exists)
        ));

        set.free(&tree);
        assert!(tree.find("/data/perfc/kvdb/TEST/conflict").is_none());
    }
}
