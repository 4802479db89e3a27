//! Page-based value swap subsystem (C15, §4.8): a bitmap-allocated backing
//! file, a worker pool, and strict main-thread-only state transitions.
//! Workers never touch the database directly — they produce completions on
//! a channel that the event loop drains on its pipe-readable event, exactly
//! the handoff discipline §4.8 and §9 ("Worker handoff") require.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use crate::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Memory,
    Swapping,
    Swapped,
    Loading,
}

/// Swap metadata living alongside a value's entry (§3: "optional swap
/// fields"), kept out of `Value` itself so fully in-memory configurations
/// never allocate it.
#[derive(Debug, Clone)]
pub struct SwapMeta {
    pub storage: Storage,
    pub swap_pages: Vec<u32>,
    pub swap_type: Option<ValueType>,
    pub atime: i64,
    /// Set once a job is in flight so a second submission against the same
    /// key is rejected (§3 invariant: "exactly one in-flight I/O job").
    pub job_id: Option<u64>,
}

impl SwapMeta {
    pub fn resident(atime: i64) -> Self {
        Self {
            storage: Storage::Memory,
            swap_pages: Vec::new(),
            swap_type: None,
            atime,
            job_id: None,
        }
    }
}

/// A fixed-size bitmap over `page_count` pages, each `page_size` bytes, in
/// the backing swap file (§6 "Swap file: raw page pool; no header").
pub struct PageBitmap {
    used: Vec<bool>,
    page_size: usize,
}

impl PageBitmap {
    pub fn new(page_count: usize, page_size: usize) -> Self {
        Self {
            used: vec![false; page_count],
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reserves `count` contiguous-or-not free pages; returns `None` if the
    /// pool is exhausted.
    pub fn reserve(&mut self, count: usize) -> Option<Vec<u32>> {
        let mut pages = Vec::with_capacity(count);
        for (i, used) in self.used.iter().enumerate() {
            if !used {
                pages.push(i as u32);
                if pages.len() == count {
                    for &p in &pages {
                        self.used[p as usize] = true;
                    }
                    return Some(pages);
                }
            }
        }
        None
    }

    /// Returns previously reserved pages to the free pool — used both on
    /// normal free and on cancelling a `DO_SWAP` job (§4.8 "Cancellation").
    pub fn release(&mut self, pages: &[u32]) {
        for &p in pages {
            self.used[p as usize] = false;
        }
    }

    pub fn pages_needed(&self, byte_len: usize) -> usize {
        byte_len.div_ceil(self.page_size).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Load,
    PrepareSwap,
    DoSwap,
}

pub struct Job {
    pub id: u64,
    pub kind: JobKind,
    pub key: Vec<u8>,
    pub cancelled: Arc<Mutex<bool>>,
    /// `PrepareSwap` carries the value to be encoded off the main thread.
    pub value: Option<Value>,
    /// `DoSwap` carries the already-encoded bytes from the `Prepared`
    /// completion; `Load` leaves this empty until the worker fills it in.
    pub payload: Vec<u8>,
    /// Pages to read (`Load`) or write (`DoSwap`); empty for `PrepareSwap`,
    /// which only sizes the payload.
    pub pages: Vec<u32>,
    pub value_type: Option<ValueType>,
}

pub enum JobCompletion {
    Loaded { id: u64, key: Vec<u8>, value: Value },
    Prepared { id: u64, key: Vec<u8>, pages_needed: usize, payload: Vec<u8>, value_type: ValueType },
    Swapped { id: u64, key: Vec<u8>, pages: Vec<u32>, value_type: ValueType },
    Cancelled { id: u64, key: Vec<u8> },
}

/// The main-thread side of the worker pool: owns the completion channel and
/// hands out cancellation flags so the main thread can mark a job ignored
/// without synchronizing with a worker mid-flight (§4.8 "Cancellation").
pub struct SwapCoordinator {
    pub bitmap: PageBitmap,
    next_job_id: u64,
    completions_tx: Sender<JobCompletion>,
    pub completions_rx: Receiver<JobCompletion>,
    in_flight: std::collections::HashMap<u64, Arc<Mutex<bool>>>,
}

impl SwapCoordinator {
    pub fn new(page_count: usize, page_size: usize) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            bitmap: PageBitmap::new(page_count, page_size),
            next_job_id: 1,
            completions_tx: tx,
            completions_rx: rx,
            in_flight: std::collections::HashMap::new(),
        }
    }

    pub fn completions_sender(&self) -> Sender<JobCompletion> {
        self.completions_tx.clone()
    }

    /// Allocates a job id and cancellation flag; the caller dispatches the
    /// actual work onto a worker thread/pool and keeps the `Job`.
    pub fn new_job(&mut self, kind: JobKind, key: Vec<u8>) -> Job {
        let id = self.next_job_id;
        self.next_job_id += 1;
        let flag = Arc::new(Mutex::new(false));
        self.in_flight.insert(id, flag.clone());
        Job { id, kind, key, cancelled: flag, value: None, payload: Vec::new(), pages: Vec::new(), value_type: None }
    }

    /// Cancels a job synchronously. Per §4.8, if it already completed this
    /// is a no-op from the bitmap's perspective — the completion handler
    /// checks the flag and discards the result instead.
    pub fn cancel(&mut self, job_id: u64) {
        if let Some(flag) = self.in_flight.get(&job_id) {
            *flag.lock().unwrap() = true;
        }
    }

    pub fn forget(&mut self, job_id: u64) {
        self.in_flight.remove(&job_id);
    }

    /// Drains up to `max` completions (§4.8: "processes up to 1% of the
    /// completion queue per wake" — `max` is the caller-computed budget).
    pub fn drain_completions(&mut self, max: usize) -> Vec<JobCompletion> {
        let mut out = Vec::new();
        for _ in 0..max {
            match self.completions_rx.try_recv() {
                Ok(c) => out.push(c),
                Err(_) => break,
            }
        }
        out
    }
}

/// Owns the backing file and the worker threads that actually touch it.
/// `SwapCoordinator` stays main-thread-only bookkeeping; this is the part
/// of §4.8 that crosses a thread boundary.
pub struct SwapRuntime {
    pub coordinator: SwapCoordinator,
    job_tx: Sender<Job>,
    job_db: HashMap<u64, usize>,
    page_size: usize,
    _workers: Vec<JoinHandle<()>>,
}

impl SwapRuntime {
    /// Opens (creating if absent) the swap file, sizes it to hold
    /// `page_count` pages of `page_size` bytes, and starts `num_workers`
    /// worker threads sharing one job queue (§6 "Swap file").
    pub fn spawn(swap_file: &Path, page_count: usize, page_size: usize, num_workers: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(swap_file)?;
        file.set_len((page_count as u64) * (page_size as u64))?;
        let file = Arc::new(Mutex::new(file));

        let coordinator = SwapCoordinator::new(page_count, page_size);
        let completions_tx = coordinator.completions_sender();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..num_workers.max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                let file = file.clone();
                let completions_tx = completions_tx.clone();
                std::thread::spawn(move || run_worker(job_rx, file, completions_tx, page_size))
            })
            .collect();

        Ok(Self { coordinator, job_tx, job_db: HashMap::new(), page_size, _workers: workers })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Hands `job` to a worker and remembers which database it belongs to,
    /// so the completion handler (which only sees a key) knows where to
    /// apply the result.
    pub fn submit(&mut self, job: Job, db_index: usize) {
        self.job_db.insert(job.id, db_index);
        let _ = self.job_tx.send(job);
    }

    pub fn db_of(&self, job_id: u64) -> Option<usize> {
        self.job_db.get(&job_id).copied()
    }

    pub fn forget(&mut self, job_id: u64) {
        self.job_db.remove(&job_id);
        self.coordinator.forget(job_id);
    }
}

fn run_worker(job_rx: Arc<Mutex<Receiver<Job>>>, file: Arc<Mutex<File>>, completions_tx: Sender<JobCompletion>, page_size: usize) {
    loop {
        let job = {
            let rx = match job_rx.lock() {
                Ok(rx) => rx,
                Err(_) => return,
            };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => return,
            }
        };

        if *job.cancelled.lock().unwrap() {
            let _ = completions_tx.send(JobCompletion::Cancelled { id: job.id, key: job.key });
            continue;
        }

        let completion = match job.kind {
            JobKind::Load => match read_pages(&file, &job.pages, page_size)
                .and_then(|bytes| crate::persistence::snapshot::decode_value(&bytes, crate::value::DEFAULT_HASH_MAX_ENTRIES))
            {
                Ok(value) => JobCompletion::Loaded { id: job.id, key: job.key, value },
                Err(_) => JobCompletion::Cancelled { id: job.id, key: job.key },
            },
            JobKind::PrepareSwap => {
                let value = job.value.as_ref().expect("PrepareSwap job always carries a value");
                let payload = crate::persistence::snapshot::encode_value(value);
                let pages_needed = payload.len().div_ceil(page_size).max(1);
                let value_type = value.value_type();
                JobCompletion::Prepared { id: job.id, key: job.key, pages_needed, payload, value_type }
            }
            JobKind::DoSwap => match write_pages(&file, &job.pages, &job.payload, page_size) {
                Ok(()) => JobCompletion::Swapped {
                    id: job.id,
                    key: job.key,
                    pages: job.pages,
                    value_type: job.value_type.expect("DoSwap job always carries a value type"),
                },
                Err(_) => JobCompletion::Cancelled { id: job.id, key: job.key },
            },
        };
        let _ = completions_tx.send(completion);
    }
}

fn read_pages(file: &Arc<Mutex<File>>, pages: &[u32], page_size: usize) -> io::Result<Vec<u8>> {
    let mut f = file.lock().unwrap();
    let mut out = Vec::with_capacity(pages.len() * page_size);
    let mut buf = vec![0u8; page_size];
    for &p in pages {
        f.seek(SeekFrom::Start((p as u64) * (page_size as u64)))?;
        f.read_exact(&mut buf)?;
        out.extend_from_slice(&buf);
    }
    Ok(out)
}

fn write_pages(file: &Arc<Mutex<File>>, pages: &[u32], payload: &[u8], page_size: usize) -> io::Result<()> {
    let mut f = file.lock().unwrap();
    for (i, &p) in pages.iter().enumerate() {
        let start = i * page_size;
        let end = (start + page_size).min(payload.len());
        let mut buf = vec![0u8; page_size];
        if start < payload.len() {
            buf[..end - start].copy_from_slice(&payload[start..end]);
        }
        f.seek(SeekFrom::Start((p as u64) * (page_size as u64)))?;
        f.write_all(&buf)?;
    }
    Ok(())
}

/// Candidate scoring for swap-out eviction (§4.8 "Candidate selection"):
/// higher is a better eviction candidate. The exact formula is explicitly
/// non-normative (§9 Open Questions) — only relative ordering matters.
pub fn candidate_score(age_secs: i64, estimated_size: usize) -> f64 {
    (age_secs.max(0) as f64) * (1.0 + estimated_size as f64).ln()
}

/// Picks the best eviction candidate out of up to `sample_size` random
/// `(key, atime, estimated_size)` tuples already gathered by the caller
/// (the cron samples the dict; scoring itself is pure and testable here).
pub fn pick_candidate(samples: &[(Vec<u8>, i64, usize)], now: i64) -> Option<Vec<u8>> {
    samples
        .iter()
        .map(|(k, atime, size)| (k, candidate_score(now - atime, *size)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(k, _)| k.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_reserve_and_release_round_trip() {
        let mut bm = PageBitmap::new(4, 256);
        let pages = bm.reserve(2).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(bm.reserve(3).is_none());
        bm.release(&pages);
        assert!(bm.reserve(4).is_some());
    }

    #[test]
    fn candidate_scoring_prefers_older_larger_values() {
        let samples = vec![
            (b"new_small".to_vec(), 1, 10),
            (b"old_big".to_vec(), 10_000, 100_000),
        ];
        assert_eq!(pick_candidate(&samples, 20_000), Some(b"old_big".to_vec()));
    }

    #[test]
    fn cancellation_flag_is_observable_after_cancel() {
        let mut coord = SwapCoordinator::new(4, 256);
        let job = coord.new_job(JobKind::Load, b"k".to_vec());
        coord.cancel(job.id);
        assert!(*job.cancelled.lock().unwrap());
    }

    #[test]
    fn prepare_then_swap_then_load_round_trips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = SwapRuntime::spawn(&dir.path().join("swap.bin"), 16, 64, 2).unwrap();

        let mut list = Value::new_list();
        list.push(crate::container::End::Tail, b"hello".to_vec()).unwrap();

        let mut prep = rt.coordinator.new_job(JobKind::PrepareSwap, b"k".to_vec());
        prep.value = Some(list);
        rt.submit(prep, 0);

        let prepared = rt.coordinator.completions_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        let (pages_needed, payload, value_type) = match prepared {
            JobCompletion::Prepared { pages_needed, payload, value_type, .. } => (pages_needed, payload, value_type),
            _ => panic!("expected Prepared"),
        };
        let pages = rt.coordinator.bitmap.reserve(pages_needed).unwrap();

        let mut swap_job = rt.coordinator.new_job(JobKind::DoSwap, b"k".to_vec());
        swap_job.payload = payload;
        swap_job.pages = pages.clone();
        swap_job.value_type = Some(value_type);
        rt.submit(swap_job, 0);
        let swapped = rt.coordinator.completions_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(matches!(swapped, JobCompletion::Swapped { .. }));

        let mut load_job = rt.coordinator.new_job(JobKind::Load, b"k".to_vec());
        load_job.pages = pages;
        rt.submit(load_job, 0);
        let loaded = rt.coordinator.completions_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        match loaded {
            JobCompletion::Loaded { value, .. } => {
                assert_eq!(value.as_list().unwrap().iter().cloned().collect::<Vec<_>>(), vec![b"hello".to_vec()]);
            }
            _ => panic!("expected Loaded"),
        }
    }
}
