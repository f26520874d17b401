use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::api::FetchError;
use crate::cache::DetailCache;
use crate::data::DetailService;
use crate::model::{CacheKey, SharedDetail, VideoDetail};

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Foreground,
    Prefetch,
}

#[derive(Debug)]
pub enum Request {
    Cached(SharedDetail),
    Started,
    Joined,
}

/// Raw result of one network call, as sent back by a fetch thread.
#[derive(Debug)]
pub struct FetchOutcome {
    ticket: u64,
    key: CacheKey,
    result: Result<VideoDetail, FetchError>,
}

/// A finished fetch after the loader has applied it to the cache.
#[derive(Debug)]
pub struct Completion {
    pub key: CacheKey,
    /// Whether a foreground switch was waiting on this fetch.
    pub foreground: bool,
    pub result: Result<SharedDetail, FetchError>,
}

struct InFlight {
    ticket: u64,
    state: Arc<AtomicU8>,
    foreground: bool,
    pooled: bool,
}

struct Job {
    ticket: u64,
    key: CacheKey,
    state: Arc<AtomicU8>,
}

struct Inner {
    service: Arc<dyn DetailService>,
    outcomes: Sender<FetchOutcome>,
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        if job
            .state
            .compare_exchange(QUEUED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::trace!(key = %job.key, "skipping cancelled prefetch");
            return;
        }
        self.run(job.ticket, job.key);
    }

    fn run(&self, ticket: u64, key: CacheKey) {
        let result = self.service.detail(&key);
        let _ = self.outcomes.send(FetchOutcome {
            ticket,
            key,
            result,
        });
    }
}

/// Shared, de-duplicated path for detail fetches. A prefetch and a
/// foreground switch for the same key collapse into one network call.
/// Prefetches queue on a small worker pool; foreground fetches get their
/// own thread so they never wait behind prefetches. Outcomes are applied on
/// the caller's thread by [`DetailLoader::complete`].
pub struct DetailLoader {
    inner: Arc<Inner>,
    cache: DetailCache,
    in_flight: HashMap<CacheKey, InFlight>,
    next_ticket: u64,
    outcomes: Receiver<FetchOutcome>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl DetailLoader {
    pub fn new(service: Arc<dyn DetailService>, cache: DetailCache, workers: usize) -> Self {
        let workers = if workers == 0 { 2 } else { workers };
        let (outcome_tx, outcome_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            service,
            outcomes: outcome_tx,
        });

        let mut handles = Vec::new();
        for _ in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Self {
            inner,
            cache,
            in_flight: HashMap::new(),
            next_ticket: 1,
            outcomes: outcome_rx,
            jobs: job_tx,
            stop: stop_tx,
            handles,
        }
    }

    pub fn cache(&self) -> &DetailCache {
        &self.cache
    }

    pub fn outcomes(&self) -> &Receiver<FetchOutcome> {
        &self.outcomes
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Serves `key` from the cache, joins a fetch already in flight, or
    /// issues a new one.
    pub fn request(&mut self, key: &CacheKey, origin: Origin) -> Request {
        if let Some(detail) = self.cache.get(key) {
            return Request::Cached(detail);
        }

        if let Some(entry) = self.in_flight.get_mut(key) {
            if origin == Origin::Foreground && !entry.foreground {
                let claimed = entry.pooled
                    && entry
                        .state
                        .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok();
                if !claimed {
                    entry.foreground = true;
                    tracing::debug!(%key, "foreground joined running prefetch");
                    return Request::Joined;
                }
                tracing::debug!(%key, "promoting queued prefetch to foreground");
                self.in_flight.remove(key);
            } else {
                return Request::Joined;
            }
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let state = Arc::new(AtomicU8::new(QUEUED));

        match origin {
            Origin::Foreground => {
                state.store(STARTED, Ordering::SeqCst);
                let inner = self.inner.clone();
                let thread_key = key.clone();
                thread::spawn(move || inner.run(ticket, thread_key));
                tracing::debug!(%key, ticket, "foreground fetch started");
            }
            Origin::Prefetch => {
                let job = Job {
                    ticket,
                    key: key.clone(),
                    state: state.clone(),
                };
                let _ = self.jobs.send(job);
                tracing::debug!(%key, ticket, "prefetch queued");
            }
        }

        self.in_flight.insert(
            key.clone(),
            InFlight {
                ticket,
                state,
                foreground: origin == Origin::Foreground,
                pooled: origin == Origin::Prefetch,
            },
        );
        Request::Started
    }

    /// Cancels queued advisory fetches whose key fails `keep`. Fetches that
    /// already hit the network, or that a foreground switch waits on, are
    /// left alone.
    pub fn cancel_queued(&mut self, keep: impl Fn(&CacheKey) -> bool) -> usize {
        let mut cancelled = Vec::new();
        for (key, entry) in &self.in_flight {
            if entry.foreground || !entry.pooled || keep(key) {
                continue;
            }
            if entry
                .state
                .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                cancelled.push(key.clone());
            }
        }
        for key in &cancelled {
            self.in_flight.remove(key);
        }
        cancelled.len()
    }

    /// Applies a raw outcome: clears the in-flight entry and stores usable
    /// details. Returns `None` for outcomes of superseded tickets.
    pub fn complete(&mut self, outcome: FetchOutcome) -> Option<Completion> {
        let FetchOutcome {
            ticket,
            key,
            result,
        } = outcome;

        match self.in_flight.get(&key) {
            Some(entry) if entry.ticket == ticket => {}
            _ => {
                tracing::trace!(%key, ticket, "ignoring superseded fetch outcome");
                return None;
            }
        }
        let entry = self.in_flight.remove(&key)?;

        let result = match result {
            Ok(detail) if detail.is_usable() => {
                if !self.cache.has(&key) {
                    self.cache.set(key.clone(), detail);
                }
                match self.cache.get(&key) {
                    Some(shared) => Ok(shared),
                    None => Err(FetchError::Failure("detail evicted before use".into())),
                }
            }
            Ok(_) => Err(FetchError::EmptyDetail),
            Err(err) => Err(err),
        };

        Some(Completion {
            key,
            foreground: entry.foreground,
            result,
        })
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for DetailLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
