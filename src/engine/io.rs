// Asynchronous I/O for the content loaders
//
// Every callback runs on the thread that owns the backend. `ThreadedIo` runs
// blocking fetches on a crossbeam worker pool and hands the responses back
// over a channel; `pump` delivers them. Images are decoded on the workers too,
// so the owning thread only ever sees finished pixels. Cancelling a fetch drops its reply, so
// a cancelled callback can never fire even if the worker finishes later.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;

use super::assets::{ContentError, DecodedImage};
use crate::config::RuntimeConfig;
use crate::core::CancelToken;

/// Raw result of a fetch: HTTP-style status code plus body bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// What a fetch delivers to its reply
pub type Delivery = std::result::Result<Response, ContentError>;

/// Callback receiving a fetch result; errors propagate out of the pump
pub type Reply = Box<dyn FnOnce(Delivery) -> std::result::Result<(), ContentError>>;

/// What an image fetch delivers: pixels already decoded off the loop thread
pub type ImageDelivery = std::result::Result<DecodedImage, ContentError>;

/// Callback receiving a decoded image
pub type ImageReply = Box<dyn FnOnce(ImageDelivery) -> std::result::Result<(), ContentError>>;

/// Task deferred to the next pump
pub type Deferred = Box<dyn FnOnce() -> std::result::Result<(), ContentError>>;

/// The I/O face of the event loop
pub trait IoBackend {
    /// Start fetching `url`; `reply` runs on a later pump unless cancelled
    fn fetch(&self, url: &str, reply: Reply) -> CancelToken;

    /// Start fetching and decoding the image at `url`
    fn fetch_image(&self, url: &str, reply: ImageReply) -> CancelToken;

    /// Run `task` on the next pump
    fn defer(&self, task: Deferred);
}

/// Resolves and performs blocking fetches on worker threads
///
/// `http://` and `https://` URLs go over the network. Anything else is a
/// path relative to the asset root, mapped onto HTTP-style statuses so the
/// loaders treat both the same way.
pub struct Fetcher {
    client: reqwest::blocking::Client,
    asset_root: PathBuf,
}

impl Fetcher {
    /// Create a fetcher from the runtime configuration
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            asset_root: config.asset_root.clone(),
        })
    }

    /// Check whether a URL goes over the network
    pub fn is_remote(url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    /// Get the local path for a non-remote URL
    pub fn resolve_path(&self, url: &str) -> PathBuf {
        let relative = url.strip_prefix("file://").unwrap_or(url);
        self.asset_root.join(relative)
    }

    /// Perform the fetch (blocking)
    pub fn fetch(&self, url: &str) -> Delivery {
        if Self::is_remote(url) {
            self.fetch_remote(url)
        } else {
            Self::fetch_local(url, &self.resolve_path(url))
        }
    }

    fn fetch_remote(&self, url: &str) -> Delivery {
        let network_error = |e: reqwest::Error| ContentError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(network_error)?.to_vec();

        Ok(Response { status, body })
    }

    fn fetch_local(url: &str, path: &Path) -> Delivery {
        match std::fs::read(path) {
            Ok(body) => Ok(Response { status: 200, body }),
            Err(e) => match e.kind() {
                std::io::ErrorKind::NotFound => Ok(Response {
                    status: 404,
                    body: Vec::new(),
                }),
                std::io::ErrorKind::PermissionDenied => Ok(Response {
                    status: 403,
                    body: Vec::new(),
                }),
                _ => Err(ContentError::Network {
                    url: url.to_string(),
                    reason: format!("Failed to read {}: {}", path.display(), e),
                }),
            },
        }
    }
}

type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Bytes,
    Image,
}

struct FetchJob {
    id: JobId,
    url: String,
    kind: JobKind,
}

impl FetchJob {
    /// Fetch, and decode when an image was asked for (blocking)
    fn run(&self, fetcher: &Fetcher) -> Finished {
        let delivery = fetcher.fetch(&self.url);
        match self.kind {
            JobKind::Bytes => Finished::Bytes(delivery),
            JobKind::Image => Finished::Image(DecodedImage::from_delivery(&self.url, delivery)),
        }
    }
}

/// Result sent back from a worker
enum Finished {
    Bytes(Delivery),
    Image(ImageDelivery),
}

/// Reply waiting on the owning thread
enum PendingReply {
    Bytes(Reply),
    Image(ImageReply),
}

impl PendingReply {
    fn kind(&self) -> JobKind {
        match self {
            Self::Bytes(_) => JobKind::Bytes,
            Self::Image(_) => JobKind::Image,
        }
    }

    /// Run the reply, decoding on the spot if the result is still raw bytes
    fn run(self, url: &str, finished: Finished) -> std::result::Result<(), ContentError> {
        match (self, finished) {
            (Self::Bytes(reply), Finished::Bytes(delivery)) => reply(delivery),
            (Self::Image(reply), Finished::Image(delivery)) => reply(delivery),
            (Self::Image(reply), Finished::Bytes(delivery)) => {
                reply(DecodedImage::from_delivery(url, delivery))
            }
            (Self::Bytes(_), Finished::Image(_)) => Err(ContentError::Network {
                url: url.to_string(),
                reason: "Expected raw bytes but received a decoded image".to_string(),
            }),
        }
    }
}

struct IoShared {
    jobs: Sender<FetchJob>,
    finished: Receiver<(JobId, Finished)>,
    pending: RefCell<HashMap<JobId, (String, PendingReply)>>,
    deferred: RefCell<VecDeque<Deferred>>,
    next_id: Cell<JobId>,
}

/// Worker-pool backed `IoBackend`
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct ThreadedIo {
    shared: Rc<IoShared>,
}

impl ThreadedIo {
    /// Spawn the worker pool described by the configuration
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let fetcher = std::sync::Arc::new(Fetcher::new(config)?);
        let (job_tx, job_rx) = unbounded::<FetchJob>();
        let (done_tx, done_rx) = unbounded::<(JobId, Finished)>();

        for worker_id in 0..config.worker_threads.max(1) {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let fetcher = fetcher.clone();

            thread::Builder::new()
                .name(format!("spriggan-io-{}", worker_id))
                .spawn(move || {
                    debug!("I/O worker {} started", worker_id);

                    // Runs until every ThreadedIo handle is gone
                    while let Ok(job) = jobs.recv() {
                        let finished = job.run(&fetcher);
                        if done.send((job.id, finished)).is_err() {
                            break;
                        }
                    }

                    debug!("I/O worker {} stopped", worker_id);
                })
                .with_context(|| format!("Failed to spawn I/O worker {}", worker_id))?;
        }

        Ok(Self {
            shared: Rc::new(IoShared {
                jobs: job_tx,
                finished: done_rx,
                pending: RefCell::new(HashMap::new()),
                deferred: RefCell::new(VecDeque::new()),
                next_id: Cell::new(0),
            }),
        })
    }

    /// Run deferred tasks and deliver every finished fetch without blocking.
    ///
    /// Returns the number of callbacks run. The first callback error stops
    /// the pump and is returned.
    pub fn pump(&self) -> std::result::Result<usize, ContentError> {
        let mut ran = self.run_deferred()?;

        while let Ok((id, finished)) = self.shared.finished.try_recv() {
            if self.deliver(id, finished)? {
                ran += 1;
            }
        }

        Ok(ran)
    }

    /// Block until a fetch finishes (or `timeout` elapses), then pump
    pub fn wait(&self, timeout: Duration) -> std::result::Result<usize, ContentError> {
        let mut ran = self.run_deferred()?;
        if ran > 0 {
            return Ok(ran);
        }

        match self.shared.finished.recv_timeout(timeout) {
            Ok((id, finished)) => {
                if self.deliver(id, finished)? {
                    ran += 1;
                }
                Ok(ran + self.pump()?)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                warn!("I/O workers are gone; nothing further will be delivered");
                Ok(0)
            }
        }
    }

    /// Check whether nothing is queued or in flight
    pub fn is_idle(&self) -> bool {
        self.shared.pending.borrow().is_empty() && self.shared.deferred.borrow().is_empty()
    }

    /// Number of fetches still in flight
    pub fn in_flight(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    fn run_deferred(&self) -> std::result::Result<usize, ContentError> {
        let mut ran = 0;
        loop {
            // Tasks may defer more work, so never hold the borrow while running
            let task = self.shared.deferred.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task()?;
                    ran += 1;
                }
                None => return Ok(ran),
            }
        }
    }

    fn deliver(&self, id: JobId, finished: Finished) -> std::result::Result<bool, ContentError> {
        let reply = self.shared.pending.borrow_mut().remove(&id);
        match reply {
            Some((url, reply)) => {
                reply.run(&url, finished)?;
                Ok(true)
            }
            None => {
                debug!("Dropping result of cancelled fetch #{}", id);
                Ok(false)
            }
        }
    }
}

impl ThreadedIo {
    fn start(&self, url: &str, reply: PendingReply) -> CancelToken {
        let id = self.shared.next_id.get();
        self.shared.next_id.set(id + 1);

        let job = FetchJob {
            id,
            url: url.to_string(),
            kind: reply.kind(),
        };
        self.shared
            .pending
            .borrow_mut()
            .insert(id, (url.to_string(), reply));

        if self.shared.jobs.send(job).is_err() {
            warn!("Failed to enqueue fetch of \"{}\"", url);
        }
        debug!("Fetching \"{}\" (#{})", url, id);

        let shared: Weak<IoShared> = Rc::downgrade(&self.shared);
        CancelToken::new(move || {
            if let Some(shared) = shared.upgrade() {
                if shared.pending.borrow_mut().remove(&id).is_some() {
                    debug!("Cancelled fetch #{}", id);
                }
            }
        })
    }
}

impl IoBackend for ThreadedIo {
    fn fetch(&self, url: &str, reply: Reply) -> CancelToken {
        self.start(url, PendingReply::Bytes(reply))
    }

    fn fetch_image(&self, url: &str, reply: ImageReply) -> CancelToken {
        self.start(url, PendingReply::Image(reply))
    }

    fn defer(&self, task: Deferred) {
        self.shared.deferred.borrow_mut().push_back(task);
    }
}
