//! In-memory WebDAV server emulation.

use crate::transport::{DavClient, DavMethod, DavRequest, DavResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct DavState {
    files: BTreeMap<String, Vec<u8>>,
    collections: BTreeSet<String>,
    injected: VecDeque<(DavMethod, u16)>,
    requests: HashMap<DavMethod, usize>,
}

/// A WebDAV server held in memory.
///
/// Implements the status semantics the transport relies on: `PUT` into a
/// missing collection is 409, `MKCOL` on an existing resource is 405 and on
/// a missing parent is 409, `GET` of a missing file is 404, and wrong
/// credentials are 401. URLs are reduced to their path; the host is ignored,
/// so several clients can share one instance.
#[derive(Default)]
pub struct MemoryDav {
    state: Mutex<DavState>,
    credentials: Option<(String, String)>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn url_path(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .find('/')
        .map_or("/", |i| &without_scheme[i..]);
    normalize(path)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".into()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".into(),
        Some(i) => path[..i].to_string(),
    }
}

fn respond(status: u16) -> DavResponse {
    DavResponse {
        status,
        body: Vec::new(),
    }
}

impl DavState {
    fn is_collection(&self, path: &str) -> bool {
        path == "/" || self.collections.contains(path)
    }
}

impl MemoryDav {
    /// Creates an empty server that accepts any credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires Basic auth with these credentials.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Simulates a network outage: every request fails without a response.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every response by `latency` (tokio time).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Highest number of requests that were being served at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Makes the next request with `method` answer `status`.
    pub fn inject_status(&self, method: DavMethod, status: u16) {
        self.state.lock().injected.push_back((method, status));
    }

    /// Whether a collection exists at `path`.
    pub fn has_collection(&self, path: &str) -> bool {
        self.state.lock().is_collection(&normalize(path))
    }

    /// Returns the stored bytes at `path`.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(&normalize(path)).cloned()
    }

    /// Stores bytes at `path`, creating ancestor collections.
    pub fn put_file(&self, path: &str, bytes: Vec<u8>) {
        let path = normalize(path);
        let mut state = self.state.lock();
        let mut dir = parent(&path);
        while dir != "/" {
            state.collections.insert(dir.clone());
            dir = parent(&dir);
        }
        state.files.insert(path, bytes);
    }

    /// Paths of all stored files.
    pub fn file_paths(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Number of requests received with `method`.
    pub fn request_count(&self, method: DavMethod) -> usize {
        self.state
            .lock()
            .requests
            .get(&method)
            .copied()
            .unwrap_or(0)
    }

    fn authorized(&self, request: &DavRequest) -> bool {
        match (&self.credentials, &request.credentials) {
            (None, _) => true,
            (Some((user, pass)), Some(given)) => {
                &given.username == user && &given.password == pass
            }
            (Some(_), None) => false,
        }
    }

    fn handle(&self, request: DavRequest) -> DavResponse {
        let mut state = self.state.lock();
        *state.requests.entry(request.method).or_insert(0) += 1;

        if let Some(pos) = state
            .injected
            .iter()
            .position(|(m, _)| *m == request.method)
        {
            if let Some((_, status)) = state.injected.remove(pos) {
                return respond(status);
            }
        }

        if !self.authorized(&request) {
            return respond(401);
        }

        let path = url_path(&request.url);
        match request.method {
            DavMethod::Options => {
                if state.is_collection(&path) || state.files.contains_key(&path) {
                    respond(200)
                } else {
                    respond(404)
                }
            }
            DavMethod::Get => match state.files.get(&path) {
                Some(bytes) => DavResponse {
                    status: 200,
                    body: bytes.clone(),
                },
                None => respond(404),
            },
            DavMethod::Put => {
                if state.is_collection(&path) {
                    return respond(405);
                }
                if !state.is_collection(&parent(&path)) {
                    return respond(409);
                }
                let body = request.body.unwrap_or_default();
                match state.files.insert(path, body) {
                    Some(_) => respond(204),
                    None => respond(201),
                }
            }
            DavMethod::Mkcol => {
                if state.is_collection(&path) || state.files.contains_key(&path) {
                    return respond(405);
                }
                if !state.is_collection(&parent(&path)) {
                    return respond(409);
                }
                state.collections.insert(path);
                respond(201)
            }
        }
    }
}

#[async_trait]
impl DavClient for MemoryDav {
    async fn send(&self, request: DavRequest) -> Result<DavResponse, String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(format!("{} {}: connection refused", request.method.as_str(), request.url));
        }
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let response = self.handle(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}
