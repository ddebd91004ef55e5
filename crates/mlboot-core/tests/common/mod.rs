//! Shared fixtures: a local HTTP server, in-memory archives and a recording
//! subprocess runner.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use mlboot_core::{BootstrapError, Result, StepRunner};
use tiny_http::{Response, Server, StatusCode};

#[derive(Clone)]
pub struct Route {
    status: u16,
    body: Vec<u8>,
    chunked: bool,
    delay: Duration,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            chunked: false,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            ..Self::ok(body)
        }
    }

    /// Send the body without a Content-Length.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Hold the request this long before responding.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// HTTP server on an ephemeral port; each request is served on its own
/// thread. Unknown paths get a 404.
pub struct TestServer {
    server: Arc<Server>,
    base: String,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start<P: Into<String>>(routes: Vec<(P, Route)>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.into(), route))
                .collect(),
        );
        let counters = Arc::new(Counters::default());

        let handle = {
            let server = server.clone();
            let counters = counters.clone();
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    let routes = routes.clone();
                    let counters = counters.clone();
                    thread::spawn(move || {
                        counters.hits.fetch_add(1, Ordering::SeqCst);
                        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

                        let path = request.url().split('?').next().unwrap_or("").to_string();
                        let route = routes
                            .get(&path)
                            .cloned()
                            .unwrap_or_else(|| Route::status(404, "not found"));
                        thread::sleep(route.delay);

                        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

                        if route.chunked {
                            let response = Response::new(
                                StatusCode(route.status),
                                Vec::new(),
                                Cursor::new(route.body),
                                None,
                                None,
                            );
                            let _ = request.respond(response);
                        } else {
                            let response = Response::from_data(route.body)
                                .with_status_code(route.status)
                                .with_chunked_threshold(usize::MAX);
                            let _ = request.respond(response);
                        }
                    });
                }
            })
        };

        Self {
            server,
            base: format!("http://{}", addr),
            counters,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    /// Highest number of requests the server was handling at once.
    pub fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Zip archive; `None` content marks a directory entry.
pub fn zip_bytes(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        match content {
            Some(content) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            None => {
                writer.add_directory(*name, options).unwrap();
            }
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_gz_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Stands in for the toolchain binary: records every invocation, answers
/// `capture` with a canned listing and fails on request.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    listing: String,
    fail_on: Option<String>,
}

impl RecordingRunner {
    pub fn new(listing: impl Into<String>) -> Self {
        Self {
            listing: listing.into(),
            ..Default::default()
        }
    }

    /// Exit with status 1 when the arguments, joined by spaces, start with
    /// `command` (`"sync"`, `"run src/setup.py"`).
    pub fn failing_on(mut self, command: &str) -> Self {
        self.fail_on = Some(command.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, args: &[&str]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());

        let failing = self
            .fail_on
            .as_deref()
            .is_some_and(|command| !args.is_empty() && args.join(" ").starts_with(command));
        if failing {
            return Err(BootstrapError::Subprocess {
                command: format!("uv {}", args.join(" ")),
                code: Some(1),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for RecordingRunner {
    async fn run(&self, args: &[&str]) -> Result<()> {
        self.record(args)
    }

    async fn capture(&self, args: &[&str]) -> Result<String> {
        self.record(args)?;
        Ok(self.listing.clone())
    }
}
