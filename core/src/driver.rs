// per-object orchestration: sample, match, emit.
//
// the driver owns the batch loop. each object is sampled, matched, and
// reported to the sink before the next one starts, so output interleaving
// is atomic per object. sampler errors are reported and contained; a bad
// object never aborts the batch. a shared cancel token is checked between
// objects.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use failure::{Error, Fail};
use log::{debug, error, info};

use pronom::{Catalog, Match, MatchTimings, Matcher, Sample, Sampler};

use crate::config::Config;
use crate::output::{Record, RecordSink};

/// the zip container format: the only match that triggers descent.
const ZIP_PUID: &str = "x-fmt/263";

#[derive(Debug, Fail)]
pub enum DriverError {
    #[fail(display = "cancelled while processing: {}", _0)]
    Cancelled(String),
}

/// Shared cancellation flag, checked between objects.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the driver was doing most recently, for interrupt diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub current_path: String,
    pub current_size: u64,
}

/// Batch statistics, reported at the end of a run.
pub struct Summary {
    /// formats in the catalog.
    pub formats: usize,
    /// pattern compile cost at catalog load.
    pub compile_time: Duration,
    /// objects processed, archive entries included.
    pub objects: u64,
    /// wall time of the whole batch.
    pub elapsed: Duration,
    /// ten most expensive formats by accumulated match time, when
    /// diagnostics were on.
    pub top_formats: Option<Vec<(String, Duration)>>,
    pub top_signatures: Option<Vec<(String, Duration)>>,
}

/// Drives identification: sampling, matching, and record emission.
pub struct Driver<'a, S: RecordSink> {
    config: Config,
    catalog: &'a Catalog,
    matcher: Matcher<'a>,
    sampler: Sampler,
    sink: S,
    cancel: CancelToken,
    /// global timing tables; per-object deltas are merged in between
    /// objects.
    timings: Option<MatchTimings>,
    /// objects processed so far.
    count: u64,
    progress: Progress,
}

impl<'a, S: RecordSink> Driver<'a, S> {
    pub fn new(config: Config, catalog: &'a Catalog, sink: S) -> Driver<'a, S> {
        let sampler = Sampler::new(config.bufsize);
        let matcher = if config.diagnose {
            Matcher::with_timing(catalog)
        } else {
            Matcher::new(catalog)
        };
        let timings = if config.diagnose {
            Some(MatchTimings::new())
        } else {
            None
        };

        Driver {
            config,
            catalog,
            matcher,
            sampler,
            sink,
            cancel: CancelToken::new(),
            timings,
            count: 0,
            progress: Default::default(),
        }
    }

    /// A handle that cancels this driver's batch from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Identify every path in the batch. Files are identified directly;
    /// directories walk their entries, descending only when configured.
    ///
    /// Errors:
    ///
    ///   - `DriverError::Cancelled` - the cancel token was set. records
    ///     emitted so far are preserved.
    ///   - sink failures, which do abort the batch.
    pub fn run(&mut self, paths: &[PathBuf]) -> Result<(), Error> {
        for path in paths.iter() {
            self.check_cancelled()?;
            if path.is_dir() {
                self.identify_dir(path)?;
            } else {
                self.identify_file(path)?;
            }
        }
        Ok(())
    }

    fn identify_dir(&mut self, dir: &Path) -> Result<(), Error> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to read directory: {}: {}", dir.display(), e);
                return Ok(());
            }
        };

        for entry in entries {
            self.check_cancelled()?;

            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    error!("failed to read directory entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            if path.is_dir() {
                if self.config.recurse {
                    self.identify_dir(&path)?;
                }
            } else {
                self.identify_file(&path)?;
            }
        }
        Ok(())
    }

    /// Identify one file on disk. I/O errors are reported and contained.
    pub fn identify_file(&mut self, path: &Path) -> Result<(), Error> {
        let name = path.display().to_string();
        let t0 = Instant::now();

        self.progress = Progress {
            current_path: name.clone(),
            current_size: 0,
        };

        let sample = match self.sample_file(path) {
            Ok(sample) => sample,
            Err(e) => {
                error!("error: {} (path is {})", e, name);
                return Ok(());
            }
        };
        self.progress.current_size = sample.size();

        let matches = self.emit_records(&name, &sample, t0)?;

        if self.config.zip && self.is_zip_container(&matches) {
            self.identify_zip(path)?;
        }

        Ok(())
    }

    /// Identify a forward-only source of known size, e.g. an archive
    /// entry. Returns the preferred matches so callers can inspect them.
    pub fn identify_stream<R: Read>(
        &mut self,
        name: &str,
        size: Option<u64>,
        src: &mut R,
    ) -> Result<Vec<Match<'a>>, Error> {
        let t0 = Instant::now();

        self.progress = Progress {
            current_path: name.to_string(),
            current_size: size.unwrap_or(0),
        };

        let sample = match self.sampler.sample_stream(src, size) {
            Ok(sample) => sample,
            Err(e) => {
                error!("error: {} (object is {})", e, name);
                return Ok(vec![]);
            }
        };

        self.emit_records(name, &sample, t0)
    }

    fn sample_file(&self, path: &Path) -> Result<Sample, Error> {
        let size = fs::metadata(path)?.len();
        let mut file = fs::File::open(path)?;
        let sample = self.sampler.sample_seekable(&mut file, size)?;
        Ok(sample)
    }

    /// Match one sample and emit its records: one per preferred match, or
    /// a single no-match marker.
    fn emit_records(
        &mut self,
        name: &str,
        sample: &Sample,
        t0: Instant,
    ) -> Result<Vec<Match<'a>>, Error> {
        self.count += 1;

        let outcome = self.matcher.match_sample(sample);
        if let (Some(total), Some(delta)) = (self.timings.as_mut(), outcome.timings.as_ref()) {
            // merged between objects, never contended per pattern.
            total.merge(delta);
        }

        let timestamp = Local::now();
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        if outcome.matches.is_empty() {
            self.sink.emit(&Record::NoMatch {
                path: name.to_string(),
                size: sample.size(),
                timestamp,
                elapsed_ms,
            })?;
        } else {
            let count = outcome.matches.len();
            for m in outcome.matches.iter() {
                self.sink.emit(&Record::Match {
                    path: name.to_string(),
                    format_id: m.format.id,
                    puid: m.format.puid.clone(),
                    format_name: m.format.name.clone(),
                    signature_id: m.signature.id,
                    signature_name: m.signature.name.clone(),
                    count,
                    size: sample.size(),
                    timestamp,
                    elapsed_ms,
                })?;
            }
        }

        Ok(outcome.matches)
    }

    /// The object is exactly the zip container format and nothing more
    /// specific: worth opening when container traversal is on.
    fn is_zip_container(&self, matches: &[Match]) -> bool {
        matches.len() == 1 && matches[0].format.puid == ZIP_PUID
    }

    /// Identify each non-empty entry of the archive as an object of its
    /// own, named `container.zip!entry`. Nested containers are reported
    /// and skipped, not descended into.
    fn identify_zip(&mut self, path: &Path) -> Result<(), Error> {
        debug!("descending into container: {}", path.display());

        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("error: {} (path is {})", e, path.display());
                return Ok(());
            }
        };
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(e) => {
                error!("not a valid zip container: {}: {}", path.display(), e);
                return Ok(());
            }
        };

        for i in 0..archive.len() {
            self.check_cancelled()?;

            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    error!("bad entry in container {}: {}", path.display(), e);
                    continue;
                }
            };

            if entry.size() == 0 {
                // directories and empty members carry no content.
                continue;
            }

            let name = format!("{}!{}", path.display(), entry.name());
            let size = entry.size();
            let matches = self.identify_stream(&name, Some(size), &mut entry)?;

            if self.is_zip_container(&matches) {
                info!("skipping nested container: {}", name);
            }
        }

        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            Err(DriverError::Cancelled(self.progress.current_path.clone()))
        } else {
            Ok(())
        }
    }

    /// Batch statistics. `elapsed` is the caller's wall-clock measurement
    /// of the whole run.
    pub fn summary(&self, elapsed: Duration) -> Summary {
        let diagnostics = self.timings.as_ref().map(|timings| {
            let mut format_names: HashMap<u64, String> = HashMap::new();
            let mut signature_names: HashMap<u64, String> = HashMap::new();
            for format in self.catalog.formats().iter() {
                format_names.insert(format.id, format.name.clone());
                for sig in format.signatures.iter() {
                    signature_names.insert(sig.id, sig.name.clone());
                }
            }

            let resolve = |top: Vec<(u64, Duration)>, names: &HashMap<u64, String>| {
                top.into_iter()
                    .map(|(id, cost)| {
                        let name = names.get(&id).cloned().unwrap_or_else(|| id.to_string());
                        (name, cost)
                    })
                    .collect::<Vec<(String, Duration)>>()
            };

            (
                resolve(timings.formats.top(10), &format_names),
                resolve(timings.signatures.top(10), &signature_names),
            )
        });

        let (top_formats, top_signatures) = match diagnostics {
            Some((formats, signatures)) => (Some(formats), Some(signatures)),
            None => (None, None),
        };

        Summary {
            formats: self.catalog.len(),
            compile_time: self.catalog.compile_time,
            objects: self.count,
            elapsed,
            top_formats,
            top_signatures,
        }
    }
}
