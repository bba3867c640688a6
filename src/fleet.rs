//! Worker discovery and fleet filtering
//!
//! A fleet is an ordered list of workers, each a remote host with a stable
//! 1-based index assigned at discovery time. Discovery sources are pluggable
//! through the [`WorkerSource`] trait; the built-in sources read a
//! host string or a hosts file. All sources funnel through
//! the same normalization: trim, skip blank lines and `#` comments, number
//! sequentially.

use crate::error::ConfigError;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// One remote target: a host plus its position in the fleet.
/// Immutable once created; lives for the duration of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    /// 1-based ordering position, unique within a dispatch
    pub index: usize,

    /// Hostname or address
    pub host: String,
}

impl Worker {
    pub fn new(index: usize, host: impl Into<String>) -> Self {
        Self {
            index,
            host: host.into(),
        }
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Worker # {:>2}: {}", self.index, self.host)
    }
}

/// A source of workers. Cloud or inventory-backed discovery plugs in here;
/// the built-in sources cover explicit host lists and hosts files.
pub trait WorkerSource {
    /// Produce the ordered worker list.
    fn discover(&self) -> Result<Vec<Worker>, ConfigError>;

    /// Human-readable description of where the workers come from.
    fn describe(&self) -> String;
}

/// Workers from a host string, split on whitespace or commas
pub struct HostListSource {
    hosts: String,
}

impl HostListSource {
    pub fn new(hosts: impl Into<String>) -> Self {
        Self {
            hosts: hosts.into(),
        }
    }
}

impl WorkerSource for HostListSource {
    fn discover(&self) -> Result<Vec<Worker>, ConfigError> {
        info!(hosts = %self.hosts, "Getting workers from host string");
        Ok(workers_from_lines(
            self.hosts.split(|c: char| c == ',' || c.is_whitespace()),
        ))
    }

    fn describe(&self) -> String {
        format!("host string '{}'", self.hosts)
    }
}

/// Workers from a file of hosts, one per line
pub struct HostFileSource {
    path: PathBuf,
}

impl HostFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WorkerSource for HostFileSource {
    fn discover(&self) -> Result<Vec<Worker>, ConfigError> {
        info!(file = %self.path.display(), "Getting workers from file");
        let contents = fs::read_to_string(&self.path).map_err(|e| ConfigError::HostsFileRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(workers_from_lines(contents.lines()))
    }

    fn describe(&self) -> String {
        format!("hosts file '{}'", self.path.display())
    }
}

/// Run a source and fail on an empty fleet.
pub fn discover(source: &dyn WorkerSource) -> Result<Vec<Worker>, ConfigError> {
    let workers = source.discover()?;
    if workers.is_empty() {
        return Err(ConfigError::NoWorkers {
            selector: source.describe(),
        });
    }
    Ok(workers)
}

/// Normalize raw host lines into numbered workers.
///
/// Lines are trimmed; blank lines and lines starting with `#` are skipped.
/// Indices are sequential and 1-based.
pub fn workers_from_lines<'a, I>(lines: I) -> Vec<Worker>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut workers = Vec::new();
    for line in lines {
        let host = line.trim();
        if host.is_empty() || host.starts_with('#') {
            continue;
        }
        workers.push(Worker::new(workers.len() + 1, host));
    }
    workers
}

/// Restrict a fleet to the given comma-separated 1-based indices,
/// preserving the original relative order. An empty filter keeps everything.
pub fn filter_by_index(workers: Vec<Worker>, filter: &str) -> Result<Vec<Worker>, ConfigError> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Ok(workers);
    }

    let mut wanted = BTreeSet::new();
    for piece in filter.split(',') {
        let piece = piece.trim();
        let index: usize = piece.parse().map_err(|_| ConfigError::InvalidWorkerFilter {
            value: filter.to_string(),
            reason: format!("'{}' is not a number", piece),
        })?;
        wanted.insert(index);
    }

    info!(count = wanted.len(), "Only using a subset of workers");
    Ok(workers
        .into_iter()
        .filter(|w| wanted.contains(&w.index))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_workers_from_string() {
        let source = HostListSource::new("web1, web2 web3");
        let workers = discover(&source).unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(workers[0], Worker::new(1, "web1"));
        assert_eq!(workers[1], Worker::new(2, "web2"));
        assert_eq!(workers[2], Worker::new(3, "web3"));
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        let lines = vec!["web1", "", "  ", "# web2", "web3"];
        let workers = workers_from_lines(lines);
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].host, "web1");
        // Indices stay sequential even when lines are skipped
        assert_eq!(workers[1], Worker::new(2, "web3"));
    }

    #[test]
    fn test_workers_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "db1").unwrap();
        writeln!(file, "# standby, do not touch").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "db2").unwrap();

        let source = HostFileSource::new(&path);
        let workers = discover(&source).unwrap();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0], Worker::new(1, "db1"));
        assert_eq!(workers[1], Worker::new(2, "db2"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let source = HostFileSource::new("/nonexistent/hosts.txt");
        let err = discover(&source).unwrap_err();
        assert!(matches!(err, ConfigError::HostsFileRead { .. }));
    }

    #[test]
    fn test_empty_fleet_is_config_error() {
        let source = HostListSource::new("  , # nope ,");
        let err = discover(&source).unwrap_err();
        assert!(matches!(err, ConfigError::NoWorkers { .. }));
    }

    #[test]
    fn test_filter_by_index() {
        let workers = workers_from_lines(vec!["a", "b", "c", "d", "e"]);
        let filtered = filter_by_index(workers, "2,4").unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0], Worker::new(2, "b"));
        assert_eq!(filtered[1], Worker::new(4, "d"));
    }

    #[test]
    fn test_filter_preserves_relative_order() {
        let workers = workers_from_lines(vec!["a", "b", "c", "d", "e"]);
        // Filter order does not matter; fleet order does
        let filtered = filter_by_index(workers, "5,1,3").unwrap();
        let hosts: Vec<_> = filtered.iter().map(|w| w.host.as_str()).collect();
        assert_eq!(hosts, vec!["a", "c", "e"]);
    }

    #[test]
    fn test_invalid_filter() {
        let workers = workers_from_lines(vec!["a", "b"]);
        let err = filter_by_index(workers, "1,x").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerFilter { .. }));
    }

    #[test]
    fn test_worker_display() {
        let worker = Worker::new(3, "web3.example.com");
        assert_eq!(worker.to_string(), "Worker #  3: web3.example.com");
    }
}
