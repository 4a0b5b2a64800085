//! Discovering measurement sets across the nodes of the imaging cluster.
//!
//! Each node keeps its data under its own root (`lwacalim0N:/data0N`). The
//! [`RemoteLister`] trait lists a directory on one host; [`list_msfiles`] fans
//! this out over all hosts in a [`ClusterConfig`], and collects whatever could
//! be found. A host that can't be reached doesn't spoil the results from the
//! others, it's reported in [`ListingReport::failures`].

use std::{path::PathBuf, process::Command};

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    marlu::{
        hifitime::Epoch,
        rayon::{prelude::*, ThreadPoolBuilder},
    },
    names::{MsName, NameError, MS_SUFFIX},
};

/// The number of nodes in the calibration / imaging cluster.
pub const NUM_CLUSTER_NODES: usize = 7;

#[derive(Error, Debug)]
/// An error listing a directory on a single host.
pub enum HostError {
    /// The remote shell couldn't connect to the host (ssh exits with 255).
    #[error("host {host} is unreachable: {stderr}")]
    Unreachable {
        /// the host name
        host: String,
        /// whatever the remote shell wrote to stderr
        stderr: String,
    },

    /// The listing didn't finish within the time limit (the remote `timeout`
    /// exits with 124).
    #[error("listing {root} on {host} took longer than {seconds} s")]
    Timeout {
        /// the host name
        host: String,
        /// the directory being listed
        root: String,
        /// the time limit
        seconds: u32,
    },

    /// The listing command ran, but failed.
    #[error("listing {root} on {host} failed with {status}: {stderr}")]
    CommandFailed {
        /// the host name
        host: String,
        /// the directory being listed
        root: String,
        /// the exit status, as text
        status: String,
        /// whatever the command wrote to stderr
        stderr: String,
    },

    /// The path couldn't be quoted for the remote shell.
    #[error("can't quote {root:?} for the remote shell")]
    Quote {
        /// the directory being listed
        root: String,
    },

    /// The remote shell couldn't be started.
    #[error("couldn't run {program} for host {host}: {source}")]
    Spawn {
        /// the host name
        host: String,
        /// the remote shell program
        program: String,
        /// the underlying error
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
/// Errors that prevent a listing from running at all.
pub enum ListingError {
    #[error(transparent)]
    /// Error derived from [`rayon::ThreadPoolBuildError`](crate::marlu::rayon::ThreadPoolBuildError)
    ThreadPool(#[from] crate::marlu::rayon::ThreadPoolBuildError),
}

/// Something which can list the entries of a directory on a named host.
pub trait RemoteLister: Sync {
    /// List the names of the entries directly under `root` on `host`.
    ///
    /// # Errors
    ///
    /// An empty directory is `Ok(vec![])`; every failure to list must be an
    /// `Err`.
    fn list_entries(&self, host: &str, root: &str) -> Result<Vec<String>, HostError>;
}

/// The exit status of coreutils `timeout` when the command ran out of time.
const TIMEOUT_STATUS: i32 = 124;

/// Lists directories by running `ls` over `ssh`.
///
/// The remote `ls` runs under `timeout`, so a listing that hangs after
/// connecting (a stale mount, say) ends in [`HostError::Timeout`]. Keepalives
/// catch a connection that drops mid-listing.
#[derive(Debug, Clone)]
pub struct SshLister {
    /// The ssh executable
    pub program: String,
    /// Seconds to wait for a connection before giving up on a host
    pub connect_timeout_s: u32,
    /// Seconds the remote listing may take once connected
    pub command_timeout_s: u32,
}

impl Default for SshLister {
    fn default() -> Self {
        Self {
            program: "ssh".into(),
            connect_timeout_s: 10,
            command_timeout_s: 60,
        }
    }
}

impl SshLister {
    fn args(&self, host: &str, quoted_root: &str) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_s),
            "-o".into(),
            format!("ServerAliveInterval={}", self.connect_timeout_s.max(1)),
            "-o".into(),
            "ServerAliveCountMax=3".into(),
            host.into(),
            "timeout".into(),
            self.command_timeout_s.max(1).to_string(),
            "ls".into(),
            quoted_root.into(),
        ]
    }
}

impl RemoteLister for SshLister {
    fn list_entries(&self, host: &str, root: &str) -> Result<Vec<String>, HostError> {
        let quoted = shlex::try_quote(root).map_err(|_| HostError::Quote { root: root.into() })?;
        let args = self.args(host, &quoted);
        trace!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| HostError::Spawn {
                host: host.into(),
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(match output.status.code() {
                Some(255) => HostError::Unreachable {
                    host: host.into(),
                    stderr,
                },
                Some(TIMEOUT_STATUS) => HostError::Timeout {
                    host: host.into(),
                    root: root.into(),
                    seconds: self.command_timeout_s.max(1),
                },
                _ => HostError::CommandFailed {
                    host: host.into(),
                    root: root.into(),
                    status: output.status.to_string(),
                    stderr,
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// A node of the cluster, and where its data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// The host name to connect to
    pub name: String,
    /// The data directory on that host
    pub data_root: String,
}

/// The hosts to search, and how many to search at once.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// The hosts, in the order their results are reported
    pub hosts: Vec<HostSpec>,
    /// Maximum number of hosts listed concurrently
    pub num_workers: usize,
}

impl Default for ClusterConfig {
    /// `lwacalim01:/data01` through `lwacalim07:/data07`
    fn default() -> Self {
        let hosts = (1..=NUM_CLUSTER_NODES)
            .map(|i| HostSpec {
                name: format!("lwacalim{i:02}"),
                data_root: format!("/data{i:02}"),
            })
            .collect();
        Self {
            hosts,
            num_workers: NUM_CLUSTER_NODES,
        }
    }
}

impl ClusterConfig {
    /// Build a config from `host:/data/root` strings.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::MalformedIdentifier`] if a spec has no `:`, or an
    /// empty host or root.
    pub fn from_specs<I, S>(specs: I, num_workers: usize) -> Result<Self, NameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = specs
            .into_iter()
            .map(|spec| {
                let spec = spec.as_ref();
                match spec.split_once(':') {
                    Some((name, root)) if !name.is_empty() && !root.is_empty() => Ok(HostSpec {
                        name: name.into(),
                        data_root: root.into(),
                    }),
                    _ => Err(NameError::MalformedIdentifier {
                        identifier: spec.into(),
                        reason: "expected <host>:<data root>".into(),
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            hosts,
            num_workers: num_workers.max(1),
        })
    }
}

/// A measurement set found on one of the cluster nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSetRecord {
    /// `<host>:<path>`, suitable for scp / rsync
    pub path: String,
    /// The file name of the measurement set
    pub name: String,
    /// ISO-8601 `YYYY-MM-DDTHH:MM:SS` observation time
    pub timestamp: String,
    /// Frequency as written in the name, e.g. `55MHz`
    pub frequency: String,
    /// The host the measurement set lives on
    pub host: String,
    /// The observation time
    pub epoch: Epoch,
    /// Frequency in MHz
    pub freq_mhz: u32,
}

/// An entry that looked like a measurement set but couldn't be parsed.
#[derive(Debug, Clone)]
pub struct MalformedEntry {
    /// the host it was found on
    pub host: String,
    /// why it couldn't be parsed
    pub error: NameError,
}

/// Everything [`list_msfiles`] found, and everything that went wrong.
#[derive(Debug, Default)]
pub struct ListingReport {
    /// Measurement sets, ordered by host then name
    pub records: Vec<MeasurementSetRecord>,
    /// Hosts that couldn't be listed
    pub failures: Vec<(String, HostError)>,
    /// Entries ending in `MHz.ms` which don't follow the naming convention
    pub malformed: Vec<MalformedEntry>,
}

impl ListingReport {
    /// True if every host was listed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Join a data root and a subdirectory without doubling up slashes.
fn join_remote(root: &str, subdir: &str) -> String {
    let subdir = subdir.trim_matches('/');
    let root = root.trim_end_matches('/');
    if subdir.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{subdir}")
    }
}

fn parse_host_entries(
    host: &str,
    dir: &str,
    entries: Vec<String>,
) -> (Vec<MeasurementSetRecord>, Vec<MalformedEntry>) {
    let mut records = vec![];
    let mut malformed = vec![];
    for name in entries.into_iter().filter(|n| n.ends_with(MS_SUFFIX)) {
        match MsName::parse(&name) {
            Ok(ms_name) => records.push(MeasurementSetRecord {
                path: format!("{host}:{}", PathBuf::from(dir).join(&name).display()),
                timestamp: ms_name.timestamp.to_isot(),
                frequency: ms_name.freq_str(),
                host: host.to_string(),
                epoch: ms_name.timestamp.epoch,
                freq_mhz: ms_name.freq_mhz,
                name,
            }),
            Err(error) => {
                warn!("skipping {host}:{dir}/{name}: {error}");
                malformed.push(MalformedEntry {
                    host: host.to_string(),
                    error,
                });
            }
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    (records, malformed)
}

/// Find measurement sets under `<data_root>/<subdir>` on every host in
/// `cluster`.
///
/// Hosts are listed concurrently, at most `cluster.num_workers` at a time.
/// Host failures and malformed names are collected in the report rather than
/// aborting the search.
///
/// # Errors
///
/// Only if the worker pool can't be created.
pub fn list_msfiles<L: RemoteLister>(
    lister: &L,
    cluster: &ClusterConfig,
    subdir: &str,
    draw_progress: bool,
) -> Result<ListingReport, ListingError> {
    trace!("start list_msfiles");

    let pool = ThreadPoolBuilder::new()
        .num_threads(cluster.num_workers.max(1))
        .build()?;

    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let progress = ProgressBar::with_draw_target(Some(cluster.hosts.len() as u64), draw_target)
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        )
        .with_message("listing hosts");

    let outcomes: Vec<(&HostSpec, String, Result<Vec<String>, HostError>)> = pool.install(|| {
        cluster
            .hosts
            .par_iter()
            .progress_with(progress.clone())
            .map(|host| {
                let dir = join_remote(&host.data_root, subdir);
                let result = lister.list_entries(&host.name, &dir);
                (host, dir, result)
            })
            .collect()
    });
    progress.finish();

    let mut report = ListingReport::default();
    for (host, dir, result) in outcomes {
        match result {
            Ok(entries) => {
                debug!("{}:{} has {} entries", host.name, dir, entries.len());
                let (records, malformed) = parse_host_entries(&host.name, &dir, entries);
                report.records.extend(records);
                report.malformed.extend(malformed);
            }
            Err(e) => {
                warn!("{e}");
                report.failures.push((host.name.clone(), e));
            }
        }
    }

    info!(
        "found {} measurement sets on {}/{} hosts",
        report.records.len(),
        cluster.hosts.len() - report.failures.len(),
        cluster.hosts.len()
    );
    trace!("end list_msfiles");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::MockLister;

    #[test]
    fn test_default_cluster() {
        let cluster = ClusterConfig::default();
        assert_eq!(cluster.hosts.len(), 7);
        assert_eq!(
            cluster.hosts[0],
            HostSpec {
                name: "lwacalim01".into(),
                data_root: "/data01".into()
            }
        );
        assert_eq!(cluster.hosts[6].name, "lwacalim07");
        assert_eq!(cluster.hosts[6].data_root, "/data07");
    }

    #[test]
    fn test_cluster_from_specs() {
        let cluster = ClusterConfig::from_specs(["a:/x", "b:/y/z"], 0).unwrap();
        assert_eq!(cluster.num_workers, 1);
        assert_eq!(cluster.hosts[1].data_root, "/y/z");

        assert!(ClusterConfig::from_specs(["nocolon"], 2).is_err());
        assert!(ClusterConfig::from_specs([":/x"], 2).is_err());
        assert!(ClusterConfig::from_specs(["a:"], 2).is_err());
    }

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/data01", "20230318/"), "/data01/20230318");
        assert_eq!(join_remote("/data01/", "/20230318"), "/data01/20230318");
        assert_eq!(join_remote("/data01", ""), "/data01");
    }

    #[test]
    fn test_list_msfiles() {
        let lister = MockLister::default()
            .with_host(
                "lwacalim01",
                &[
                    "20230318_120000_55MHz.ms",
                    "20230318_120000_55MHz.ms.flagversions",
                    "caltables",
                    "20230318_120010_41MHz.ms",
                ],
            )
            .with_host("lwacalim02", &["20230318_120000_73MHz.ms"]);
        let cluster = ClusterConfig::from_specs(["lwacalim01:/data01", "lwacalim02:/data02"], 2)
            .unwrap();

        let report = list_msfiles(&lister, &cluster, "20230318/", false).unwrap();
        assert!(report.is_complete());
        assert!(report.malformed.is_empty());
        assert_eq!(report.records.len(), 3);

        let first = &report.records[0];
        assert_eq!(first.host, "lwacalim01");
        assert_eq!(first.name, "20230318_120000_55MHz.ms");
        assert_eq!(first.path, "lwacalim01:/data01/20230318/20230318_120000_55MHz.ms");
        assert_eq!(first.timestamp, "2023-03-18T12:00:00");
        assert_eq!(first.frequency, "55MHz");
        assert_eq!(first.freq_mhz, 55);

        assert_eq!(report.records[1].name, "20230318_120010_41MHz.ms");
        assert_eq!(report.records[2].frequency, "73MHz");
        assert_eq!(
            lister.requested(),
            vec![
                ("lwacalim01".to_string(), "/data01/20230318".to_string()),
                ("lwacalim02".to_string(), "/data02/20230318".to_string()),
            ]
        );
    }

    #[test]
    fn test_list_msfiles_partial_failure() {
        let lister = MockLister::default()
            .with_host("lwacalim01", &["20230318_120000_55MHz.ms"])
            .with_host("lwacalim03", &[]);
        let cluster = ClusterConfig::from_specs(
            ["lwacalim01:/data01", "lwacalim02:/data02", "lwacalim03:/data03"],
            3,
        )
        .unwrap();

        let report = list_msfiles(&lister, &cluster, "20230318", false).unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "lwacalim02");
        assert!(matches!(
            report.failures[0].1,
            HostError::Unreachable { .. }
        ));
    }

    #[test]
    fn test_list_msfiles_malformed() {
        let lister = MockLister::default().with_host(
            "lwacalim01",
            &["20230318_120000_55MHz.ms", "2023031_120000_55MHz.ms"],
        );
        let cluster = ClusterConfig::from_specs(["lwacalim01:/data01"], 1).unwrap();
        let report = list_msfiles(&lister, &cluster, "20230318", false).unwrap();
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.malformed.len(), 1);
        match &report.malformed[0].error {
            NameError::MalformedIdentifier { identifier, .. } => {
                assert_eq!(identifier, "2023031_120000_55MHz.ms")
            }
        }
    }

    #[test]
    fn test_ssh_lister_missing_program() {
        let lister = SshLister {
            program: "/nonexistent/ssh".into(),
            ..SshLister::default()
        };
        assert!(matches!(
            lister.list_entries("localhost", "/tmp"),
            Err(HostError::Spawn { .. })
        ));
    }

    #[test]
    fn test_ssh_lister_args() {
        let lister = SshLister {
            connect_timeout_s: 5,
            command_timeout_s: 30,
            ..SshLister::default()
        };
        assert_eq!(
            lister.args("lwacalim01", "'/data01/my dir'").join(" "),
            "-o BatchMode=yes -o ConnectTimeout=5 -o ServerAliveInterval=5 \
             -o ServerAliveCountMax=3 lwacalim01 timeout 30 ls '/data01/my dir'"
        );
    }

    /// A stand-in for ssh which runs `script` instead of connecting.
    fn fake_ssh(dir: &std::path::Path, name: &str, script: &str) -> SshLister {
        use std::os::unix::fs::PermissionsExt;
        let program = dir.join(name);
        std::fs::write(&program, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        SshLister {
            program: program.display().to_string(),
            command_timeout_s: 7,
            ..SshLister::default()
        }
    }

    #[test]
    fn test_ssh_lister_outcomes() {
        let tmp_dir = tempfile::tempdir().unwrap();

        let lister = fake_ssh(
            tmp_dir.path(),
            "ssh_ok",
            "printf '20230318_120000_55MHz.ms\\n\\ncaltables\\n'",
        );
        assert_eq!(
            lister.list_entries("lwacalim01", "/data01").unwrap(),
            ["20230318_120000_55MHz.ms", "caltables"]
        );

        let lister = fake_ssh(tmp_dir.path(), "ssh_slow", "exit 124");
        match lister.list_entries("lwacalim01", "/data01") {
            Err(HostError::Timeout { host, seconds, .. }) => {
                assert_eq!(host, "lwacalim01");
                assert_eq!(seconds, 7);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }

        let lister = fake_ssh(tmp_dir.path(), "ssh_down", "echo 'No route to host' >&2; exit 255");
        match lister.list_entries("lwacalim01", "/data01") {
            Err(HostError::Unreachable { stderr, .. }) => assert_eq!(stderr, "No route to host"),
            other => panic!("expected unreachable, got {other:?}"),
        }

        let lister = fake_ssh(tmp_dir.path(), "ssh_ls_fails", "exit 2");
        assert!(matches!(
            lister.list_entries("lwacalim01", "/data01"),
            Err(HostError::CommandFailed { .. })
        ));
    }
}
