//! Command Line Interface helpers for lwacalim

use crate::{
    caltime::{get_selfcal_time_to_apply, DEFAULT_CALTABLE_DIR},
    error::{CLIError::InvalidCommandLineArgument, LwacalimError},
    flags::{get_flagged_solution_num, restore_flag},
    helio::{convert_to_heliocentric_coords, helio_image_name, CommandRegridder},
    image::get_image_maxmin,
    listing::{list_msfiles, ClusterConfig, SshLister},
    quality::{check_image_quality, ExtremaHistory},
    sources::get_strong_source_list,
    table::{get_keyword, put_keyword, KeywordKind, KeywordValue},
};
use clap::{arg, command, Command, ErrorKind::ArgumentNotFound, ValueHint::FilePath};
use log::{debug, info, trace, warn};
use prettytable::{format as prettyformat, row, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    io::Write,
    path::PathBuf,
};

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    Ok(())
}

/// The name and version of this executable, and how it was built.
pub struct BuildInfo;

impl Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;
        fmt_build_info(f)
    }
}

/// A single invocation of the command line.
#[derive(Debug, Clone)]
pub enum Task {
    /// Find measurement sets on the cluster.
    ListMs {
        /// where to look
        cluster: ClusterConfig,
        /// the remote shell
        lister: SshLister,
        /// the directory under each host's data root
        subdir: String,
        /// whether to show a progress bar
        draw_progress: bool,
    },
    /// Print the peak and trough of an image.
    MaxMin {
        /// the image
        image: PathBuf,
        /// only look around the peak
        local: bool,
    },
    /// Judge an image against the previous self-calibration iterations.
    Quality {
        /// the image
        image: PathBuf,
        /// the readings so far
        history: ExtremaHistory,
        /// whether to roll the history forward
        reorder: bool,
    },
    /// Find the self-calibration tables to apply to a measurement set.
    CalTime {
        /// the measurement set name
        msname: String,
        /// where the tables are
        caltable_dir: PathBuf,
    },
    /// Print the bright sources.
    Sources,
    /// Count the flagged solutions of a calibration table.
    FlagSummary {
        /// the calibration table
        caltable: PathBuf,
    },
    /// Restore the latest saved flags of a measurement set.
    RestoreFlags {
        /// the measurement set
        ms: PathBuf,
    },
    /// Print a table keyword.
    GetKeyword {
        /// the table
        table: PathBuf,
        /// the keyword
        keyword: String,
        /// its type
        kind: KeywordKind,
    },
    /// Set a table keyword.
    PutKeyword {
        /// the table
        table: PathBuf,
        /// the keyword
        keyword: String,
        /// its new value
        value: KeywordValue,
    },
    /// Regrid an image to heliocentric coordinates.
    Helio {
        /// the measurement set the image was made from
        ms: PathBuf,
        /// the image
        image: PathBuf,
        /// the tool to use
        regridder: CommandRegridder,
    },
}

fn kind_arg<'a>() -> clap::Arg<'a> {
    arg!(--"type" <TYPE> "The type of the keyword value")
        .possible_values(KeywordKind::NAMES)
        .default_value("string")
        .required(false)
}

fn float_arg<'a>(arg: clap::Arg<'a>) -> clap::Arg<'a> {
    arg.required(false)
        .default_value("0")
        .allow_hyphen_values(true)
        .help_heading("HISTORY")
}

impl Task {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, LwacalimError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .subcommand_required(true)
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Housekeeping for the OVRO-LWA self-calibration and imaging pipeline")
            .subcommands([
                Command::new("list-ms")
                    .about("Find measurement sets on the cluster nodes")
                    .args(&[
                        arg!(subdir: [SUBDIR] "Directory under each host's data root"),
                        arg!(--hosts <SPECS> ... "Hosts to search, as <host>:<data root>")
                            .help_heading("CLUSTER")
                            .multiple_values(true)
                            .required(false),
                        arg!(--workers <COUNT> "Hosts to search concurrently")
                            .help_heading("CLUSTER")
                            .required(false),
                        arg!(--ssh <PROGRAM> "The remote shell")
                            .help_heading("CLUSTER")
                            .default_value("ssh")
                            .required(false),
                        arg!(--"connect-timeout" <SECONDS> "Seconds to wait for each host")
                            .help_heading("CLUSTER")
                            .default_value("10")
                            .required(false),
                        arg!(--"command-timeout" <SECONDS> "Seconds each host may take to list")
                            .help_heading("CLUSTER")
                            .default_value("60")
                            .required(false),
                        arg!(--"no-draw-progress" "do not show progress bars"),
                    ]),
                Command::new("maxmin")
                    .about("Print the maximum and minimum of an image")
                    .args(&[
                        arg!(image: <IMAGE> "FITS file or CASA image").value_hint(FilePath),
                        arg!(--local "Find the minimum near the maximum only"),
                    ]),
                Command::new("quality")
                    .about("Check that an image is no worse than the previous iteration")
                    .args(&[
                        arg!(image: <IMAGE> "FITS file or CASA image").value_hint(FilePath),
                        float_arg(arg!(--"prev-max" <VALUE> "Maximum of the previous image")),
                        float_arg(arg!(--"prev-min" <VALUE> "Minimum of the previous image")),
                        float_arg(arg!(--"cur-max" <VALUE> "Maximum of the current image")),
                        float_arg(arg!(--"cur-min" <VALUE> "Minimum of the current image")),
                        arg!(--"no-reorder" "Always compare against the previous image")
                            .help_heading("HISTORY"),
                    ]),
                Command::new("caltime")
                    .about("Find the time of the calibration tables to apply")
                    .args(&[
                        arg!(msname: <MS> "Measurement set name"),
                        arg!(--"caltable-dir" <DIR> "Where the calibration tables are")
                            .default_value(DEFAULT_CALTABLE_DIR)
                            .required(false),
                    ]),
                Command::new("sources").about("List the bright sources"),
                Command::new("flag-summary")
                    .about("Count the flagged solutions in a calibration table")
                    .arg(arg!(caltable: <CALTABLE> "Calibration table").value_hint(FilePath)),
                Command::new("restore-flags")
                    .about("Restore, then delete, the last saved flag version")
                    .arg(arg!(ms: <MS> "Measurement set").value_hint(FilePath)),
                Command::new("get-keyword")
                    .about("Print a table keyword")
                    .args(&[
                        arg!(table: <TABLE> "CASA table").value_hint(FilePath),
                        arg!(keyword: <KEYWORD> "Keyword name"),
                        kind_arg(),
                    ]),
                Command::new("put-keyword")
                    .about("Set a table keyword")
                    .args(&[
                        arg!(table: <TABLE> "CASA table").value_hint(FilePath),
                        arg!(keyword: <KEYWORD> "Keyword name"),
                        arg!(value: <VALUE> "New value").allow_hyphen_values(true),
                        kind_arg(),
                    ]),
                Command::new("helio")
                    .about("Convert an image to heliocentric coordinates")
                    .args(&[
                        arg!(ms: <MS> "Measurement set the image was made from")
                            .value_hint(FilePath),
                        arg!(image: <IMAGE> "FITS file or CASA image").value_hint(FilePath),
                        arg!(--"import-command" <COMMAND> "Command which imports FITS images")
                            .default_value("importfits")
                            .required(false),
                        arg!(--"regrid-command" <COMMAND> "Command which does the regridding")
                            .default_value("imreg")
                            .required(false),
                    ]),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_list_ms_matches(matches: &clap::ArgMatches) -> Result<Self, LwacalimError> {
        let mut cluster = match matches.values_of("hosts") {
            Some(specs) => ClusterConfig::from_specs(specs, 1)?,
            None => ClusterConfig::default(),
        };
        cluster.num_workers = match matches.value_of_t::<usize>("workers") {
            Ok(0) => {
                return Err(InvalidCommandLineArgument {
                    option: "--workers <COUNT>".into(),
                    expected: "at least one worker".into(),
                    received: "0".into(),
                }
                .into())
            }
            Ok(n) => n,
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => cluster.hosts.len().max(1),
                _ => return Err(err.into()),
            },
        };
        Ok(Self::ListMs {
            cluster,
            lister: SshLister {
                program: matches.value_of("ssh").unwrap_or("ssh").to_string(),
                connect_timeout_s: matches.value_of_t("connect-timeout")?,
                command_timeout_s: matches.value_of_t("command-timeout")?,
            },
            subdir: matches.value_of("subdir").unwrap_or_default().to_string(),
            draw_progress: !matches.is_present("no-draw-progress"),
        })
    }

    fn parse_kind(matches: &clap::ArgMatches) -> KeywordKind {
        matches
            .value_of("type")
            .and_then(KeywordKind::from_name)
            .unwrap_or(KeywordKind::Str)
    }

    /// Parse the command line.
    ///
    /// # Errors
    ///
    /// [`LwacalimError::ClapError`] if the arguments don't parse, including
    /// when help or the version is requested.
    pub fn from_args<I, T>(args: I) -> Result<Self, LwacalimError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);
        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let path = |m: &clap::ArgMatches, id: &str| -> PathBuf {
            m.value_of(id).map(PathBuf::from).unwrap_or_default()
        };
        let string = |m: &clap::ArgMatches, id: &str| -> String {
            m.value_of(id).unwrap_or_default().to_string()
        };

        let task = match matches.subcommand() {
            Some(("list-ms", m)) => Self::parse_list_ms_matches(m)?,
            Some(("maxmin", m)) => Self::MaxMin {
                image: path(m, "image"),
                local: m.is_present("local"),
            },
            Some(("quality", m)) => Self::Quality {
                image: path(m, "image"),
                history: ExtremaHistory {
                    max: [m.value_of_t("prev-max")?, m.value_of_t("cur-max")?],
                    min: [m.value_of_t("prev-min")?, m.value_of_t("cur-min")?],
                },
                reorder: !m.is_present("no-reorder"),
            },
            Some(("caltime", m)) => Self::CalTime {
                msname: string(m, "msname"),
                caltable_dir: path(m, "caltable-dir"),
            },
            Some(("sources", _)) => Self::Sources,
            Some(("flag-summary", m)) => Self::FlagSummary {
                caltable: path(m, "caltable"),
            },
            Some(("restore-flags", m)) => Self::RestoreFlags { ms: path(m, "ms") },
            Some(("get-keyword", m)) => Self::GetKeyword {
                table: path(m, "table"),
                keyword: string(m, "keyword"),
                kind: Self::parse_kind(m),
            },
            Some(("put-keyword", m)) => Self::PutKeyword {
                table: path(m, "table"),
                keyword: string(m, "keyword"),
                value: Self::parse_kind(m).parse(m.value_of("value").unwrap_or_default())?,
            },
            Some(("helio", m)) => Self::Helio {
                ms: path(m, "ms"),
                image: path(m, "image"),
                regridder: CommandRegridder::new(
                    string(m, "import-command"),
                    string(m, "regrid-command"),
                ),
            },
            _ => unreachable!("a subcommand is required, enforced by clap"),
        };
        Ok(task)
    }

    /// Carry out the task, writing results to `out`.
    ///
    /// Returns `false` if the task completed, but only partially: some hosts
    /// couldn't be listed, the image got worse, or the heliocentric
    /// conversion failed.
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation fails with.
    pub fn run<W: Write>(&self, out: &mut W) -> Result<bool, LwacalimError> {
        match self {
            Self::ListMs {
                cluster,
                lister,
                subdir,
                draw_progress,
            } => {
                let report = list_msfiles(lister, cluster, subdir, *draw_progress)?;
                let mut ms_table = table!(["path", "timestamp", "frequency"]);
                ms_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
                for record in &report.records {
                    ms_table.add_row(row![record.path, record.timestamp, record.frequency]);
                }
                ms_table.print(out)?;
                for (host, e) in &report.failures {
                    warn!("{host} was not searched: {e}");
                }
                Ok(report.is_complete())
            }
            Self::MaxMin { image, local } => {
                let (max, min) = get_image_maxmin(image, *local)?;
                writeln!(out, "{max} {min}")?;
                Ok(true)
            }
            Self::Quality {
                image,
                history,
                reorder,
            } => {
                let assessment = check_image_quality(image, *history, *reorder)?;
                let next = assessment.history;
                writeln!(
                    out,
                    "{} --prev-max={} --cur-max={} --prev-min={} --cur-min={}",
                    if assessment.passed { "passed" } else { "failed" },
                    next.max[0],
                    next.max[1],
                    next.min[0],
                    next.min[1]
                )?;
                Ok(assessment.passed)
            }
            Self::CalTime {
                msname,
                caltable_dir,
            } => {
                let m = get_selfcal_time_to_apply(msname, caltable_dir)?;
                info!("{} is {} s from {msname}", m.timestr, m.separation_s);
                writeln!(out, "{}", m.timestr)?;
                Ok(true)
            }
            Self::Sources => {
                let mut src_table =
                    table!(["label", "position", "flux [Jy]", "alpha", "ra [deg]", "dec [deg]"]);
                src_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
                for source in get_strong_source_list() {
                    let radec = source.radec()?;
                    src_table.add_row(row![r =>
                        source.label,
                        source.position,
                        source.flux_jy,
                        source.spectral_index,
                        format!("{:.4}", radec.ra.to_degrees()),
                        format!("{:.4}", radec.dec.to_degrees())
                    ]);
                }
                src_table.print(out)?;
                Ok(true)
            }
            Self::FlagSummary { caltable } => {
                for line in get_flagged_solution_num(caltable)?.lines() {
                    writeln!(out, "{line}")?;
                }
                Ok(true)
            }
            Self::RestoreFlags { ms } => {
                let name = restore_flag(ms)?;
                info!("restored and deleted flag version {name}");
                writeln!(out, "{name}")?;
                Ok(true)
            }
            Self::GetKeyword {
                table,
                keyword,
                kind,
            } => {
                writeln!(out, "{}", get_keyword(table, keyword, *kind)?)?;
                Ok(true)
            }
            Self::PutKeyword {
                table,
                keyword,
                value,
            } => {
                put_keyword(table, keyword, value)?;
                Ok(true)
            }
            Self::Helio {
                ms,
                image,
                regridder,
            } => match convert_to_heliocentric_coords(ms, image, regridder) {
                Ok(helio) => {
                    writeln!(out, "{}", helio.display())?;
                    Ok(true)
                }
                Err(e) => {
                    warn!("Could not convert to heliocentric coordinates: {e}");
                    writeln!(out, "{}", helio_image_name(image).display())?;
                    Ok(false)
                }
            },
        }
    }
}

/// Run the command line given by `args`, printing results to stdout.
///
/// Returns the exit code: 0 on success, 1 on error, 2 if the task only
/// partially succeeded (see [`Task::run`]).
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let task = match Task::from_args(args) {
        Ok(task) => task,
        Err(LwacalimError::ClapError(inner)) => {
            trace!("clap error: {:?}", inner.kind());
            // Swallow broken pipe errors
            let _ = inner.print();
            return match inner.kind() {
                clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };
    debug!("{}", BuildInfo);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match task.run(&mut out) {
        Ok(true) => 0,
        Ok(false) => 2,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

#[cfg(test)]
mod argparse_tests {
    use super::*;

    #[test]
    fn test_parse_missing_subcommand() {
        assert!(matches!(
            Task::from_args(["lwacalim"]),
            Err(LwacalimError::ClapError(_))
        ));
    }

    #[test]
    fn test_parse_missing_input() {
        match Task::from_args(["lwacalim", "maxmin"]) {
            Err(LwacalimError::ClapError(inner)) => assert!(matches!(
                inner.kind(),
                clap::ErrorKind::MissingRequiredArgument
            )),
            Err(e) => panic!("expected missing required argument error, not {e}"),
            Ok(_) => panic!("expected error, but got Ok(_)"),
        }
    }

    #[test]
    fn test_parse_list_ms_defaults() {
        match Task::from_args(["lwacalim", "list-ms", "20230318"]).unwrap() {
            Task::ListMs {
                cluster,
                lister,
                subdir,
                draw_progress,
            } => {
                assert_eq!(cluster.hosts.len(), 7);
                assert_eq!(cluster.num_workers, 7);
                assert_eq!(lister.program, "ssh");
                assert_eq!(lister.connect_timeout_s, 10);
                assert_eq!(lister.command_timeout_s, 60);
                assert_eq!(subdir, "20230318");
                assert!(draw_progress);
            }
            other => panic!("expected list-ms, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_list_ms_hosts() {
        let args = [
            "lwacalim",
            "list-ms",
            "--hosts",
            "a:/x",
            "b:/y",
            "--workers",
            "1",
            "--command-timeout",
            "5",
            "--no-draw-progress",
        ];
        match Task::from_args(args).unwrap() {
            Task::ListMs {
                cluster,
                lister,
                subdir,
                draw_progress,
            } => {
                assert_eq!(lister.command_timeout_s, 5);
                assert_eq!(cluster.hosts.len(), 2);
                assert_eq!(cluster.hosts[1].data_root, "/y");
                assert_eq!(cluster.num_workers, 1);
                assert_eq!(subdir, "");
                assert!(!draw_progress);
            }
            other => panic!("expected list-ms, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_list_ms_invalid() {
        assert!(matches!(
            Task::from_args(["lwacalim", "list-ms", "--workers", "0"]),
            Err(LwacalimError::CLIError(_))
        ));
        assert!(matches!(
            Task::from_args(["lwacalim", "list-ms", "--hosts", "nocolon"]),
            Err(LwacalimError::Name(_))
        ));
        assert!(matches!(
            Task::from_args(["lwacalim", "list-ms", "--workers", "many"]),
            Err(LwacalimError::ClapError(_))
        ));
    }

    #[test]
    fn test_parse_quality() {
        let args = [
            "lwacalim",
            "quality",
            "img.fits",
            "--prev-max",
            "10",
            "--prev-min",
            "-0.1",
            "--no-reorder",
        ];
        match Task::from_args(args).unwrap() {
            Task::Quality {
                image,
                history,
                reorder,
            } => {
                assert_eq!(image, PathBuf::from("img.fits"));
                assert_eq!(history.max, [10.0, 0.0]);
                assert_eq!(history.min, [-0.1, 0.0]);
                assert!(!reorder);
            }
            other => panic!("expected quality, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_keywords() {
        match Task::from_args(["lwacalim", "get-keyword", "a.gcal", "VisCal"]).unwrap() {
            Task::GetKeyword { kind, keyword, .. } => {
                assert_eq!(kind, KeywordKind::Str);
                assert_eq!(keyword, "VisCal");
            }
            other => panic!("expected get-keyword, got {other:?}"),
        }
        let args = ["lwacalim", "put-keyword", "a.gcal", "N", "7", "--type", "int"];
        match Task::from_args(args).unwrap() {
            Task::PutKeyword { value, .. } => assert_eq!(value, KeywordValue::Int(7)),
            other => panic!("expected put-keyword, got {other:?}"),
        }
        assert!(matches!(
            Task::from_args(["lwacalim", "put-keyword", "a.gcal", "N", "x", "--type", "int"]),
            Err(LwacalimError::Table(_))
        ));
        assert!(matches!(
            Task::from_args(["lwacalim", "get-keyword", "a.gcal", "N", "--type", "complex"]),
            Err(LwacalimError::ClapError(_))
        ));
    }

    #[test]
    fn test_parse_helio() {
        match Task::from_args(["lwacalim", "helio", "a.ms", "sun.fits"]).unwrap() {
            Task::Helio { regridder, .. } => {
                assert_eq!(regridder, CommandRegridder::new("importfits", "imreg"));
            }
            other => panic!("expected helio, got {other:?}"),
        }
    }
}
