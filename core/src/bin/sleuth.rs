use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{App, Arg, ArgMatches};
use failure::{bail, Error};
use log::{error, info, warn};

use pronom::Catalog;
use sleuth::driver::{Driver, DriverError, Summary};
use sleuth::output::TemplateSink;
use sleuth::{registry, Config};

fn app() -> App<'static, 'static> {
    App::new("sleuth")
        .version(clap::crate_version!())
        .about("identify the file formats of digital objects")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("log verbose messages (-vv for trace)"),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("run (more) quietly"),
        )
        .arg(
            Arg::with_name("bufsize")
                .short("b")
                .long("bufsize")
                .takes_value(true)
                .value_name("BYTES")
                .help("size of the buffers matched against"),
        )
        .arg(
            Arg::with_name("recurse")
                .short("r")
                .long("recurse")
                .help("recurse into subdirectories"),
        )
        .arg(
            Arg::with_name("zip")
                .short("z")
                .long("zip")
                .help("identify the contents of zip containers"),
        )
        .arg(
            Arg::with_name("diagnose")
                .short("d")
                .long("diagnose")
                .help("report the most expensive formats and signatures"),
        )
        .arg(
            Arg::with_name("matchprintf")
                .long("matchprintf")
                .takes_value(true)
                .value_name("TEMPLATE")
                .help("template for match records"),
        )
        .arg(
            Arg::with_name("nomatchprintf")
                .long("nomatchprintf")
                .takes_value(true)
                .value_name("TEMPLATE")
                .help("template for no-match records"),
        )
        .arg(
            Arg::with_name("formats")
                .long("formats")
                .takes_value(true)
                .value_name("PATH")
                .help("JSON format catalog to load instead of the embedded one"),
        )
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .takes_value(true)
                .value_name("PATH")
                .conflicts_with("files")
                .help("file with one path to identify per line"),
        )
        .arg(
            Arg::with_name("files")
                .multiple(true)
                .value_name("FILE")
                .help("files or directories to identify"),
        )
}

fn setup_logging(level: log::LevelFilter) {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:5}] {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                if level == log::LevelFilter::Trace {
                    record.target()
                } else {
                    ""
                },
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
        .expect("failed to configure logging");
}

/// allow `\n` and `\t` in templates given on the command line.
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

fn config_from_args(args: &ArgMatches) -> Result<Config, Error> {
    let mut config = Config::default();

    if let Some(bufsize) = args.value_of("bufsize") {
        config.bufsize = bufsize.parse()?;
        if config.bufsize == 0 {
            bail!("bufsize must be at least 1");
        }
    }
    config.recurse = args.is_present("recurse");
    config.zip = args.is_present("zip");
    config.diagnose = args.is_present("diagnose");
    if let Some(template) = args.value_of("matchprintf") {
        config.match_template = unescape(template);
    }
    if let Some(template) = args.value_of("nomatchprintf") {
        config.nomatch_template = unescape(template);
    }

    Ok(config)
}

fn batch_paths(args: &ArgMatches) -> Result<Vec<PathBuf>, Error> {
    let paths: Vec<PathBuf> = if let Some(input) = args.value_of("input") {
        let file = fs::File::open(input)?;
        let mut paths = vec![];
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if !line.is_empty() {
                paths.push(PathBuf::from(line));
            }
        }
        paths
    } else {
        args.values_of("files")
            .map(|files| files.map(PathBuf::from).collect())
            .unwrap_or_default()
    };

    if paths.is_empty() {
        bail!("no files to identify (see --help)");
    }
    Ok(paths)
}

fn print_times(label: &str, entries: &[(String, Duration)]) {
    for (name, cost) in entries.iter() {
        let name: String = name.chars().take(15).collect();
        eprintln!("{:>6} {:>15} {:>6}msec", label, name, cost.as_millis());
    }
}

fn print_summary(summary: &Summary) {
    eprintln!(
        "sleuth: loaded    {:>6} formats in {:.4} sec",
        summary.formats,
        summary.compile_time.as_secs_f64()
    );

    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (summary.objects as f64 / secs) as u64
    } else {
        0
    };
    eprintln!(
        "sleuth: processed {:>6} objects in {:>8.2} msec, {} objects/sec",
        summary.objects,
        secs * 1000.0,
        rate
    );

    if let Some(top) = &summary.top_formats {
        print_times("Format", top);
    }
    if let Some(top) = &summary.top_signatures {
        print_times("Sig", top);
    }
}

fn run(args: &ArgMatches) -> Result<(), Error> {
    let config = config_from_args(args)?;
    let paths = batch_paths(args)?;

    let defs = match args.value_of("formats") {
        Some(path) => registry::from_file(Path::new(path))?,
        None => registry::builtin(),
    };
    let catalog = Catalog::load(defs)?;
    info!("loaded {} formats", catalog.len());

    let stdout = io::stdout();
    let sink = TemplateSink::new(
        stdout.lock(),
        &config.match_template,
        &config.nomatch_template,
    )?;

    let mut driver = Driver::new(config, &catalog, sink);

    let t0 = Instant::now();
    let result = driver.run(&paths);
    let elapsed = t0.elapsed();

    if let Err(e) = &result {
        if let Some(DriverError::Cancelled(path)) = e.downcast_ref::<DriverError>() {
            // records emitted so far are already on stdout.
            warn!("interrupted during: {}", path);
        }
    }

    if !args.is_present("quiet") {
        print_summary(&driver.summary(elapsed));
    }

    result
}

fn main() {
    better_panic::install();

    let matches = app().get_matches();

    let level = if matches.is_present("quiet") {
        log::LevelFilter::Warn
    } else {
        match matches.occurrences_of("verbose") {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    setup_logging(level);

    if let Err(e) = run(&matches) {
        error!("{}", e);
        std::process::exit(1);
    }
}
