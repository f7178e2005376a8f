use clap::{value_parser, Arg, ArgAction, Command, ValueHint};
use kettle_cli::input::Input;
use kettle_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("kettle")
        .version(clap::crate_version!())
        .about("Semi-supervised confidence estimation for peptide-spectrum matches")
        .arg(
            Arg::new("pin_paths")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to tab-delimited PSM files to process. Overrides files listed in \
                     the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("parameters")
                .short('p')
                .long("parameters")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("dest_dir")
                .short('d')
                .long("dest_dir")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Directory where results will be written (default = current directory)")
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("file_root")
                .short('r')
                .long("file_root")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Prefix added to every output file name"),
        )
        .arg(
            Arg::new("train_fdr")
                .long("train_fdr")
                .value_parser(value_parser!(f64))
                .help("FDR threshold for selecting positive training examples (default = 0.01)"),
        )
        .arg(
            Arg::new("test_fdr")
                .long("test_fdr")
                .value_parser(value_parser!(f64))
                .help("FDR threshold used to select and report results (default = 0.01)"),
        )
        .arg(
            Arg::new("max_iter")
                .long("max_iter")
                .value_parser(value_parser!(usize))
                .help("Maximum number of training rounds per fold (default = 10)"),
        )
        .arg(
            Arg::new("direction")
                .long("direction")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Feature used to rank PSMs before the first model is trained, \
                     or `auto` (default = auto)",
                ),
        )
        .arg(
            Arg::new("folds")
                .long("folds")
                .value_parser(value_parser!(usize))
                .help("Number of cross-validation folds (default = 3)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for the fold assignment (default = 1)"),
        )
        .arg(
            Arg::new("aggregate")
                .long("aggregate")
                .action(ArgAction::SetTrue)
                .help("Report confidence over all input files jointly, instead of per file"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .num_args(0..=1)
                .default_missing_value("0")
                .value_parser(value_parser!(usize))
                .help(
                    "Train a distributed model on a pool of worker threads \
                     (default = # of CPUs)",
                ),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase logging verbosity (-v debug, -vv trace)"),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let mut logger = env_logger::Builder::default();
    logger
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("KETTLE_LOG", "error,kettle=info"));
    match matches.get_count("verbose") {
        0 => {}
        1 => {
            logger.filter_module("kettle", log::LevelFilter::Debug);
        }
        _ => {
            logger.filter_module("kettle", log::LevelFilter::Trace);
        }
    }
    logger.init();

    let mut input = Input::from_arguments(matches)?;
    input.resolve_workers(num_cpus::get());

    let runner = input.build().and_then(Runner::new)?;
    let search = runner.run()?;
    println!("{}", serde_json::to_string_pretty(&search)?);

    Ok(())
}
