use clap::{Arg, Command, ValueHint};
use pcq_cli::input::Input;
use pcq_cli::runner::Runner;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("PCQ_LOG", "error,pcq=info"))
        .init();

    let matches = Command::new("pcq")
        .version(clap::crate_version!())
        .about("Protein cluster quantification from peptide-spectrum matches")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("psm_paths")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to PSM tables (TSV) to process. Overrides the files listed in the \
                     configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("fasta")
                .short('f')
                .long("fasta")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to FASTA database used to map peptides to proteins. Overrides the \
                     FASTA file specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where node tables will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;
    runner.run()?;

    Ok(())
}
