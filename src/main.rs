use clap::{Arg, ArgAction, ArgMatches, Command};
use scl_runtime::config::{LogFormat, LoggingConfig, SclConfig};

mod commands;
mod scenario;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("scl")
        .version(VERSION)
        .about("Structured Cognitive Loop with human-in-the-loop gating")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run the weather-based travel planning scenario")
                .arg(
                    Arg::new("mode")
                        .short('m')
                        .long("mode")
                        .value_name("MODE")
                        .value_parser(["interactive", "auto", "disabled"])
                        .help("How human decisions are obtained"),
                )
                .arg(
                    Arg::new("max-loops")
                        .long("max-loops")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u64))
                        .help("Maximum cognitive cycles"),
                )
                .arg(
                    Arg::new("base-temp")
                        .long("base-temp")
                        .value_name("FAHRENHEIT")
                        .value_parser(clap::value_parser!(f64))
                        .help("Reference temperature for choosing a destination"),
                )
                .arg(
                    Arg::new("llm")
                        .long("llm")
                        .action(ArgAction::SetTrue)
                        .help("Use an OpenAI-compatible endpoint instead of the rule-based planner"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the glassbox report as JSON"),
                ),
        )
        .subcommand(
            Command::new("demo")
                .about("Exercise the freeze/thaw manager directly")
                .subcommand_required(true)
                .subcommand(Command::new("freeze").about("Freeze before an email, then approve"))
                .subcommand(
                    Command::new("rejection").about("Reject an email and show the virtual cycle"),
                ),
        )
        .subcommand(
            Command::new("policy")
                .about("Show the intervention level for a proposed action")
                .arg(
                    Arg::new("tool")
                        .short('t')
                        .long("tool")
                        .value_name("NAME")
                        .required(true)
                        .help("Tool name"),
                )
                .arg(
                    Arg::new("confidence")
                        .long("confidence")
                        .value_name("X")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("1.0")
                        .help("Cognition confidence"),
                )
                .arg(
                    Arg::new("loop")
                        .long("loop")
                        .value_name("N")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0")
                        .help("Completed cycles so far"),
                )
                .arg(
                    Arg::new("final")
                        .long("final")
                        .action(ArgAction::SetTrue)
                        .help("Treat the action as final"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<SclConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => SclConfig::from_file(path)?,
        None => SclConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_logging(&config.logging);

    match matches.subcommand() {
        Some(("run", sub_matches)) => commands::run::run(sub_matches, config).await,
        Some(("demo", sub_matches)) => commands::demo::run(sub_matches),
        Some(("policy", sub_matches)) => commands::policy::run(sub_matches, &config),
        _ => {
            println!("scl v{}", VERSION);
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_run_flags() {
        let matches = cli()
            .try_get_matches_from(["scl", "run", "--mode", "auto", "--max-loops", "5"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(sub.get_one::<String>("mode").unwrap(), "auto");
        assert_eq!(*sub.get_one::<u64>("max-loops").unwrap(), 5);
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(cli()
            .try_get_matches_from(["scl", "run", "--mode", "sometimes"])
            .is_err());
    }

    #[test]
    fn test_load_config_rejects_invalid_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[policy]\nconfirm_on_confidence_below = 3.0").unwrap();
        let path = file.path().to_str().unwrap();

        let matches = cli()
            .try_get_matches_from(["scl", "--config", path, "policy", "--tool", "send_email"])
            .unwrap();
        let err = load_config(&matches).unwrap_err();
        assert!(err.to_string().contains("confirm_on_confidence_below"));
    }

    #[test]
    fn test_demo_requires_subcommand() {
        assert!(cli().try_get_matches_from(["scl", "demo"]).is_err());
    }
}
