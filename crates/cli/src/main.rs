use clap::Parser;
use colored::Colorize;
use pagewatch_cli::{app, cli::Cli, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match app::run(cli).await {
		Ok(outcome) => {
			if let Some(report) = &outcome.final_dump {
				eprintln!("final dump written to {}", report.output_dir.display());
			}
			eprintln!("{}", outcome.trigger.describe().dimmed());
		}
		Err(err) => {
			eprintln!("{} {err}", "error:".red().bold());
			if let Some(guidance) = err.guidance() {
				eprintln!("{} {guidance}", "hint:".yellow().bold());
			}
			std::process::exit(err.exit_code());
		}
	}
}
