use std::path::PathBuf;

use reels_tui::RunOptions;

const HELP: &str = "Reels-TUI: swipe through short video reels from the terminal.

Usage: reels-tui [OPTIONS] [LOCATION]

  LOCATION             Reel to start with, e.g. /reels/<title>-<id>?src=<source>
  --config <path>      Read configuration from <path>
  --version, -V        Show version and exit
  --help,    -h        Show this help message";

enum Cli {
    Exit,
    Run(RunOptions),
}

fn main() {
    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Cli::Exit) => return,
        Ok(Cli::Run(options)) => options,
        Err(err) => {
            eprintln!("error: {err}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = reels_tui::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Cli> {
    let mut options = RunOptions::default();
    let mut saw_flag = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Reels-TUI {}", reels_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!("{HELP}");
                saw_flag = true;
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
                options.config_file = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--config=") => {
                options.config_file = Some(PathBuf::from(&flag["--config=".len()..]));
            }
            flag if flag.starts_with('-') => anyhow::bail!("unknown flag {flag}"),
            location => {
                if options.location.is_some() {
                    anyhow::bail!("unexpected argument {location}");
                }
                options.location = Some(location.to_string());
            }
        }
    }
    if saw_flag {
        return Ok(Cli::Exit);
    }
    Ok(Cli::Run(options))
}
