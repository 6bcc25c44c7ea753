//! # coffer CLI
//!
//! The command-line interface for coffer, a content-tracking archive
//! manager with checksummed commits and peer-to-peer synchronisation.
//!
//! ## Quick start
//!
//! ```bash
//! coffer init photos
//! coffer add 2024-07/
//! coffer commit --msg "summer import"
//! coffer sync ssh://user@nas:/srv/photos
//! ```
//!
//! ## Exit codes
//!
//! - `0`: success
//! - `1`: non-fatal issues found (modifications detected, duplicates
//!   listed, a file skipped)
//! - `-1`: fatal error (rendered as a miette report)

use std::io::IsTerminal;
use std::process::exit;

use coffer::cli::Cli;

fn main() {
    // Install miette's fancy panic and error report handler
    miette::set_panic_hook();

    // Configure miette handler based on terminal capabilities; a simpler
    // handler serves non-TTY environments (pipes, cron, ssh transport).
    let hook_result = if std::io::stderr().is_terminal() {
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::unicode_nocolor())
                    .with_context_lines(3),
            )
        }))
    } else {
        miette::set_hook(Box::new(|_| {
            Box::new(
                miette::GraphicalReportHandler::new()
                    .with_theme(miette::GraphicalTheme::none())
                    .with_context_lines(0),
            )
        }))
    };
    if let Err(error) = hook_result {
        eprintln!("Error: {error}");
    }

    let cli = Cli::parse_args();

    match coffer::commands::execute(&cli) {
        Ok(code) => exit(code),
        Err(error) => {
            eprintln!("{:?}", miette::Report::new(error));
            exit(-1);
        }
    }
}
