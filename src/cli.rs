//! Binary entry point shared by `git-remote-blossom` and `git-remote-nostr`.
//!
//! Git invokes a remote helper as `git-remote-<scheme> <remote> <url>`.
//! Both binaries accept both URL schemes (the `nostr://` form is the same
//! protocol under its older name), so they share this entry verbatim.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::errors::HelperError;
use crate::git::Git;
use crate::helper::Helper;
use crate::nostr::relay::WsRelay;
use crate::utils::Verbosity;

/// Run a helper session over stdio; the process exit code mirrors the
/// outcome (0 clean, 1 on any fatal error).
pub async fn run() -> ExitCode {
    // Developer diagnostics go to stderr; stdout belongs to git.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let mut args = std::env::args().skip(1);
    let (Some(remote_name), Some(url)) = (args.next(), args.next()) else {
        eprintln!("usage: git-remote-blossom <remote> <url>");
        return ExitCode::FAILURE;
    };

    let git = Git::new();
    let settings = match Settings::load(&git, &remote_name, &url).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let relay = Box::new(WsRelay::new(settings.relay.clone()));
    let mut helper = Helper::from_stdio(settings, git, relay);
    match helper.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, helper.verbosity());
            ExitCode::FAILURE
        }
    }
}

fn report(error: &HelperError, verbosity: Verbosity) {
    if verbosity >= Verbosity::Debug {
        eprintln!("error: {error:?}");
    } else {
        eprintln!("error: {error} (run with -v for details)");
    }
}
