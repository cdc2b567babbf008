use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    git_remote_blossom::cli::run().await
}
