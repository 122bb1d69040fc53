use anyhow::Result;
use teller::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();
    cli::run(args).await
}
