#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examhall::run_sweeper().await {
        eprintln!("examhall-sweeper fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
