#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examcore::run_worker().await {
        eprintln!("examcore-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
