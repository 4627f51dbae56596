#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = examcore::run().await {
        eprintln!("examcore fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
