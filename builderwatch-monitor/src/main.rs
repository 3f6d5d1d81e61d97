use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    builderwatch_monitor::run().await?;
    Ok(())
}
