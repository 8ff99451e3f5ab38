use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    pcount::tui::run().await
}
