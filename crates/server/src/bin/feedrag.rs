use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    feedrag_server::main_entry().await
}
