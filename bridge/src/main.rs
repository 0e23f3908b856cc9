#[tokio::main]
async fn main() -> anyhow::Result<()> {
    w100_bridge::host::run().await
}
