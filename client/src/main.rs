#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fanctl_client::host::run().await
}
