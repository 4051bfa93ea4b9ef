#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fanctl_device_sim::run().await
}
