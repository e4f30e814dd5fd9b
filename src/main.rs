#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agent_relay::run().await
}
