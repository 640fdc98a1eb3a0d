#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lightime_lib::run().await
}
