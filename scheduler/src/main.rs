mod applier;
mod host;
mod poller;
mod publisher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
