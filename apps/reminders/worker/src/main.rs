//! Reminders Worker Service - Entry Point

#[tokio::main]
async fn main() -> eyre::Result<()> {
    reminders_worker::run().await
}
