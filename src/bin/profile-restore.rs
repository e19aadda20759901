//! Profile photo restoration batch job
//!
//! Restores pending player photos, removes their background and publishes
//! them over SFTP. Configuration comes from flags, the environment or `.env`.

use profile_restore::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
