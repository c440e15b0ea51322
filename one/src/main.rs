//! AquaFlux runs the vault transaction sync service as a single binary.
#![deny(missing_docs)]

use anyhow::Result;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    aquaflux_one::run().await
}
