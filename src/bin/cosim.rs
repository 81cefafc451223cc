//! Thin binary wrapper around [`cosim::runner`]: `cosim broker <config.toml>` or
//! `cosim core <config.toml>`.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cosim::runner::main().await
}
