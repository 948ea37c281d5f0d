use anyhow::{Context, Result};
use lsp_gateway::Server;

fn main() -> Result<()> {
    Server::new()
        .context("create server")?
        .start()
        .context("start server")
}
