//! Echo server: answers every message with itself on any protocol variant.
//!
//! Run with: `cargo run --example echo -- 0.0.0.0:8181`

use ws_engine::{async_trait, Callbacks, Message, Server, ServerConfig, UserContext};

struct Echo;

#[async_trait]
impl Callbacks for Echo {
    async fn on_connected(&self, ctx: &UserContext) -> anyhow::Result<()> {
        println!(
            "[{}] connected from {:?} speaking {:?} on {:?}",
            ctx.id(),
            ctx.remote_addr(),
            ctx.protocol(),
            ctx.path()
        );
        Ok(())
    }

    async fn on_receive(&self, ctx: &UserContext, message: Message) -> anyhow::Result<()> {
        ctx.send(message).await?;
        Ok(())
    }

    async fn on_disconnect(&self, ctx: &UserContext) -> anyhow::Result<()> {
        println!("[{}] disconnected", ctx.id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();

    let listen = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8181".to_string());
    let server = Server::new(ServerConfig::new(listen), Echo);
    let addr = server.start().await?;
    println!("Echo server on ws://{addr}/ (ctrl-c to stop)");

    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
