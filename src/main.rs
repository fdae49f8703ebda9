use clap::Parser;
use color_eyre::eyre::WrapErr;
use handoff_kv::Server;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use tracing_subscriber::filter::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "HANDOFF_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    addr: IpAddr,

    /// Port to listen on.
    #[arg(long, short, env = "HANDOFF_PORT", default_value_t = 7878)]
    port: u16,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind((args.addr, args.port))
        .with_context(|| format!("failed to bind {}:{}", args.addr, args.port))?;
    Server::new().run(listener).context("server terminated abnormally")?;
    Ok(())
}
