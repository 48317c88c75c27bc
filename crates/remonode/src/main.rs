//! remonode - hosts a demo object over TCP and announces it on the LAN.
//!
//! The object is exposed at `Application.Demo` and emits `tick(Int)` every few
//! seconds to subscribed sessions. Other processes find the node
//! through discovery and call it with `remorun::Call` or a
//! `RemoteObjectProxy`.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use remopack::Kind;
use remopack::Value;
use remorpc::Outcome;
use remorun::Config;
use remorun::Discovery;
use remorun::ExposedObject;
use remorun::Registry;
use remorun::Runtime;
use remorun::Server;

const DEMO_PATH: &str = "Application.Demo";
const TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "remonode")]
#[command(about = "Serves a demo remote object and announces it via discovery")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// UDP discovery port (0 = configured default)
    #[arg(long, default_value = "0")]
    discovery_port: u16,

    /// Do not announce or look for other nodes
    #[arg(long)]
    no_discovery: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn demo_object() -> Arc<ExposedObject> {
    let started = Instant::now();
    ExposedObject::builder("Demo")
        .method("echo", &[Kind::Any], Kind::Any, |_, args| args[0].clone())
        .method("add", &[Kind::Double, Kind::Double], Kind::Double, |_, args| {
            let a = args[0].to_double().unwrap_or_default();
            let b = args[1].to_double().unwrap_or_default();
            Value::Double(a + b)
        })
        .method("uptime", &[], Kind::Int, move |_, _| {
            Value::Int(started.elapsed().as_secs().min(i32::MAX as u64) as i32)
        })
        .method("increment", &[], Kind::Int, |object, _| {
            let next = object
                .get_property("counter")
                .and_then(|v| v.to_int())
                .unwrap_or_default()
                .saturating_add(1);
            object.set_property("counter", Value::Int(next)).unwrap_or_default()
        })
        .outcome_method("divide", &[Kind::Double, Kind::Double], |_, args| {
            let a = args[0].to_double().unwrap_or_default();
            let b = args[1].to_double().unwrap_or_default();
            if b == 0.0 {
                Outcome::failure_with_code("DivideByZero", "Cannot divide by zero")
            } else {
                Outcome::success(a / b)
            }
        })
        .property("counter", Kind::Int, Value::Int(0), Some("counterChanged"))
        .property("motd", Kind::String, Value::from("hello from remonode"), None)
        .signal("tick", &[Kind::Int])
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting remonode");

    let runtime = Runtime::new(Config::from_env()).context("creating runtime")?;
    let demo = demo_object();
    let registry = Arc::new(Registry::new());
    registry
        .register(DEMO_PATH, demo.clone(), true)
        .context("registering demo object")?;

    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        let mut count = 0i32;
        loop {
            interval.tick().await;
            count = count.wrapping_add(1);
            demo.emit("tick", vec![Value::Int(count)]);
        }
    });

    let server = Server::new(runtime.clone(), registry.clone());
    let port = server
        .listen(SocketAddr::new(args.host, args.port))
        .await
        .context("starting server")?;
    info!(object = DEMO_PATH, %port, server = server.server_id(), "serving");

    let discovery = Discovery::new(runtime.clone());
    if !args.no_discovery {
        discovery.subscribe(|found| {
            info!(
                address = %found.address,
                port = found.port,
                user = %found.user,
                server = %found.server_id,
                "discovered node"
            );
        });
        let outcome = discovery.start(args.discovery_port).await;
        if !outcome.success {
            warn!(reason = %outcome.message, "discovery unavailable");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    if discovery.is_running().await {
        discovery.stop().await;
    }
    ticker.abort();
    server.close().await;
    Ok(())
}
