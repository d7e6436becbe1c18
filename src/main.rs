//! Newline-framed echo server on a single-threaded reactor.

use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::Parser;

use reflow::{AcceptorHandler, Reactor};

#[derive(Parser, Debug)]
#[command(name = "reflow", version, about)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, env = "PORT", default_value_t = 9000)]
    port: u16,

    /// Number of background worker threads.
    #[arg(long, env = "WORKERS", default_value_t = 2)]
    workers: usize,

    /// Expose Prometheus metrics at http://localhost:9100/metrics.
    #[arg(long)]
    metrics: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = serve(&args) {
        log::error!("setup failed: {err}");
        process::exit(1);
    }
}

fn serve(args: &Args) -> io::Result<()> {
    if args.workers == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "WORKERS must be a positive integer",
        ));
    }

    if args.metrics {
        let port = 9100;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([127, 0, 0, 1], port))
            .install()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        log::info!("metrics at http://localhost:{port}/metrics");
    }

    let mut reactor = Reactor::new(args.workers)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let acceptor = AcceptorHandler::bind(addr)?;
    reactor.register(Arc::new(acceptor))?;

    reactor.run();
    unreachable!("the reactor loop does not return");
}
