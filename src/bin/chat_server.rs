use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use rudp_chat::chat::ChatServer;
use rudp_chat::Config;

#[derive(Parser)]
#[command(name = "chat-server", about = "Multi-user chat server over a reliable UDP transport")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    #[arg(long, default_value_t = 30)]
    metrics_interval_secs: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let server = ChatServer::bind(args.listen, Config::default()).expect("failed to bind");
    println!("chat-server listening on {}", server.local_addr());

    let _metrics = server.spawn_metrics_reporter(Duration::from_secs(args.metrics_interval_secs));

    server.run().expect("server loop exited");
}
