use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;

use rudp_chat::chat::{ClientMessage, ServerMessage};
use rudp_chat::{connect, Config};

#[derive(Parser)]
#[command(name = "chat-client", about = "Interactive client for the reliable-UDP chat server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    #[arg(long)]
    server: SocketAddr,

    #[arg(long)]
    username: String,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let conn = Arc::new(connect(args.bind, args.server, Config::default()).expect("connect failed"));
    conn.send(
        ClientMessage::Login {
            username: args.username.clone(),
        }
        .encode(),
    )
    .expect("login failed");

    let reader_conn = conn.clone();
    thread::spawn(move || loop {
        match reader_conn.recv() {
            Ok(Some(bytes)) => {
                if let Ok(msg) = ServerMessage::decode(&bytes) {
                    print_server_message(&msg);
                }
            }
            Ok(None) => {
                println!("-- connection closed by server --");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("-- connection error: {e} --");
                std::process::exit(1);
            }
        }
    });

    let current_room = Arc::new(Mutex::new("general".to_string()));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let msg = if line == "/quit" {
            let _ = conn.send(ClientMessage::Quit.encode());
            break;
        } else if let Some(room) = line.strip_prefix("/join ") {
            *current_room.lock().unwrap() = room.to_string();
            ClientMessage::Join {
                room: room.to_string(),
            }
        } else if let Some(room) = line.strip_prefix("/leave ") {
            ClientMessage::Leave {
                room: room.to_string(),
            }
        } else if let Some(rest) = line.strip_prefix('@') {
            let mut parts = rest.splitn(2, ' ');
            let to = parts.next().unwrap_or_default().to_string();
            let body = parts.next().unwrap_or_default().to_string();
            ClientMessage::Direct { to, body }
        } else {
            ClientMessage::Room {
                room: current_room.lock().unwrap().clone(),
                body: line.to_string(),
            }
        };

        if let Err(e) = conn.send(msg.encode()) {
            eprintln!("-- send failed: {e} --");
            break;
        }
    }

    let _ = conn.close();
}

fn print_server_message(msg: &ServerMessage) {
    match msg {
        ServerMessage::Welcome { username } => println!("-- welcome, {username} --"),
        ServerMessage::Error { reason } => println!("-- error: {reason} --"),
        ServerMessage::Joined { room } => println!("-- joined {room} --"),
        ServerMessage::Left { room } => println!("-- left {room} --"),
        ServerMessage::History { room, lines } => {
            println!("-- history for {room} --");
            for line in lines {
                println!("{line}");
            }
        }
        ServerMessage::RoomMessage { room, from, body } => println!("[{room}] {from}: {body}"),
        ServerMessage::Direct { from, body } => println!("(direct) {from}: {body}"),
    }
}
