use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use natlobby::transport::{MemoryNetwork, MemoryTransport};
use natlobby::{Reader, Session, SessionConfig, SessionStatus};

const API_VERSION: u8 = 1;

fn main() {
    env_logger::init();
    println!("Usage: lobby [NUM_CLIENTS]");
    let num_clients: usize = std::env::args().nth(1).and_then(|arg| arg.parse().ok()).unwrap_or(2);

    let server_addr: SocketAddr = "127.0.0.1:61111".parse().unwrap();
    let network = MemoryNetwork::with_rendezvous(server_addr);
    let config = SessionConfig::new(server_addr, num_clients + 1, API_VERSION);

    let mut host = Session::host(&config, network.endpoint("127.0.0.1:5000".parse().unwrap())).unwrap();
    run(&mut host, &mut []);
    let room = host.room_id().unwrap().to_string();
    println!("Hosting room {}", room);

    let mut clients: Vec<Session<MemoryTransport>> = (0..num_clients)
        .map(|i| {
            let addr = SocketAddr::from(([127, 0, 0, 1], 6000 + i as u16));
            Session::client(&config, &room, network.endpoint(addr)).unwrap()
        })
        .collect();
    run(&mut host, &mut clients);

    for client in clients.iter() {
        if client.status() != SessionStatus::Connected {
            println!("Client failed to join: {:?}", client.status());
            continue;
        }
        println!(
            "Client {:?}: {:?} ({}/{} players)",
            client.player_id(),
            client.status(),
            client.num_players(),
            client.max_players()
        );
    }
    host.start_game();

    // Every client reports a position, the host forwards it to the others.
    for client in clients.iter_mut() {
        let player_id = client.player_id().unwrap_or_default() as i32;
        let mut payload = vec![];
        natlobby::write_int(&mut payload, player_id);
        natlobby::write_float(&mut payload, player_id as f32 * 1.5);
        if let Err(e) = client.send(&payload) {
            println!("Failed to send position: {}", e);
        }
    }
    run(&mut host, &mut clients);
}

fn run(host: &mut Session<MemoryTransport>, clients: &mut [Session<MemoryTransport>]) {
    let start = Instant::now();
    let mut last_updated = Instant::now();
    while start.elapsed() < Duration::from_millis(100) {
        let now = Instant::now();
        let duration = now - last_updated;
        last_updated = now;

        host.update(duration);
        host.receive(|payload| print_position("host", payload));
        for client in clients.iter_mut() {
            let name = format!("client {}", client.player_id().unwrap_or_default());
            client.update(duration);
            client.receive(|payload| print_position(&name, payload));
        }

        thread::sleep(Duration::from_millis(10));
    }
}

fn print_position(receiver: &str, payload: &[u8]) {
    let mut reader = Reader::new(payload);
    match (reader.read_int(), reader.read_float()) {
        (Ok(player_id), Ok(x)) => println!("{} got position {} from player {}", receiver, x, player_id),
        _ => println!("{} got malformed payload", receiver),
    }
}
