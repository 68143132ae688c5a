//! Local feed server for end-to-end runs against a known dataset.
//!
//! Serves the 14-packet reference book. A stream-all request streams the
//! book (optionally withholding every n-th packet) and then closes the
//! connection; resend requests are answered one frame each for as long as
//! the client keeps the connection open.
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use abx_feed::wire::{CALL_RESEND, CALL_STREAM_ALL, Packet, REQUEST_LEN};

#[derive(Debug, Parser)]
#[command(about = "Serve the reference packet stream for local end-to-end runs")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Withhold every n-th packet from the initial stream (0 = deliver all)
    #[arg(long, default_value_t = 0)]
    drop_every: usize,
}

fn reference_packets() -> Vec<Packet> {
    fn p(symbol: &[u8; 4], side: u8, quantity: i32, price: i32, sequence: i32) -> Packet {
        Packet {
            symbol: *symbol,
            side,
            quantity,
            price,
            sequence,
        }
    }
    vec![
        p(b"AAPL", b'B', 50, 100, 1),
        p(b"AAPL", b'B', 30, 98, 2),
        p(b"AAPL", b'S', 20, 101, 3),
        p(b"AAPL", b'S', 10, 102, 4),
        p(b"MSFT", b'B', 40, 50, 5),
        p(b"MSFT", b'S', 30, 55, 6),
        p(b"MSFT", b'S', 20, 57, 7),
        p(b"AMZN", b'B', 25, 150, 8),
        p(b"AMZN", b'S', 15, 155, 9),
        p(b"AMZN", b'B', 20, 148, 10),
        p(b"META", b'B', 10, 3000, 11),
        p(b"META", b'B', 5, 2999, 12),
        p(b"META", b'S', 15, 3020, 13),
        p(b"AMZN", b'S', 10, 3015, 14),
    ]
}

fn handle_client(mut stream: TcpStream, book: &[Packet], drop_every: usize) -> Result<()> {
    loop {
        let mut request = [0u8; REQUEST_LEN];
        match stream.read_exact(&mut request) {
            Ok(()) => {}
            // Client went away between requests; nothing owed.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("read request frame"),
        }
        match request[0] {
            CALL_STREAM_ALL => {
                let mut sent = 0usize;
                for (i, packet) in book.iter().enumerate() {
                    if drop_every != 0 && (i + 1) % drop_every == 0 {
                        continue; // withheld; the client has to ask again
                    }
                    stream
                        .write_all(&packet.encode())
                        .context("write packet frame")?;
                    sent += 1;
                }
                info!("streamed {sent} of {} packets, closing stream", book.len());
                // Dropping the stream closes the connection, which is the
                // end-of-stream signal for the initial stream.
                return Ok(());
            }
            CALL_RESEND => {
                let seq = i32::from(request[1]);
                match book.iter().find(|p| p.sequence == seq) {
                    Some(packet) => {
                        stream
                            .write_all(&packet.encode())
                            .context("write resend frame")?;
                        info!("resent sequence {seq}");
                    }
                    None => warn!("resend for unknown sequence {seq}, no reply sent"),
                }
            }
            other => warn!("unknown call type {other}, ignoring request"),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let book = reference_packets();

    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .with_context(|| format!("bind 127.0.0.1:{}", args.port))?;
    println!(
        "Serving {} reference packets on 127.0.0.1:{}",
        book.len(),
        args.port
    );

    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let peer = stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                info!("client connected: {peer}");
                if let Err(e) = handle_client(stream, &book, args.drop_every) {
                    warn!("client {peer} failed: {e:#}");
                }
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
    Ok(())
}
