use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use abx_feed::gaps;
use abx_feed::record::{CaptureFrame, CaptureHeader, read_frame};
use abx_feed::wire::Packet;

#[derive(Debug, Parser)]
#[command(about = "Play a recorded capture back: verify framing, report gaps, dump packets")]
struct Args {
    /// Input file path to read (recorded .bin)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Print one line per packet
    #[arg(long, default_value_t = false)]
    dump: bool,

    /// Number of packets to print when dumping (0 = all)
    #[arg(long, default_value_t = 0)]
    top: usize,

    /// Emit the dataset as a JSON array on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rdr = BufReader::new(
        File::open(&args.input).with_context(|| format!("open {:?}", args.input))?,
    );

    let mut header: Option<CaptureHeader> = None;
    let mut packets: Vec<Packet> = Vec::new();
    let mut frames = 0usize;
    while let Some(frame) = read_frame(&mut rdr).with_context(|| format!("frame {frames}"))? {
        frames += 1;
        match frame {
            CaptureFrame::Header(h) => {
                if header.is_some() {
                    bail!("capture contains more than one header frame");
                }
                header = Some(h);
            }
            CaptureFrame::Packet(p) => packets.push(p),
        }
    }
    let Some(header) = header else {
        bail!("capture has no header frame");
    };
    if !packets.windows(2).all(|w| w[0].sequence < w[1].sequence) {
        bail!("capture is not strictly ascending by sequence");
    }

    if args.json {
        let rows: Vec<_> = packets
            .iter()
            .map(|p| {
                json!({
                    "symbol": p.symbol_str(),
                    "buysellindicator": (p.side as char).to_string(),
                    "quantity": p.quantity,
                    "price": p.price,
                    "packetSequence": p.sequence,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if args.dump {
        let limit = if args.top == 0 { packets.len() } else { args.top };
        for p in packets.iter().take(limit) {
            println!(
                "{:>6}  {}  {}  {:>8} x {:>8}",
                p.sequence,
                p.symbol_str(),
                p.side as char,
                p.quantity,
                p.price
            );
        }
    }

    let missing = gaps::missing_sequences(packets.iter().map(|p| p.sequence), header.max_seq);
    eprintln!(
        "Read {} frame(s): {} packet(s) from {}:{} (capture v{}). Expected 1..={}; {}.",
        frames,
        packets.len(),
        header.host,
        header.port,
        header.version,
        header.max_seq,
        if missing.is_empty() {
            "no gaps".to_string()
        } else {
            format!("missing {missing:?}")
        }
    );
    Ok(())
}
