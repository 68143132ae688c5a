use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use abx_feed::record::{self, CAPTURE_VERSION, CaptureFrame, CaptureHeader};
use abx_feed::{gaps, session};

#[derive(Debug, Parser)]
#[command(version, about = "Capture a complete, gap-free packet stream from a feed server")]
struct Args {
    /// Feed server host
    #[arg(long, env = "ABX_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Feed server port
    #[arg(long, env = "ABX_PORT", default_value_t = 3000)]
    port: u16,

    /// Output file path (.bin); defaults to captures/abx_YYYY_MM_DD.bin
    #[arg(long, env = "OUT_FILE")]
    out: Option<PathBuf>,
}

fn now_unix_ns() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn default_out_path() -> PathBuf {
    let date = if let Ok(now) = time::OffsetDateTime::now_local() {
        now.date()
    } else {
        // Fallback: use UNIX date from SystemTime
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        time::OffsetDateTime::from_unix_timestamp(secs)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
            .date()
    };
    let fname = format!(
        "abx_{}_{:02}_{:02}.bin",
        date.year(),
        date.month() as u8,
        date.day()
    );
    let mut p = PathBuf::from("captures");
    p.push(fname);
    p
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    env_logger::init();
    let args = Args::parse();

    let packets = session::run_session(&args.host, args.port)
        .with_context(|| format!("feed session against {}:{}", args.host, args.port))?;
    let max_seq = packets.last().map(|p| p.sequence).unwrap_or(0);
    let missing = gaps::missing_sequences(packets.iter().map(|p| p.sequence), max_seq);

    let out_path = args.out.clone().unwrap_or_else(default_out_path);
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).ok();
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&out_path)
        .with_context(|| format!("open {}", out_path.display()))?;
    let mut w = BufWriter::new(file);

    let header = CaptureHeader {
        version: CAPTURE_VERSION,
        created_unix_ns: now_unix_ns(),
        host: args.host.clone(),
        port: args.port,
        max_seq,
    };
    record::write_frame(&mut w, &CaptureFrame::Header(header)).context("write capture header")?;
    for packet in &packets {
        record::write_frame(&mut w, &CaptureFrame::Packet(*packet))
            .context("write packet frame")?;
    }
    w.flush().context("flush capture")?;

    if packets.is_empty() {
        println!("Captured 0 packets (the stream was empty) to {}", out_path.display());
    } else {
        println!(
            "Captured {} packet(s), sequences 1..={}, to {}",
            packets.len(),
            max_seq,
            out_path.display()
        );
    }
    if !missing.is_empty() {
        eprintln!(
            "warning: {} sequence(s) could not be recovered: {:?}",
            missing.len(),
            missing
        );
    }
    Ok(())
}
