//! CLI front-end for the paced TS writer.
//!
//! Reads 188-byte TS packets from a file (or stdin, `-`) and feeds them
//! through a [`tswrite::Writer`] pipeline to a file/stdout/TCP/UDP sink,
//! paced either by a fixed byte rate or by the stream's own PCRs.
//!
//! Usage:
//!   tswrite [options] <input-file|-> <sink>
//!
//! `<sink>` is one of: `file:<path>`, `stdout`, `tcp:<host>:<port>`,
//! `udp:<host>:<port>[:<iface>]`.
//!
//! Options: -bitrate N | -byterate N | -nopcrs | -maxnowait N|off |
//! -waitfor N | -buffer N | -tsinpkt N | -prime N | -speedup PCT |
//! -pcr_scale PCT | -pwait MS | -cwait MS | -hd | -perturb SEED RANGE_MS 0|1

use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::process::ExitCode;

use tswrite::config::{CommandConfig, PacingConfig, PerturbConfig, RingConfig, TimingConfig, TimingMode, WriterConfig};
use tswrite::error::Error;
use tswrite::packet::{self, TS_PACKET_SIZE};
use tswrite::sink::{FileSink, Sink, StdoutSink, TcpSink, UdpSink};
use tswrite::{Outcome, Writer};

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(Outcome::Quit) => {
            log::info!("stream ended via peer QUIT command");
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tswrite: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> tswrite::Result<Outcome> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (cfg, nopcrs, positional) = parse_args(&args)?;

    if positional.len() != 2 {
        return Err(Error::Usage(
            "usage: tswrite [options] <input-file|-> <sink>".into(),
        ));
    }
    let input_path = &positional[0];
    let sink_spec = &positional[1];

    let sink = open_sink(sink_spec)?;
    let mut writer = Writer::buffered(cfg, sink, None)?;

    let mut input: Box<dyn Read> = if input_path == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(input_path).map_err(Error::Open)?)
    };

    let mut packet = [0u8; TS_PACKET_SIZE];
    loop {
        match read_exact_or_eof(&mut input, &mut packet)? {
            false => break,
            true => {
                let info = packet::parse(&packet);
                let (pid, got_pcr, pcr) = match info {
                    Some(info) if !nopcrs => (info.pid, info.pcr.is_some(), info.pcr.unwrap_or(0)),
                    Some(info) => (info.pid, false, 0),
                    None => (0, false, 0),
                };
                writer.submit(&packet, pid, got_pcr, pcr)?;
            }
        }
    }

    writer.finish()
}

/// Read exactly `buf.len()` bytes, returning `Ok(false)` on a clean EOF at
/// a packet boundary and `Err` on a short read mid-packet.
fn read_exact_or_eof(input: &mut dyn Read, buf: &mut [u8]) -> tswrite::Result<bool> {
    let mut got = 0;
    while got < buf.len() {
        match input.read(&mut buf[got..]) {
            Ok(0) if got == 0 => return Ok(false),
            Ok(0) => {
                return Err(Error::ShortRead {
                    expected: buf.len(),
                    got,
                })
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::FatalSend(e)),
        }
    }
    Ok(true)
}

fn open_sink(spec: &str) -> tswrite::Result<Box<dyn Sink>> {
    let mut parts = spec.splitn(2, ':');
    let kind = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("");

    match kind {
        "stdout" => Ok(Box::new(StdoutSink::new())),
        "file" => Ok(Box::new(FileSink::open(rest)?)),
        "tcp" => {
            let (host, port) = split_host_port(rest)?;
            Ok(Box::new(TcpSink::connect(host, port)?))
        }
        "udp" => {
            let mut pieces = rest.splitn(3, ':');
            let host = pieces.next().ok_or_else(|| Error::Usage("udp sink needs host:port".into()))?;
            let port: u16 = pieces
                .next()
                .ok_or_else(|| Error::Usage("udp sink needs host:port".into()))?
                .parse()
                .map_err(|_| Error::Usage("invalid udp port".into()))?;
            let iface = pieces
                .next()
                .map(|s| s.parse::<Ipv4Addr>())
                .transpose()
                .map_err(|_| Error::Usage("invalid multicast interface address".into()))?;
            Ok(Box::new(UdpSink::connect(host, port, iface)?))
        }
        other => Err(Error::Usage(format!("unknown sink kind '{other}'"))),
    }
}

fn split_host_port(spec: &str) -> tswrite::Result<(&str, u16)> {
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| Error::Usage("expected host:port".into()))?;
    let port = port.parse().map_err(|_| Error::Usage("invalid port".into()))?;
    Ok((host, port))
}

/// Parse the tuning flags into a `WriterConfig`, returning the remaining
/// positional arguments.
fn parse_args(args: &[String]) -> tswrite::Result<(WriterConfig, bool, Vec<String>)> {
    let mut timing = TimingConfig::default();
    let mut ring = RingConfig::default();
    let mut pacing = PacingConfig::default();
    let mut nopcrs = false;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        macro_rules! next_value {
            () => {{
                i += 1;
                args.get(i).ok_or_else(|| Error::Usage(format!("{arg} needs a value")))?
            }};
        }
        match arg {
            "-bitrate" => {
                let bits: u64 = parse_num(next_value!(), arg)?;
                timing.mode = TimingMode::Rate { byterate: bits / 8 };
            }
            "-byterate" => {
                timing.mode = TimingMode::Rate {
                    byterate: parse_num(next_value!(), arg)?,
                };
            }
            "-nopcrs" => nopcrs = true,
            "-maxnowait" => {
                let v = next_value!();
                pacing.maxnowait = if v == "off" { None } else { Some(parse_num(v, arg)?) };
            }
            "-waitfor" => pacing.waitfor_us = parse_num(next_value!(), arg)?,
            "-buffer" => ring.size = parse_num(next_value!(), arg)?,
            "-tsinpkt" => ring.ts_in_item = parse_num(next_value!(), arg)?,
            "-prime" => timing.prime_size = parse_num(next_value!(), arg)?,
            "-speedup" => timing.prime_speedup = parse_num(next_value!(), arg)?,
            "-pcr_scale" => timing.pcr_scale_pct = parse_num(next_value!(), arg)?,
            "-pwait" => ring.parent_wait_ms = parse_num(next_value!(), arg)?,
            "-cwait" => ring.child_wait_ms = parse_num(next_value!(), arg)?,
            "-hd" => {
                let hd = WriterConfig::hd_preset();
                timing = hd.timing;
                ring = hd.ring;
                pacing = hd.pacing;
            }
            "-perturb" => {
                let seed: u64 = parse_num(next_value!(), arg)?;
                let range_ms: i64 = parse_num(next_value!(), arg)?;
                let verbose = next_value!() != "0";
                pacing.perturb = Some(PerturbConfig { seed, range_ms, verbose });
            }
            _ if arg.starts_with('-') => {
                return Err(Error::Usage(format!("unknown option {arg}")));
            }
            _ => positional.push(arg.to_string()),
        }
        i += 1;
    }

    if nopcrs {
        // Explicit `-nopcrs` without `-bitrate`/`-byterate` keeps the
        // default assumed byte rate; PCR mode is only selected when the
        // stream actually supplies PCRs.
    } else if matches!(timing.mode, TimingMode::Rate { .. }) && !args.iter().any(|a| a == "-bitrate" || a == "-byterate" || a == "-hd") {
        timing.mode = TimingMode::Pcr;
    }

    let cfg = WriterConfig {
        timing,
        ring,
        pacing,
        command: CommandConfig::default(),
        drop_test: None,
        report_every: tswrite::config::DEFAULT_REPORT_EVERY,
    };
    Ok((cfg, nopcrs, positional))
}

fn parse_num<T: std::str::FromStr>(value: &str, flag: &str) -> tswrite::Result<T> {
    value.parse().map_err(|_| Error::Usage(format!("invalid value for {flag}: {value}")))
}
