//! CLI front-end for the M2TS reorder buffer.
//!
//! Usage: `m2ts2ts [-window N] <input.m2ts|-> <output.ts|->`

use std::env;
use std::fs::File;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use m2ts2ts::{Error, ReorderBuffer, DEFAULT_WINDOW};
use tswrite::packet::M2TS_PACKET_SIZE;

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("m2ts2ts: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> m2ts2ts::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let (window, positional) = parse_args(&args)?;

    if positional.len() != 2 {
        return Err(Error::Usage("usage: m2ts2ts [-window N] <input.m2ts|-> <output.ts|->".into()));
    }

    let mut input: Box<dyn Read> = if positional[0] == "-" {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&positional[0]).map_err(Error::Open)?)
    };
    let mut output: Box<dyn Write> = if positional[1] == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(&positional[1]).map_err(Error::Open)?)
    };

    let mut buf = ReorderBuffer::new(window);
    let mut unit = [0u8; M2TS_PACKET_SIZE];

    loop {
        match read_exact_or_eof(&mut input, &mut unit)? {
            false => break,
            true => {
                if let Some(packet) = buf.push(&unit) {
                    output.write_all(&packet).map_err(Error::FatalSend)?;
                }
            }
        }
    }

    for packet in buf.drain() {
        output.write_all(&packet).map_err(Error::FatalSend)?;
    }

    Ok(())
}

fn read_exact_or_eof(input: &mut dyn Read, buf: &mut [u8]) -> m2ts2ts::Result<bool> {
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

fn parse_args(args: &[String]) -> m2ts2ts::Result<(usize, Vec<String>)> {
    let mut window = DEFAULT_WINDOW;
    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-window" => {
                i += 1;
                let v = args.get(i).ok_or_else(|| Error::Usage("-window needs a value".into()))?;
                window = v.parse().map_err(|_| Error::Usage(format!("invalid -window value: {v}")))?;
            }
            other if other.starts_with('-') => {
                return Err(Error::Usage(format!("unknown option {other}")));
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok((window, positional))
}
