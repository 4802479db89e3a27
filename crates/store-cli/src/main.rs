//! storekeeper-cli - a thin line-oriented client for storekeeperd.
//!
//! Sends each line of input as a multi-bulk request and prints the reply.
//! A command may also be given on the command line for one-shot use; with
//! none given, reads a REPL from stdin until EOF or `quit`.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;

use clap::Parser;
use store_core::protocol::encode_multibulk_command;

#[derive(Parser)]
#[command(name = "storekeeper-cli", about = "Key-value store client", version)]
struct Args {
    /// Server host.
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Command and arguments to run once, instead of entering the REPL.
    command: Vec<String>,
}

/// A reply read back off the wire, kept just detailed enough to print.
enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    MultiBulk(Option<Vec<Reply>>),
}

fn read_line(r: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        if byte[0] == b'\r' {
            let mut lf = [0u8; 1];
            r.read_exact(&mut lf)?;
            return Ok(line);
        }
        line.push(byte[0] as char);
    }
}

fn read_reply(r: &mut impl BufRead) -> io::Result<Reply> {
    let line = read_line(r)?;
    let Some((prefix, rest)) = line.split_at_checked(1) else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty reply line"));
    };
    match prefix {
        "+" => Ok(Reply::Status(rest.to_string())),
        "-" => Ok(Reply::Error(rest.to_string())),
        ":" => {
            let n = rest
                .parse::<i64>()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad integer reply"))?;
            Ok(Reply::Integer(n))
        }
        "$" => {
            let len = rest
                .parse::<i64>()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad bulk length"))?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut buf = vec![0u8; len as usize + 2];
            r.read_exact(&mut buf)?;
            buf.truncate(len as usize);
            Ok(Reply::Bulk(Some(buf)))
        }
        "*" => {
            let len = rest
                .parse::<i64>()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad multibulk length"))?;
            if len < 0 {
                return Ok(Reply::MultiBulk(None));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_reply(r)?);
            }
            Ok(Reply::MultiBulk(Some(items)))
        }
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unknown reply type '{other}'"))),
    }
}

fn print_reply(reply: &Reply, depth: usize) {
    let indent = "  ".repeat(depth);
    match reply {
        Reply::Status(s) => println!("{indent}{s}"),
        Reply::Error(s) => println!("{indent}(error) {s}"),
        Reply::Integer(n) => println!("{indent}(integer) {n}"),
        Reply::Bulk(None) => println!("{indent}(nil)"),
        Reply::Bulk(Some(bytes)) => println!("{indent}{}", String::from_utf8_lossy(bytes)),
        Reply::MultiBulk(None) => println!("{indent}(nil)"),
        Reply::MultiBulk(Some(items)) => {
            if items.is_empty() {
                println!("{indent}(empty list or set)");
            }
            for (i, item) in items.iter().enumerate() {
                print!("{indent}{}) ", i + 1);
                print_reply(item, 0);
            }
        }
    }
}

fn split_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

fn run_command(stream: &mut TcpStream, reader: &mut impl BufRead, argv: &[String]) -> io::Result<()> {
    if argv.is_empty() {
        return Ok(());
    }
    let encoded = encode_multibulk_command(&argv.iter().map(|s| s.as_bytes().to_vec()).collect::<Vec<_>>());
    stream.write_all(&encoded)?;
    let reply = read_reply(reader)?;
    print_reply(&reply, 0);
    Ok(())
}

fn main() {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let mut stream = match TcpStream::connect(&addr) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("could not connect to {addr}: {e}");
            std::process::exit(1);
        }
    };
    let mut reader = BufReader::new(stream.try_clone().expect("clone socket"));

    if !args.command.is_empty() {
        if let Err(e) = run_command(&mut stream, &mut reader, &args.command) {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let stdin = io::stdin();
    loop {
        print!("{addr}> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        let argv = split_line(line);
        if let Err(e) = run_command(&mut stream, &mut reader, &argv) {
            eprintln!("error: {e}");
            break;
        }
    }
}
