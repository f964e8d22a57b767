//! eclcat - forward text streams to an ECAppLog collector
//!
//! Reads standard input, or each file given on the command line, splits it
//! into tokens and logs every token as one record.

use bytes::{Buf, BytesMut};
use clap::Parser;
use ecapplog::client::LogClient;
use ecapplog::config::ClientConfig;
use ecapplog::types::{LogOptions, Priority};
use futures::StreamExt;
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error};

#[derive(Parser)]
#[command(name = "eclcat")]
#[command(about = "Send text streams to an ECAppLog collector, one record per token")]
#[command(version)]
struct Args {
    /// Application name sent to the collector
    #[arg(long, default_value = "eclcat")]
    app: String,

    /// Category of every record
    #[arg(long, default_value = "ALL")]
    category: String,

    /// Token separator: "\n" for lines, " " for words, anything else literally
    #[arg(long, default_value = "\\n")]
    split: String,

    /// Prefix messages with line numbers and keep the raw token as source
    #[arg(short = 'n')]
    line_numbers: bool,

    /// Collector address (host:port)
    #[arg(long)]
    address: Option<String>,

    /// Client configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Files to send; standard input when empty
    files: Vec<PathBuf>,
}

/// Cuts input into tokens
enum TokenCodec {
    Lines(LinesCodec),
    Words(WordsCodec),
    Separator(SeparatorCodec),
}

impl TokenCodec {
    fn from_arg(arg: &str) -> Self {
        match arg {
            "" | "\\n" => TokenCodec::Lines(LinesCodec::new()),
            " " => TokenCodec::Words(WordsCodec::default()),
            other => TokenCodec::Separator(SeparatorCodec::new(other.as_bytes())),
        }
    }
}

fn lines_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl Decoder for TokenCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        match self {
            TokenCodec::Lines(codec) => codec.decode(buf).map_err(lines_error),
            TokenCodec::Words(codec) => codec.decode(buf),
            TokenCodec::Separator(codec) => codec.decode(buf),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        match self {
            TokenCodec::Lines(codec) => codec.decode_eof(buf).map_err(lines_error),
            TokenCodec::Words(codec) => codec.decode_eof(buf),
            TokenCodec::Separator(codec) => codec.decode_eof(buf),
        }
    }
}

/// Tokens separated by a literal byte string
struct SeparatorCodec {
    separator: Vec<u8>,
    /// Offset where the next search starts
    next_index: usize,
}

impl SeparatorCodec {
    fn new(separator: &[u8]) -> Self {
        Self {
            separator: separator.to_vec(),
            next_index: 0,
        }
    }
}

impl Decoder for SeparatorCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let found = buf[self.next_index..]
            .windows(self.separator.len())
            .position(|window| window == self.separator.as_slice());

        match found {
            Some(offset) => {
                let token = buf.split_to(self.next_index + offset);
                buf.advance(self.separator.len());
                self.next_index = 0;
                Ok(Some(String::from_utf8_lossy(&token).into_owned()))
            }
            None => {
                // The tail may hold the start of a separator.
                self.next_index = buf.len().saturating_sub(self.separator.len() - 1);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(token) = self.decode(buf)? {
            return Ok(Some(token));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let token = buf.split_to(buf.len());
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }
}

/// Tokens separated by runs of Unicode whitespace
#[derive(Default)]
struct WordsCodec {
    /// Length of the word scanned so far
    next_index: usize,
}

/// Character at the start of `bytes` and its length. An invalid byte is
/// returned as `None` with length one. Returns `None` when more input is
/// needed.
fn leading_char(bytes: &[u8]) -> Option<(Option<char>, usize)> {
    let window = &bytes[..bytes.len().min(4)];
    let valid = match std::str::from_utf8(window) {
        Ok(text) => text,
        Err(e) if e.valid_up_to() > 0 => std::str::from_utf8(&window[..e.valid_up_to()]).ok()?,
        Err(e) => return e.error_len().map(|_| (None, 1)),
    };
    valid.chars().next().map(|c| (Some(c), c.len_utf8()))
}

impl Decoder for WordsCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let Some((c, len)) = leading_char(&buf[self.next_index..]) else {
                return Ok(None);
            };
            let is_space = c.is_some_and(char::is_whitespace);

            if !is_space {
                self.next_index += len;
            } else if self.next_index == 0 {
                buf.advance(len);
            } else {
                let word = buf.split_to(self.next_index);
                buf.advance(len);
                self.next_index = 0;
                return Ok(Some(String::from_utf8_lossy(&word).into_owned()));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(word) = self.decode(buf)? {
            return Ok(Some(word));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let word = buf.split_to(buf.len());
        Ok(Some(String::from_utf8_lossy(&word).into_owned()))
    }
}

struct Forwarder {
    client: LogClient,
    category: String,
    split: String,
    line_numbers: bool,
}

impl Forwarder {
    /// Log every token of `reader`. Line numbers restart with each input.
    async fn forward<R: AsyncRead + Unpin>(&self, reader: R) -> io::Result<()> {
        let mut tokens = FramedRead::new(reader, TokenCodec::from_arg(&self.split));
        let mut line = 1;

        while let Some(token) = tokens.next().await {
            self.send(token?, line);
            line += 1;
        }
        Ok(())
    }

    fn send(&self, text: String, line: usize) {
        let (message, options) = if self.line_numbers {
            let message = format!("{:04} {}", line, text);
            (message, LogOptions::new().with_source(text))
        } else {
            (text, LogOptions::new())
        };

        self.client.log(
            chrono::Utc::now(),
            Priority::Information,
            self.category.as_str(),
            message,
            options,
        );
    }
}

async fn run(args: Args, client: LogClient) -> Result<(), Box<dyn std::error::Error>> {
    let forwarder = Forwarder {
        client,
        category: args.category,
        split: args.split,
        line_numbers: args.line_numbers,
    };

    if args.files.is_empty() {
        forwarder.forward(tokio::io::stdin()).await?;
    } else {
        for path in &args.files {
            debug!("forwarding {}", path.display());
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            forwarder.forward(file).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Diagnostics go to stderr so stdout stays clean for pipelines
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if args.verbose {
            "ecapplog=debug,eclcat=debug,info"
        } else {
            "ecapplog=warn,eclcat=info,warn"
        })
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    config.app_name = args.app.clone();
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    config.flush_on_close = true;

    let client = LogClient::builder(config)
        .with_error_hook(|e| debug!("client error: {}", e))
        .build()?;
    client.open()?;

    let result = run(args, client.clone()).await;
    client.close().await;

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}
