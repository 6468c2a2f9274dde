mod pin;

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scdcard::pcsc::{PcscContext, PcscDriver};
use scdcard::x509::X509Parser;
use scdcard::{HashAlgorithm, Keypair, Options, Session};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("The card returned an error: {0}")]
    Card(#[from] scdcard::Error),

    #[error("Invalid hex input: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Error occurred on writing the output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error occurred on serializing the output: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Parser)]
#[command(name = "scdcard", version, about)]
struct Cli {
    /// Index of the reader to use.
    #[arg(short, long, default_value_t = 0, global = true)]
    reader: usize,

    /// Logs the driver in use and the result of each card operation.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Traces the APDUs exchanged with the card.
    #[arg(long, global = true)]
    debug_transport: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the serial number of the card.
    Serial,

    /// Lists the keypairs on the card with their keygrips.
    Keys {
        /// Prints the keypairs as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reads a certificate from the card in DER.
    ReadCert {
        id: String,

        /// Writes the certificate to the file instead of printing it in hex.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Signs a hex encoded digest.
    Sign {
        key_id: String,
        digest: String,

        #[arg(long, default_value = "sha1")]
        hash: HashAlgorithm,
    },

    /// Deciphers hex encoded data.
    Decipher { key_id: String, data: String },
}

fn list_keys(session: &mut Session<PcscContext>) -> Result<Vec<Keypair>> {
    let mut keys = Vec::new();

    for idx in 0.. {
        match session.enum_keypairs(idx) {
            Ok(Some(keypair)) => keys.push(keypair),
            Ok(None) => break,
            Err(scdcard::Error::MissingCertificate) => {
                warn!("Skipping keypair {} without certificate", idx);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(keys)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (cli.debug_transport, cli.verbose) {
        (true, _) => "debug",
        (_, true) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = Options {
        reader: cli.reader,
        verbose: cli.verbose,
        debug_transport: cli.debug_transport,
        ..Default::default()
    };

    let mut session = Session::open(&PcscDriver, Box::new(X509Parser), options)?;

    // The first use of the card figures out its layout.
    let (serial, _) = session.serial_and_stamp()?;
    info!(
        "Using the {} backend in reader {}",
        session.backend_name().unwrap_or_default(),
        session.reader()
    );

    match cli.command {
        Command::Serial => println!("{}", serial),
        Command::Keys { json } => {
            let keys = list_keys(&mut session)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                for key in keys {
                    println!("{} {}", key.keygrip, key.key_id.unwrap_or_default());
                }
            }
        }
        Command::ReadCert { id, output } => {
            let cert = session.read_cert(&id)?;

            match output {
                Some(path) => File::create(path)?.write_all(&cert)?,
                None => println!("{}", hex::encode(cert)),
            }
        }
        Command::Sign {
            key_id,
            digest,
            hash,
        } => {
            let digest = hex::decode(digest)?;
            let mut prompt = pin::prompt;
            let signature = session.sign(&key_id, hash, Some(&mut prompt), &digest)?;

            println!("{}", hex::encode(signature));
        }
        Command::Decipher { key_id, data } => {
            let data = hex::decode(data)?;
            let mut prompt = pin::prompt;
            let plaintext = session.decipher(&key_id, Some(&mut prompt), &data)?;

            println!("{}", hex::encode(plaintext));
        }
    }

    session.close();

    Ok(())
}
