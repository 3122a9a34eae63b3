//! Generates the service keypair and writes it to an encrypted keystore.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use keystore::{KEYSTORE_FILE_NAME, generate_keystore};

#[derive(Parser)]
#[command(name = "keygen")]
#[command(about = "Generate an encrypted service keystore", long_about = None)]
struct Cli {
    /// Password for the keystore
    #[arg(long, env = "KEYSTORE_PASSWORD", hide_env_values = true)]
    password: String,

    /// Directory to store the keystore file
    #[arg(long, default_value = "./keystore")]
    output: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.password.is_empty() {
        eprintln!("Password must not be empty");
        return ExitCode::FAILURE;
    }

    match generate_keystore(&cli.output, &cli.password) {
        Ok((keypair, _)) => {
            println!("Successfully generated new keypair!");
            println!("Public Key: {}", keypair.public_key());
            println!(
                "Keystore saved to: {}",
                cli.output.join(KEYSTORE_FILE_NAME).display()
            );
            println!("\nPlease backup your keystore file and keep your password safe!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to generate keystore: {e}");
            ExitCode::FAILURE
        }
    }
}
