use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use respio::{Arg, Config, Connection, Error};
use tracing::debug;

const HOST: &str = "127.0.0.1";
const PORT: u16 = 6379;

/// Sends one command to a RESP server and prints the reply.
#[derive(Parser, Debug)]
struct Args {
    /// Server host
    #[arg(short = 'H', long, default_value = HOST, env = "RESPIO_HOST")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = PORT, env = "RESPIO_PORT")]
    port: u16,

    /// Read timeout in milliseconds, 0 to wait forever
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Write timeout in milliseconds, 0 to wait forever
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Command name followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Error> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(ms) = args.read_timeout_ms {
        config = config.with_read_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.write_timeout_ms {
        config = config.with_write_timeout(Duration::from_millis(ms));
    }

    let conn = Connection::dial_with_config(format!("{}:{}", args.host, args.port), config).await?;

    let (name, rest) = args
        .command
        .split_first()
        .ok_or(Error::UnsupportedArgument("empty command"))?;
    let cmd_args: Vec<Arg> = rest.iter().map(Arg::from).collect();

    let outcome = conn.do_command(name, &cmd_args).await?;
    let _ = conn.close().await;

    match outcome.into_result() {
        Ok(reply) => {
            println!("{}", reply);
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::Server(msg)) => {
            println!("(error) {}", msg);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
