//! Run commands on a remote host with the key from ~/.ssh/.
//!
//! ```text
//! sshexec --host example.com --user deploy 'echo Hello, SSH!' 'uname -a'
//! ```

use anyhow::Result;
use clap::Parser;

use sshexec_core::{ExecRequest, RemoteCommandRunner, RunnerConfig, SessionOptions};

#[derive(Parser)]
#[command(name = "sshexec")]
#[command(author, version, about = "Run shell commands on a remote host over SSH")]
struct Cli {
    /// Hostname or IP address
    #[arg(long, env = "SSHEXEC_HOST")]
    host: String,

    /// SSH port
    #[arg(short, long, default_value_t = 22)]
    port: u16,

    /// Remote username (defaults to the current user)
    #[arg(short, long)]
    user: Option<String>,

    /// Seconds allowed for connecting and authenticating
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Commands to run, in order
    #[arg(required = true)]
    commands: Vec<String>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = ExecRequest {
        host: cli.host,
        port: cli.port,
        username: cli.user,
        commands: cli.commands,
    };
    let options = SessionOptions {
        connect_timeout_secs: cli.connect_timeout,
        ..Default::default()
    };
    let runner = RemoteCommandRunner::new(RunnerConfig::system().with_options(options));

    let results = match runner.run(request).await {
        Ok(results) => results,
        Err(e) => {
            eprintln!("SSH error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("Command #{} exit code: {}", i + 1, result.code);
        println!("{}", result.result);
    }
    Ok(())
}
