use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "devkeeper",
    version,
    about = "CI launcher and supervisor for the TV frontend dev server"
)]
pub struct Cli {
    /// Port to probe and serve on (overrides the PORT environment variable)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for the dev server to start accepting connections
    #[arg(long = "readiness-timeout", value_name = "SECONDS")]
    pub readiness_timeout: Option<u64>,
}
