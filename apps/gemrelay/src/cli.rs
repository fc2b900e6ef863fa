use clap::Parser;

#[derive(Parser)]
#[command(name = "gemrelay")]
pub(crate) struct Cli {
    #[arg(long, env = "GEMRELAY_HOST", default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, env = "GEMRELAY_PORT", default_value_t = 8788)]
    pub(crate) port: u16,
    #[arg(long, env = "GEMRELAY_DSN", default_value = "sqlite://gemrelay.db?mode=rwc")]
    pub(crate) dsn: String,
    #[arg(long, env = "GEMRELAY_ADMIN_PASSWORD", default_value = "pwd")]
    pub(crate) admin_password: String,
}
