// `server <config.ini>` (§6 "CLI"). Master and workers share this
// binary; rank comes from `--rank` or `GRYPHON_RANK`.

use std::path::PathBuf;

use clap::Parser;
use gryphon::{resolve_rank, Server, ServerArgs};
use gryphon_admin::init_logging;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "gryphon", about = "Gryphon distributed graph server")]
struct Cli {
    /// Path to this worker's gquery-conf.ini.
    config_path: PathBuf,

    /// Path to the node descriptor file (rank hostname ib_hostname tcp_port rdma_port per line).
    node_file_path: PathBuf,

    /// Overrides GRYPHON_RANK.
    #[arg(long)]
    rank: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    init_logging("info");

    let rank = match resolve_rank(cli.rank) {
        Ok(rank) => rank,
        Err(e) => {
            error!(target: "gryphon::server", error = %format!("{e:?}"), "could not determine rank");
            std::process::exit(1);
        }
    };

    let args = ServerArgs {
        config_path: cli.config_path,
        node_file_path: cli.node_file_path,
        rank,
    };

    let server = match Server::bootstrap(&args) {
        Ok(server) => server,
        Err(e) => {
            error!(target: "gryphon::server", error = %format!("{e:?}"), "bootstrap failed");
            std::process::exit(1);
        }
    };

    server.join();
}
