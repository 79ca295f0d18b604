//! pagegraph-replay: runs a JSON edit script against a graph session and an
//! in-memory remote, then prints every commit batch and the final graph.
//!
//! ```text
//! pagegraph-replay script.json
//! RUST_LOG=debug pagegraph-replay script.json
//! ```

mod script;

use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};
use script::{load_script, Replay};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Some(path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: pagegraph-replay <script.json>");
        return ExitCode::from(2);
    };

    info!("Replaying {}", path.display());
    let ops = match load_script(&path) {
        Ok(ops) => ops,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let output = match Replay::new().await.run(ops).await {
        Ok(output) => output,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Cannot print result: {e}");
            ExitCode::FAILURE
        }
    }
}
