mod backend;
mod cli;
mod config;
mod denylist;
mod error;
mod logger;
mod model;
mod pipeline;
mod planner;
mod risk;
mod sandbox;
mod state;
mod validator;

use std::process::ExitCode;

use cli::App;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    match App::new(VERSION) {
        Ok(app) => match app.run().await {
            Ok(code) => code,
            Err(e) => {
                app.output_error(&e);
                ExitCode::from(1)
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}
