// SPDX-FileCopyrightText: Copyright © 2024-2026 The Bob Authors
//
// SPDX-License-Identifier: MPL-2.0

use std::error::Error;

mod archive;
mod build;
mod cli;
mod plan;
mod recipes;
mod run;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli::process().await {
        Ok(()) => {}
        Err(error) => {
            report_error(&error);
            std::process::exit(exit_code(&error));
        }
    }
}

fn report_error(error: &cli::Error) {
    let joined = sources(error).join(": ");
    eprintln!("Error: {joined}");
}

fn sources(error: &cli::Error) -> Vec<String> {
    let mut sources = vec![error.to_string()];
    let mut source = (error as &dyn Error).source();
    while let Some(error) = source.take() {
        sources.push(error.to_string());
        source = error.source();
    }
    sources
}

/// spec.md §6's exit code contract: 0 success, 1 a user-caused build
/// failure, 2 an invocation/configuration error, anything else internal.
fn exit_code(error: &cli::Error) -> i32 {
    match error {
        cli::Error::Build(build::BuildError::StepsFailed) => 1,
        cli::Error::Config(_) | cli::Error::Unsupported(_) => 2,
        _ => 3,
    }
}
