//! Convert an elevation grid inside an environment snapshot into an MLS
//! grid: load, wire a `GridToMls` operator, update, re-serialize.
//!
//! Exit codes: 0 on success, 1 on argument errors, 2 on environment
//! errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use kshetra_env::maps::{ElevationGrid, MlsGrid};
use kshetra_env::operators::GridToMls;
use kshetra_env::{Environment, ItemId};

#[derive(Parser, Debug)]
#[command(
    name = "env_grid_to_mls",
    about = "Derive an MLS grid from an elevation grid in an environment snapshot"
)]
struct Args {
    /// Environment snapshot directory
    env_dir: PathBuf,
    /// Id of the source elevation grid layer
    grid_id: String,
    /// Id of the target MLS grid layer
    mls_id: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap renders --help/--version through the same path
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(1),
            };
        }
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> kshetra_env::Result<()> {
    let mut env = Environment::unserialize(&args.env_dir)?;

    let grid_id = ItemId::new(args.grid_id.clone());
    let mls_id = ItemId::new(args.mls_id.clone());
    expect_payload::<ElevationGrid>(&env, &grid_id)?;
    expect_payload::<MlsGrid>(&env, &mls_id)?;

    let op = env.attach(GridToMls::default().into_node("grid_to_mls/").into())?;
    env.set_input(&op, &grid_id)?;
    env.set_output(&op, &mls_id)?;

    let report = env.update_operators();
    if !report.is_clean() {
        let mut failed: Vec<String> = report
            .failed
            .iter()
            .map(|(id, err)| format!("{}: {}", id, err))
            .collect();
        failed.extend(report.skipped.iter().map(|id| format!("{}: skipped", id)));
        return Err(kshetra_env::Error::OperatorFailure {
            id: op.to_string(),
            detail: failed.join("; "),
        });
    }

    env.serialize(&args.env_dir)?;
    log::info!("updated `{}` from `{}`", args.mls_id, args.grid_id);
    Ok(())
}

fn expect_payload<T: kshetra_env::MapData>(
    env: &Environment,
    id: &ItemId,
) -> kshetra_env::Result<()> {
    let layer = env.layer(id)?;
    if layer.map_as::<T>().is_none() {
        return Err(kshetra_env::Error::TypeMismatch {
            context: format!("layer `{}`", id),
            expected: std::any::type_name::<T>().to_string(),
            found: layer.class_name().to_string(),
        });
    }
    Ok(())
}
