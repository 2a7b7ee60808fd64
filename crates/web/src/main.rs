use std::process::ExitCode;

use database::PgDatabase;
use utility::config::Secret;
use web::{start_web_server, WebState};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let secret = match Secret::load() {
        Ok(secret) => secret,
        Err(why) => {
            log::error!("configuration error: {}", why);
            return ExitCode::from(2);
        }
    };

    let database = match PgDatabase::connect(&secret.database_string).await {
        Ok(database) => database,
        Err(why) => {
            log::error!("could not connect to database: {}", why);
            return ExitCode::FAILURE;
        }
    };

    let bind = secret.http_bind.clone();
    let state = WebState {
        database: database.clone(),
    };

    let ingester = tokio::spawn(ingest::supervisor::run(secret, database));
    let server = tokio::spawn(async move { start_web_server(state, &bind).await });

    tokio::select! {
        finished = ingester => match finished {
            Ok(Ok(())) => {
                log::info!("clean shutdown");
                ExitCode::SUCCESS
            }
            Ok(Err(why)) => {
                log::error!("ingestion failed: {}", why);
                ExitCode::FAILURE
            }
            Err(why) => {
                log::error!("ingestion task panicked: {}", why);
                ExitCode::FAILURE
            }
        },
        finished = server => match finished {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(why)) => {
                log::error!("web server failed: {}", why);
                ExitCode::FAILURE
            }
            Err(why) => {
                log::error!("web server task panicked: {}", why);
                ExitCode::FAILURE
            }
        },
    }
}
