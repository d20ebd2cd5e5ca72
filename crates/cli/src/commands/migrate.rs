use crate::commands::CommandResult;
use haven_core::config::{AppConfig, LoadOptions};
use haven_db::{connect_from_config, migrations};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.archive)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let pending = migrations::pending_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(pending)
    });

    match result {
        Ok(0) => CommandResult::success("migrate", "archive schema already current"),
        Ok(applied) => {
            CommandResult::success("migrate", format!("applied {applied} pending migration(s)"))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
