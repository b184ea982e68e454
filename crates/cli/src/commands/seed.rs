use crate::commands::{runtime, CommandResult};
use maitre_core::config::{AppConfig, LoadOptions};
use maitre_core::domain::reservation::RestaurantId;
use maitre_db::{connect_from_config, migrations, seed_demo_tables, SeedResult, SqlTableRepository};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let restaurant_id = RestaurantId(config.reservation.restaurant_id.clone());
    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repository = SqlTableRepository::new(pool.clone());
        let seeded = seed_demo_tables(&repository, &restaurant_id)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8));

        pool.close().await;
        seeded
    });

    match result {
        Ok(seeded) => CommandResult::success_with_data(
            "seed",
            summary(&restaurant_id, &seeded),
            Some(seeded.to_json()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(restaurant_id: &RestaurantId, seeded: &SeedResult) -> String {
    format!(
        "demo floor plan for `{}`: {} inserted, {} already present",
        restaurant_id.0,
        seeded.inserted.len(),
        seeded.skipped.len()
    )
}
