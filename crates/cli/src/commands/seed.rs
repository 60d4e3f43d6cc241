use crate::commands::{with_database, CommandResult};
use stockflow_core::domain::actor::Role;
use stockflow_db::{migrations, DemoDirectory};

pub fn run() -> CommandResult {
    let result = with_database("seed", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoDirectory::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verified = DemoDirectory::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        if !verified {
            return Err((
                "seed_verification",
                "demo directory is incomplete after seeding; an id may be taken by another role"
                    .to_string(),
                6u8,
            ));
        }

        Ok(seeded.users_seeded)
    });

    match result {
        Ok(users) => CommandResult::success("seed", seed_message(&users)),
        Err(failure) => failure,
    }
}

fn seed_message(users: &[(&str, Role)]) -> String {
    let lines: Vec<String> =
        users.iter().map(|(id, role)| format!("  - {}: {id}", role.as_str())).collect();
    format!("demo directory ready with {} accounts:\n{}", users.len(), lines.join("\n"))
}
