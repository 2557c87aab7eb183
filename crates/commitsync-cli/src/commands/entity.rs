use commitsync_core::{Entity, EntityId, SyncService};
use serde_json::Map;

use crate::cli::EntityCommands;
use crate::commands::common::parse_assignment;
use crate::error::CliError;

pub async fn run_entity(command: EntityCommands, service: &SyncService) -> Result<(), CliError> {
    match command {
        EntityCommands::Put {
            entity_type,
            account,
            id,
            fields,
        } => {
            let id = id.map(|raw| raw.parse::<EntityId>()).transpose()?;
            let mut entity = match &id {
                Some(id) => service
                    .get_entity(&entity_type, id)
                    .await?
                    .filter(|existing| !existing.deleted)
                    .unwrap_or_else(|| {
                        Entity::new(&entity_type, &account, Map::new()).with_id(id.clone())
                    }),
                None => Entity::new(&entity_type, &account, Map::new()),
            };
            for assignment in &fields {
                let (name, value) = parse_assignment(assignment)?;
                entity.fields.insert(name, value);
            }

            let saved = service.save_entity(entity).await?;
            println!("{} @{}", saved.id, saved.commit_id.unwrap_or_default());
        }
        EntityCommands::Delete { entity_type, id } => {
            let id = id.parse::<EntityId>()?;
            let deleted = service.delete_entity(&entity_type, &id).await?;
            println!("{} @{}", deleted.id, deleted.commit_id.unwrap_or_default());
        }
    }
    Ok(())
}
