use commitsync_core::{Collection, SyncService};

use crate::cli::CollectionCommands;
use crate::commands::common::{
    format_collection_details, format_collection_lines, parse_collection_id, parse_conditions,
};
use crate::error::CliError;

pub async fn run_collection(command: CollectionCommands, service: &SyncService) -> Result<(), CliError> {
    match command {
        CollectionCommands::Create {
            partner,
            account,
            watched_type,
            field,
            conditions,
            skip_history,
        } => {
            let mut collection = Collection::new(partner, account, watched_type)
                .with_conditions(parse_conditions(&conditions)?);
            if let Some(field) = field {
                collection = collection.with_field(field);
            }

            let created = service.create_collection(&collection).await?;
            let id = created.require_id()?;
            if skip_history {
                service.fast_forward(id).await?;
            }
            println!("{id}");
        }
        CollectionCommands::List { partner, json } => {
            let collections = service.list_collections(partner.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&collections)?);
            } else if collections.is_empty() {
                println!("No collections.");
            } else {
                for line in format_collection_lines(&collections) {
                    println!("{line}");
                }
            }
        }
        CollectionCommands::Show { id } => {
            let collection = service.get_collection(parse_collection_id(&id)?).await?;
            for line in format_collection_details(&collection) {
                println!("{line}");
            }
        }
        CollectionCommands::Update {
            id,
            conditions,
            clear,
        } => {
            let mut collection = service.get_collection(parse_collection_id(&id)?).await?;
            collection.conditions = if clear {
                Vec::new()
            } else {
                parse_conditions(&conditions)?
            };
            let updated = service.update_collection(&collection).await?;
            println!("{} revision {}", id.trim(), updated.revision);
        }
        CollectionCommands::Delete { id } => {
            let id = parse_collection_id(&id)?;
            service.delete_collection(id).await?;
            println!("{id}");
        }
        CollectionCommands::FastForward { id } => {
            let head = service.fast_forward(parse_collection_id(&id)?).await?;
            println!("@{head}");
        }
        CollectionCommands::Resync { id, from } => {
            service.resync_from(parse_collection_id(&id)?, from).await?;
            println!("@{from}");
        }
    }
    Ok(())
}
