use anyhow::{bail, Result};
use corral_core::coordination::CoordinationError;
use corral_core::Participant;
use tracing::info;

use crate::resources::Resources;

/// Announces the participant as live. Registration is create-only: a second
/// process claiming the same name is refused.
pub(crate) async fn register_participant(
    resources: &Resources,
    participant: &Participant,
) -> Result<()> {
    let path = resources.participant_path(&participant.name);
    let payload = serde_json::to_value(participant)?;

    match resources
        .store()
        .conditional_write(&path, None, payload)
        .await
    {
        Ok(_) => {
            info!(
                participant = %participant.name,
                capacity = ?participant.capacity,
                "participant registered in the cluster"
            );
            Ok(())
        }
        Err(CoordinationError::KeyExists(_)) => {
            bail!("participant {} is already registered", participant.name)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn deregister_participant(resources: &Resources, name: &str) -> Result<()> {
    resources
        .store()
        .delete(&resources.participant_path(name))
        .await?;
    info!(participant = %name, "participant deregistered from the cluster");
    Ok(())
}
