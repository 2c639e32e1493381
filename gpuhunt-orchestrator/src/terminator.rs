use gpuhunt_providers::Marketplace;

use crate::state::HuntState;

/// Destroy an instance that failed its bring-up and stop ordering from its machine.
///
/// The machine is only ignored once the provider confirms the deletion; a failed
/// destroy leaves the ignore list untouched so the instance stays visible.
pub async fn destroy_and_ignore(
    provider: &dyn Marketplace,
    instance_id: u64,
    machine_id: u64,
    state: &HuntState,
) -> bool {
    match provider.destroy_instance(instance_id).await {
        Ok(true) => {
            state.record_destroyed(machine_id);
            tracing::info!("🧹 Successfully destroyed instance {}.", instance_id);
            tracing::info!("🧹 Added machine_id {} to the ignore list.", machine_id);
            true
        }
        Ok(false) => {
            state.record_destroy_failed();
            tracing::error!(
                "❌ Failed to destroy instance {}: provider did not return a success status",
                instance_id
            );
            false
        }
        Err(e) => {
            state.record_destroy_failed();
            tracing::error!(
                "❌ Error while trying to destroy instance {}: {:#}",
                instance_id,
                e
            );
            false
        }
    }
}
