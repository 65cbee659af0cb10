use chrono::Utc;
use signals_core::error::StorageError;
use signals_core::storage::LocalStorage;
use signals_core::types::DeviceIdentity;
use uuid::Uuid;

pub const DEVICE_ID_KEY: &str = "device_id";

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `device_<unix millis>_<9 base36 chars>`
pub fn generate_identity() -> DeviceIdentity {
    let mut random = Uuid::new_v4().as_u128();
    let mut suffix = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        suffix.push(BASE36[(random % 36) as usize] as char);
        random /= 36;
    }
    DeviceIdentity::new(format!("device_{}_{}", Utc::now().timestamp_millis(), suffix))
}

/// Returns the persisted identity, creating and persisting one on first use.
///
/// Never fails: if storage is unreadable or unwritable a fresh identity is
/// returned without continuity until storage recovers.
pub async fn resolve_identity(storage: &dyn LocalStorage) -> DeviceIdentity {
    match storage.get_item(DEVICE_ID_KEY).await {
        Ok(Some(existing)) if !existing.trim().is_empty() => return DeviceIdentity::new(existing),
        Ok(_) => {}
        Err(e) => {
            let identity = generate_identity();
            tracing::warn!(
                "Device storage unreadable ({}), using unpersisted identity {}",
                e,
                identity
            );
            return identity;
        }
    }

    let identity = generate_identity();
    match storage.set_item(DEVICE_ID_KEY, identity.as_str()).await {
        Ok(()) => tracing::info!("Generated device identity {}", identity),
        Err(e) => tracing::warn!("Failed to persist device identity {}: {}", identity, e),
    }
    identity
}

/// Reset path: the next `resolve_identity` generates a new identity.
pub async fn clear_identity(storage: &dyn LocalStorage) -> Result<(), StorageError> {
    storage.remove_item(DEVICE_ID_KEY).await?;
    tracing::info!("Cleared device identity");
    Ok(())
}
