use bcrypt::hash;
use std::sync::Arc;
use tracing::info;

use crate::data::config_store::{ConfigurationStore, REQUIRED_SECRETS};
use crate::data::secret::{SECRET_LENGTH, generate_secret};
use crate::web::error::AppError;

/// Cheapest cost bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;
/// Most expensive cost bcrypt accepts.
pub const MAX_HASH_COST: u32 = 31;

/// One-time installation: generates the login password and marks setup complete.
pub struct SetupFlow {
    config: Arc<ConfigurationStore>,
    hash_cost: u32,
}

impl SetupFlow {
    pub fn new(config: Arc<ConfigurationStore>, hash_cost: u32) -> Self {
        Self { config, hash_cost }
    }

    pub async fn can_be_installed(&self) -> bool {
        !self.config.is_setup_complete().await
    }

    /// Returns the generated login password. It is only stored as a hash and
    /// cannot be retrieved again.
    pub async fn setup(&self) -> Result<String, AppError> {
        if !self.can_be_installed().await {
            return Err(AppError::AlreadyInstalled);
        }

        let password = generate_secret(SECRET_LENGTH);
        let password_hash = hash(&password, self.hash_cost)
            .map_err(|e| AppError::PasswordHashingError(e.to_string()))?;

        // Re-checked under the write lock so concurrent callers cannot both win.
        self.config
            .update(|c| {
                if c.flags.setup_complete {
                    return Err(AppError::AlreadyInstalled);
                }
                for name in REQUIRED_SECRETS {
                    c.secrets
                        .entry(name.to_string())
                        .or_insert_with(|| generate_secret(SECRET_LENGTH));
                }
                c.password_hash = Some(password_hash);
                c.flags.setup_complete = true;
                Ok(())
            })
            .await?;

        info!("Setup complete, login password generated");
        Ok(password)
    }
}
