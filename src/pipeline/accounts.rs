//! Mailbox registration with the active-account limit.

use tracing::info;

use crate::error::{DatabaseError, PipelineError};
use crate::store::{Account, AccountCredentials, Database, MAX_ACTIVE_ACCOUNTS};

/// Register a mailbox from connect-time credentials.
///
/// A known address gets its credentials replaced and its cursor reset. A new
/// address, or re-enabling a disconnected one, counts against the limit.
pub async fn register_account(
    db: &dyn Database,
    credentials: &AccountCredentials,
) -> Result<Account, PipelineError> {
    let email = credentials.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(PipelineError::InvalidInput(format!(
            "'{}' is not an email address",
            credentials.email
        )));
    }
    if credentials.refresh_token.trim().is_empty() {
        return Err(PipelineError::InvalidInput("refresh_token is required".into()));
    }

    let limit_reached = || PipelineError::AccountLimit {
        max: MAX_ACTIVE_ACCOUNTS,
    };

    match db.find_account_by_email(&email).await? {
        Some(account) => {
            if !db
                .replace_account_credentials(account.id, credentials, MAX_ACTIVE_ACCOUNTS)
                .await?
            {
                return Err(limit_reached());
            }
            info!(email = %email, "Account credentials updated");
            db.get_account(account.id).await?.ok_or_else(|| {
                PipelineError::Store(DatabaseError::NotFound {
                    entity: "account".into(),
                    id: account.id.to_string(),
                })
            })
        }
        None => {
            let account = Account::new(credentials);
            if !db.insert_account_within_limit(&account, MAX_ACTIVE_ACCOUNTS).await? {
                return Err(limit_reached());
            }
            info!(email = %email, "Account connected");
            Ok(account)
        }
    }
}
