//! Interactive login.

use miette::{Result, miette};
use tracing::info;
use vrclink_api::{ApiError, ClientConfig, VrcClient};

use crate::Account;

/// Log in, prompting for whatever the command line did not supply.
pub async fn login(account: &Account) -> Result<VrcClient> {
    let client = VrcClient::new(ClientConfig::default().with_api_base(account.api_base.as_str()))
        .map_err(|e| miette!("failed to create client: {}", e))?;

    let password = match &account.password {
        Some(password) => password.clone(),
        None => prompt("Password: ")?,
    };

    let user = match client.login(&account.username, &password).await {
        Ok(user) => user,
        Err(ApiError::MfaRequired) => {
            let code = match &account.totp_code {
                Some(code) => code.clone(),
                None => prompt("Two-factor code: ")?,
            };
            client
                .verify_totp(code.trim())
                .await
                .map_err(|e| miette!("two-factor verification failed: {}", e))?
        }
        Err(e) => return Err(miette!("login failed: {}", e)),
    };

    info!(
        user = %user.profile.display_name,
        friends = user.friends.len(),
        "logged in"
    );
    Ok(client)
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}");
    rpassword::read_password().map_err(|e| miette!("failed to read input: {}", e))
}
