//! Credential verification for unlocking the shield
//!
//! The credential is checked against the OS account of the user running the
//! engine. Credentials are never logged, stored, or echoed back.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No credential verification backend is available in this build")]
    BackendUnavailable,
    #[error("Could not determine the current user")]
    UnknownUser,
    #[error("PAM initialization failed: {0}")]
    Pam(String),
}

/// Which backend verifies credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// System accounts through PAM
    Pam { service: String },
    /// Accepts any credential of at least `min_length` characters.
    /// Debug builds, or release builds that opt in explicitly.
    DevelopmentFallback { min_length: usize },
    Unavailable,
}

impl AuthMode {
    /// Pick the strongest backend this build supports
    pub fn resolve(pam_service: &str, allow_development_fallback: bool, min_fallback_length: usize) -> Self {
        if cfg!(feature = "pam-auth") {
            return AuthMode::Pam {
                service: pam_service.to_string(),
            };
        }
        if cfg!(debug_assertions) || allow_development_fallback {
            AuthMode::DevelopmentFallback {
                min_length: min_fallback_length,
            }
        } else {
            AuthMode::Unavailable
        }
    }

    /// Short name reported in engine health
    pub fn label(&self) -> &'static str {
        match self {
            AuthMode::Pam { .. } => "pam",
            AuthMode::DevelopmentFallback { .. } => "development-fallback",
            AuthMode::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Login name of the user running the engine
pub fn current_user() -> Result<String, AuthError> {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => return Ok(user.name),
        Ok(None) => log::debug!("No passwd entry for uid {}", uid),
        Err(e) => log::debug!("passwd lookup for uid {} failed: {}", uid, e),
    }

    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .ok_or(AuthError::UnknownUser)
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    mode: AuthMode,
}

impl Authenticator {
    pub fn new(mode: AuthMode) -> Self {
        if let AuthMode::DevelopmentFallback { min_length } = &mode {
            log::warn!(
                "Using development credential fallback: any credential of {} or more characters unlocks the shield",
                min_length
            );
        }
        Self { mode }
    }

    pub fn mode(&self) -> &AuthMode {
        &self.mode
    }

    /// Ok(false) is a rejected credential; Err means no decision could be made
    pub fn verify(&self, credential: &str) -> Result<bool, AuthError> {
        match &self.mode {
            AuthMode::Pam { service } => {
                let user = current_user()?;
                verify_pam(service, &user, credential)
            }
            AuthMode::DevelopmentFallback { min_length } => Ok(credential.chars().count() >= *min_length),
            AuthMode::Unavailable => Err(AuthError::BackendUnavailable),
        }
    }
}

#[cfg(feature = "pam-auth")]
fn verify_pam(service: &str, user: &str, credential: &str) -> Result<bool, AuthError> {
    let mut authenticator =
        pam::Authenticator::with_password(service).map_err(|e| AuthError::Pam(e.to_string()))?;
    authenticator.get_handler().set_credentials(user, credential);

    match authenticator.authenticate() {
        Ok(()) => Ok(true),
        Err(e) => {
            log::info!("PAM rejected credential for {}: {}", user, e);
            Ok(false)
        }
    }
}

#[cfg(not(feature = "pam-auth"))]
fn verify_pam(_service: &str, _user: &str, _credential: &str) -> Result<bool, AuthError> {
    Err(AuthError::BackendUnavailable)
}
