use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Role given to newly created back-office accounts.
pub const DEFAULT_USER_ROLE: &str = "Vérificateur";

/// Preferred language given to newly created back-office accounts.
pub const DEFAULT_USER_LANGUAGE: &str = "FR";

/// A back-office account as listed by `GET /admin/users/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub langue_pref: Option<String>,
}

impl AdminUser {
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

/// Body of `POST /admin/users/`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub telephone: String,
    pub role: String,
    pub langue_pref: String,
}

impl Default for NewUser {
    fn default() -> Self {
        Self {
            username: String::new(),
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            telephone: String::new(),
            role: DEFAULT_USER_ROLE.to_string(),
            langue_pref: DEFAULT_USER_LANGUAGE.to_string(),
        }
    }
}

/// Response of user creation. The backend generates a password when none is supplied.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedUser {
    pub id: i64,
    #[serde(default)]
    pub generated_password: Option<String>,
}
