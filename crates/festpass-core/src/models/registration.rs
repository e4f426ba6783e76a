use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// Review status of a registration.
///
/// Serialized with the exact strings the backend uses. Values the client
/// does not know about are kept so they survive a round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    #[serde(rename = "En_attente")]
    Pending,
    #[serde(rename = "Validé")]
    Validated,
    #[serde(rename = "Refusé")]
    Refused,
    #[serde(untagged)]
    Other(String),
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RegistrationStatus::Pending => "En_attente",
            RegistrationStatus::Validated => "Validé",
            RegistrationStatus::Refused => "Refusé",
            RegistrationStatus::Other(s) => s.as_str(),
        }
    }

    /// Parse user input, accepting both the wire values and English names.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "en_attente" | "en attente" | "pending" => RegistrationStatus::Pending,
            "validé" | "valide" | "validated" => RegistrationStatus::Validated,
            "refusé" | "refuse" | "refused" => RegistrationStatus::Refused,
            _ => RegistrationStatus::Other(input.trim().to_string()),
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "Pending"),
            RegistrationStatus::Validated => write!(f, "Validated"),
            RegistrationStatus::Refused => write!(f, "Refused"),
            RegistrationStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A festival registration as returned by the admin endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Registration {
    pub id: i64,
    #[serde(rename = "nom", default)]
    pub last_name: Option<String>,
    #[serde(rename = "prenom", default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "telephone", default)]
    pub phone: Option<String>,
    #[serde(rename = "nationalite", default)]
    pub nationality: Option<String>,
    #[serde(rename = "provenance", default)]
    pub origin: Option<String>,
    #[serde(rename = "type_profil", default)]
    pub profile: Option<String>,
    #[serde(rename = "statut", default)]
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub status: Option<RegistrationStatus>,
    #[serde(rename = "adresse_complete", default)]
    pub address: Option<String>,
    #[serde(rename = "date_naissance", default)]
    pub birth_date: Option<String>,
    #[serde(rename = "admin_remarque", default)]
    pub admin_remark: Option<String>,
    #[serde(default)]
    pub badge_url: Option<String>,
}

impl Registration {
    /// "First Last", trimmed so a missing half leaves no stray space.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    pub fn status_display(&self) -> String {
        self.status
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Client-side filter over a registration list. Unset criteria match anything.
#[derive(Debug, Clone, Default)]
pub struct RegistrationFilter {
    pub profile: Option<String>,
    pub nationality: Option<String>,
    pub status: Option<RegistrationStatus>,
}

impl RegistrationFilter {
    pub fn matches(&self, registration: &Registration) -> bool {
        if let Some(ref profile) = self.profile {
            if registration.profile.as_ref() != Some(profile) {
                return false;
            }
        }
        if let Some(ref nationality) = self.nationality {
            if registration.nationality.as_ref() != Some(nationality) {
                return false;
            }
        }
        if let Some(ref status) = self.status {
            if registration.status.as_ref() != Some(status) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, registrations: &'a [Registration]) -> Vec<&'a Registration> {
        registrations.iter().filter(|r| self.matches(r)).collect()
    }
}

/// Distinct non-empty values of a field, in first-seen order (filter dropdown options).
pub fn distinct_values<F>(registrations: &[Registration], field: F) -> Vec<String>
where
    F: Fn(&Registration) -> Option<&str>,
{
    let mut seen = Vec::new();
    for value in registrations.iter().filter_map(|r| field(r)) {
        if !value.is_empty() && !seen.iter().any(|s: &String| s == value) {
            seen.push(value.to_string());
        }
    }
    seen
}

/// Body of `PATCH /admin/inscriptions/{id}/status/`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub statut: RegistrationStatus,
    pub admin_remarque: String,
}

/// Public registration form submission.
#[derive(Debug, Clone, Default)]
pub struct NewRegistration {
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub phone: String,
    pub nationality: String,
    pub origin: String,
    pub profile: String,
    pub address: String,
    pub birth_date: Option<String>,
    pub passport_file: Option<std::path::PathBuf>,
}

/// Profile that requires a date of birth on the public form.
pub const PROFILE_REQUIRING_BIRTH_DATE: &str = "VIP";

/// Profile preselected on the public form.
pub const DEFAULT_PROFILE: &str = "All Access";

impl NewRegistration {
    /// Check required fields before submitting, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("nom", &self.last_name),
            ("prenom", &self.first_name),
            ("email", &self.email),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(format!("Missing required field: {}", name));
            }
        }
        if !self.email.contains('@') {
            return Err(format!("Invalid email address: {}", self.email));
        }
        if self.profile == PROFILE_REQUIRING_BIRTH_DATE
            && self.birth_date.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err("Date of birth is required for VIP profiles".to_string());
        }
        Ok(())
    }

    /// Text fields in wire naming, skipping empty optional values.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("nom", self.last_name.clone()),
            ("prenom", self.first_name.clone()),
            ("email", self.email.clone()),
            ("telephone", self.phone.clone()),
            ("nationalite", self.nationality.clone()),
            ("provenance", self.origin.clone()),
            ("type_profil", self.profile.clone()),
            ("adresse_complete", self.address.clone()),
        ];
        if let Some(ref dob) = self.birth_date {
            fields.push(("date_naissance", dob.clone()));
        }
        fields.retain(|(_, v)| !v.is_empty());
        fields
    }
}

/// Response of the public registration endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRegistration {
    pub id: i64,
}

/// Counters shown on the admin dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Statistics {
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub validees: i64,
    #[serde(default)]
    pub en_attente: i64,
    #[serde(default)]
    pub refusees: i64,
}

impl Statistics {
    /// Total as reported, or the sum of the per-status counters.
    pub fn total(&self) -> i64 {
        self.total
            .unwrap_or(self.validees + self.en_attente + self.refusees)
    }
}
