//! In-memory provider registry and directory search.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use shared::domain::{ProviderId, ProviderKind, ProviderPhoto, ProviderRecord, Rating};
use thiserror::Error;
use tracing::info;

/// Upper bound for an inline profile photo payload.
pub const MAX_PHOTO_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("rating must be between 1 and 5")]
    RatingOutOfRange,
    #[error("photo is too large ({size} bytes, limit {limit})")]
    PhotoTooLarge { size: usize, limit: usize },
    #[error("the registration form is not open")]
    FormNotOpen,
}

/// Raw photo selected in the registration form, before encoding.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    fn into_photo(self) -> ProviderPhoto {
        ProviderPhoto {
            data_url: format!(
                "data:{};base64,{}",
                self.mime_type,
                STANDARD.encode(&self.bytes)
            ),
            filename: self.filename,
            mime_type: self.mime_type,
        }
    }
}

/// Raw registration form submission, validated before a record is created.
#[derive(Debug, Clone, Default)]
pub struct ProviderSubmission {
    pub name: String,
    pub phone_number: String,
    pub city: String,
    pub area: String,
    pub rating: u8,
    pub photo: Option<PhotoUpload>,
}

/// Registered providers, one insertion-ordered sequence per kind. Lives only
/// as long as the authenticated session does.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    house_maids: Vec<ProviderRecord>,
    carpenters: Vec<ProviderRecord>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, kind: ProviderKind) -> &[ProviderRecord] {
        match kind {
            ProviderKind::HouseMaid => &self.house_maids,
            ProviderKind::Carpenter => &self.carpenters,
        }
    }

    /// Validates a submission and appends it to the kind's sequence.
    pub fn register(
        &mut self,
        kind: ProviderKind,
        submission: ProviderSubmission,
    ) -> Result<ProviderId, RegistrationError> {
        let name = required(&submission.name, "name")?;
        let phone_number = required(&submission.phone_number, "phone number")?;
        let city = required(&submission.city, "city")?;
        let area = required(&submission.area, "area")?;
        let rating =
            Rating::new(submission.rating).ok_or(RegistrationError::RatingOutOfRange)?;

        let photo = match submission.photo {
            Some(upload) if upload.bytes.len() > MAX_PHOTO_BYTES => {
                return Err(RegistrationError::PhotoTooLarge {
                    size: upload.bytes.len(),
                    limit: MAX_PHOTO_BYTES,
                });
            }
            Some(upload) => Some(upload.into_photo()),
            None => None,
        };

        let record = ProviderRecord {
            id: ProviderId::generate(),
            kind,
            name,
            phone_number,
            city,
            area,
            rating,
            photo,
            registered_at: Utc::now(),
        };
        let id = record.id;
        info!(provider_id = %id, kind = ?kind, "registered provider");
        self.records_mut(kind).push(record);
        Ok(id)
    }

    /// Records of `kind` whose name, city, or area contains `term` as a
    /// case-insensitive substring. The empty term matches everything.
    pub fn search(&self, kind: ProviderKind, term: &str) -> Vec<&ProviderRecord> {
        let needle = term.to_lowercase();
        self.records(kind)
            .iter()
            .filter(|record| {
                needle.is_empty()
                    || record.name.to_lowercase().contains(&needle)
                    || record.city.to_lowercase().contains(&needle)
                    || record.area.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn count(&self, kind: ProviderKind) -> usize {
        self.records(kind).len()
    }

    pub fn clear(&mut self) {
        self.house_maids.clear();
        self.carpenters.clear();
    }

    fn records_mut(&mut self, kind: ProviderKind) -> &mut Vec<ProviderRecord> {
        match kind {
            ProviderKind::HouseMaid => &mut self.house_maids,
            ProviderKind::Carpenter => &mut self.carpenters,
        }
    }
}

fn required(value: &str, field: &'static str) -> Result<String, RegistrationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RegistrationError::MissingField(field))
    } else {
        Ok(trimmed.to_string())
    }
}
