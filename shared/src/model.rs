use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use icu_collator::{Collator, CollatorOptions, Strength};
use std::collections::BTreeSet;
use thiserror::Error;
use unicase::UniCase;

use crate::event::ClientId;
use crate::UnixTimeMs;

pub const MAX_NAME_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("client name cannot be empty")]
    EmptyName,
    #[error("{field} too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// A wool-pickup client as held in memory and in the local fallback list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub contact_name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub address: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: UnixTimeMs,
    pub updated_at: UnixTimeMs,
}

impl Client {
    #[must_use]
    pub fn from_new(id: ClientId, new: NewClient, now: UnixTimeMs) -> Self {
        Self {
            id,
            name: new.name,
            contact_name: new.contact_name,
            phone: new.phone,
            email: new.email,
            address: new.address,
            region: new.region,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        }
    }

    /// The fields a caller supplied, without identity or timestamps.
    #[must_use]
    pub fn to_new(&self) -> NewClient {
        NewClient {
            name: self.name.clone(),
            contact_name: self.contact_name.clone(),
            phone: self.phone.clone(),
            email: self.email.clone(),
            address: self.address.clone(),
            region: self.region.clone(),
            notes: self.notes.clone(),
        }
    }

    fn matches_query(&self, folded_query: &str) -> bool {
        let hit = |field: &str| fold_case(field).contains(folded_query);
        hit(&self.name)
            || hit(&self.contact_name)
            || self.phone.contains(folded_query)
            || self.email.as_deref().is_some_and(hit)
            || hit(&self.address)
    }
}

/// Input of the add action.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    pub contact_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub address: String,
    pub region: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewClient {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn contact(mut self, contact_name: impl Into<String>, phone: impl Into<String>) -> Self {
        self.contact_name = contact_name.into();
        self.phone = phone.into();
        self
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(ValidationError::TooLong {
                field: "name",
                len: self.name.len(),
                max: MAX_NAME_LENGTH,
            });
        }
        Ok(())
    }
}

/// Partial update. `None` leaves a field untouched; for the optional fields
/// `Some(None)` clears the value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl ClientPatch {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            if name.len() > MAX_NAME_LENGTH {
                return Err(ValidationError::TooLong {
                    field: "name",
                    len: name.len(),
                    max: MAX_NAME_LENGTH,
                });
            }
        }
        Ok(())
    }

    /// Applies the patch in place and refreshes the update timestamp.
    pub fn apply(&self, client: &mut Client, now: UnixTimeMs) {
        if let Some(v) = &self.name {
            client.name.clone_from(v);
        }
        if let Some(v) = &self.contact_name {
            client.contact_name.clone_from(v);
        }
        if let Some(v) = &self.phone {
            client.phone.clone_from(v);
        }
        if let Some(v) = &self.email {
            client.email.clone_from(v);
        }
        if let Some(v) = &self.address {
            client.address.clone_from(v);
        }
        if let Some(v) = &self.region {
            client.region.clone_from(v);
        }
        if let Some(v) = &self.notes {
            client.notes.clone_from(v);
        }
        client.updated_at = now;
    }
}

/// Search text plus an optional exact region. View state only, never persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct ClientFilter {
    pub search: String,
    pub region: String,
}

impl ClientFilter {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.search.trim().is_empty() || !self.region.is_empty()
    }

    #[must_use]
    pub fn matches(&self, client: &Client) -> bool {
        let query = self.search.trim();
        if !query.is_empty() && !client.matches_query(&fold_case(query)) {
            return false;
        }
        self.region.is_empty() || client.region == self.region
    }
}

// --- Ordering & derived views ---

/// Full Unicode case folding, so `ß` matches `SS` and `É` matches `é`.
fn fold_case(text: &str) -> String {
    UniCase::new(text).to_folded_case()
}

thread_local! {
    // Root locale, secondary strength: accents count, letter case does not.
    static NAME_COLLATOR: Option<Collator> = {
        let mut options = CollatorOptions::new();
        options.strength = Some(Strength::Secondary);
        Collator::try_new(&Default::default(), options).ok()
    };
}

/// Name ordering used everywhere the list is observed. Names collate the
/// way a person reads them (`Éclair` next to `Eclair`, not after `Z`), then
/// by raw text so distinct names never compare equal.
#[must_use]
pub fn compare_names(a: &str, b: &str) -> Ordering {
    NAME_COLLATOR
        .with(|collator| match collator {
            Some(collator) => collator.compare(a, b),
            None => UniCase::new(a).cmp(&UniCase::new(b)),
        })
        .then_with(|| a.cmp(b))
}

pub fn sort_by_name(clients: &mut [Client]) {
    clients.sort_by(|a, b| compare_names(&a.name, &b.name));
}

#[must_use]
pub fn is_sorted_by_name(clients: &[Client]) -> bool {
    clients
        .windows(2)
        .all(|w| compare_names(&w[0].name, &w[1].name) != Ordering::Greater)
}

#[must_use]
pub fn filter_clients(clients: &[Client], filter: &ClientFilter) -> Vec<Client> {
    clients
        .iter()
        .filter(|c| filter.matches(c))
        .cloned()
        .collect()
}

/// Unique regions, alphabetically sorted.
#[must_use]
pub fn unique_regions(clients: &[Client]) -> Vec<String> {
    clients
        .iter()
        .map(|c| c.region.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Demo set used when local storage is empty and seeding is enabled.
#[must_use]
pub fn demo_clients(now: UnixTimeMs) -> Vec<Client> {
    let seeds = [
        NewClient::new("Green Valley", "VIC")
            .contact("Tom Hughes", "0398 765 432")
            .address("88 Valley Road, Ballarat VIC")
            .notes("Shearing usually late October"),
        NewClient::new("Ridgeback Station", "QLD")
            .contact("Anna Brooks", "0746 123 987")
            .email("anna@ridgeback.example")
            .address("2 Station Track, Longreach QLD"),
        NewClient::new("Sunrise Farm", "NSW")
            .contact("Margaret Ellis", "0268 555 120")
            .email("margaret@sunrisefarm.example")
            .address("14 Boundary Lane, Dubbo NSW"),
    ];

    let mut clients: Vec<Client> = seeds
        .into_iter()
        .enumerate()
        .map(|(i, new)| Client::from_new(ClientId::mock(i as u64 + 1), new, now))
        .collect();
    sort_by_name(&mut clients);
    clients
}
