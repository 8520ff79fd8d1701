//! The metadata registry: an owner-gated store of [`MetadataRecord`]s.
//!
//! [`MetadataRegistry`] is the state machine. It is synchronous and owns all records; every
//! write either fully applies and publishes one [`RegistryEvent`], or fails and leaves the
//! records untouched. [`RegistryService`] runs a registry in its own task and serves the
//! [`RegistryHandle`]s, which is how the rest of the server talks to it.
//!
//! [`RegistryEvent`]: events::RegistryEvent

pub mod events;
pub mod service;

pub use self::{
    events::{EventListener, EventPublisher, RegistryEvent},
    service::{RegistryHandle, RegistryService, ServiceError},
};

use chrono::{DateTime, Utc};
use displaydoc::Display;
use thiserror::Error;

use fedwatch_core::{
    registry::{Call, NewMetadata, TxReceipt},
    Identity,
    MetadataRecord,
    MetadataSnapshot,
    RecordId,
};

/// Errors of the registry operations.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Record {0} does not exist.
    NotFound(RecordId),
    /// {caller} is not the owner of record {id}.
    Unauthorized { id: RecordId, caller: Identity },
}

/// The record table.
///
/// Identifiers are indices into the table: record `n` is the `n`-th record ever created.
#[derive(Debug)]
pub struct MetadataRegistry {
    records: Vec<MetadataRecord>,
    events: EventPublisher,
}

impl MetadataRegistry {
    /// Creates an empty registry publishing to `events`.
    pub fn new(events: EventPublisher) -> Self {
        Self {
            records: Vec::new(),
            events,
        }
    }

    /// Creates a record owned by `caller` and returns its identifier.
    pub fn create_metadata(
        &mut self,
        caller: Identity,
        metadata: NewMetadata,
        now: DateTime<Utc>,
    ) -> RecordId {
        let NewMetadata {
            title,
            description,
            tags,
            file_hash,
        } = metadata;
        let id = RecordId(self.records.len() as u64);
        self.events.publish(RegistryEvent::MetadataCreated {
            id,
            owner: caller,
            title: title.clone(),
        });
        self.records.push(MetadataRecord {
            id,
            title,
            description,
            owner: caller,
            timestamp: now,
            tags,
            file_hash,
            custom_fields: Default::default(),
        });
        id
    }

    /// Replaces the file hash of a record.
    pub fn update_file_hash(
        &mut self,
        caller: &Identity,
        id: RecordId,
        file_hash: String,
    ) -> Result<(), RegistryError> {
        let record = self.owned_mut(caller, id)?;
        record.file_hash = file_hash.clone();
        self.events
            .publish(RegistryEvent::FileHashUpdated { id, file_hash });
        Ok(())
    }

    /// Sets a custom field of a record, overwriting the previous value of the key.
    pub fn add_custom_field(
        &mut self,
        caller: &Identity,
        id: RecordId,
        key: String,
        value: String,
    ) -> Result<(), RegistryError> {
        let record = self.owned_mut(caller, id)?;
        record.custom_fields.insert(key.clone(), value.clone());
        self.events
            .publish(RegistryEvent::CustomFieldAdded { id, key, value });
        Ok(())
    }

    /// Reads the metadata of a record.
    pub fn get_metadata(&self, id: RecordId) -> Result<MetadataSnapshot, RegistryError> {
        self.record(id).map(MetadataSnapshot::from)
    }

    /// Reads a custom field of a record. Absent keys yield `None`.
    pub fn get_custom_field(
        &self,
        id: RecordId,
        key: &str,
    ) -> Result<Option<String>, RegistryError> {
        Ok(self.record(id)?.custom_fields.get(key).cloned())
    }

    /// The number of records ever created.
    pub fn get_metadata_count(&self) -> u64 {
        self.records.len() as u64
    }

    /// Applies an authenticated call on behalf of `caller`.
    pub fn apply(
        &mut self,
        caller: Identity,
        call: Call,
        now: DateTime<Utc>,
    ) -> Result<TxReceipt, RegistryError> {
        let id = match call {
            Call::CreateMetadata(metadata) => self.create_metadata(caller, metadata, now),
            Call::UpdateFileHash { id, file_hash } => {
                self.update_file_hash(&caller, id, file_hash)?;
                id
            }
            Call::AddCustomField { id, key, value } => {
                self.add_custom_field(&caller, id, key, value)?;
                id
            }
        };
        Ok(TxReceipt { id })
    }

    fn record(&self, id: RecordId) -> Result<&MetadataRecord, RegistryError> {
        self.records
            .get(id.0 as usize)
            .ok_or(RegistryError::NotFound(id))
    }

    // existence is checked before ownership, as a missing record has no owner
    fn owned_mut(
        &mut self,
        caller: &Identity,
        id: RecordId,
    ) -> Result<&mut MetadataRecord, RegistryError> {
        let record = self
            .records
            .get_mut(id.0 as usize)
            .ok_or(RegistryError::NotFound(id))?;
        if &record.owner != caller {
            return Err(RegistryError::Unauthorized {
                id,
                caller: *caller,
            });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use fedwatch_core::crypto::{ByteObject, SigningKeyPair, SigningKeySeed};

    fn identity(seed: u8) -> Identity {
        let mut bytes = [0_u8; 32];
        bytes[0] = seed;
        SigningKeyPair::derive_from_seed(&SigningKeySeed::from_slice(&bytes).unwrap()).public
    }

    fn registry() -> (MetadataRegistry, EventListener) {
        let (publisher, subscriber) = EventPublisher::new(16);
        (MetadataRegistry::new(publisher), subscriber)
    }

    fn metadata(title: &str) -> NewMetadata {
        NewMetadata {
            title: title.into(),
            description: "global model checkpoint".into(),
            tags: vec!["mnist".into(), "cnn".into()],
            file_hash: "hash-0".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp(1_700_000_000, 0)
    }

    #[test]
    fn test_ids_are_sequential_and_count_matches() {
        let (mut registry, _) = registry();
        assert_eq!(registry.get_metadata_count(), 0);
        let ids: Vec<RecordId> = (0..5)
            .map(|i| registry.create_metadata(identity(i % 2), metadata("m"), now()))
            .collect();
        assert_eq!(ids, (0..5).map(RecordId).collect::<Vec<_>>());
        assert_eq!(registry.get_metadata_count(), 5);
    }

    #[test]
    fn test_create_and_read() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        let id = registry.create_metadata(owner, metadata("round 3"), now());
        let snapshot = registry.get_metadata(id).unwrap();
        assert_eq!(snapshot.title, "round 3");
        assert_eq!(snapshot.owner, owner);
        assert_eq!(snapshot.timestamp, now());
        assert_eq!(snapshot.tags, vec!["mnist".to_string(), "cnn".to_string()]);
        assert_eq!(snapshot.file_hash, "hash-0");
    }

    #[test]
    fn test_empty_fields_are_accepted() {
        let (mut registry, _) = registry();
        let id = registry.create_metadata(identity(1), NewMetadata::default(), now());
        let snapshot = registry.get_metadata(id).unwrap();
        assert!(snapshot.title.is_empty());
        assert!(snapshot.tags.is_empty());
    }

    #[test]
    fn test_owner_updates() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        let id = registry.create_metadata(owner, metadata("m"), now());

        registry
            .update_file_hash(&owner, id, "hash-1".into())
            .unwrap();
        assert_eq!(registry.get_metadata(id).unwrap().file_hash, "hash-1");

        registry
            .add_custom_field(&owner, id, "license".into(), "MIT".into())
            .unwrap();
        registry
            .add_custom_field(&owner, id, "license".into(), "Apache-2.0".into())
            .unwrap();
        assert_eq!(
            registry.get_custom_field(id, "license").unwrap().as_deref(),
            Some("Apache-2.0")
        );
    }

    #[test]
    fn test_non_owner_writes_leave_record_unchanged() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        let intruder = identity(2);
        let id = registry.create_metadata(owner, metadata("m"), now());
        registry
            .add_custom_field(&owner, id, "stage".into(), "eval".into())
            .unwrap();
        let before = registry.records[0].clone();

        assert_eq!(
            registry.update_file_hash(&intruder, id, "evil".into()),
            Err(RegistryError::Unauthorized {
                id,
                caller: intruder
            })
        );
        assert_eq!(
            registry.add_custom_field(&intruder, id, "stage".into(), "prod".into()),
            Err(RegistryError::Unauthorized {
                id,
                caller: intruder
            })
        );
        assert_eq!(registry.records[0], before);
    }

    #[test]
    fn test_out_of_range_ids() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        registry.create_metadata(owner, metadata("m"), now());
        let missing = RecordId(1);

        assert_eq!(
            registry.get_metadata(missing),
            Err(RegistryError::NotFound(missing))
        );
        assert_eq!(
            registry.get_custom_field(missing, "k"),
            Err(RegistryError::NotFound(missing))
        );
        assert_eq!(
            registry.update_file_hash(&owner, missing, "h".into()),
            Err(RegistryError::NotFound(missing))
        );
        assert_eq!(
            registry.add_custom_field(&owner, missing, "k".into(), "v".into()),
            Err(RegistryError::NotFound(missing))
        );
        assert_eq!(registry.get_metadata_count(), 1);
    }

    #[test]
    fn test_absent_custom_field_is_distinct_from_empty() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        let id = registry.create_metadata(owner, metadata("m"), now());
        registry
            .add_custom_field(&owner, id, "empty".into(), "".into())
            .unwrap();
        assert_eq!(registry.get_custom_field(id, "absent").unwrap(), None);
        assert_eq!(
            registry.get_custom_field(id, "empty").unwrap(),
            Some(String::new())
        );
    }

    #[test]
    fn test_events_follow_successful_writes_only() {
        let (mut registry, mut listener) = registry();
        let owner = identity(1);
        let id = registry.create_metadata(owner, metadata("m"), now());
        let _ = registry.update_file_hash(&identity(2), id, "evil".into());
        registry
            .add_custom_field(&owner, id, "k".into(), "v".into())
            .unwrap();

        assert_eq!(
            listener.try_recv(),
            Some(RegistryEvent::MetadataCreated {
                id,
                owner,
                title: "m".into()
            })
        );
        assert_eq!(
            listener.try_recv(),
            Some(RegistryEvent::CustomFieldAdded {
                id,
                key: "k".into(),
                value: "v".into()
            })
        );
        assert_eq!(listener.try_recv(), None);
    }

    #[test]
    fn test_apply_dispatches_calls() {
        let (mut registry, _) = registry();
        let owner = identity(1);
        let receipt = registry
            .apply(owner, Call::CreateMetadata(metadata("m")), now())
            .unwrap();
        assert_eq!(receipt.id, RecordId(0));
        let receipt = registry
            .apply(
                owner,
                Call::UpdateFileHash {
                    id: RecordId(0),
                    file_hash: "h2".into(),
                },
                now(),
            )
            .unwrap();
        assert_eq!(receipt.id, RecordId(0));
        assert!(registry
            .apply(
                identity(2),
                Call::AddCustomField {
                    id: RecordId(0),
                    key: "k".into(),
                    value: "v".into()
                },
                now()
            )
            .is_err());
    }
}
