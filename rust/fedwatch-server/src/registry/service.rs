//! This module provides the [`RegistryService`] that owns the [`MetadataRegistry`] and the
//! [`RegistryHandle`] used to send it requests.
//!
//! All writes go through a single task, one at a time, in the order the requests arrive. A write
//! is confirmed once its response has been received.

use chrono::Utc;
use displaydoc::Display;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn, Span};

use super::{EventPublisher, MetadataRegistry, RegistryError};
use fedwatch_core::{
    registry::{SignedTransaction, TransactionError, TxReceipt},
    MetadataSnapshot,
    RecordId,
};

/// Errors which can occur while the service handles a request.
#[derive(Debug, Display, Error)]
pub enum ServiceError {
    /// The transaction was rejected: {0}.
    Transaction(#[from] TransactionError),
    /// {0}
    Registry(#[from] RegistryError),
    /// The registry service is shutting down.
    Shutdown,
}

#[derive(Debug)]
enum Request {
    Submit(SignedTransaction, oneshot::Sender<Result<TxReceipt, ServiceError>>),
    Metadata(RecordId, oneshot::Sender<Result<MetadataSnapshot, RegistryError>>),
    CustomField(
        RecordId,
        String,
        oneshot::Sender<Result<Option<String>, RegistryError>>,
    ),
    Count(oneshot::Sender<u64>),
}

/// A handle to send requests to the [`RegistryService`].
#[derive(Clone, Debug)]
pub struct RegistryHandle(mpsc::UnboundedSender<(Request, Span)>);

impl RegistryHandle {
    /// Verifies a signed transaction and applies it.
    ///
    /// # Errors
    /// Fails if the signature does not match, if the call is not allowed for the signer or if the
    /// service has shut down.
    pub async fn submit(&self, tx: SignedTransaction) -> Result<TxReceipt, ServiceError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(Request::Submit(tx, resp_tx))?;
        resp_rx.await.map_err(|_| ServiceError::Shutdown)?
    }

    /// Reads the metadata of a record.
    pub async fn metadata(&self, id: RecordId) -> Result<MetadataSnapshot, ServiceError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(Request::Metadata(id, resp_tx))?;
        Ok(resp_rx.await.map_err(|_| ServiceError::Shutdown)??)
    }

    /// Reads a custom field of a record.
    pub async fn custom_field(
        &self,
        id: RecordId,
        key: String,
    ) -> Result<Option<String>, ServiceError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(Request::CustomField(id, key, resp_tx))?;
        Ok(resp_rx.await.map_err(|_| ServiceError::Shutdown)??)
    }

    /// Reads the number of records.
    pub async fn count(&self) -> Result<u64, ServiceError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(Request::Count(resp_tx))?;
        resp_rx.await.map_err(|_| ServiceError::Shutdown)
    }

    fn send(&self, req: Request) -> Result<(), ServiceError> {
        self.0
            .send((req, Span::current()))
            .map_err(|_| ServiceError::Shutdown)
    }
}

/// The task owning the registry.
pub struct RegistryService {
    registry: MetadataRegistry,
    requests: mpsc::UnboundedReceiver<(Request, Span)>,
}

impl RegistryService {
    /// Creates the service and a handle to it.
    pub fn new(events: EventPublisher) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            registry: MetadataRegistry::new(events),
            requests: rx,
        };
        (service, RegistryHandle(tx))
    }

    /// Serves requests until every handle has been dropped.
    pub async fn run(mut self) {
        while let Some((req, span)) = self.requests.recv().await {
            let _enter = span.enter();
            self.handle(req);
        }
        info!("registry service shut down");
    }

    fn handle(&mut self, req: Request) {
        match req {
            Request::Submit(tx, resp) => {
                let result = self.submit(tx);
                if let Err(err) = &result {
                    warn!("registry transaction failed: {}", err);
                }
                let _ = resp.send(result);
            }
            Request::Metadata(id, resp) => {
                let _ = resp.send(self.registry.get_metadata(id));
            }
            Request::CustomField(id, key, resp) => {
                let _ = resp.send(self.registry.get_custom_field(id, &key));
            }
            Request::Count(resp) => {
                let _ = resp.send(self.registry.get_metadata_count());
            }
        }
    }

    fn submit(&mut self, tx: SignedTransaction) -> Result<TxReceipt, ServiceError> {
        let (caller, call) = tx.verify()?;
        debug!("applying {:?} for {}", call, caller);
        Ok(self.registry.apply(caller, call, Utc::now())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedwatch_core::{
        crypto::SigningKeyPair,
        registry::{Call, NewMetadata},
    };

    fn spawn_service() -> RegistryHandle {
        let (publisher, _) = EventPublisher::new(16);
        let (service, handle) = RegistryService::new(publisher);
        tokio::spawn(service.run());
        handle
    }

    fn create(keys: &SigningKeyPair) -> SignedTransaction {
        SignedTransaction::sign(
            Call::CreateMetadata(NewMetadata {
                title: "model".into(),
                file_hash: "h0".into(),
                ..Default::default()
            }),
            keys,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_signed_writes_are_applied() {
        let handle = spawn_service();
        let owner = SigningKeyPair::generate();

        let receipt = handle.submit(create(&owner)).await.unwrap();
        assert_eq!(receipt.id, RecordId(0));
        let tx = SignedTransaction::sign(
            Call::AddCustomField {
                id: receipt.id,
                key: "accuracy".into(),
                value: "0.91".into(),
            },
            &owner,
        )
        .unwrap();
        handle.submit(tx).await.unwrap();

        assert_eq!(handle.count().await.unwrap(), 1);
        assert_eq!(
            handle.metadata(receipt.id).await.unwrap().owner,
            owner.public
        );
        assert_eq!(
            handle
                .custom_field(receipt.id, "accuracy".into())
                .await
                .unwrap()
                .as_deref(),
            Some("0.91")
        );
    }

    #[tokio::test]
    async fn test_forged_and_foreign_writes_are_rejected() {
        let handle = spawn_service();
        let owner = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let id = handle.submit(create(&owner)).await.unwrap().id;

        let mut forged = SignedTransaction::sign(
            Call::UpdateFileHash {
                id,
                file_hash: "h1".into(),
            },
            &other,
        )
        .unwrap();
        forged.signer = owner.public;
        assert!(matches!(
            handle.submit(forged).await,
            Err(ServiceError::Transaction(TransactionError::InvalidSignature))
        ));

        let foreign = SignedTransaction::sign(
            Call::UpdateFileHash {
                id,
                file_hash: "h1".into(),
            },
            &other,
        )
        .unwrap();
        assert!(matches!(
            handle.submit(foreign).await,
            Err(ServiceError::Registry(RegistryError::Unauthorized { .. }))
        ));
        assert_eq!(handle.metadata(id).await.unwrap().file_hash, "h0");
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_ids() {
        let handle = spawn_service();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    let keys = SigningKeyPair::generate();
                    handle.submit(create(&keys)).await.unwrap().id
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (0..10).map(RecordId).collect::<Vec<_>>());
        assert_eq!(handle.count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let handle = spawn_service();
        assert!(matches!(
            handle.metadata(RecordId(7)).await,
            Err(ServiceError::Registry(RegistryError::NotFound(RecordId(7))))
        ));
    }
}
