//! A HTTP API for the training dashboard and the metadata registry.

use std::convert::Infallible;

use serde::Serialize;
use tracing::{error, warn};
use warp::{
    http::StatusCode,
    reply::{Json, WithStatus},
    Filter,
    Reply,
};

use crate::{
    registry::{RegistryError, RegistryHandle, ServiceError},
    settings::ApiSettings,
    storage::AuditStore,
    training::{TrainingError, TrainingSupervisor},
};
use fedwatch_core::{
    registry::{SignedTransaction, TransactionError},
    Ack,
    RecordId,
    RoundReport,
    TrainingConfig,
};

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Serialize)]
struct CountBody {
    count: u64,
}

#[derive(Serialize)]
struct FieldBody {
    value: Option<String>,
}

/// Starts a HTTP server at the given address.
///
/// * `api_settings`: address of the server.
/// * `store`: the audit log served under `/api/ledger` and `/api/blockchain`.
/// * `supervisor`: the training supervisor behind the status and training control routes.
/// * `registry`: handle to the metadata registry served under `/api/registry`.
pub async fn serve<S: AuditStore>(
    api_settings: ApiSettings,
    store: S,
    supervisor: TrainingSupervisor<S>,
    registry: RegistryHandle,
) {
    warp::serve(routes(store, supervisor, registry))
        .run(api_settings.bind_address)
        .await
}

/// Builds all routes of the API.
pub fn routes<S: AuditStore>(
    store: S,
    supervisor: TrainingSupervisor<S>,
    registry: RegistryHandle,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let ledger = warp::path!("api" / "ledger")
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(handle_ledger);

    let blockchain = warp::path!("api" / "blockchain")
        .and(warp::get())
        .and(with_store(store.clone()))
        .and_then(handle_blockchain);

    let status = warp::path!("api" / "status")
        .or(warp::path!("api" / "flower" / "status"))
        .unify()
        .and(warp::get())
        .and(with_supervisor(supervisor.clone()))
        .and_then(handle_status);

    let train = warp::path!("api" / "train")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_supervisor(supervisor.clone()))
        .and_then(handle_train);

    let stop = warp::path!("api" / "stop")
        .and(warp::post())
        .and(with_supervisor(supervisor))
        .and_then(handle_stop);

    let rounds = warp::path!("api" / "rounds")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_store(store))
        .and_then(handle_round);

    let transactions = warp::path!("api" / "registry" / "transactions")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry(registry.clone()))
        .and_then(handle_transaction);

    let count = warp::path!("api" / "registry" / "records" / "count")
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .and_then(handle_count);

    let record = warp::path!("api" / "registry" / "records" / u64)
        .and(warp::get())
        .and(with_registry(registry.clone()))
        .and_then(handle_record);

    let field = warp::path!("api" / "registry" / "records" / u64 / "fields" / String)
        .and(warp::get())
        .and(with_registry(registry))
        .and_then(handle_field);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    ledger
        .or(blockchain)
        .or(status)
        .or(train)
        .or(stop)
        .or(rounds)
        .or(transactions)
        .or(count)
        .or(record)
        .or(field)
        .with(cors)
        .recover(handle_reject)
        .with(warp::log("http"))
}

fn json<T: Serialize>(value: &T) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(value), StatusCode::OK)
}

fn failure(code: StatusCode, detail: impl ToString) -> WithStatus<Json> {
    let body = ErrorBody {
        detail: detail.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), code)
}

/// Handles and responds to a request for the training ledger.
async fn handle_ledger<S: AuditStore>(mut store: S) -> Result<impl Reply, Infallible> {
    Ok(match store.ledger().await {
        Ok(ledger) => json(&ledger),
        Err(e) => {
            warn!("failed to handle ledger request: {:?}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to read the ledger")
        }
    })
}

/// Handles and responds to a request for the audit chain.
async fn handle_blockchain<S: AuditStore>(mut store: S) -> Result<impl Reply, Infallible> {
    Ok(match store.blocks().await {
        Ok(blocks) => json(&blocks),
        Err(e) => {
            warn!("failed to handle blockchain request: {:?}", e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to read the audit chain",
            )
        }
    })
}

async fn handle_status<S: AuditStore>(
    supervisor: TrainingSupervisor<S>,
) -> Result<impl Reply, Infallible> {
    Ok(json(&supervisor.status().await))
}

/// Handles and responds to a request to start training.
async fn handle_train<S: AuditStore>(
    config: TrainingConfig,
    supervisor: TrainingSupervisor<S>,
) -> Result<impl Reply, Infallible> {
    Ok(match supervisor.start(config).await {
        Ok(()) => json(&Ack::started(&config)),
        Err(e @ TrainingError::AlreadyRunning) | Err(e @ TrainingError::InvalidConfig(_)) => {
            failure(StatusCode::BAD_REQUEST, e)
        }
        Err(e) => {
            warn!("failed to start training: {}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    })
}

async fn handle_stop<S: AuditStore>(
    supervisor: TrainingSupervisor<S>,
) -> Result<impl Reply, Infallible> {
    supervisor.stop().await;
    Ok(json(&Ack::stopped()))
}

/// Handles and responds to a report of a finished round.
async fn handle_round<S: AuditStore>(
    report: RoundReport,
    mut store: S,
) -> Result<impl Reply, Infallible> {
    Ok(match store.log_round(report).await {
        Ok(entry) => json(&entry),
        Err(e) => {
            warn!("failed to log round: {:?}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to log the round")
        }
    })
}

/// Handles and responds to a signed registry transaction.
async fn handle_transaction(
    tx: SignedTransaction,
    registry: RegistryHandle,
) -> Result<impl Reply, Infallible> {
    Ok(match registry.submit(tx).await {
        Ok(receipt) => json(&receipt),
        Err(e) => registry_failure(e),
    })
}

async fn handle_count(registry: RegistryHandle) -> Result<impl Reply, Infallible> {
    Ok(match registry.count().await {
        Ok(count) => json(&CountBody { count }),
        Err(e) => registry_failure(e),
    })
}

async fn handle_record(id: u64, registry: RegistryHandle) -> Result<impl Reply, Infallible> {
    Ok(match registry.metadata(RecordId(id)).await {
        Ok(snapshot) => json(&snapshot),
        Err(e) => registry_failure(e),
    })
}

async fn handle_field(
    id: u64,
    key: String,
    registry: RegistryHandle,
) -> Result<impl Reply, Infallible> {
    Ok(match registry.custom_field(RecordId(id), key).await {
        Ok(value) => json(&FieldBody { value }),
        Err(e) => registry_failure(e),
    })
}

fn registry_failure(err: ServiceError) -> WithStatus<Json> {
    let code = match &err {
        ServiceError::Transaction(TransactionError::InvalidSignature) => StatusCode::UNAUTHORIZED,
        ServiceError::Transaction(TransactionError::Encoding(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Registry(RegistryError::Unauthorized { .. }) => StatusCode::FORBIDDEN,
        ServiceError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Shutdown => {
            error!("registry request failed: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    failure(code, err)
}

/// Converts an audit store into a `warp` filter.
fn with_store<S: AuditStore>(
    store: S,
) -> impl Filter<Extract = (S,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

/// Converts a training supervisor into a `warp` filter.
fn with_supervisor<S: AuditStore>(
    supervisor: TrainingSupervisor<S>,
) -> impl Filter<Extract = (TrainingSupervisor<S>,), Error = Infallible> + Clone {
    warp::any().map(move || supervisor.clone())
}

/// Converts a registry handle into a `warp` filter.
fn with_registry(
    registry: RegistryHandle,
) -> impl Filter<Extract = (RegistryHandle,), Error = Infallible> + Clone {
    warp::any().map(move || registry.clone())
}

/// Handles `warp` rejections of bad requests.
async fn handle_reject(err: warp::Rejection) -> Result<impl Reply, Infallible> {
    let code = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if let Some(e) = err.find::<warp::body::BodyDeserializeError>() {
        return Ok(failure(StatusCode::BAD_REQUEST, e));
    } else if err.find::<warp::cors::CorsForbidden>().is_some() {
        StatusCode::FORBIDDEN
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        error!("unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(failure(code, code.canonical_reason().unwrap_or_default()))
}
