use std::sync::Arc;

use bytes::Bytes;
use tonic::metadata::{KeyAndValueRef, MetadataMap};
use tonic::{Request, Response, Status};

use engine::{CallMode, CallStatus, Dispatcher};

use crate::GrpcOptions;

pub mod proto {
    tonic::include_proto!("nimbus.v1");
}

use proto::nimbus_server::{Nimbus, NimbusServer};
use proto::{Data, Response as Reply};

/// Metadata key selecting fire-and-forget dispatch when non-empty.
pub const ASYNC_METADATA: &str = "x-nimbus-async";

/// Transport-level metadata that describes the gRPC call, not the payload.
const RESERVED_METADATA: &[&str] = &["content-type", "te", "user-agent", "accept-encoding"];

pub struct NimbusService {
    dispatcher: Arc<Dispatcher>,
}

impl NimbusService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[tonic::async_trait]
impl Nimbus for NimbusService {
    async fn request(&self, request: Request<Data>) -> Result<Response<Reply>, Status> {
        let is_async = request
            .metadata()
            .get(ASYNC_METADATA)
            .is_some_and(|value| !value.is_empty());
        let headers = forwarded_metadata(request.metadata());
        let data = request.into_inner();

        let outcome = self
            .dispatcher
            .call(
                &data.function_identifier,
                Bytes::from(data.data),
                &headers,
                CallMode::from_async_flag(is_async),
            )
            .await;

        match outcome.status {
            CallStatus::Ok => Ok(Response::new(Reply {
                response: outcome.body.to_vec(),
            })),
            CallStatus::Accepted => Ok(Response::new(Reply::default())),
            CallStatus::NotFound => Err(Status::not_found(format!(
                "function {} not found",
                data.function_identifier
            ))),
            CallStatus::Error => Err(Status::internal(format!(
                "function {} failed",
                data.function_identifier
            ))),
        }
    }
}

/// ASCII metadata entries forwarded to the unit as headers.
fn forwarded_metadata(metadata: &MetadataMap) -> Vec<(String, String)> {
    metadata
        .iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => {
                let key = key.as_str();
                if key == ASYNC_METADATA
                    || key.starts_with("grpc-")
                    || RESERVED_METADATA.contains(&key)
                {
                    return None;
                }
                let value = value.to_str().ok()?;
                Some((key.to_string(), value.to_string()))
            }
            KeyAndValueRef::Binary(..) => None,
        })
        .collect()
}

pub async fn serve_grpc(dispatcher: Arc<Dispatcher>, options: GrpcOptions) -> Result<(), String> {
    tracing::info!("gRPC front-end listening on {}", options.addr);
    tonic::transport::Server::builder()
        .add_service(NimbusServer::new(NimbusService::new(dispatcher)))
        .serve(options.addr)
        .await
        .map_err(|err| format!("gRPC front-end exited: {}", err))
}
