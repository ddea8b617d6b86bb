//! gRPC server module for the Tollgate rate limit service.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::{client_identifier, RateLimitServiceImpl};

// Include the generated protobuf code
pub mod proto {
    pub mod tollgate {
        pub mod v1 {
            tonic::include_proto!("tollgate.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::tollgate::v1::{
    rate_limit_service_client::RateLimitServiceClient,
    rate_limit_service_server::RateLimitServiceServer, CheckRequest, CheckResponse,
    ResetRequest, ResetResponse, UsageRequest, UsageResponse,
};
