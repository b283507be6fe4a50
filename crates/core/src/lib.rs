//! Batch HTTP fetching on an elastic worker queue.
//!
//! Requests are pushed as jobs onto a remote queue service, executed there
//! with bounded parallelism, and their outcomes are collected back and
//! returned in input order.

pub mod capacity;
pub mod codec;
pub mod config;
pub mod connection;
pub mod fetcher;
pub mod metrics;
pub mod queue;
pub mod request;
pub mod response;
pub mod testing;

pub use capacity::{
    CapacityError, CapacityReservation, CapacityService, ReservationId, ReservationSpec,
};
pub use codec::{CodecError, TransportCodec, DEFAULT_COMPRESSION_LEVEL};
pub use config::{
    load_config, load_config_from_str, load_default_config, validate_config, CapacityConfig,
    CodecConfig, Config, ConfigError,
};
pub use connection::{Connection, ConnectionConfig, ConnectionError, RequestInput, SessionQueues};
pub use fetcher::{FetchJobHandler, Fetcher, FetcherError, HttpConfig, ReqwestFetcher};
pub use queue::{
    AttachOptions, JobError, JobHandler, LocalQueueService, QueueError, QueueHandle, QueueInfo,
    QueueService,
};
pub use request::{CallbackRegistry, HttpMethod, Request, RequestBuilder, RequestError};
pub use response::{ErrorResponse, FailureKind, FetchFailure, Outcome, Response};
