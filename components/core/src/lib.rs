pub mod error;
pub mod facade;
pub mod fetcher;
pub mod finalizer;
pub mod metrics;
pub mod processor;
pub mod reorg;
pub mod search;
pub mod service;

pub use error::CoreError;
pub use facade::{
    create_deploy_order, estimate_smart_fee, get_order_status, list_orders_by_receive_address,
    CreateDeployOrderParams, FeeEstimateResult,
};
pub use metrics::Metrics;
pub use search::{classify_search, SearchKind};
pub use service::Service;
