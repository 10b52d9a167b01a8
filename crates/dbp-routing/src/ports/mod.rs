//! Ports Layer
//!
//! - Driving Ports (inbound) - request API for transport shims
//! - Driven Ports (outbound) - database drivers and configuration stores

pub mod inbound;
pub mod outbound;

pub use inbound::{
    CategoryRequest, MultiQueryRequest, QueryRequest, ReformRequest, RouterApi, TableRequest,
    TransactionRequest,
};
pub use outbound::{
    default_mock_handler, ConfigSource, DatabaseDriver, DriverFactory, ExecutedStatement,
    MockConfigSource, MockDriver, MockDriverFactory, MockHandler,
};
