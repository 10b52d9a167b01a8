//! # Data Router Service
//!
//! The request-facing service implementing [`RouterApi`].
//!
//! ## Architecture
//!
//! This service:
//! 1. Validates arguments and classifies statements before touching the map
//! 2. Reads the published shard map once per request from the [`ConfigWatcher`]
//! 3. Routes single-shard statements directly and fans multi-shard ones out
//!    through an [`crate::task::AggregatedTask`]
//! 4. Answers every request exactly once through its [`AnswerChannel`]

mod queries;
mod transactions;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::algorithms::StatementClassifier;
use crate::domain::{RouterConfig, RouterError, SplitType};
use crate::metrics;
use crate::ports::{
    CategoryRequest, ConfigSource, DriverFactory, MultiQueryRequest, QueryRequest,
    ReformRequest, RouterApi, TableRequest, TransactionRequest,
};
use crate::shard_map::ShardMap;
use crate::task::{Answer, AnswerChannel, AnswerError};
use crate::watcher::ConfigWatcher;

/// Sharding router: config watcher plus statement classifier.
pub struct DataRouter {
    watcher: ConfigWatcher,
    classifier: StatementClassifier,
}

impl DataRouter {
    /// Start the config watcher; requests answer `Unconfigured` until the
    /// first map is built.
    pub fn start(
        config: RouterConfig,
        sources: Vec<Box<dyn ConfigSource>>,
        factory: Arc<dyn DriverFactory>,
    ) -> Result<Self, RouterError> {
        let classifier = StatementClassifier::new(config.manager_mode);
        let watcher = ConfigWatcher::start(sources, config, factory)?;
        info!("[dbp] Data router started");
        Ok(Self {
            watcher,
            classifier,
        })
    }

    /// Config watcher.
    pub fn watcher(&self) -> &ConfigWatcher {
        &self.watcher
    }

    /// Drain and stop.
    pub fn shutdown(&self) {
        info!("[dbp] Data router shutting down");
        self.watcher.shutdown();
    }

    fn shard_map(&self) -> Result<Arc<ShardMap>, RouterError> {
        self.watcher.current().ok_or(RouterError::Unconfigured)
    }

    /// Only hash tables accept string keys.
    fn ensure_hash_table(map: &ShardMap, table: &str, cluster: &str) -> Result<(), RouterError> {
        match map.split_type(table, cluster) {
            Some(SplitType::Hash) => Ok(()),
            Some(SplitType::Range) => Err(RouterError::RangeStringHint),
            None => Err(RouterError::TableNotFound),
        }
    }

    fn answer_error(channel: &AnswerChannel, error: &RouterError) {
        metrics::record_rejection(error.code());
        channel.send_error(error);
    }
}

fn reject(error: RouterError) -> Answer {
    metrics::record_rejection(error.code());
    Err(AnswerError::from(error))
}

fn decode<T: DeserializeOwned>(method: &str, args: Value) -> Result<T, RouterError> {
    serde_json::from_value(args).map_err(|e| {
        debug!("[dbp] Bad arguments for {}: {}", method, e);
        RouterError::InvalidParameters
    })
}

impl RouterApi for DataRouter {
    fn query(&self, request: QueryRequest, channel: Arc<AnswerChannel>) {
        if request.hint_id < 0 {
            return Self::answer_error(&channel, &RouterError::NegativeHintId);
        }
        if let Err(e) = self.run_query(request, &channel) {
            Self::answer_error(&channel, &e);
        }
    }

    fn i_query(&self, request: MultiQueryRequest<i64>, channel: Arc<AnswerChannel>) {
        if request.hint_ids.iter().any(|&id| id < 0) {
            return Self::answer_error(&channel, &RouterError::NegativeHintId);
        }
        if let Err(e) = self.run_int_query(request, &channel) {
            Self::answer_error(&channel, &e);
        }
    }

    fn s_query(&self, request: MultiQueryRequest<String>, channel: Arc<AnswerChannel>) {
        if let Err(e) = self.run_string_query(request, &channel) {
            Self::answer_error(&channel, &e);
        }
    }

    fn split_info(&self, request: TableRequest) -> Answer {
        let map = self.shard_map().map_err(AnswerError::from)?;
        match map.split_info(&request.table_name, &request.cluster) {
            Ok(info) => Ok(info.to_json()),
            Err(_) => reject(RouterError::TableNotFound),
        }
    }

    fn category_info(&self, request: CategoryRequest) -> Answer {
        let map = self.shard_map().map_err(AnswerError::from)?;
        match map.category_info(&request.database_category, &request.cluster) {
            Ok(info) => Ok(info.to_json()),
            Err(_) => reject(RouterError::TableNotFound),
        }
    }

    fn reform_hint_ids(&self, request: ReformRequest) -> Answer {
        if request.hint_ids.is_empty() {
            return Ok(json!({"hintPairs": [], "invalidIds": []}));
        }
        let map = self.shard_map().map_err(AnswerError::from)?;
        match map.reform_shard_keys(&request.table_name, &request.cluster, &request.hint_ids) {
            Ok(reformed) => Ok(reformed.to_json()),
            Err(_) => reject(RouterError::TableNotFound),
        }
    }

    fn all_split_hint_ids(&self, request: TableRequest) -> Answer {
        let map = self.shard_map().map_err(AnswerError::from)?;
        match map.all_shard_keys(&request.table_name, &request.cluster) {
            Ok(keys) => Ok(json!({ "hintIds": keys })),
            Err(_) => reject(RouterError::TableNotFound),
        }
    }

    fn transaction(&self, request: TransactionRequest<i64>, channel: Arc<AnswerChannel>) {
        if request.hint_ids.iter().any(|&id| id < 0) {
            return Self::answer_error(&channel, &RouterError::NegativeHintId);
        }
        self.run_transaction(request, channel);
    }

    fn s_transaction(&self, request: TransactionRequest<String>, channel: Arc<AnswerChannel>) {
        self.run_string_transaction(request, channel);
    }

    fn refresh(&self) -> Answer {
        self.watcher.refresh();
        Ok(json!({}))
    }

    fn infos(&self) -> Value {
        self.watcher.status()
    }

    fn dispatch(&self, method: &str, args: Value, channel: Arc<AnswerChannel>) {
        metrics::record_request(method);
        let outcome = match method {
            "query" => decode(method, args).map(|r| self.query(r, Arc::clone(&channel))),
            "iQuery" => decode(method, args).map(|r| self.i_query(r, Arc::clone(&channel))),
            "sQuery" => decode(method, args).map(|r| self.s_query(r, Arc::clone(&channel))),
            "transaction" => {
                decode(method, args).map(|r| self.transaction(r, Arc::clone(&channel)))
            }
            "sTransaction" => {
                decode(method, args).map(|r| self.s_transaction(r, Arc::clone(&channel)))
            }
            "splitInfo" => decode(method, args).map(|r| {
                channel.send(self.split_info(r));
            }),
            "categoryInfo" => decode(method, args).map(|r| {
                channel.send(self.category_info(r));
            }),
            "reformHintIds" => decode(method, args).map(|r| {
                channel.send(self.reform_hint_ids(r));
            }),
            "allSplitHintIds" => decode(method, args).map(|r| {
                channel.send(self.all_split_hint_ids(r));
            }),
            "refresh" => {
                channel.send(self.refresh());
                Ok(())
            }
            "infos" => {
                channel.send_ok(self.infos());
                Ok(())
            }
            unknown => Err(RouterError::Disabled(format!("Unknown method: {unknown}"))),
        };
        if let Err(e) = outcome {
            Self::answer_error(&channel, &e);
        }
    }
}
