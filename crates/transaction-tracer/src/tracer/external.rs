// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parameters describing an outbound call, and the metric names they produce.

use derive_more::Display;
use hyper::Uri;

use crate::error::TracerError;
use crate::tracer::attributes::AttributeValue;

const UNKNOWN_HOST: &str = "Unknown";
const UNKNOWN_INSTANCE: &str = "unknown";
const LOOPBACK_HOSTS: [&str; 4] = ["localhost", "127.0.0.1", "0.0.0.0", "::1"];

/// Response of a traced remote application, for cross-process calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossProcessResponse {
    pub transaction_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParameters {
    pub library: String,
    pub uri: String,
    pub procedure: String,
    pub cross_process: Option<CrossProcessResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParameters {
    pub library: String,
    pub uri: String,
    pub procedure: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatastoreParameters {
    pub vendor: String,
    pub collection: Option<String>,
    pub operation: String,
    pub host: Option<String>,
    pub port_path_or_id: Option<String>,
    pub database_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationType {
    NamedQueue,
    TemporaryQueue,
    NamedTopic,
    TemporaryTopic,
    Exchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum DestinationKind {
    #[display("Queue")]
    Queue,
    #[display("Topic")]
    Topic,
    #[display("Exchange")]
    Exchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum MessageAction {
    #[display("Produce")]
    Produce,
    #[display("Consume")]
    Consume,
}

impl DestinationType {
    fn kind(self) -> DestinationKind {
        match self {
            DestinationType::NamedQueue | DestinationType::TemporaryQueue => DestinationKind::Queue,
            DestinationType::NamedTopic | DestinationType::TemporaryTopic => DestinationKind::Topic,
            DestinationType::Exchange => DestinationKind::Exchange,
        }
    }

    fn is_temporary(self) -> bool {
        matches!(
            self,
            DestinationType::TemporaryQueue | DestinationType::TemporaryTopic
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageParameters {
    pub library: String,
    pub destination_type: DestinationType,
    pub destination_name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudParameters {
    pub platform: String,
    pub resource_id: Option<String>,
}

/// What an outbound call was, as reported by instrumentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalParameters {
    Http(HttpParameters),
    Datastore(DatastoreParameters),
    Generic(GenericParameters),
    MessageProduce(MessageParameters),
    MessageConsume(MessageParameters),
    Cloud(CloudParameters),
}

/// Metric names and attributes produced by one reported call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalMetrics {
    /// Replaces the tracer's own metric name when set.
    pub scoped: Option<String>,
    /// Name of the trace segment, when it differs from the scoped metric.
    pub segment_name: Option<String>,
    pub unscoped: Vec<String>,
    pub agent_attributes: Vec<(&'static str, AttributeValue)>,
}

fn parse_uri(uri: &str) -> Result<Uri, TracerError> {
    let parsed: Uri = uri.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        TracerError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        }
    })?;
    if parsed.scheme().is_none() || parsed.host().is_none() {
        return Err(TracerError::InvalidUri {
            uri: uri.to_string(),
            reason: "missing scheme or host".to_string(),
        });
    }
    Ok(parsed)
}

fn uri_host(uri: &str) -> String {
    parse_uri(uri)
        .ok()
        .and_then(|parsed| parsed.host().map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn web_suffix(is_web: bool) -> &'static str {
    if is_web {
        "allWeb"
    } else {
        "allOther"
    }
}

fn external_rollups(host: &str, is_web: bool) -> Vec<String> {
    vec![
        "External/all".to_string(),
        format!("External/{}", web_suffix(is_web)),
        format!("External/{host}/all"),
    ]
}

impl ExternalParameters {
    /// Checks the shape of the parameters. Malformed input is reported, never fatal.
    pub fn validate(&self) -> Result<(), TracerError> {
        match self {
            ExternalParameters::Http(HttpParameters { uri, .. })
            | ExternalParameters::Generic(GenericParameters { uri, .. }) => {
                parse_uri(uri).map(|_| ())
            }
            ExternalParameters::Datastore(_)
            | ExternalParameters::MessageProduce(_)
            | ExternalParameters::MessageConsume(_)
            | ExternalParameters::Cloud(_) => Ok(()),
        }
    }

    /// Metric names recorded when the reporting tracer finishes.
    ///
    /// `host_name` replaces loopback datastore hosts.
    #[must_use]
    pub fn metrics(&self, is_web: bool, host_name: &str) -> ExternalMetrics {
        match self {
            ExternalParameters::Http(http) => http_metrics(http, is_web),
            ExternalParameters::Generic(generic) => {
                let host = uri_host(&generic.uri);
                ExternalMetrics {
                    scoped: Some(format!("External/{host}/{}", generic.library)),
                    segment_name: Some(format!(
                        "External/{host}/{}/{}",
                        generic.library, generic.procedure
                    )),
                    unscoped: external_rollups(&host, is_web),
                    agent_attributes: vec![("http.url", generic.uri.as_str().into())],
                }
            }
            ExternalParameters::Datastore(datastore) => {
                datastore_metrics(datastore, is_web, host_name)
            }
            ExternalParameters::MessageProduce(message) => {
                message_metrics(message, MessageAction::Produce)
            }
            ExternalParameters::MessageConsume(message) => {
                message_metrics(message, MessageAction::Consume)
            }
            ExternalParameters::Cloud(cloud) => {
                let mut agent_attributes: Vec<(&'static str, AttributeValue)> =
                    vec![("cloud.platform", cloud.platform.as_str().into())];
                if let Some(resource_id) = &cloud.resource_id {
                    agent_attributes.push(("cloud.resource_id", resource_id.as_str().into()));
                }
                ExternalMetrics {
                    agent_attributes,
                    ..Default::default()
                }
            }
        }
    }
}

fn http_metrics(http: &HttpParameters, is_web: bool) -> ExternalMetrics {
    let host = uri_host(&http.uri);
    let mut unscoped = external_rollups(&host, is_web);
    let scoped = match &http.cross_process {
        Some(response) => {
            unscoped.push(format!("ExternalApp/{host}/all"));
            format!("ExternalTransaction/{host}/{}", response.transaction_name)
        }
        None => format!("External/{host}/{}", http.library),
    };
    let segment_name = match &http.cross_process {
        Some(_) => scoped.clone(),
        None => format!("External/{host}/{}/{}", http.library, http.procedure),
    };
    ExternalMetrics {
        scoped: Some(scoped),
        segment_name: Some(segment_name),
        unscoped,
        agent_attributes: vec![
            ("http.url", http.uri.as_str().into()),
            ("http.method", http.procedure.as_str().into()),
        ],
    }
}

fn datastore_metrics(
    datastore: &DatastoreParameters,
    is_web: bool,
    host_name: &str,
) -> ExternalMetrics {
    let vendor = &datastore.vendor;
    let suffix = web_suffix(is_web);
    let scoped = match &datastore.collection {
        Some(collection) => format!(
            "Datastore/statement/{vendor}/{collection}/{}",
            datastore.operation
        ),
        None => format!("Datastore/operation/{vendor}/{}", datastore.operation),
    };
    let mut unscoped = vec![
        "Datastore/all".to_string(),
        format!("Datastore/{suffix}"),
        format!("Datastore/{vendor}/all"),
        format!("Datastore/{vendor}/{suffix}"),
    ];

    let mut agent_attributes: Vec<(&'static str, AttributeValue)> = Vec::new();
    if datastore.host.is_some() || datastore.port_path_or_id.is_some() {
        let host = match datastore.host.as_deref() {
            Some(host) if LOOPBACK_HOSTS.contains(&host) => host_name,
            Some(host) => host,
            None => UNKNOWN_INSTANCE,
        };
        let port = datastore
            .port_path_or_id
            .as_deref()
            .unwrap_or(UNKNOWN_INSTANCE);
        unscoped.push(format!("Datastore/instance/{vendor}/{host}/{port}"));
        agent_attributes.push(("peer.hostname", host.into()));
        agent_attributes.push(("peer.address", format!("{host}:{port}").into()));
    }
    if let Some(database_name) = &datastore.database_name {
        agent_attributes.push(("db.instance", database_name.as_str().into()));
    }

    ExternalMetrics {
        scoped: Some(scoped),
        segment_name: None,
        unscoped,
        agent_attributes,
    }
}

fn message_metrics(message: &MessageParameters, action: MessageAction) -> ExternalMetrics {
    let kind = message.destination_type.kind();
    let destination = if message.destination_type.is_temporary() {
        "Temp".to_string()
    } else {
        format!("Named/{}", message.destination_name)
    };
    let mut agent_attributes: Vec<(&'static str, AttributeValue)> = Vec::new();
    if let Some(host) = &message.host {
        agent_attributes.push(("server.address", host.as_str().into()));
    }
    if let Some(port) = message.port {
        agent_attributes.push(("server.port", i64::from(port).into()));
    }
    ExternalMetrics {
        scoped: Some(format!(
            "MessageBroker/{}/{kind}/{action}/{destination}",
            message.library
        )),
        segment_name: None,
        unscoped: Vec::new(),
        agent_attributes,
    }
}
