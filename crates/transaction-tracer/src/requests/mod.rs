// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod grammar;
pub mod merger;

pub use grammar::{DatastoreRequest, ExternalRequest, RequestKind, RequestRecord};
pub use merger::{RequestMerger, RequestTable};
