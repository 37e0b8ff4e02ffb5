// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Round-scoped metric storage and delivery to the InsightFinder metric
//! receiver.
//!
//! Collectors write into a [`store::MetricStore`]; once a round is collected a
//! [`flusher::Flusher`] walks the store, splits it into size-bounded chunks
//! and posts each chunk with retries.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod api;
pub mod chunker;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod http;
pub mod payload;
pub mod store;
pub mod util;
