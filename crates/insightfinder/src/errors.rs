// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised by the metric store or the backend underneath it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("metric backend failure: {0}")]
    Backend(String),

    #[error("metric store could not be cleared after {attempts} attempts")]
    PersistentClearFailure { attempts: u32 },
}

/// Errors raised while turning the store into request bodies and delivering them.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to prepare payload: {0}")]
    Payload(String),

    #[error("payload of {size} bytes exceeds the maximum packet size of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("error shipping data: {1}")]
    Destination(Option<StatusCode>, String),

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ShippingError {
    /// Whether the failure ends the round's delivery with nothing left to retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PayloadTooLarge { .. } | Self::Destination(..) | Self::Client(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ShippingError::PayloadTooLarge {
            size: 11,
            max: 10,
        };
        assert_eq!(
            error.to_string(),
            "payload of 11 bytes exceeds the maximum packet size of 10 bytes"
        );

        let error = StoreError::PersistentClearFailure { attempts: 3 };
        assert_eq!(
            error.to_string(),
            "metric store could not be cleared after 3 attempts"
        );
    }

    #[test]
    fn test_store_error_converts_into_shipping_error() {
        let error: ShippingError = StoreError::Backend("disk gone".to_string()).into();
        assert!(matches!(error, ShippingError::Store(_)));
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_fatal_variants() {
        assert!(ShippingError::PayloadTooLarge { size: 2, max: 1 }.is_fatal());
        assert!(ShippingError::Destination(None, "down".into()).is_fatal());
        assert!(!ShippingError::Payload("bad".into()).is_fatal());
    }
}
