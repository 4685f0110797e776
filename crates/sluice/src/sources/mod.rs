//! In-memory source drivers.
//!
//! The protocol core never reads a storage format. These drivers exist so the
//! server has something to serve out of the box and so tests can exercise the
//! protocol against real handles:
//!
//! - [`RangeSource`] - an `arange`-style ndarray (`driver = "range"`).
//! - [`RecordsSource`] - an inline table (`driver = "records"`).
//! - [`IterSource`] - a single-pass source over any chunk iterator.

mod iter;
mod range;
mod records;

pub use iter::*;
pub use range::*;
pub use records::*;

use crate::{Error, Parameters, Result};
use serde::de::DeserializeOwned;

/// Overlays user parameters on top of catalog arguments and deserializes the
/// result into a driver's argument struct.
pub(crate) fn merge_args<T: DeserializeOwned>(args: &Parameters, params: &Parameters) -> Result<T> {
    let mut merged = args.clone();
    for (key, value) in params {
        merged.insert(key.clone(), value.clone());
    }
    serde_json::from_value(serde_json::Value::Object(merged))
        .map_err(|e| Error::invalid_parameters(e.to_string()))
}
