// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delay policies used to pace retries.
//!
//! [`DecorrelatedJitter`] paces retries of a logical call and the time a removed instance
//! stays out of rotation. Directory polling uses a separate exponential policy keyed on the
//! failure streak.

mod decorrelated;
mod exponential;

pub use decorrelated::DecorrelatedJitter;
pub(crate) use exponential::ErrorBackoff;
