// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry budgets.
//!
//! A [`RetryBudget`] bounds how many retries a client issues relative to its original
//! requests, so that a struggling backend is not hit by an ever-growing wave of retries.
//! It is built on [`TokenLedger`], a sliding-window balance of credits and debits.

mod ledger;
mod retry_budget;

pub use ledger::TokenLedger;
pub use retry_budget::RetryBudget;
