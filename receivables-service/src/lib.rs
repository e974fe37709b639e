//! Receivables Service - Payment allocation and outstanding balances for the dairy back office.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
